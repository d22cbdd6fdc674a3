//! Cleanup passes applied to `htmd` output.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Text-only passes, applied in order after links are resolved.
const TEXT_PASSES: [fn(&str) -> String; 5] = [
    normalize_headings,
    strip_leftover_html,
    normalize_whitespace,
    clean_blank_lines,
    ensure_trailing_newline,
];

/// Images out, links absolute, then the text passes.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let linked = resolve_links(&strip_images(md), base_url);
    TEXT_PASSES.iter().fold(linked, |acc, pass| pass(&acc))
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Remove Markdown image syntax that slipped past the tag filter.
///
/// Linked images (`[![alt](src)](href)`) keep their outer link with the alt text.
fn strip_images(md: &str) -> String {
    static IMG_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").expect("valid regex"));
    static EMPTY_LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[\s*\]\([^)]*\)").expect("valid regex"));

    let without = IMG_RE.replace_all(md, "$1");
    EMPTY_LINK_RE.replace_all(&without, "").to_string()
}

// ---------------------------------------------------------------------------
// Headings
// ---------------------------------------------------------------------------

/// Demote every H1 after the first to H2.
fn normalize_headings(md: &str) -> String {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^#\s+(.+)$").expect("valid regex"));

    let mut seen_h1 = false;
    md.lines()
        .map(|line| match H1_RE.captures(line) {
            Some(caps) if seen_h1 => format!("## {}", &caps[1]),
            Some(_) => {
                seen_h1 = true;
                line.to_string()
            }
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Leftover HTML
// ---------------------------------------------------------------------------

/// Remove stray layout tags that survived conversion, keeping their text.
///
/// Fenced code is left untouched.
fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|figure|figcaption|details|summary|p|font|center)(?:\s[^>]*)?/?>")
            .expect("valid regex")
    });

    let mut in_code_block = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Make relative link targets absolute against the page URL.
///
/// Anchors and anything that already parses as a URL (`https:`, `mailto:`)
/// are left alone.
fn resolve_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    LINK_RE
        .replace_all(md, |caps: &regex::Captures| {
            let href = &caps[2];
            let absolute = href.starts_with('#') || Url::parse(href).is_ok();
            match (absolute, base.join(href)) {
                (false, Ok(target)) => format!("[{}]({target})", &caps[1]),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Strip trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// At most two consecutive blank lines.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

/// End with exactly one newline; an all-blank document becomes empty.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_matches('\n');
    if trimmed.trim().is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_images_removes_inline_and_linked() {
        assert_eq!(strip_images("a ![logo](/l.png) b"), "a logo b");
        assert_eq!(strip_images("[![](/badge.svg)](https://x)"), "");
        assert_eq!(strip_images("[text](https://x)"), "[text](https://x)");
    }

    #[test]
    fn later_h1s_become_h2() {
        let input = "# SP 800-218\n\nIntro\n\n# Changes\n\nDetails";
        assert_eq!(
            normalize_headings(input),
            "# SP 800-218\n\nIntro\n\n## Changes\n\nDetails"
        );
    }

    #[test]
    fn single_h1_untouched() {
        let input = "# SP 800-53\n\n## SA-11\n\n### Enhancements";
        assert_eq!(normalize_headings(input), input);
    }

    #[test]
    fn blank_line_runs_are_capped() {
        assert_eq!(clean_blank_lines("Line 1\n\n\n\n\nLine 2"), "Line 1\n\n\nLine 2");
        assert_eq!(clean_blank_lines("Line 1\n\nLine 2"), "Line 1\n\nLine 2");
    }

    #[test]
    fn layout_tags_are_unwrapped() {
        let result = strip_leftover_html("<div class=\"note\">Important info</div>");
        assert_eq!(result, "Important info");
    }

    #[test]
    fn fenced_code_keeps_its_tags() {
        let input = "```html\n<div>Preserved</div>\n```";
        assert_eq!(strip_leftover_html(input), input);
    }

    #[test]
    fn relative_links_become_absolute() {
        let base = Url::parse("https://csrc.nist.gov/news/2024/item").unwrap();
        assert_eq!(
            resolve_links("[Next](/pubs/sp/800/171)", Some(&base)),
            "[Next](https://csrc.nist.gov/pubs/sp/800/171)"
        );
        assert_eq!(resolve_links("[S](#s1)", Some(&base)), "[S](#s1)");
        assert_eq!(
            resolve_links("[L](https://other.gov/x)", Some(&base)),
            "[L](https://other.gov/x)"
        );
    }

    #[test]
    fn ensure_trailing_newline_normalizes() {
        assert_eq!(ensure_trailing_newline("Content"), "Content\n");
        assert_eq!(ensure_trailing_newline("Content\n\n\n"), "Content\n");
        assert_eq!(ensure_trailing_newline("\n  \n"), "");
    }

    #[test]
    fn pipeline_end_to_end() {
        let input = "# Title\n\n\n\n\n\n## Section   \n\n<div>Some content</div>\n\n![x](/i.png)\n\nEnd";
        let base = Url::parse("https://nist.gov/page").unwrap();
        let result = run_pipeline(input, Some(&base));

        assert!(!result.contains("\n\n\n\n"), "{result:?}");
        assert!(!result.contains("<div"), "{result:?}");
        assert!(!result.contains("i.png"));
        assert!(result.contains("## Section\n"));
        assert!(result.ends_with("End\n"));
    }
}

//! Normalization of fetched documents into readable Markdown.
//!
//! HTML pages are reduced to their main content, stripped of boilerplate and
//! embedded images, converted with `htmd`, and run through a cleanup pipeline.
//! PDF page texts are joined under explicit `## [Page N]` markers.

mod cleanup;

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use regbrief_shared::{RegBriefError, Result};

/// Tags dropped entirely during conversion (chrome, scripts, and images).
const SKIP_TAGS: [&str; 14] = [
    "script", "style", "nav", "header", "footer", "aside", "form", "button", "iframe",
    "noscript", "svg", "img", "picture", "video",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for the HTML-to-Markdown conversion.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Source URL used for resolving relative links.
    pub source_url: String,
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// Convert an HTML page to clean Markdown.
///
/// Conversion runs on the first matching content container (`#main-content`,
/// `article`, `main`, and so on, falling back to `<body>`). Tables are rendered
/// before `htmd` sees the markup.
#[instrument(skip(html), fields(url = %opts.source_url))]
pub fn convert(html: &str, opts: &ConvertOptions) -> Result<String> {
    let content_html = extract_content_html(html);
    let content_html = inline_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIP_TAGS.to_vec())
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| RegBriefError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let base_url = Url::parse(&opts.source_url).ok();
    let markdown = cleanup::run_pipeline(&raw_markdown, base_url.as_ref());

    debug!(final_len = markdown.len(), "conversion complete");
    Ok(markdown)
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

/// Join per-page PDF text into one document with `## [Page N]` markers.
///
/// Pages are numbered from 1 in input order. Returns an empty string when no
/// page carries any text.
pub fn pdf_pages_to_markdown(pages: &[String]) -> String {
    if pages.iter().all(|p| p.trim().is_empty()) {
        return String::new();
    }

    let mut md = String::new();
    for (i, page) in pages.iter().enumerate() {
        md.push_str(&format!("\n\n## [Page {}]\n\n{}\n", i + 1, page.trim()));
    }

    md.trim().to_string()
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static ROW_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static CELL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("th, td").expect("valid selector"));

/// Replace each `<table>` with a pipe table; `htmd` 0.1 drops table structure.
fn inline_tables(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .select(&TABLE_SEL)
        .fold(html.to_string(), |acc, table| {
            acc.replacen(&table.html(), &render_table(table_cells(table)), 1)
        })
}

/// Cell text per row, whitespace-collapsed and pipe-escaped.
fn table_cells(table: scraper::ElementRef<'_>) -> Vec<Vec<String>> {
    table
        .select(&ROW_SEL)
        .map(|row| {
            row.select(&CELL_SEL)
                .map(|cell| {
                    let text: String = cell.text().collect();
                    text.split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .replace('|', "\\|")
                })
                .collect::<Vec<_>>()
        })
        .filter(|cells| !cells.is_empty())
        .collect()
}

/// First row becomes the header; short rows are padded.
fn render_table(rows: Vec<Vec<String>>) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let line = |cells: &[String]| {
        let mut padded = cells.to_vec();
        padded.resize(width, String::new());
        format!("| {} |\n", padded.join(" | "))
    };

    let mut out = String::from("\n\n");
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&line(row));
        if i == 0 {
            out.push_str(&line(&vec!["---".to_string(); width]));
        }
    }
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Content containers in preference order; csrc.nist.gov uses `#main-content`.
const CONTAINERS: [&str; 6] = [
    "#main-content",
    "[role=\"main\"]",
    "article",
    "main",
    ".content",
    "body",
];

/// Inner HTML of the first content container, or the input unchanged.
fn extract_content_html(html: &str) -> String {
    let doc = Html::parse_document(html);

    CONTAINERS
        .iter()
        .filter_map(|css| Selector::parse(css).ok())
        .find_map(|selector| doc.select(&selector).next().map(|el| el.inner_html()))
        .unwrap_or_else(|| html.to_string())
}

//! One-page brief synthesis.
//!
//! The grounding payload is plain text with two JSON blocks: the source notes
//! and a flattened digest of every mapped section. The judge's text output is
//! used verbatim as the brief body.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, instrument};

use regbrief_artifacts::summary_filename;
use regbrief_llm::{Judge, JudgeRequest};
use regbrief_shared::{
    ControlMapping, MappedDocument, RegBriefError, ReportMeta, Result, SourceNote, truncate_chars,
};

pub const SUMMARY_INSTRUCTIONS: &str = "\
Create a one-page Markdown brief for software/IT orgs about NIST SP 800 updates.
Include:
- Latest updates (with dates/versions) as bullets
- Plain-language takeaways
- Action checklist grouped by themes (Build/CI, Dependencies/SBOM, IaC/Cloud, Data/CUI-PII, Testing/Assurance)
- Map each action to 800-53 / 800-171 / SSDF codes
- Footnote citations (title + URL + date)
Return only Markdown.
";

/// A synthesized brief, ready to be written to the summaries directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    /// `<date>-<topic-slug>-summary.md`
    pub filename: String,
    pub markdown: String,
    pub meta: ReportMeta,
}

/// One entry of the digest sent to the judge.
#[derive(Debug, Serialize)]
struct DigestEntry<'a> {
    source_id: &'a str,
    title: &'a str,
    url: &'a str,
    published: &'a str,
    section_title: &'a str,
    text: &'a str,
    mappings: &'a [ControlMapping],
}

/// Notes for every source that reached the summary, in document order.
fn source_notes(documents: &[MappedDocument]) -> Vec<SourceNote> {
    documents.iter().map(|d| d.document.source.note()).collect()
}

/// Build the user payload for the summary judgment.
///
/// Each section's text is cut to `max_chars` characters.
pub fn grounding_payload(
    documents: &[MappedDocument],
    date: NaiveDate,
    max_chars: usize,
) -> Result<String> {
    let digest: Vec<DigestEntry<'_>> = documents
        .iter()
        .flat_map(|doc| {
            let source = &doc.document.source;
            doc.sections.iter().map(move |mapped| DigestEntry {
                source_id: &source.id,
                title: &source.title,
                url: &source.url,
                published: &source.published,
                section_title: &mapped.section.title,
                text: truncate_chars(&mapped.section.text, max_chars),
                mappings: &mapped.mappings,
            })
        })
        .collect();

    let notes = pretty_json(&source_notes(documents))?;
    let digest = pretty_json(&digest)?;

    Ok(format!(
        "DATE: {date}\n\nSOURCES:\n{notes}\n\nFILTERED CONTENT:\n{digest}"
    ))
}

/// Synthesize the brief for `documents`.
///
/// With nothing to summarize the judge is not called and a short
/// "no relevant updates" brief is produced instead.
#[instrument(skip_all, fields(documents = documents.len(), %date))]
pub async fn build_summary(
    judge: &dyn Judge,
    documents: &[MappedDocument],
    date: NaiveDate,
    topic: &str,
    max_chars: usize,
) -> Result<Summary> {
    let filename = summary_filename(date, topic);
    let meta = ReportMeta {
        sources: source_notes(documents),
    };

    if documents.is_empty() {
        info!("no relevant documents, writing empty brief");
        return Ok(Summary {
            filename,
            markdown: empty_brief(date, topic),
            meta,
        });
    }

    let payload = grounding_payload(documents, date, max_chars)?;
    let markdown = judge
        .judge(&JudgeRequest::text(SUMMARY_INSTRUCTIONS, payload))
        .await?
        .into_text();

    info!(%filename, chars = markdown.len(), "summary generated");
    Ok(Summary {
        filename,
        markdown,
        meta,
    })
}

fn empty_brief(date: NaiveDate, topic: &str) -> String {
    format!(
        "# {topic} ({date})\n\n\
         No relevant updates were found for software and IT teams in this run.\n"
    )
}

fn pretty_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| RegBriefError::validation(format!("JSON serialization failed: {e}")))
}

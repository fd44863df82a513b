//! Section index for scripts delimited by `%%` marker lines.
//!
//! A marker is recognised only at column 0. Sections are derived from the
//! text on every call and carry no identity across edits; use
//! [`script_digest`] to detect that a script changed between calls.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// Two-character prefix that opens a section.
pub const SECTION_MARKER: &str = "%%";

/// A contiguous half-open line range `[start_line, end_line)` of a script.
///
/// Line indices are 0-based. The marker line belongs to the section it opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// 1-based position within the script.
    pub ordinal: usize,
    pub title: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl Section {
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line
    }
}

/// Section plus a preview of its first statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInfo {
    pub ordinal: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub line_start: usize,
    pub line_end: usize,
    /// First non-blank, non-comment line, or empty.
    pub preview: String,
}

/// Inclusive range of section ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRange {
    pub start: usize,
    pub end: usize,
}

impl SectionRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(ordinal: usize) -> Self {
        Self::new(ordinal, ordinal)
    }

    /// Check `1 <= start <= end <= count`.
    pub fn validate(&self, count: usize) -> Result<(), ValidationError> {
        if self.start == 0 || self.start > self.end || self.end > count {
            return Err(ValidationError::SectionRange {
                start: self.start,
                end: self.end,
                count,
            });
        }
        Ok(())
    }
}

/// Parse `script` into its ordered sections.
pub fn build_index(script: &str) -> Vec<Section> {
    let lines: Vec<&str> = script.lines().collect();
    let markers: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.starts_with(SECTION_MARKER))
        .map(|(i, _)| i)
        .collect();

    if markers.is_empty() {
        return vec![Section {
            ordinal: 1,
            title: None,
            start_line: 0,
            end_line: lines.len(),
        }];
    }

    let mut sections = Vec::with_capacity(markers.len() + 1);
    let first = markers[0];
    if lines[..first].iter().any(|line| !line.trim().is_empty()) {
        sections.push(Section {
            ordinal: 1,
            title: None,
            start_line: 0,
            end_line: first,
        });
    }

    for (i, &start) in markers.iter().enumerate() {
        let end = markers.get(i + 1).copied().unwrap_or(lines.len());
        let title = lines[start][SECTION_MARKER.len()..].trim();
        sections.push(Section {
            ordinal: sections.len() + 1,
            title: (!title.is_empty()).then(|| title.to_string()),
            start_line: start,
            end_line: end,
        });
    }

    sections
}

/// Sections with previews, as returned to clients.
pub fn section_info(script: &str) -> Vec<SectionInfo> {
    let lines: Vec<&str> = script.lines().collect();
    build_index(script)
        .into_iter()
        .map(|section| {
            let preview = lines[section.start_line..section.end_line]
                .iter()
                .map(|line| line.trim())
                .find(|line| !line.is_empty() && !line.starts_with('%'))
                .unwrap_or_default()
                .to_string();
            SectionInfo {
                ordinal: section.ordinal,
                title: section.title,
                line_start: section.start_line,
                line_end: section.end_line,
                preview,
            }
        })
        .collect()
}

/// Code for all sections whose ordinal lies in `range`, joined in order.
pub fn extract_sections(script: &str, range: SectionRange) -> Result<String, ValidationError> {
    let sections = build_index(script);
    range.validate(sections.len())?;

    let lines: Vec<&str> = script.lines().collect();
    let mut code = String::new();
    for section in &sections[range.start - 1..range.end] {
        for line in &lines[section.start_line..section.end_line] {
            code.push_str(line);
            code.push('\n');
        }
    }
    Ok(code)
}

/// SHA-256 hex digest of a script's text.
pub fn script_digest(script: &str) -> String {
    hex::encode(Sha256::digest(script.as_bytes()))
}

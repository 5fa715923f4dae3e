// src/loader.rs
// Raw document bytes -> plain text, dispatched on file extension.

use crate::path_manager::sanitize_name;
use regex::Regex;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("Corrupt document {name}: {reason}")]
    Corrupt { name: String, reason: String },
    #[error("Invalid document name: {0}")]
    InvalidName(String),
    #[error("Failed to read document: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl SourceType {
    pub fn from_name(name: &str) -> Result<Self, LoadError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" => Ok(SourceType::Text),
            "md" | "markdown" => Ok(SourceType::Markdown),
            "pdf" => Ok(SourceType::Pdf),
            "docx" => Ok(SourceType::Docx),
            _ => Err(LoadError::UnsupportedFormat(name.to_string())),
        }
    }
}

/// An uploaded or on-disk document, before any parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    /// Build a document, keeping only the final component of `name`.
    pub fn new(name: &str, bytes: Vec<u8>) -> Result<Self, LoadError> {
        let name = sanitize_name(name)
            .map_err(|_| LoadError::InvalidName(name.to_string()))?
            .to_string();
        Ok(Self { name, bytes })
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let bytes = std::fs::read(path)?;
        Self::new(&path.to_string_lossy(), bytes)
    }

    pub fn source_type(&self) -> Result<SourceType, LoadError> {
        SourceType::from_name(&self.name)
    }
}

/// Extract the plain text of a document.
pub fn load_text(document: &Document) -> Result<String, LoadError> {
    let source_type = document.source_type()?;
    let text = match source_type {
        SourceType::Text | SourceType::Markdown => String::from_utf8(document.bytes.clone())
            .map_err(|e| corrupt(&document.name, e))?,
        SourceType::Pdf => pdf_extract::extract_text_from_mem(&document.bytes)
            .map_err(|e| corrupt(&document.name, e))?,
        SourceType::Docx => extract_docx_text(&document.name, &document.bytes)?,
    };

    debug!(
        name = %document.name,
        source_type = ?source_type,
        bytes = document.bytes.len(),
        text_len = text.len(),
        "Document loaded"
    );
    Ok(text)
}

fn corrupt(name: &str, reason: impl std::fmt::Display) -> LoadError {
    LoadError::Corrupt {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn extract_docx_text(name: &str, bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| corrupt(name, e))?;
    let mut entry = archive
        .by_name("word/document.xml")
        .map_err(|e| corrupt(name, e))?;
    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;
    Ok(docx_xml_to_text(&xml))
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

/// Paragraph ends become newlines; everything else that is markup is dropped.
fn docx_xml_to_text(xml: &str) -> String {
    let with_breaks = xml
        .replace("</w:p>", "\n")
        .replace("<w:tab/>", "\t")
        .replace("<w:br/>", "\n");
    let stripped = tag_pattern().replace_all(&with_breaks, "");
    let decoded = stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    decoded
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

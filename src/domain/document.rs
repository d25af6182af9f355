//! Declarative container documents.
//!
//! A document mirrors the engine's create request: `Name`, `Config` and
//! `HostConfig`. It is parsed up front and then forwarded untouched, so a
//! malformed document never reaches the engine. Keys the create request does
//! not model are a parse error rather than silently dropped.

use super::CreateContainerOptions;
use super::errors::DocumentError;
use std::fs;
use std::path::Path;

/// Parses a JSON or YAML document. Text opening with `{` is read as JSON.
pub fn parse_document(text: &str) -> Result<CreateContainerOptions, DocumentError> {
    let options: CreateContainerOptions = if text.trim_start().starts_with('{') {
        serde_json::from_str(text)?
    } else {
        serde_yml::from_str(text)?
    };

    if options.config.image.trim().is_empty() {
        return Err(DocumentError::MissingImage);
    }

    Ok(options)
}

pub fn load_document(path: &Path) -> Result<CreateContainerOptions, DocumentError> {
    let text = fs::read_to_string(path).map_err(|source| DocumentError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_document(&text)
}

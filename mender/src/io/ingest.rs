//! Input ingestion.
//!
//! The controller hands each [`InputDescriptor`] to an [`Ingestor`] before
//! planning. Only counts and names end up in the run log; content stays with
//! the collaborators that need it.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::types::{InputDescriptor, Metadata};

/// Bytes of file content kept as an inline preview.
const PREVIEW_BYTES: usize = 512;

/// Normalized form of one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedInput {
    pub kind: String,
    pub name: String,
    /// Extracted text, when the ingestor could read any.
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IngestedInput {
    /// An input passed through as-is, without reading it.
    pub fn reference(descriptor: &InputDescriptor, locator: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("locator".to_string(), json!(locator));
        Self {
            kind: descriptor.kind.clone(),
            name: descriptor.name.clone(),
            content: None,
            metadata,
        }
    }
}

/// Parameters for an ingestion call.
#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    pub input: &'a InputDescriptor,
    pub timeout: Duration,
}

pub trait Ingestor: Send + Sync {
    fn process(&self, request: &IngestRequest<'_>) -> Result<IngestedInput>;
}

/// Resolves inputs by locator.
///
/// - `scheme://...` names pass through as `url` references.
/// - Existing files are read for size and a text preview.
/// - Existing directories report their entry count.
/// - Anything else passes through as an opaque `reference`.
#[derive(Debug, Default, Clone)]
pub struct LocatorIngestor;

impl Ingestor for LocatorIngestor {
    #[instrument(skip_all, fields(kind = %request.input.kind, name = %request.input.name))]
    fn process(&self, request: &IngestRequest<'_>) -> Result<IngestedInput> {
        let input = request.input;
        if input.name.contains("://") {
            return Ok(IngestedInput::reference(input, "url"));
        }
        let path = Path::new(&input.name);
        if path.is_file() {
            return ingest_file(input, path);
        }
        if path.is_dir() {
            let entries = fs::read_dir(path)
                .with_context(|| format!("read directory {}", path.display()))?
                .count();
            let mut ingested = IngestedInput::reference(input, "directory");
            ingested
                .metadata
                .insert("entries".to_string(), json!(entries));
            return Ok(ingested);
        }
        debug!("input is not a local path; passing through");
        Ok(IngestedInput::reference(input, "reference"))
    }
}

fn ingest_file(input: &InputDescriptor, path: &Path) -> Result<IngestedInput> {
    let size = fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    let mut head = Vec::with_capacity(PREVIEW_BYTES);
    fs::File::open(path)
        .with_context(|| format!("open {}", path.display()))?
        .take(PREVIEW_BYTES as u64)
        .read_to_end(&mut head)
        .with_context(|| format!("read {}", path.display()))?;

    let mut ingested = IngestedInput::reference(input, "file");
    ingested.metadata.insert("size".to_string(), json!(size));
    if let Ok(text) = String::from_utf8(head) {
        ingested.content = Some(text);
    } else {
        ingested
            .metadata
            .insert("binary".to_string(), Value::Bool(true));
    }
    Ok(ingested)
}

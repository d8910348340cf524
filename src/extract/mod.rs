//! Extraction Layer
//!
//! A backend turns a staged image into a raw field map; the [`Extractor`]
//! owns everything around that call: staging the bytes into a scoped
//! temporary file, invoking the backend exactly once, normalizing the
//! output against the schema, caching by image content, and converting
//! every backend fault into a structured result. Nothing propagates past
//! this boundary as a panic or raw error.
//!
//! Two backends implement the capability:
//! - Hosted multimodal model (structured-output request)
//! - Local ONNX detector + recognizer pipeline

pub mod hosted;
pub mod local;

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::FieldSchema;

/// Field name → extracted text. Sparse: a declared field the backend did
/// not produce is absent, never null.
pub type FieldMap = HashMap<String, String>;

/// Fault raised by a backend, caught at the orchestrator boundary
#[derive(Debug, Error)]
pub enum BackendFault {
    /// The backend could not be reached or failed to initialize
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend ran but produced output that cannot be used
    #[error("extraction failed: {0}")]
    Extraction(String),
}

/// Raw backend output, before schema normalization
#[derive(Debug, Clone)]
pub struct BackendOutput {
    /// Best-effort field map (never guaranteed to cover the schema)
    pub fields: FieldMap,
    /// Candidate regions the detector produced (local pipeline only)
    pub regions: Option<usize>,
}

/// Image bytes staged on disk for the duration of one extraction call.
///
/// The file lives exactly as long as the call; backends may read either
/// the bytes or the path.
pub struct StagedImage<'a> {
    pub bytes: &'a [u8],
    pub path: &'a Path,
}

/// Capability shared by both extraction strategies
pub trait ExtractBackend {
    /// Short identifier for logging
    fn name(&self) -> &'static str;

    /// Extract license fields from the staged image
    fn extract(&mut self, image: &StagedImage<'_>) -> Result<BackendOutput, BackendFault>;
}

/// Outcome of one orchestrated extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    /// Field map normalized against the schema (may be sparse)
    Extracted(FieldMap),
    /// The detector found no candidate regions; informational, not a fault
    NoDetection,
    /// The backend faulted; no field data should be trusted
    Failed { message: String },
}

impl ExtractionOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Render as a JSON document. Failures use the reserved `Error` key,
    /// which no schema field may shadow.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Extracted(fields) => serde_json::json!(fields),
            Self::NoDetection => serde_json::json!({}),
            Self::Failed { message } => serde_json::json!({ "Error": message }),
        }
    }
}

/// Extraction orchestrator.
///
/// Stateless across calls apart from the optional content-keyed result
/// cache; each `extract` runs to completion before the next is accepted.
pub struct Extractor {
    backend: Box<dyn ExtractBackend>,
    schema: FieldSchema,
    cache: Option<HashMap<String, ExtractionOutcome>>,
}

impl Extractor {
    pub fn new(backend: Box<dyn ExtractBackend>, schema: FieldSchema) -> Self {
        Self {
            backend,
            schema,
            cache: None,
        }
    }

    /// Enable or disable the content-keyed result cache
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = if enabled { Some(HashMap::new()) } else { None };
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Extract license fields from raw image bytes.
    ///
    /// Never returns an error: every failure mode is folded into
    /// [`ExtractionOutcome::Failed`].
    pub fn extract(&mut self, image: &[u8]) -> ExtractionOutcome {
        if image.is_empty() {
            return ExtractionOutcome::Failed {
                message: "empty image".to_string(),
            };
        }

        let key = content_key(image);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key) {
                debug!("serving extraction from cache");
                return hit.clone();
            }
        }

        let outcome = self.run(image);

        // Faults are never cached: a transient backend failure must surface
        // fresh on the next attempt.
        if !outcome.is_failure() {
            if let Some(cache) = &mut self.cache {
                cache.insert(key, outcome.clone());
            }
        }

        outcome
    }

    /// Stage, invoke the backend once, normalize. The staged file is
    /// dropped (and removed) on every exit path.
    fn run(&mut self, image: &[u8]) -> ExtractionOutcome {
        let staged = match stage_image(image) {
            Ok(file) => file,
            Err(message) => return ExtractionOutcome::Failed { message },
        };

        let result = self.backend.extract(&StagedImage {
            bytes: image,
            path: staged.path(),
        });

        match result {
            Ok(output) => {
                if output.regions == Some(0) && output.fields.is_empty() {
                    debug!(backend = self.backend.name(), "no regions detected");
                    ExtractionOutcome::NoDetection
                } else {
                    ExtractionOutcome::Extracted(self.normalize(output.fields))
                }
            }
            Err(fault) => {
                warn!(backend = self.backend.name(), "extraction fault: {fault}");
                ExtractionOutcome::Failed {
                    message: fault.to_string(),
                }
            }
        }
    }

    /// Keys outside the schema are dropped. Declared keys the backend
    /// omitted stay absent; callers must not assume a dense map.
    fn normalize(&self, fields: FieldMap) -> FieldMap {
        fields
            .into_iter()
            .filter(|(name, _)| {
                let known = self.schema.contains(name);
                if !known {
                    debug!("dropping unknown field {name:?} from backend output");
                }
                known
            })
            .collect()
    }
}

/// Write the bytes to a scoped temporary file; released when dropped
fn stage_image(image: &[u8]) -> Result<NamedTempFile, String> {
    let mut file =
        NamedTempFile::new().map_err(|e| format!("failed to stage image: {e}"))?;
    file.write_all(image)
        .map_err(|e| format!("failed to stage image: {e}"))?;
    Ok(file)
}

/// Cache key over the raw image content
fn content_key(image: &[u8]) -> String {
    format!("{:x}", Sha256::digest(image))
}

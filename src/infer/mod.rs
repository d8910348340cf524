//! ONNX Inference Layer
//!
//! Session construction and weight-file management for the local
//! extraction pipeline (YOLO field detector + CRNN text recognizer).

pub mod detector;
pub mod recognizer;
pub mod weights;

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{info, warn};

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
}

impl OnnxSession {
    /// Load a model, trying CUDA first when requested and falling back to CPU
    pub fn new(model_path: &Path, use_gpu: bool) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        let builder = if use_gpu {
            use ort::execution_providers::CUDAExecutionProvider;
            match builder.with_execution_providers([CUDAExecutionProvider::default().build()]) {
                Ok(builder) => {
                    info!("CUDA acceleration enabled");
                    builder
                }
                Err(e) => {
                    warn!("CUDA not available, using CPU: {e}");
                    Session::builder()?
                        .with_optimization_level(GraphOptimizationLevel::Level3)?
                        .with_intra_threads(4)?
                }
            }
        } else {
            builder
        };

        let session = builder
            .commit_from_file(model_path)
            .with_context(|| format!("failed to load ONNX model {:?}", model_path))?;

        Ok(Self { session })
    }

    /// The underlying session, for running inference
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

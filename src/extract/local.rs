//! Local Detector + Recognizer Backend
//!
//! Finds license field regions with the ONNX detector, reads each region
//! with the text recognizer, then parses the raw strings into schema
//! fields. Output is best-effort and sparse: a field whose region never
//! showed up is simply absent, and only the Latin-script fields are ever
//! produced.

use std::path::PathBuf;
use std::sync::LazyLock;

use image::RgbImage;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{BackendFault, BackendOutput, ExtractBackend, FieldMap, StagedImage};
use crate::infer::detector::{FieldClass, FieldDetector};
use crate::infer::recognizer::TextRecognizer;

/// Local pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPipelineConfig {
    /// Field detector weights
    pub det_model: PathBuf,
    /// Text recognizer weights
    pub rec_model: PathBuf,
    /// Recognizer character dictionary
    pub dict: PathBuf,
    /// Download URL for the detector weights, if not present locally
    pub det_url: Option<String>,
    /// Download URL for the recognizer weights
    pub rec_url: Option<String>,
    /// Download URL for the character dictionary
    pub dict_url: Option<String>,
    /// Detector input size (square)
    pub input_size: u32,
    /// Minimum detection confidence (0.0 - 1.0)
    pub confidence_threshold: f32,
    /// IoU threshold for suppressing duplicate regions
    pub iou_threshold: f32,
    /// Use GPU acceleration when available
    pub use_gpu: bool,
}

impl Default for LocalPipelineConfig {
    fn default() -> Self {
        Self {
            det_model: PathBuf::from("models/det.onnx"),
            rec_model: PathBuf::from("models/rec.onnx"),
            dict: PathBuf::from("models/dict.txt"),
            det_url: None,
            rec_url: None,
            dict_url: None,
            input_size: 960,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            use_gpu: false,
        }
    }
}

/// Extraction backend running the on-device detection + recognition
/// pipeline
pub struct LocalPipelineBackend {
    detector: FieldDetector,
    recognizer: TextRecognizer,
}

impl LocalPipelineBackend {
    /// Construct the backend; model-load failures are initialization
    /// faults
    pub fn new(config: &LocalPipelineConfig) -> Result<Self, BackendFault> {
        let detector = FieldDetector::new(
            &config.det_model,
            config.input_size,
            config.confidence_threshold,
            config.iou_threshold,
            config.use_gpu,
        )
        .map_err(|e| BackendFault::Unavailable(format!("failed to load field detector: {e}")))?;

        let recognizer = TextRecognizer::new(&config.rec_model, &config.dict, config.use_gpu)
            .map_err(|e| BackendFault::Unavailable(format!("failed to load text recognizer: {e}")))?;

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl ExtractBackend for LocalPipelineBackend {
    fn name(&self) -> &'static str {
        "local-pipeline"
    }

    fn extract(&mut self, image: &StagedImage<'_>) -> Result<BackendOutput, BackendFault> {
        let img = image::load_from_memory(image.bytes)
            .map_err(|e| BackendFault::Extraction(format!("could not decode image: {e}")))?
            .to_rgb8();

        let detections = self
            .detector
            .detect(&img)
            .map_err(|e| BackendFault::Extraction(format!("field detection failed: {e}")))?;

        let regions = detections.len();
        if regions == 0 {
            debug!("detector produced no candidate regions");
            return Ok(BackendOutput {
                fields: FieldMap::new(),
                regions: Some(0),
            });
        }

        info!(regions, "recognizing detected field regions");
        let mut fields = FieldMap::new();
        for detection in &detections {
            // detections arrive sorted by confidence; first region per
            // class wins
            if fields.contains_key(detection.class.field_name()) {
                continue;
            }

            let crop = crop_region(&img, detection.bounds);
            let raw = self
                .recognizer
                .recognize(&crop)
                .map_err(|e| BackendFault::Extraction(format!("text recognition failed: {e}")))?;

            if let Some(value) = parse_field(detection.class, &raw) {
                fields.insert(detection.class.field_name().to_string(), value);
            }
        }

        Ok(BackendOutput {
            fields,
            regions: Some(regions),
        })
    }
}

/// Crop a detection out of the source image, clamped to its bounds
fn crop_region(img: &RgbImage, bounds: (u32, u32, u32, u32)) -> RgbImage {
    let (img_w, img_h) = img.dimensions();
    let (x, y, w, h) = bounds;

    let x = x.min(img_w.saturating_sub(1));
    let y = y.min(img_h.saturating_sub(1));
    let w = w.clamp(1, img_w - x);
    let h = h.clamp(1, img_h - y);

    image::imageops::crop_imm(img, x, y, w, h).to_image()
}

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z .'-]*[A-Za-z.]").expect("valid name pattern"));

// Covers both printed NRC forms: 12/ABC(N)035344 and 1/Ka-La-Ma-Ta/123456
static NRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,2}/[A-Za-z-]+(?:\([A-Za-z]\))?/?\d{5,6}").expect("valid NRC pattern")
});

/// Parse one recognized region into its field value. Name and the NRC
/// number go through regex cleanup; the remaining fields keep their
/// trimmed text.
fn parse_field(class: FieldClass, raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    match class {
        FieldClass::Name => NAME_RE.find(text).map(|m| m.as_str().to_string()),
        FieldClass::NrcNo => NRC_RE.find(text).map(|m| m.as_str().to_string()),
        _ => Some(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_name_strips_recognition_noise() {
        assert_eq!(
            parse_field(FieldClass::Name, "  John Smith "),
            Some("John Smith".to_string())
        );
        assert_eq!(
            parse_field(FieldClass::Name, "##Aung San Suu##"),
            Some("Aung San Suu".to_string())
        );
        assert_eq!(parse_field(FieldClass::Name, "1234"), None);
    }

    #[test]
    fn test_parse_nrc_accepts_both_printed_forms() {
        assert_eq!(
            parse_field(FieldClass::NrcNo, "NRC 12/ABC(N)035344 ."),
            Some("12/ABC(N)035344".to_string())
        );
        assert_eq!(
            parse_field(FieldClass::NrcNo, "1/Ka-La-Ma-Ta/123456"),
            Some("1/Ka-La-Ma-Ta/123456".to_string())
        );
        assert_eq!(parse_field(FieldClass::NrcNo, "no id here"), None);
    }

    #[test]
    fn test_other_classes_keep_trimmed_text() {
        assert_eq!(
            parse_field(FieldClass::BloodType, " O "),
            Some("O".to_string())
        );
        assert_eq!(
            parse_field(FieldClass::DateOfBirth, "01-01-1990"),
            Some("01-01-1990".to_string())
        );
        assert_eq!(parse_field(FieldClass::No, "   "), None);
    }

    #[test]
    fn test_crop_region_clamps_to_image() {
        let img = RgbImage::new(100, 50);

        let crop = crop_region(&img, (90, 40, 50, 50));
        assert_eq!(crop.dimensions(), (10, 10));

        let crop = crop_region(&img, (0, 0, 100, 50));
        assert_eq!(crop.dimensions(), (100, 50));
    }
}

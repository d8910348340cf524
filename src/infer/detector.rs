//! License Field Detection
//!
//! Runs a YOLO-style ONNX detector over the license photo and returns one
//! bounding box per detected field region, mapped back to source-image
//! coordinates.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use image::RgbImage;
use ndarray::{Array4, ArrayView3};
use ort::{inputs, value::TensorRef};
use tracing::debug;

use super::OnnxSession;

/// License field classes, in detector training order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    No,
    Name,
    NrcNo,
    DateOfBirth,
    BloodType,
    ValidUpTo,
}

impl FieldClass {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::No),
            1 => Some(Self::Name),
            2 => Some(Self::NrcNo),
            3 => Some(Self::DateOfBirth),
            4 => Some(Self::BloodType),
            5 => Some(Self::ValidUpTo),
            _ => None,
        }
    }

    /// Schema field this class populates
    pub fn field_name(self) -> &'static str {
        match self {
            Self::No => "No",
            Self::Name => "Name",
            Self::NrcNo => "NRC_no",
            Self::DateOfBirth => "DOB",
            Self::BloodType => "Blood_Type",
            Self::ValidUpTo => "Valid_up_to",
        }
    }

    /// Label as printed on the card
    pub fn label(self) -> &'static str {
        match self {
            Self::No => "No.",
            Self::Name => "Name",
            Self::NrcNo => "N.R.C. No",
            Self::DateOfBirth => "Date of Birth",
            Self::BloodType => "Blood Type",
            Self::ValidUpTo => "Valid up to",
        }
    }
}

/// One detected field region
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub class: FieldClass,
    /// Bounding box (x, y, width, height) in source-image pixels
    pub bounds: (u32, u32, u32, u32),
    /// Detection confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// YOLO-style field detector
pub struct FieldDetector {
    session: OnnxSession,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl FieldDetector {
    pub fn new(
        model_path: &Path,
        input_size: u32,
        confidence_threshold: f32,
        iou_threshold: f32,
        use_gpu: bool,
    ) -> Result<Self> {
        let session = OnnxSession::new(model_path, use_gpu)?;
        Ok(Self {
            session,
            input_size,
            confidence_threshold,
            iou_threshold,
        })
    }

    /// Detect field regions, returned sorted by descending confidence
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let start = Instant::now();

        let (tensor, scale, pad) = letterbox(image, self.input_size);
        let input = TensorRef::from_array_view(&tensor)?;
        let outputs = self.session.session_mut().run(inputs![input])?;

        // Output shape: [1, 4 + classes, anchors]
        let output = outputs[0]
            .try_extract_array::<f32>()?
            .into_owned()
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| anyhow::anyhow!("unexpected detector output shape: {e}"))?;

        let candidates = decode_predictions(output.view(), self.confidence_threshold);
        let kept = non_maximum_suppression(candidates, self.iou_threshold);

        let mut detections: Vec<Detection> = kept
            .iter()
            .filter_map(|c| c.to_detection(scale, pad, image.dimensions()))
            .collect();
        detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        debug!(
            "Field detection complete in {:?}: {} regions",
            start.elapsed(),
            detections.len()
        );

        Ok(detections)
    }
}

/// Axis-aligned box in letterboxed-input coordinates
#[derive(Debug, Clone, Copy)]
struct BBox {
    l: f32,
    t: f32,
    r: f32,
    b: f32,
}

impl BBox {
    fn area(&self) -> f32 {
        (self.r - self.l).max(0.0) * (self.b - self.t).max(0.0)
    }

    /// Intersection over union with another box
    fn iou(&self, other: &Self) -> f32 {
        let l = self.l.max(other.l);
        let t = self.t.max(other.t);
        let r = self.r.min(other.r);
        let b = self.b.min(other.b);

        if r <= l || b <= t {
            return 0.0;
        }

        let intersection = (r - l) * (b - t);
        let union = self.area() + other.area() - intersection;

        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Candidate box before suppression
#[derive(Debug, Clone, Copy)]
struct Candidate {
    class_index: usize,
    bbox: BBox,
    confidence: f32,
}

impl Candidate {
    /// Undo the letterbox transform and clamp into the source image
    fn to_detection(&self, scale: f32, pad: (f32, f32), source: (u32, u32)) -> Option<Detection> {
        let class = FieldClass::from_index(self.class_index)?;
        let (src_w, src_h) = source;

        let l = ((self.bbox.l - pad.0) / scale).clamp(0.0, src_w as f32);
        let t = ((self.bbox.t - pad.1) / scale).clamp(0.0, src_h as f32);
        let r = ((self.bbox.r - pad.0) / scale).clamp(0.0, src_w as f32);
        let b = ((self.bbox.b - pad.1) / scale).clamp(0.0, src_h as f32);

        if r <= l || b <= t {
            return None;
        }

        Some(Detection {
            class,
            bounds: (l as u32, t as u32, (r - l) as u32, (b - t) as u32),
            confidence: self.confidence,
        })
    }
}

/// Resize onto a square gray canvas preserving aspect ratio; returns the
/// normalized CHW tensor, the scale applied, and the (x, y) padding
fn letterbox(image: &RgbImage, size: u32) -> (Array4<f32>, f32, (f32, f32)) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized = image::imageops::resize(image, new_w, new_h, image::imageops::FilterType::Triangle);
    let pad_x = (size - new_w) as f32 / 2.0;
    let pad_y = (size - new_h) as f32 / 2.0;

    let mut tensor = Array4::from_elem((1, 3, size as usize, size as usize), 114.0 / 255.0);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x as f32 + pad_x) as usize;
        let ty = (y as f32 + pad_y) as usize;
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = pixel.0[c] as f32 / 255.0;
        }
    }

    (tensor, scale, (pad_x, pad_y))
}

/// Decode the raw head output: per anchor, take the best class score and
/// keep anchors above the confidence threshold
fn decode_predictions(output: ArrayView3<'_, f32>, confidence_threshold: f32) -> Vec<Candidate> {
    let rows = output.shape()[1];
    let anchors = output.shape()[2];
    let classes = rows.saturating_sub(4);

    let mut candidates = Vec::new();
    for a in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = 0.0f32;
        for c in 0..classes {
            let score = output[[0, 4 + c, a]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }
        if best_score < confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, a]];
        let cy = output[[0, 1, a]];
        let w = output[[0, 2, a]];
        let h = output[[0, 3, a]];

        candidates.push(Candidate {
            class_index: best_class,
            bbox: BBox {
                l: cx - w / 2.0,
                t: cy - h / 2.0,
                r: cx + w / 2.0,
                b: cy + h / 2.0,
            },
            confidence: best_score,
        });
    }

    candidates
}

/// Greedy per-class non-maximum suppression
fn non_maximum_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_index == candidate.class_index && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_field_class_mapping() {
        assert_eq!(FieldClass::from_index(0), Some(FieldClass::No));
        assert_eq!(FieldClass::from_index(2), Some(FieldClass::NrcNo));
        assert_eq!(FieldClass::from_index(5), Some(FieldClass::ValidUpTo));
        assert_eq!(FieldClass::from_index(6), None);

        assert_eq!(FieldClass::NrcNo.field_name(), "NRC_no");
        assert_eq!(FieldClass::DateOfBirth.field_name(), "DOB");
        assert_eq!(FieldClass::BloodType.label(), "Blood Type");
    }

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = BBox { l: 0.0, t: 0.0, r: 10.0, b: 10.0 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let b = BBox { l: 20.0, t: 20.0, r: 30.0, b: 30.0 };
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = BBox { l: 0.0, t: 0.0, r: 10.0, b: 10.0 };
        let b = BBox { l: 5.0, t: 0.0, r: 15.0, b: 10.0 };
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_same_class() {
        let candidates = vec![
            Candidate {
                class_index: 0,
                bbox: BBox { l: 0.0, t: 0.0, r: 10.0, b: 10.0 },
                confidence: 0.6,
            },
            Candidate {
                class_index: 0,
                bbox: BBox { l: 1.0, t: 1.0, r: 11.0, b: 11.0 },
                confidence: 0.9,
            },
        ];

        let kept = non_maximum_suppression(candidates, 0.45);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_overlapping_different_classes() {
        let candidates = vec![
            Candidate {
                class_index: 0,
                bbox: BBox { l: 0.0, t: 0.0, r: 10.0, b: 10.0 },
                confidence: 0.9,
            },
            Candidate {
                class_index: 1,
                bbox: BBox { l: 0.0, t: 0.0, r: 10.0, b: 10.0 },
                confidence: 0.8,
            },
        ];

        assert_eq!(non_maximum_suppression(candidates, 0.45).len(), 2);
    }

    #[test]
    fn test_letterbox_geometry() {
        let image = RgbImage::from_pixel(100, 50, image::Rgb([255, 255, 255]));
        let (tensor, scale, pad) = letterbox(&image, 64);

        assert_eq!(tensor.shape(), &[1, 3, 64, 64]);
        assert!((scale - 0.64).abs() < 1e-6);
        assert!((pad.0 - 0.0).abs() < 1e-6);
        assert!((pad.1 - 16.0).abs() < 1e-6);

        // padding rows keep the gray fill, image rows carry the pixels
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 32, 32]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_decode_predictions() {
        // [1, 4 + 6 classes, 2 anchors]
        let mut output = Array3::<f32>::zeros((1, 10, 2));
        // anchor 0: box at (100, 50) 20x10, class 2 at 0.9
        output[[0, 0, 0]] = 100.0;
        output[[0, 1, 0]] = 50.0;
        output[[0, 2, 0]] = 20.0;
        output[[0, 3, 0]] = 10.0;
        output[[0, 4 + 2, 0]] = 0.9;
        // anchor 1: below threshold
        output[[0, 4 + 1, 1]] = 0.1;

        let candidates = decode_predictions(output.view(), 0.25);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].class_index, 2);
        assert!((candidates[0].bbox.l - 90.0).abs() < 1e-6);
        assert!((candidates[0].bbox.b - 55.0).abs() < 1e-6);
    }

    #[test]
    fn test_candidate_maps_back_to_source_coordinates() {
        // letterbox of a 200x100 image into 100x100: scale 0.5, pad_y 25
        let candidate = Candidate {
            class_index: 0,
            bbox: BBox { l: 10.0, t: 35.0, r: 30.0, b: 55.0 },
            confidence: 0.8,
        };

        let detection = candidate.to_detection(0.5, (0.0, 25.0), (200, 100)).unwrap();
        assert_eq!(detection.bounds, (20, 20, 40, 40));
    }

    #[test]
    fn test_candidate_outside_source_is_dropped() {
        let candidate = Candidate {
            class_index: 0,
            bbox: BBox { l: 300.0, t: 300.0, r: 310.0, b: 310.0 },
            confidence: 0.8,
        };

        assert!(candidate.to_detection(1.0, (0.0, 0.0), (100, 100)).is_none());
    }
}

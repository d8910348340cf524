//! Region Text Recognition
//!
//! CRNN-style recognizer over detected field regions. Crops come in at
//! arbitrary sizes, are resized to the model's input height, and the
//! output sequence is greedy-CTC decoded against the character dictionary.

use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ndarray::{Array4, ArrayView2, Axis};
use ort::{inputs, value::TensorRef};
use tracing::debug;

use super::OnnxSession;

/// Model input geometry (CRNN convention: fixed height, padded width)
const INPUT_HEIGHT: u32 = 48;
const MAX_INPUT_WIDTH: u32 = 320;

/// Text recognizer for cropped field regions
pub struct TextRecognizer {
    session: OnnxSession,
    dict: Vec<String>,
}

impl TextRecognizer {
    pub fn new(model_path: &Path, dict_path: &Path, use_gpu: bool) -> Result<Self> {
        let dict = load_dictionary(dict_path)?;
        let session = OnnxSession::new(model_path, use_gpu)?;
        Ok(Self { session, dict })
    }

    /// Recognize the text in one field region
    pub fn recognize(&mut self, region: &RgbImage) -> Result<String> {
        let tensor = prepare_region(region);
        let input = TensorRef::from_array_view(&tensor)?;
        let outputs = self.session.session_mut().run(inputs![input])?;

        // Output shape: [1, timesteps, dictionary + blank]
        let output = outputs[0]
            .try_extract_array::<f32>()?
            .into_owned()
            .into_dimensionality::<ndarray::Ix3>()
            .map_err(|e| anyhow::anyhow!("unexpected recognizer output shape: {e}"))?;

        let text = ctc_greedy_decode(output.index_axis(Axis(0), 0), &self.dict);
        debug!("recognized {text:?}");
        Ok(text)
    }
}

/// One dictionary token per line; index 0 of the model output is the CTC
/// blank, so token `i` of the file maps to output index `i + 1`
fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read character dictionary {:?}", path))?;

    let dict: Vec<String> = content.lines().map(|line| line.to_string()).collect();
    if dict.is_empty() {
        anyhow::bail!("character dictionary {:?} is empty", path);
    }
    Ok(dict)
}

/// Resize to the model height keeping aspect ratio, normalize to [-1, 1],
/// pad the remaining width with zeros
fn prepare_region(region: &RgbImage) -> Array4<f32> {
    let (width, height) = region.dimensions();
    let ratio = width.max(1) as f32 / height.max(1) as f32;
    let new_w = ((INPUT_HEIGHT as f32 * ratio).ceil() as u32).clamp(1, MAX_INPUT_WIDTH);

    let resized =
        image::imageops::resize(region, new_w, INPUT_HEIGHT, image::imageops::FilterType::Triangle);

    let mut tensor = Array4::zeros((1, 3, INPUT_HEIGHT as usize, MAX_INPUT_WIDTH as usize));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

/// Greedy CTC decode: argmax per timestep, collapse repeats, drop blanks
fn ctc_greedy_decode(preds: ArrayView2<'_, f32>, dict: &[String]) -> String {
    let steps = preds.shape()[0];
    let mut text = String::new();
    let mut previous = 0usize;

    for t in 0..steps {
        let row = preds.row(t);
        let index = row
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(i, _)| i);

        if index != 0 && index != previous {
            if let Some(token) = dict.get(index - 1) {
                text.push_str(token);
            }
        }
        previous = index;
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use std::io::Write as _;

    fn logits(rows: &[usize], classes: usize) -> Array2<f32> {
        let mut preds = Array2::zeros((rows.len(), classes));
        for (t, &index) in rows.iter().enumerate() {
            preds[[t, index]] = 1.0;
        }
        preds
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        let dict = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        // a a <blank> a b b c
        let preds = logits(&[1, 1, 0, 1, 2, 2, 3], 4);

        assert_eq!(ctc_greedy_decode(preds.view(), &dict), "aabc");
    }

    #[test]
    fn test_ctc_all_blanks_decodes_empty() {
        let dict = vec!["a".to_string()];
        let preds = logits(&[0, 0, 0], 2);

        assert_eq!(ctc_greedy_decode(preds.view(), &dict), "");
    }

    #[test]
    fn test_ctc_out_of_dictionary_index_skipped() {
        let dict = vec!["a".to_string()];
        // index 2 has no dictionary entry
        let preds = logits(&[1, 2], 3);

        assert_eq!(ctc_greedy_decode(preds.view(), &dict), "a");
    }

    #[test]
    fn test_prepare_region_geometry() {
        let wide = RgbImage::new(960, 48);
        let tensor = prepare_region(&wide);
        assert_eq!(tensor.shape(), &[1, 3, 48, 320]);

        let narrow = RgbImage::from_pixel(24, 48, image::Rgb([255, 255, 255]));
        let tensor = prepare_region(&narrow);
        // resized content sits left, padding stays zero
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert_eq!(tensor[[0, 0, 0, 319]], 0.0);
    }

    #[test]
    fn test_load_dictionary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a\nb\nc").unwrap();

        let dict = load_dictionary(file.path()).unwrap();
        assert_eq!(dict, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_dictionary_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(load_dictionary(file.path()).is_err());
    }
}

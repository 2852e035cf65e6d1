//! In-memory stand-ins for models and detectors.

use image::GrayImage;
use ndarray::ArrayD;
use std::sync::Mutex;

use super::runtime::{InferenceError, ModelOutput, Predictor};
use crate::vision::{FaceDetector, Region};

/// Returns the same output for every input and remembers the last input.
pub struct FixedOutput {
    output: ModelOutput,
    last_input: Mutex<Option<ArrayD<f32>>>,
}

impl FixedOutput {
    pub fn scores(scores: &[f32]) -> Self {
        Self::new(ModelOutput::Scores(scores.to_vec()))
    }

    pub fn label(label: i64) -> Self {
        Self::new(ModelOutput::Labels(vec![label]))
    }

    fn new(output: ModelOutput) -> Self {
        Self {
            output,
            last_input: Mutex::new(None),
        }
    }

    pub fn last_input(&self) -> Option<ArrayD<f32>> {
        self.last_input.lock().unwrap().clone()
    }
}

impl Predictor for FixedOutput {
    fn predict(&self, input: ArrayD<f32>) -> Result<ModelOutput, InferenceError> {
        *self.last_input.lock().unwrap() = Some(input);
        Ok(self.output.clone())
    }
}

impl<P: Predictor> Predictor for std::sync::Arc<P> {
    fn predict(&self, input: ArrayD<f32>) -> Result<ModelOutput, InferenceError> {
        self.as_ref().predict(input)
    }
}

pub struct FailingPredictor;

impl Predictor for FailingPredictor {
    fn predict(&self, _input: ArrayD<f32>) -> Result<ModelOutput, InferenceError> {
        Err(InferenceError::Runtime("model exploded".into()))
    }
}

/// Reports the same regions for every image.
pub struct FixedRegions(pub Vec<Region>);

impl FaceDetector for FixedRegions {
    fn detect(&self, _gray: &GrayImage) -> Vec<Region> {
        self.0.clone()
    }
}

/// A PNG of the given size filled with one gray level.
pub fn png(width: u32, height: u32, level: u8) -> Vec<u8> {
    let image = GrayImage::from_pixel(width, height, image::Luma([level]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .unwrap();
    bytes.into_inner()
}

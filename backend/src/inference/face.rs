use image::{DynamicImage, GrayImage, Luma};
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayD};
use std::collections::BTreeMap;

use shared::{EMOTION_LABELS, FaceExpressionResponse, FacePrediction, percent};

use super::runtime::{InferenceError, LoadError, Predictor, argmax, load_predictor};
use crate::config::{ArtifactConfig, DetectorConfig};
use crate::error::ApiError;
use crate::vision::{DetectionParams, FaceDetector, HaarCascade, Region, locate_cascade};

/// Side of the square grayscale crop the classifier was trained on.
pub const FACE_INPUT_SIZE: u32 = 48;

pub struct FaceExpressionModel {
    classifier: Box<dyn Predictor>,
    detector: Box<dyn FaceDetector>,
}

impl FaceExpressionModel {
    pub fn new(classifier: Box<dyn Predictor>, detector: Box<dyn FaceDetector>) -> Self {
        Self {
            classifier,
            detector,
        }
    }

    pub fn load(artifacts: &ArtifactConfig, detector: &DetectorConfig) -> Result<Self, LoadError> {
        let model_path = artifacts.path(&artifacts.face_model);
        if !model_path.exists() {
            return Err(LoadError::NotFound(model_path.display().to_string()));
        }

        let candidates = artifacts.cascade_candidates();
        let cascade_path = locate_cascade(&candidates)
            .ok_or_else(|| LoadError::Cascade("no cascade location configured".into()))?;
        let cascade = HaarCascade::load(cascade_path, DetectionParams::from(detector))?;
        let (window_width, window_height) = cascade.window_size();
        log::info!(
            "Loaded face cascade from {} ({}x{} window)",
            cascade_path.display(),
            window_width,
            window_height
        );

        let classifier = load_predictor(&model_path)?;
        Ok(Self::new(classifier, Box::new(cascade)))
    }

    /// Classifies the expression of the first face found in `image_bytes`.
    pub fn analyze(&self, image_bytes: &[u8]) -> Result<FaceExpressionResponse, ApiError> {
        let frame =
            image::load_from_memory(image_bytes).map_err(|e| ApiError::Decode(e.to_string()))?;
        log::info!("Image decoded: {}x{}", frame.width(), frame.height());

        let gray = to_gray(&frame);
        let faces = self.detector.detect(&gray);
        log::info!("Total faces detected: {}", faces.len());

        let Some(face) = faces.first() else {
            return Ok(FaceExpressionResponse::none("No faces detected in the image"));
        };
        let face = face.clamp_to(gray.width(), gray.height());

        let crop = crop_face(&gray, &face);
        if crop.pixels().all(|p| p.0[0] == 0) {
            log::warn!("Face region at {:?} is empty after resizing", face);
            return Ok(FaceExpressionResponse::none("Could not process face region"));
        }

        let probabilities = self.classifier.predict(to_tensor(&crop))?.into_scores()?;
        log::debug!("Raw emotion prediction: {:?}", probabilities);
        Ok(FaceExpressionResponse::single(describe(&probabilities, face)?))
    }
}

/// Rec. 601 luma, matching the weights the cascades were trained with.
fn to_gray(frame: &DynamicImage) -> GrayImage {
    let rgb = frame.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

fn crop_face(gray: &GrayImage, face: &Region) -> GrayImage {
    let region = imageops::crop_imm(gray, face.x, face.y, face.width, face.height).to_image();
    imageops::resize(&region, FACE_INPUT_SIZE, FACE_INPUT_SIZE, FilterType::Triangle)
}

/// `[1, 48, 48, 1]` with pixels scaled to [0, 1].
fn to_tensor(crop: &GrayImage) -> ArrayD<f32> {
    let side = FACE_INPUT_SIZE as usize;
    Array4::from_shape_fn((1, side, side, 1), |(_, y, x, _)| {
        crop.get_pixel(x as u32, y as u32).0[0] as f32 / 255.0
    })
    .into_dyn()
}

fn describe(probabilities: &[f32], face: Region) -> Result<FacePrediction, InferenceError> {
    if probabilities.len() != EMOTION_LABELS.len() {
        return Err(InferenceError::Output(format!(
            "expected {} emotion scores, got {}",
            EMOTION_LABELS.len(),
            probabilities.len()
        )));
    }
    let predicted = argmax(probabilities)
        .ok_or_else(|| InferenceError::Output("empty emotion prediction".into()))?;

    let all_emotions: BTreeMap<String, f64> = EMOTION_LABELS
        .iter()
        .zip(probabilities)
        .map(|(label, &p)| (label.to_string(), percent(p)))
        .collect();

    Ok(FacePrediction {
        face_number: 1,
        bounding_box: face.into(),
        predicted_emotion: EMOTION_LABELS[predicted].to_string(),
        confidence: percent(probabilities[predicted]),
        all_emotions,
    })
}

use shared::{ANXIETY_FEATURES, AnxietyResponse};

use super::runtime::{InferenceError, LoadError, Predictor, load_predictor, row};
use crate::config::ArtifactConfig;
use crate::validation::FeatureVector;

pub struct AnxietyModel {
    classifier: Box<dyn Predictor>,
}

impl AnxietyModel {
    pub fn new(classifier: Box<dyn Predictor>) -> Self {
        Self { classifier }
    }

    pub fn load(artifacts: &ArtifactConfig) -> Result<Self, LoadError> {
        Ok(Self::new(load_predictor(
            &artifacts.path(&artifacts.anxiety_model),
        )?))
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<AnxietyResponse, InferenceError> {
        if features.len() != ANXIETY_FEATURES.len() {
            return Err(InferenceError::Shape {
                expected: ANXIETY_FEATURES.len(),
                actual: features.len(),
            });
        }
        let level = self
            .classifier
            .predict(row(features.as_slice()))?
            .class_label()?;
        Ok(AnxietyResponse {
            predicted_anxiety_level: level,
        })
    }
}

use std::path::Path;

use shared::SUGGESTION_FEATURES;

use super::artifacts::LabelEncoder;
use super::runtime::{InferenceError, LoadError, Predictor, load_predictor, row};
use crate::validation::FeatureVector;

/// Classifier whose encoded output is decoded back to a recommendation.
pub struct SuggestionModel {
    classifier: Box<dyn Predictor>,
    encoder: LabelEncoder,
}

impl SuggestionModel {
    pub fn new(classifier: Box<dyn Predictor>, encoder: LabelEncoder) -> Self {
        Self {
            classifier,
            encoder,
        }
    }

    pub fn load(model_path: &Path, encoder_path: &Path) -> Result<Self, LoadError> {
        let encoder = LabelEncoder::load(encoder_path)?;
        let classifier = load_predictor(model_path)?;
        Ok(Self::new(classifier, encoder))
    }

    pub fn recommend(&self, features: &FeatureVector) -> Result<String, InferenceError> {
        if features.len() != SUGGESTION_FEATURES.len() {
            return Err(InferenceError::Shape {
                expected: SUGGESTION_FEATURES.len(),
                actual: features.len(),
            });
        }
        let output = self.classifier.predict(row(features.as_slice()))?;
        let class = output.class_label()?;
        log::debug!("Suggestion classifier picked class {}", class);
        Ok(self.encoder.inverse_transform(class)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::FixedOutput;

    fn encoder() -> LabelEncoder {
        LabelEncoder {
            classes: vec![
                "Exercise".into(),
                "Meditation".into(),
                "Seek professional help".into(),
            ],
        }
    }

    fn features() -> FeatureVector {
        FeatureVector::from_values(vec![1.0; SUGGESTION_FEATURES.len()])
    }

    #[test]
    fn decodes_predicted_class() {
        let model = SuggestionModel::new(Box::new(FixedOutput::label(2)), encoder());
        assert_eq!(model.recommend(&features()).unwrap(), "Seek professional help");
    }

    #[test]
    fn probability_outputs_are_decoded_by_argmax() {
        let model = SuggestionModel::new(Box::new(FixedOutput::scores(&[0.1, 0.8, 0.1])), encoder());
        assert_eq!(model.recommend(&features()).unwrap(), "Meditation");
    }

    #[test]
    fn unknown_class_is_an_error() {
        let model = SuggestionModel::new(Box::new(FixedOutput::label(7)), encoder());
        assert!(matches!(
            model.recommend(&features()),
            Err(InferenceError::UnknownClass(7))
        ));
    }

    #[test]
    fn missing_encoder_fails_the_whole_unit() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model_suggest.onnx");
        std::fs::write(&model_path, b"onnx").unwrap();
        assert!(matches!(
            SuggestionModel::load(&model_path, &dir.path().join("label_encoder_suggest.json")),
            Err(LoadError::NotFound(_))
        ));
    }
}

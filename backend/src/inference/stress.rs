use shared::{STRESS_FEATURES, STRESS_LEVELS, StressBreakdown, StressResponse, percent};

use super::artifacts::StandardScaler;
use super::runtime::{InferenceError, LoadError, Predictor, argmax, load_predictor, row};
use crate::config::ArtifactConfig;
use crate::validation::FeatureVector;

/// Scaled 20-feature questionnaire into a three-way stress classifier.
pub struct StressModel {
    network: Box<dyn Predictor>,
    scaler: StandardScaler,
}

impl StressModel {
    pub fn new(network: Box<dyn Predictor>, scaler: StandardScaler) -> Self {
        Self { network, scaler }
    }

    pub fn load(artifacts: &ArtifactConfig) -> Result<Self, LoadError> {
        let scaler = StandardScaler::load(&artifacts.path(&artifacts.stress_scaler))?;
        scaler.check_columns(&STRESS_FEATURES)?;
        let network = load_predictor(&artifacts.path(&artifacts.stress_model))?;
        Ok(Self::new(network, scaler))
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<StressResponse, InferenceError> {
        let scaled = self.scaler.transform(features.as_slice())?;
        let probabilities = self.network.predict(row(&scaled))?.into_scores()?;
        log::debug!("Raw stress prediction: {:?}", probabilities);
        summarize(&probabilities)
    }
}

/// Turns class probabilities into the labelled response.
pub fn summarize(probabilities: &[f32]) -> Result<StressResponse, InferenceError> {
    let [low, medium, high] = probabilities[..] else {
        return Err(InferenceError::Output(format!(
            "expected {} stress probabilities, got {}",
            STRESS_LEVELS.len(),
            probabilities.len()
        )));
    };
    let predicted = argmax(probabilities)
        .ok_or_else(|| InferenceError::Output("empty stress prediction".into()))?;

    Ok(StressResponse {
        stress_level: STRESS_LEVELS[predicted].to_string(),
        confidence: percent(probabilities[predicted]),
        details: StressBreakdown {
            low: percent(low),
            medium: percent(medium),
            high: percent(high),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::FixedOutput;
    use std::sync::Arc;

    fn identity_scaler() -> StandardScaler {
        StandardScaler {
            mean: vec![0.0; STRESS_FEATURES.len()],
            scale: vec![1.0; STRESS_FEATURES.len()],
            feature_names: None,
        }
    }

    #[test]
    fn confidence_is_the_largest_breakdown_entry() {
        for probabilities in [
            [0.2f32, 0.5, 0.3],
            [0.91, 0.04, 0.05],
            [0.0, 0.0, 1.0],
            [0.333, 0.333, 0.334],
        ] {
            let response = summarize(&probabilities).unwrap();
            let details = &response.details;
            for value in [details.low, details.medium, details.high] {
                assert!((0.0..=100.0).contains(&value));
            }
            let max = details.low.max(details.medium).max(details.high);
            assert_eq!(response.confidence, max);
        }
    }

    #[test]
    fn picks_label_of_most_likely_class() {
        let response = summarize(&[0.1, 0.2, 0.7]).unwrap();
        assert_eq!(response.stress_level, "High Stress");
        assert_eq!(response.confidence, 70.0);
        assert_eq!(response.details.low, 10.0);
    }

    #[test]
    fn wrong_class_count_is_an_output_error() {
        assert!(matches!(
            summarize(&[0.5, 0.5]),
            Err(InferenceError::Output(_))
        ));
    }

    #[test]
    fn features_are_scaled_before_inference() {
        let network = Arc::new(FixedOutput::scores(&[0.6, 0.3, 0.1]));
        let mut scaler = identity_scaler();
        scaler.mean[0] = 1.0;
        scaler.scale[0] = 2.0;
        let model = StressModel::new(Box::new(network.clone()), scaler);

        let mut values = vec![0.0; STRESS_FEATURES.len()];
        values[0] = 5.0;
        let features = FeatureVector::from_values(values);

        let response = model.predict(&features).unwrap();
        assert_eq!(response.stress_level, "Low Stress");

        let input = network.last_input().unwrap();
        assert_eq!(input.shape(), &[1, STRESS_FEATURES.len()]);
        assert_eq!(input.as_slice().unwrap()[0], 2.0);
    }
}

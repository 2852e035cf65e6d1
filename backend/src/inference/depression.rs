use serde_json::Number;
use shared::{BDI_RESPONSE_COUNT, DepressionResponse};

use super::runtime::{InferenceError, LoadError, Predictor, load_predictor, row};
use crate::config::ArtifactConfig;
use crate::validation::BdiResponses;

/// BDI questionnaire scoring.
///
/// The network is still run on every request and its output logged, but the
/// reported level comes from banding the summed responses.
pub struct DepressionModel {
    network: Box<dyn Predictor>,
}

impl DepressionModel {
    pub fn new(network: Box<dyn Predictor>) -> Self {
        Self { network }
    }

    pub fn load(artifacts: &ArtifactConfig) -> Result<Self, LoadError> {
        Ok(Self::new(load_predictor(
            &artifacts.path(&artifacts.depression_model),
        )?))
    }

    pub fn assess(&self, responses: &BdiResponses) -> Result<DepressionResponse, InferenceError> {
        let values: Vec<f32> = responses.values().iter().map(|&v| v as f32).collect();
        if values.len() != BDI_RESPONSE_COUNT {
            return Err(InferenceError::Shape {
                expected: BDI_RESPONSE_COUNT,
                actual: values.len(),
            });
        }
        let raw = self.network.predict(row(&values))?;
        log::debug!("Depression network output: {:?}", raw);
        score(responses)
    }
}

/// Sum of the responses and its band.
pub fn score(responses: &BdiResponses) -> Result<DepressionResponse, InferenceError> {
    let total = responses.score();
    let bdi_score = if responses.is_integral() && total.abs() < i64::MAX as f64 {
        Number::from(total as i64)
    } else {
        Number::from_f64(total)
            .ok_or_else(|| InferenceError::Output(format!("BDI score {} is not finite", total)))?
    };
    Ok(DepressionResponse {
        depression_level: depression_level(total).to_string(),
        bdi_score,
    })
}

pub fn depression_level(score: f64) -> &'static str {
    if score < 11.0 {
        "Normal Ups and Downs"
    } else if score < 17.0 {
        "Mild Mood Disturbance"
    } else if score < 21.0 {
        "Borderline clinical depression"
    } else if score < 31.0 {
        "Moderate depression"
    } else if score < 41.0 {
        "Severe depression"
    } else {
        "Extreme depression"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::{FailingPredictor, FixedOutput};
    use std::sync::Arc;

    /// 21 responses summing to `total`, spread as evenly as the integers allow.
    fn responses_summing_to(total: u32) -> BdiResponses {
        let n = BDI_RESPONSE_COUNT as u32;
        let values = (0..n)
            .map(|i| (total / n + u32::from(i < total % n)) as f64)
            .collect();
        BdiResponses::from_values(values)
    }

    #[test]
    fn band_boundaries() {
        let cases = [
            (10.0, "Normal Ups and Downs"),
            (11.0, "Mild Mood Disturbance"),
            (16.0, "Mild Mood Disturbance"),
            (17.0, "Borderline clinical depression"),
            (20.0, "Borderline clinical depression"),
            (21.0, "Moderate depression"),
            (30.0, "Moderate depression"),
            (31.0, "Severe depression"),
            (40.0, "Severe depression"),
            (41.0, "Extreme depression"),
        ];
        for (score, level) in cases {
            assert_eq!(depression_level(score), level, "score {}", score);
        }
    }

    #[test]
    fn score_is_exact_integral_sum() {
        for total in [0, 10, 21, 33, 63] {
            let response = score(&responses_summing_to(total)).unwrap();
            assert_eq!(response.bdi_score, Number::from(total));
            assert_eq!(serde_json::to_value(&response).unwrap()["bdi_score"], total);
        }
    }

    #[test]
    fn fractional_responses_keep_fractional_score() {
        let mut values = vec![1.0; BDI_RESPONSE_COUNT];
        values[0] = 1.5;
        let response = score(&BdiResponses::from_values(values)).unwrap();
        assert_eq!(response.bdi_score.as_f64(), Some(21.5));
        assert_eq!(response.depression_level, "Moderate depression");
    }

    #[test]
    fn network_output_does_not_change_the_level() {
        let network = Arc::new(FixedOutput::scores(&[55.0]));
        let model = DepressionModel::new(Box::new(network.clone()));
        let response = model.assess(&responses_summing_to(12)).unwrap();
        assert_eq!(response.depression_level, "Mild Mood Disturbance");
        assert_eq!(network.last_input().unwrap().shape(), &[1, BDI_RESPONSE_COUNT]);
    }

    #[test]
    fn network_failure_is_reported() {
        let model = DepressionModel::new(Box::new(FailingPredictor));
        assert!(model.assess(&responses_summing_to(5)).is_err());
    }
}

//! Preprocessing artifacts stored next to the models.
//!
//! Scalers and label encoders are exported from the training notebooks as
//! small JSON documents instead of pickles.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::runtime::{InferenceError, LoadError};

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, LoadError> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// `(x - mean) / scale`, column by column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub scale: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_names: Option<Vec<String>>,
}

impl StandardScaler {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let scaler: StandardScaler = read_json(path)?;
        if scaler.mean.len() != scaler.scale.len() {
            return Err(LoadError::Invalid(format!(
                "scaler has {} means but {} scales",
                scaler.mean.len(),
                scaler.scale.len()
            )));
        }
        Ok(scaler)
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    /// Fails when the scaler was fitted on other columns than `expected`.
    pub fn check_columns(&self, expected: &[&str]) -> Result<(), LoadError> {
        if self.len() != expected.len() {
            return Err(LoadError::Invalid(format!(
                "scaler fitted on {} columns, expected {}",
                self.len(),
                expected.len()
            )));
        }
        if let Some(names) = &self.feature_names {
            if let Some((i, name)) = names
                .iter()
                .enumerate()
                .find(|(i, name)| expected.get(*i) != Some(&name.as_str()))
            {
                return Err(LoadError::Invalid(format!(
                    "scaler column {} is '{}', expected '{}'",
                    i,
                    name,
                    expected.get(i).unwrap_or(&"<none>")
                )));
            }
        }
        Ok(())
    }

    pub fn transform(&self, values: &[f32]) -> Result<Vec<f32>, InferenceError> {
        if values.len() != self.len() {
            return Err(InferenceError::Shape {
                expected: self.len(),
                actual: values.len(),
            });
        }
        Ok(values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                // Constant columns are fitted with a zero scale.
                let scale = if *scale == 0.0 { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect())
    }
}

/// Maps encoded class indices back to their labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<String>,
}

impl LabelEncoder {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let encoder: LabelEncoder = read_json(path)?;
        if encoder.classes.is_empty() {
            return Err(LoadError::Invalid("label encoder has no classes".into()));
        }
        Ok(encoder)
    }

    pub fn inverse_transform(&self, index: i64) -> Result<&str, InferenceError> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.classes.get(i))
            .map(String::as_str)
            .ok_or(InferenceError::UnknownClass(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaler_standardizes_and_tolerates_zero_scale() {
        let scaler = StandardScaler {
            mean: vec![1.0, 2.0, 3.0],
            scale: vec![2.0, 0.0, 0.5],
            feature_names: None,
        };
        assert_eq!(scaler.transform(&[3.0, 5.0, 4.0]).unwrap(), vec![1.0, 3.0, 2.0]);
        assert!(matches!(
            scaler.transform(&[1.0]),
            Err(InferenceError::Shape { expected: 3, actual: 1 })
        ));
    }

    #[test]
    fn scaler_loads_from_json_and_checks_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.json");
        std::fs::write(
            &path,
            r#"{"mean":[0.0,1.0],"scale":[1.0,1.0],"feature_names":["a","b"]}"#,
        )
        .unwrap();
        let scaler = StandardScaler::load(&path).unwrap();

        assert!(scaler.check_columns(&["a", "b"]).is_ok());
        assert!(scaler.check_columns(&["b", "a"]).is_err());
        assert!(scaler.check_columns(&["a"]).is_err());
    }

    #[test]
    fn scaler_rejects_mismatched_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.json");
        std::fs::write(&path, r#"{"mean":[0.0,1.0],"scale":[1.0]}"#).unwrap();
        assert!(matches!(StandardScaler::load(&path), Err(LoadError::Invalid(_))));
    }

    #[test]
    fn encoder_inverse_transform_bounds() {
        let encoder = LabelEncoder {
            classes: vec!["Exercise".into(), "Meditation".into()],
        };
        assert_eq!(encoder.inverse_transform(1).unwrap(), "Meditation");
        assert!(matches!(
            encoder.inverse_transform(2),
            Err(InferenceError::UnknownClass(2))
        ));
        assert!(encoder.inverse_transform(-1).is_err());
    }

    #[test]
    fn missing_encoder_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LabelEncoder::load(&dir.path().join("nope.json")),
            Err(LoadError::NotFound(_))
        ));
    }
}

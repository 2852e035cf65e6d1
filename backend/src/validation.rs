//! Request validation.
//!
//! Every prediction route turns its raw body into a typed value here before
//! any model is touched. Fields are always checked in the order the model
//! expects them, so the first missing or malformed field is the one reported.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};
use std::collections::HashMap;

use shared::{ANXIETY_FEATURES, BDI_RESPONSE_COUNT, STRESS_FEATURES, SUGGESTION_FEATURES};

use crate::error::ApiError;

pub type JsonObject = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("No JSON data received")]
    EmptyBody,
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Field '{field}' must be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },
    #[error("Unknown value '{value}' for field '{field}'")]
    UnknownCategory { field: String, value: String },
    #[error("Expected {expected} responses.")]
    ResponseCount { expected: usize, actual: usize },
    #[error("No image provided")]
    MissingImage,
}

/// Ordered model input; its length and order match the model's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    #[cfg(test)]
    pub fn from_values(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The 21 raw questionnaire answers.
#[derive(Debug, Clone, PartialEq)]
pub struct BdiResponses(Vec<f64>);

impl BdiResponses {
    #[cfg(test)]
    pub fn from_values(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn score(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn is_integral(&self) -> bool {
        self.0.iter().all(|v| v.fract() == 0.0)
    }
}

pub fn parse_object(body: &[u8]) -> Result<JsonObject, ValidationError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) if !map.is_empty() => Ok(map),
        _ => Err(ValidationError::EmptyBody),
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn field<'a>(data: &'a JsonObject, name: &str) -> Result<&'a Value, ValidationError> {
    data.get(name)
        .ok_or_else(|| ValidationError::MissingField(name.to_string()))
}

fn invalid(name: &str, expected: &'static str) -> ValidationError {
    ValidationError::InvalidField {
        field: name.to_string(),
        expected,
    }
}

pub fn stress_features(data: &JsonObject) -> Result<FeatureVector, ValidationError> {
    let values = STRESS_FEATURES
        .iter()
        .map(|name| {
            let value = field(data, name)?;
            coerce_float(value)
                .map(|v| v as f32)
                .ok_or_else(|| invalid(name, "numeric"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FeatureVector(values))
}

pub fn suggestion_features(data: &JsonObject) -> Result<FeatureVector, ValidationError> {
    // Presence is checked for every field before any coercion.
    for name in SUGGESTION_FEATURES {
        field(data, name)?;
    }
    let values = SUGGESTION_FEATURES
        .iter()
        .map(|name| {
            coerce_int(&data[*name])
                .map(|v| v as f32)
                .ok_or_else(|| invalid(name, "an integer"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FeatureVector(values))
}

pub fn bdi_responses(data: &JsonObject) -> Result<BdiResponses, ValidationError> {
    let count_error = |actual| ValidationError::ResponseCount {
        expected: BDI_RESPONSE_COUNT,
        actual,
    };
    let responses = match data.get("responses") {
        Some(Value::Array(items)) => items,
        _ => return Err(count_error(0)),
    };
    if responses.len() != BDI_RESPONSE_COUNT {
        return Err(count_error(responses.len()));
    }
    let values = responses
        .iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| invalid(&format!("responses[{}]", i), "numeric")),
            _ => Err(invalid(&format!("responses[{}]", i), "numeric")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(BdiResponses(values))
}

/// Numeric fields pass through; string values of categorical fields are
/// looked up (case-insensitively) in `categories`.
pub fn anxiety_features(
    data: &JsonObject,
    categories: &HashMap<String, HashMap<String, f32>>,
) -> Result<FeatureVector, ValidationError> {
    for name in ANXIETY_FEATURES {
        field(data, name)?;
    }
    let values = ANXIETY_FEATURES
        .iter()
        .map(|name| {
            let value = &data[*name];
            if let Some(v) = coerce_float(value) {
                return Ok(v as f32);
            }
            match (value, categories.get(*name)) {
                (Value::String(s), Some(table)) => table
                    .get(&s.trim().to_lowercase())
                    .copied()
                    .ok_or_else(|| ValidationError::UnknownCategory {
                        field: name.to_string(),
                        value: s.clone(),
                    }),
                _ => Err(invalid(name, "numeric or a known category")),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(FeatureVector(values))
}

/// Strips an optional `data:<mime>;base64,` header and decodes the rest.
pub fn decode_base64_image(text: &str) -> Result<Vec<u8>, ApiError> {
    let encoded = match text.split_once(',') {
        Some((_, rest)) => rest,
        None => text,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ApiError::Decode(format!("invalid base64 payload: {}", e)))
}

pub fn image_from_json(body: &[u8]) -> Result<Vec<u8>, ApiError> {
    let data = parse_object(body).map_err(|_| ValidationError::MissingImage)?;
    match data.get("image") {
        Some(Value::String(text)) => decode_base64_image(text),
        Some(_) => Err(ValidationError::InvalidField {
            field: "image".into(),
            expected: "a base64 string",
        }
        .into()),
        None => Err(ValidationError::MissingImage.into()),
    }
}

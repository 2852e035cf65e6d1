use std::collections::BTreeMap;

use derive_more::From;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// Column order the stress network was trained with.
pub const STRESS_FEATURES: [&str; 20] = [
    "anxiety_level",
    "self_esteem",
    "mental_health_history",
    "depression",
    "headache",
    "blood_pressure",
    "sleep_quality",
    "breathing_problem",
    "noise_level",
    "living_conditions",
    "safety",
    "basic_needs",
    "academic_performance",
    "study_load",
    "teacher_student_relationship",
    "future_career_concerns",
    "social_support",
    "peer_pressure",
    "extracurricular_activities",
    "bullying",
];

pub const SUGGESTION_FEATURES: [&str; 7] = [
    "depression_level",
    "stress_level",
    "anxiety_level",
    "age",
    "gender",
    "relationship",
    "living_situation",
];

pub const ANXIETY_FEATURES: [&str; 14] = [
    "Gender",
    "Age",
    "numbness",
    "wobbliness",
    "afraidofworsthappening",
    "heartpounding",
    "unsteadyorunstable",
    "terrified",
    "handstrembling",
    "shakystate",
    "difficultyinbreathing",
    "scared",
    "hotorcoldsweats",
    "faceflushed",
];

pub const BDI_RESPONSE_COUNT: usize = 21;

pub const STRESS_LEVELS: [&str; 3] = ["Low Stress", "Medium Stress", "High Stress"];

pub const EMOTION_LABELS: [&str; 7] = [
    "Angry", "Disgust", "Fear", "Happy", "Neutral", "Sad", "Surprise",
];

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelKind {
    Stress,
    Suggestion,
    SuggestionV2,
    Depression,
    Anxiety,
    FaceExpression,
}

impl ModelKind {
    /// Human readable name used in error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Stress => "Stress",
            ModelKind::Suggestion => "Suggestion",
            ModelKind::SuggestionV2 => "Suggestion v2",
            ModelKind::Depression => "Depression",
            ModelKind::Anxiety => "Anxiety",
            ModelKind::FaceExpression => "Face expression",
        }
    }
}

/// Rounds to two decimals, the precision every percentage is reported with.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Converts a probability in [0,1] to a rounded percentage.
pub fn percent(probability: f32) -> f64 {
    round2(probability as f64 * 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressBreakdown {
    #[serde(rename = "Low Stress")]
    pub low: f64,
    #[serde(rename = "Medium Stress")]
    pub medium: f64,
    #[serde(rename = "High Stress")]
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressResponse {
    pub stress_level: String,
    pub confidence: f64,
    pub details: StressBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub status: String,
    pub recommendation: String,
}

impl SuggestionResponse {
    pub fn success(recommendation: String) -> Self {
        Self {
            status: "success".into(),
            recommendation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepressionResponse {
    pub depression_level: String,
    /// Integral when every response was integral, otherwise a float.
    pub bdi_score: serde_json::Number,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnxietyResponse {
    pub predicted_anxiety_level: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacePrediction {
    pub face_number: u32,
    pub bounding_box: BoundingBox,
    pub predicted_emotion: String,
    pub confidence: f64,
    pub all_emotions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceExpressionResponse {
    pub faces_detected: usize,
    pub predictions: Vec<FacePrediction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FaceExpressionResponse {
    pub fn none(message: &str) -> Self {
        Self {
            faces_detected: 0,
            predictions: Vec::new(),
            message: Some(message.to_string()),
        }
    }

    pub fn single(prediction: FacePrediction) -> Self {
        Self {
            faces_detected: 1,
            predictions: vec![prediction],
            message: None,
        }
    }
}

/// Every shape a prediction route can answer with.
#[derive(Debug, Clone, PartialEq, Serialize, From)]
#[serde(untagged)]
pub enum PredictionResult {
    Stress(StressResponse),
    Suggestion(SuggestionResponse),
    Depression(DepressionResponse),
    Anxiety(AnxietyResponse),
    FaceExpression(FaceExpressionResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestJsonResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesResponse {
    pub stress_features: Vec<String>,
    pub suggestion_features: Vec<String>,
    pub anxiety_features: Vec<String>,
    pub depression_features: String,
    pub face_expression_features: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub name: ModelKind,
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusErrorResponse {
    pub status: String,
    pub message: String,
}

impl StatusErrorResponse {
    pub fn new(message: String) -> Self {
        Self {
            status: "error".into(),
            message,
        }
    }
}

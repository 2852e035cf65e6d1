use shared::{ModelKind, ModelStatus};
use strum::IntoEnumIterator;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::inference::runtime::LoadError;
use crate::inference::{
    AnxietyModel, DepressionModel, FaceExpressionModel, StressModel, SuggestionModel,
};

/// A model slot: either ready to serve or the reason it is not.
pub enum ModelHandle<T> {
    Loaded(T),
    Unavailable(String),
}

impl<T> ModelHandle<T> {
    fn from_load(kind: ModelKind, result: Result<T, LoadError>) -> Self {
        match result {
            Ok(model) => {
                log::info!("{} model loaded", kind.display_name());
                ModelHandle::Loaded(model)
            }
            Err(e) => {
                log::error!("Error loading {} model: {}", kind.display_name(), e);
                ModelHandle::Unavailable(e.to_string())
            }
        }
    }

    fn get(&self, kind: ModelKind) -> Result<&T, ApiError> {
        match self {
            ModelHandle::Loaded(model) => Ok(model),
            ModelHandle::Unavailable(_) => Err(ApiError::ModelUnavailable(kind)),
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            ModelHandle::Loaded(_) => None,
            ModelHandle::Unavailable(reason) => Some(reason),
        }
    }
}

impl<T> Default for ModelHandle<T> {
    fn default() -> Self {
        ModelHandle::Unavailable("not configured".into())
    }
}

/// Every model the service knows about, loaded once at startup.
#[derive(Default)]
pub struct ModelRegistry {
    stress: ModelHandle<StressModel>,
    suggestion: ModelHandle<SuggestionModel>,
    suggestion_v2: ModelHandle<SuggestionModel>,
    depression: ModelHandle<DepressionModel>,
    anxiety: ModelHandle<AnxietyModel>,
    face_expression: ModelHandle<FaceExpressionModel>,
}

impl ModelRegistry {
    /// Loads each slot independently; a failing slot never aborts startup.
    pub fn load(config: &AppConfig) -> Self {
        let artifacts = &config.artifacts;
        log::info!("Loading models from {}", artifacts.model_dir.display());

        let registry = Self {
            stress: ModelHandle::from_load(ModelKind::Stress, StressModel::load(artifacts)),
            suggestion: ModelHandle::from_load(
                ModelKind::Suggestion,
                SuggestionModel::load(
                    &artifacts.path(&artifacts.suggestion_model),
                    &artifacts.path(&artifacts.suggestion_encoder),
                ),
            ),
            suggestion_v2: ModelHandle::from_load(
                ModelKind::SuggestionV2,
                SuggestionModel::load(
                    &artifacts.path(&artifacts.suggestion_v2_model),
                    &artifacts.path(&artifacts.suggestion_v2_encoder),
                ),
            ),
            depression: ModelHandle::from_load(
                ModelKind::Depression,
                DepressionModel::load(artifacts),
            ),
            anxiety: ModelHandle::from_load(ModelKind::Anxiety, AnxietyModel::load(artifacts)),
            face_expression: ModelHandle::from_load(
                ModelKind::FaceExpression,
                FaceExpressionModel::load(artifacts, &config.detector),
            ),
        };

        let loaded = ModelKind::iter().filter(|k| registry.is_available(*k)).count();
        log::info!("{}/{} models available", loaded, ModelKind::iter().count());
        registry
    }

    fn reason(&self, kind: ModelKind) -> Option<&str> {
        match kind {
            ModelKind::Stress => self.stress.reason(),
            ModelKind::Suggestion => self.suggestion.reason(),
            ModelKind::SuggestionV2 => self.suggestion_v2.reason(),
            ModelKind::Depression => self.depression.reason(),
            ModelKind::Anxiety => self.anxiety.reason(),
            ModelKind::FaceExpression => self.face_expression.reason(),
        }
    }

    pub fn is_available(&self, kind: ModelKind) -> bool {
        self.reason(kind).is_none()
    }

    pub fn stress(&self) -> Result<&StressModel, ApiError> {
        self.stress.get(ModelKind::Stress)
    }

    pub fn suggestion(&self) -> Result<&SuggestionModel, ApiError> {
        self.suggestion.get(ModelKind::Suggestion)
    }

    /// Loaded and reported, but no route serves it yet.
    #[allow(dead_code)]
    pub fn suggestion_v2(&self) -> Result<&SuggestionModel, ApiError> {
        self.suggestion_v2.get(ModelKind::SuggestionV2)
    }

    pub fn depression(&self) -> Result<&DepressionModel, ApiError> {
        self.depression.get(ModelKind::Depression)
    }

    pub fn anxiety(&self) -> Result<&AnxietyModel, ApiError> {
        self.anxiety.get(ModelKind::Anxiety)
    }

    pub fn face_expression(&self) -> Result<&FaceExpressionModel, ApiError> {
        self.face_expression.get(ModelKind::FaceExpression)
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        ModelKind::iter()
            .map(|kind| ModelStatus {
                name: kind,
                available: self.is_available(kind),
                reason: self.reason(kind).map(str::to_string),
            })
            .collect()
    }
}

#[cfg(test)]
impl ModelRegistry {
    pub fn with_stress(mut self, model: StressModel) -> Self {
        self.stress = ModelHandle::Loaded(model);
        self
    }

    pub fn with_suggestion(mut self, model: SuggestionModel) -> Self {
        self.suggestion = ModelHandle::Loaded(model);
        self
    }

    pub fn with_depression(mut self, model: DepressionModel) -> Self {
        self.depression = ModelHandle::Loaded(model);
        self
    }

    pub fn with_anxiety(mut self, model: AnxietyModel) -> Self {
        self.anxiety = ModelHandle::Loaded(model);
        self
    }

    pub fn with_face_expression(mut self, model: FaceExpressionModel) -> Self {
        self.face_expression = ModelHandle::Loaded(model);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::testing::FixedOutput;

    #[test]
    fn empty_model_dir_leaves_every_slot_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.artifacts.model_dir = dir.path().to_path_buf();
        config.artifacts.base_dir = dir.path().to_path_buf();

        let registry = ModelRegistry::load(&config);
        for status in registry.status() {
            assert!(!status.available, "{:?}", status.name);
            assert!(status.reason.is_some());
        }
        assert!(matches!(
            registry.stress(),
            Err(ApiError::ModelUnavailable(ModelKind::Stress))
        ));
        assert!(registry.suggestion_v2().is_err());
    }

    #[test]
    fn one_failed_slot_does_not_affect_others() {
        let registry = ModelRegistry::default()
            .with_anxiety(AnxietyModel::new(Box::new(FixedOutput::label(1))));

        assert!(registry.is_available(ModelKind::Anxiety));
        assert!(registry.anxiety().is_ok());
        assert!(!registry.is_available(ModelKind::Depression));

        let status = registry.status();
        assert_eq!(status.len(), 6);
        let anxiety = status.iter().find(|s| s.name == ModelKind::Anxiety).unwrap();
        assert!(anxiety.available);
        assert!(anxiety.reason.is_none());
    }

    #[test]
    fn malformed_scaler_keeps_stress_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scaler3.json"), r#"{"mean":[0.0],"scale":[1.0]}"#)
            .unwrap();
        std::fs::write(dir.path().join("stress_model.onnx"), b"onnx").unwrap();
        let mut config = AppConfig::default();
        config.artifacts.model_dir = dir.path().to_path_buf();

        let registry = ModelRegistry::load(&config);
        let stress = registry
            .status()
            .into_iter()
            .find(|s| s.name == ModelKind::Stress)
            .unwrap();
        assert!(!stress.available);
        assert!(stress.reason.unwrap().contains("columns"));
    }
}

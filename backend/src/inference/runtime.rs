use ndarray::{Array1, ArrayD, Axis};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Value;
use std::path::Path;
use std::sync::Mutex;

#[cfg(feature = "torch")]
use tch::{Device, Kind, Tensor, nn::ModuleT};

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Model runtime error: {0}")]
    Runtime(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
    #[error("Input has {actual} values, expected {expected}")]
    Shape { expected: usize, actual: usize },
    #[error("Predicted class {0} has no label")]
    UnknownClass(i64),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid artifact: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid artifact: {0}")]
    Invalid(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Unsupported artifact format: {0}")]
    Unsupported(String),
    #[error("Invalid cascade: {0}")]
    Cascade(String),
}

/// Raw output of a model call.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutput {
    Scores(Vec<f32>),
    Labels(Vec<i64>),
}

impl ModelOutput {
    pub fn into_scores(self) -> Result<Vec<f32>, InferenceError> {
        match self {
            ModelOutput::Scores(scores) => Ok(scores),
            ModelOutput::Labels(_) => Err(InferenceError::Output(
                "expected scores, got class labels".into(),
            )),
        }
    }

    /// Class of the first row. Score outputs are read as a single value or
    /// as a probability vector.
    pub fn class_label(&self) -> Result<i64, InferenceError> {
        match self {
            ModelOutput::Labels(labels) => labels
                .first()
                .copied()
                .ok_or_else(|| InferenceError::Output("empty label tensor".into())),
            ModelOutput::Scores(scores) if scores.len() == 1 => Ok(scores[0].round() as i64),
            ModelOutput::Scores(scores) => argmax(scores)
                .map(|i| i as i64)
                .ok_or_else(|| InferenceError::Output("empty score tensor".into())),
        }
    }
}

/// Index of the first maximum.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// A `[1, n]` batch holding one row.
pub fn row(values: &[f32]) -> ArrayD<f32> {
    Array1::from_vec(values.to_vec())
        .insert_axis(Axis(0))
        .into_dyn()
}

pub trait Predictor: Send + Sync {
    fn predict(&self, input: ArrayD<f32>) -> Result<ModelOutput, InferenceError>;
}

pub struct OnnxModel {
    session: Mutex<Session>,
}

impl OnnxModel {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.display().to_string()));
        }
        let session = Session::builder()
            .map_err(|e| LoadError::Runtime(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| LoadError::Runtime(format!("Failed to set optimization: {}", e)))?
            .commit_from_file(path)
            .map_err(|e| LoadError::Runtime(format!("Failed to load model: {}", e)))?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Predictor for OnnxModel {
    fn predict(&self, input: ArrayD<f32>) -> Result<ModelOutput, InferenceError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Runtime("session lock poisoned".into()))?;

        // Classifiers exported from scikit-learn carry a label and a
        // probability output; the label one is what callers want.
        let output_name = session
            .outputs
            .iter()
            .find(|o| o.name.contains("label"))
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .ok_or_else(|| InferenceError::Output("model defines no outputs".into()))?;

        let input_tensor = Value::from_array(input)
            .map_err(|e| InferenceError::Runtime(format!("Tensor error: {}", e)))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| InferenceError::Runtime(format!("Inference failed: {}", e)))?;
        let output = outputs
            .get(&output_name)
            .ok_or_else(|| InferenceError::Output(format!("missing output {}", output_name)))?;

        if let Ok((_, labels)) = output.try_extract_tensor::<i64>() {
            return Ok(ModelOutput::Labels(labels.to_vec()));
        }
        let (_, scores) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(format!("Extract error: {}", e)))?;
        Ok(ModelOutput::Scores(scores.to_vec()))
    }
}

#[cfg(feature = "torch")]
pub struct TorchModel {
    module: Mutex<tch::CModule>,
}

#[cfg(feature = "torch")]
impl TorchModel {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let device = Device::cuda_if_available();
        let module = tch::CModule::load_on_device(path, device)
            .map_err(|e| LoadError::Runtime(e.to_string()))?;
        Ok(Self {
            module: Mutex::new(module),
        })
    }
}

#[cfg(feature = "torch")]
impl Predictor for TorchModel {
    fn predict(&self, input: ArrayD<f32>) -> Result<ModelOutput, InferenceError> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_slice(&data).reshape(shape.as_slice());
        let output = self
            .module
            .lock()
            .map_err(|_| InferenceError::Runtime("module lock poisoned".into()))?
            .forward_t(&tensor, false);
        let output_flat = output.to_kind(Kind::Float).view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut output_vec = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut output_vec, num_elements);
        Ok(ModelOutput::Scores(output_vec))
    }
}

/// Picks the runtime from the file extension.
pub fn load_predictor(path: &Path) -> Result<Box<dyn Predictor>, LoadError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("onnx") => Ok(Box::new(OnnxModel::load(path)?)),
        #[cfg(feature = "torch")]
        Some("pt") | Some("pth") => Ok(Box::new(TorchModel::load(path)?)),
        _ => Err(LoadError::Unsupported(path.display().to_string())),
    }
}

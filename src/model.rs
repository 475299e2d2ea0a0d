use std::path::Path;

use ndarray::{Array2, ArrayD, CowArray};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::Session;
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::value::ValueType;
use tracing::{debug, info};

use crate::{Error, Result};

/// Anything that turns a preprocessed batch into one score row per image.
///
/// Implementations are loaded once and shared read-only between requests.
pub trait Classifier: Send + Sync {
    /// `batch` is `[N, ...]`; the result is `[N, num_classes]`.
    fn predict(&self, batch: ArrayD<f32>) -> Result<Array2<f32>>;

    /// Output width when the model declares it statically.
    fn num_classes(&self) -> Option<usize> {
        None
    }

    /// Declared input shape, `None` for dynamic axes.
    fn input_shape(&self) -> Option<Vec<Option<usize>>> {
        None
    }
}

pub struct OnnxModel {
    provider: [ort::execution_providers::ExecutionProviderDispatch; 1]
}

impl OnnxModel {
    pub fn new(cuda: bool) -> Self {
        let provider = if cuda {
            [CUDAExecutionProvider::default().build().error_on_failure()]
        } else {
            [CPUExecutionProvider::default().build()]
        };
        Self {
            provider
        }
    }

    pub fn load_model(&self, model_path: &Path) -> Result<Session> {
        if !model_path.is_file() {
            return Err(Error::startup(format!("model file {} not found", model_path.display())));
        }
        let session = SessionBuilder::new()
            .and_then(|b| b.with_execution_providers(self.provider.clone()))
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| Error::startup(format!("cannot load model {}: {}", model_path.display(), e)))?;
        Ok(session)
    }

    /// Load the model and wrap it as a [`Classifier`].
    pub fn load_classifier(&self, model_path: &Path) -> Result<OnnxClassifier> {
        let session = self.load_model(model_path)?;
        let classifier = OnnxClassifier::new(session)?;
        info!(
            "Loaded {} (input '{}' {:?}, {} classes)",
            model_path.display(),
            classifier.input_name,
            classifier.input_shape,
            classifier
                .num_classes
                .map_or_else(|| "dynamic".to_string(), |n| n.to_string())
        );
        Ok(classifier)
    }
}

/// ONNX Runtime session behind the [`Classifier`] trait.
pub struct OnnxClassifier {
    session: Session,
    input_name: String,
    input_shape: Vec<Option<usize>>,
    num_classes: Option<usize>,
}

fn static_dims(dimensions: &[i64]) -> Vec<Option<usize>> {
    dimensions
        .iter()
        .map(|&d| if d > 0 { Some(d as usize) } else { None })
        .collect()
}

impl OnnxClassifier {
    pub fn new(session: Session) -> Result<Self> {
        let input = session
            .inputs
            .first()
            .ok_or_else(|| Error::startup("model declares no inputs"))?;
        let input_shape = match &input.input_type {
            ValueType::Tensor { dimensions, .. } => static_dims(dimensions),
            other => {
                return Err(Error::startup(format!(
                    "input '{}' is not a tensor: {:?}",
                    input.name, other
                )));
            }
        };
        let input_name = input.name.clone();
        let output = session
            .outputs
            .first()
            .ok_or_else(|| Error::startup("model declares no outputs"))?;

        let num_classes = match &output.output_type {
            ValueType::Tensor { dimensions, .. } => {
                debug!("Output '{}' dimensions {:?}", output.name, dimensions);
                dimensions.last().copied().filter(|&d| d > 0).map(|d| d as usize)
            }
            other => {
                return Err(Error::startup(format!(
                    "output '{}' is not a tensor: {:?}",
                    output.name, other
                )));
            }
        };

        Ok(Self {
            session,
            input_name,
            input_shape,
            num_classes,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, batch: ArrayD<f32>) -> Result<Array2<f32>> {
        let xs = CowArray::from(batch);
        let input_data = ort::inputs![xs.view()]?;
        let ys = self.session.run(input_data)?;

        let scores = ys[0].try_extract_tensor::<f32>()?.into_owned();
        let (n, width) = match scores.shape() {
            [] => return Err(Error::Inference("model returned a scalar".into())),
            [c] => (1, *c),
            [n, rest @ ..] => (*n, rest.iter().product()),
        };
        Ok(scores.into_shape_with_order((n, width))?)
    }

    fn num_classes(&self) -> Option<usize> {
        self.num_classes
    }

    fn input_shape(&self) -> Option<Vec<Option<usize>>> {
        Some(self.input_shape.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbolic_axes_are_dynamic() {
        assert_eq!(
            static_dims(&[-1, 190, 190, 3]),
            vec![None, Some(190), Some(190), Some(3)]
        );
        assert_eq!(static_dims(&[0, 3]), vec![None, Some(3)]);
    }
}

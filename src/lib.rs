pub mod grpc;
pub mod error;
pub mod config;
pub mod labels;
pub mod knowledge;
pub mod preprocess;
pub mod model;
pub mod postprocess;
pub mod pipeline;
pub mod convert;
pub mod service;
pub mod report;
pub mod cli;
pub mod utils;

pub use crate::error::{Error, Result};
pub use crate::config::{ModelProfile, Normalization, OutputKind, TensorLayout};
pub use crate::labels::ClassLabels;
pub use crate::knowledge::{KnowledgeStore, RecordLookup, SpeciesRecord};
pub use crate::model::{Classifier, OnnxClassifier, OnnxModel};
pub use crate::preprocess::Processor;
pub use crate::pipeline::{InferencePipeline, Outcome, PredictionResult};
pub use crate::service::InsectService;

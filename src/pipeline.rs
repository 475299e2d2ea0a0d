//! Species inference pipeline.
//!
//! Turns one upload into one [`PredictionResult`]:
//! decode, resize, normalize, batch, classify, decide, bounds-check, look up.
//!
//! The classifier, labels and knowledge store are built once at startup and
//! passed in; the pipeline holds no per-request state and is shared between
//! requests behind an `Arc`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::{Array1, ArrayD, ArrayView1, Axis};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ModelProfile, OutputKind};
use crate::knowledge::{KnowledgeStore, RecordLookup};
use crate::labels::ClassLabels;
use crate::model::Classifier;
use crate::postprocess::{decide, softmax, top_k};
use crate::preprocess::Processor;
use crate::{Error, Result};

pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedClass {
    pub index: usize,
    /// `None` when the index has no label
    pub label: Option<String>,
    pub probability: f32,
}

/// One request's answer. Never shared across requests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub index: usize,
    pub label: String,
    /// In `[0, 1]`
    pub confidence: f32,
    pub record: RecordLookup,
    pub top_k: Vec<RankedClass>,
    pub inference_time_ms: f64,
}

/// Request-level result with every request-local failure made explicit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Label and species record
    Identified(PredictionResult),
    /// Valid label, nothing in the knowledge store for it
    NoRecord(PredictionResult),
    /// Classifier index has no label; model and label list disagree
    Unidentified { index: usize, num_labels: usize },
    /// Upload could not be decoded
    InvalidImage(String),
}

impl Outcome {
    /// Fold request-local errors into variants; anything else is returned
    /// as an error for the transport to report.
    pub fn from_result(result: Result<PredictionResult>) -> Result<Outcome> {
        match result {
            Ok(prediction) if prediction.record.is_found() => Ok(Outcome::Identified(prediction)),
            Ok(prediction) => Ok(Outcome::NoRecord(prediction)),
            Err(Error::OutOfRangeLabel { index, num_labels }) => {
                Ok(Outcome::Unidentified { index, num_labels })
            }
            Err(Error::InvalidImage(msg)) => Ok(Outcome::InvalidImage(msg)),
            Err(e) => Err(e),
        }
    }
}

pub struct InferencePipeline {
    classifier: Arc<dyn Classifier>,
    processor: Processor,
    labels: Arc<ClassLabels>,
    knowledge: Arc<KnowledgeStore>,
    top_k: usize,
}

impl InferencePipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        profile: ModelProfile,
        labels: Arc<ClassLabels>,
        knowledge: Arc<KnowledgeStore>,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::startup("label list is empty"));
        }
        if let Some(n) = classifier.num_classes() {
            if n != labels.len() {
                return Err(Error::startup(format!(
                    "model has {} outputs but {} labels were loaded",
                    n,
                    labels.len()
                )));
            }
        }
        if let Some(declared) = classifier.input_shape() {
            let expected = profile.batch_shape(1);
            let fits = declared.len() == expected.len()
                && declared
                    .iter()
                    .zip(expected)
                    .all(|(d, e)| d.is_none_or(|d| d == e));
            if !fits {
                return Err(Error::startup(format!(
                    "model expects input {:?} but profile {} produces {:?}",
                    declared, profile, expected
                )));
            }
        }
        Ok(Self {
            classifier,
            processor: Processor::new(profile),
            labels,
            knowledge,
            top_k: DEFAULT_TOP_K,
        })
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.processor.profile
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    /// Classify one upload.
    pub fn identify(&self, bytes: &[u8]) -> Result<PredictionResult> {
        self.identify_with(bytes, self.top_k)
    }

    pub fn identify_with(&self, bytes: &[u8], k: usize) -> Result<PredictionResult> {
        let tensor = self.processor.prepare(bytes)?;
        let batch = self.processor.stack(&[tensor])?;
        self.classify_one(batch, k)
    }

    /// Classify several uploads with one forward pass. The outer error is a
    /// classifier failure; inner errors belong to their own slot.
    pub fn identify_batch<B>(&self, uploads: &[B], k: usize) -> Result<Vec<Result<PredictionResult>>>
    where
        B: AsRef<[u8]> + Sync,
    {
        let prepared = self.processor.prepare_all(uploads);

        let mut slots: Vec<Option<usize>> = Vec::with_capacity(prepared.len());
        let mut tensors = Vec::new();
        let mut failures = Vec::new();
        for item in prepared {
            match item {
                Ok(tensor) => {
                    slots.push(Some(tensors.len()));
                    tensors.push(tensor);
                }
                Err(e) => {
                    slots.push(None);
                    failures.push(e);
                }
            }
        }

        let mut rows = Vec::new();
        let mut elapsed = Duration::ZERO;
        if !tensors.is_empty() {
            let batch = self.processor.stack(&tensors)?;
            let t = Instant::now();
            let scores = self.run(batch, tensors.len())?;
            elapsed = t.elapsed();
            rows = scores.axis_iter(Axis(0)).map(|r| r.to_owned()).collect();
        }

        let mut failures = failures.into_iter();
        let results = slots
            .into_iter()
            .map(|slot| match slot {
                Some(row) => self.interpret(rows[row].view(), elapsed, k),
                None => Err(failures
                    .next()
                    .unwrap_or_else(|| Error::InvalidImage("missing preprocessing result".into()))),
            })
            .collect();
        Ok(results)
    }

    fn classify_one(&self, batch: ArrayD<f32>, k: usize) -> Result<PredictionResult> {
        let t = Instant::now();
        let scores = self.run(batch, 1)?;
        let elapsed = t.elapsed();
        self.interpret(scores.row(0), elapsed, k)
    }

    fn run(&self, batch: ArrayD<f32>, expected_rows: usize) -> Result<ndarray::Array2<f32>> {
        let scores = self.classifier.predict(batch)?;
        if scores.nrows() != expected_rows {
            return Err(Error::Inference(format!(
                "classifier returned {} rows for a batch of {}",
                scores.nrows(),
                expected_rows
            )));
        }
        Ok(scores)
    }

    /// Decision rule, bounds check and lookup for one score row.
    pub fn interpret(&self, row: ArrayView1<f32>, elapsed: Duration, k: usize) -> Result<PredictionResult> {
        let probabilities: Array1<f32> = match self.profile().output {
            OutputKind::Logits => softmax(row),
            OutputKind::Probabilities => row.to_owned(),
        };

        let decision = decide(probabilities.view())?;
        let Some(label) = self.labels.get(decision.index) else {
            warn!(
                "Classifier picked index {} but only {} labels are loaded",
                decision.index,
                self.labels.len()
            );
            return Err(Error::OutOfRangeLabel {
                index: decision.index,
                num_labels: self.labels.len(),
            });
        };

        let record = self.knowledge.lookup(decision.index, label);
        let top_k = top_k(probabilities.view(), k)
            .into_iter()
            .map(|(index, probability)| RankedClass {
                index,
                label: self.labels.get(index).map(str::to_string),
                probability: probability.clamp(0.0, 1.0),
            })
            .collect();

        debug!(
            "Identified '{}' ({:.1}%) in {:?}, record {}",
            label,
            decision.confidence * 100.0,
            elapsed,
            if record.is_found() { "found" } else { "missing" }
        );

        Ok(PredictionResult {
            index: decision.index,
            label: label.to_string(),
            confidence: decision.confidence,
            record,
            top_k,
            inference_time_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }
}

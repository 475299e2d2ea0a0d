use std::fmt;
use std::sync::Arc;

use tonic::{Request, Response, Status, async_trait};
use tracing::{info, warn};

use crate::convert::{convert_failure, convert_outcome, convert_species};
use crate::grpc::{
    BatchIdentifyResponse, BatchImageRequest, Empty, IdentifyResponse, ImageRequest,
    SpeciesEntry, SpeciesList, SpeciesRequest, SpeciesResponse,
    identifier_server::Identifier,
};
use crate::pipeline::{InferencePipeline, Outcome};
use crate::Error;

/// The Insectifica gRPC service.
#[derive(Clone)]
pub struct InsectService {
    pipeline: Arc<InferencePipeline>,
}

// The pipeline holds the ORT session, which has nothing useful to print.
impl fmt::Debug for InsectService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InsectService")
            .field("labels", &self.pipeline.labels().len())
            .field("records", &self.pipeline.knowledge().len())
            .finish()
    }
}

impl InsectService {
    pub fn new(pipeline: Arc<InferencePipeline>) -> Self {
        Self { pipeline }
    }

    fn top_k(&self, requested: u32) -> usize {
        if requested == 0 {
            self.pipeline.default_top_k()
        } else {
            requested as usize
        }
    }
}

fn internal(e: Error) -> Status {
    warn!("Inference failed: {}", e);
    Status::internal(format!("Inference failed: {}", e))
}

fn log_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Unidentified { index, num_labels } => {
            warn!("Unidentified: index {} with {} labels", index, num_labels)
        }
        Outcome::InvalidImage(reason) => info!("Rejected upload: {}", reason),
        Outcome::Identified(p) | Outcome::NoRecord(p) => {
            info!("Identified '{}' at {:.1}%", p.label, p.confidence * 100.0)
        }
    }
}

#[async_trait]
impl Identifier for InsectService {
    async fn identify(
        &self,
        request: Request<ImageRequest>,
    ) -> Result<Response<IdentifyResponse>, Status> {
        let req = request.into_inner();
        let k = self.top_k(req.top_k);
        let pipeline = self.pipeline.clone();

        // The forward pass blocks; keep it off the async workers.
        let result = tokio::task::spawn_blocking(move || pipeline.identify_with(&req.image_data, k))
            .await
            .map_err(|e| Status::internal(format!("Worker failed: {}", e)))?;

        let outcome = Outcome::from_result(result).map_err(internal)?;
        log_outcome(&outcome);
        Ok(Response::new(convert_outcome(&outcome)))
    }

    async fn identify_batch(
        &self,
        request: Request<BatchImageRequest>,
    ) -> Result<Response<BatchIdentifyResponse>, Status> {
        let req = request.into_inner();
        if req.images.is_empty() {
            return Ok(Response::new(BatchIdentifyResponse::default()));
        }
        let k = self.top_k(req.top_k);
        let pipeline = self.pipeline.clone();

        let results = tokio::task::spawn_blocking(move || pipeline.identify_batch(&req.images, k))
            .await
            .map_err(|e| Status::internal(format!("Worker failed: {}", e)))?
            .map_err(internal)?;

        let mut responses = Vec::with_capacity(results.len());
        for (slot, result) in results.into_iter().enumerate() {
            match Outcome::from_result(result) {
                Ok(outcome) => {
                    log_outcome(&outcome);
                    responses.push(convert_outcome(&outcome));
                }
                Err(e) => {
                    warn!("Batch slot {} failed: {}", slot, e);
                    responses.push(convert_failure());
                }
            }
        }
        Ok(Response::new(BatchIdentifyResponse { results: responses }))
    }

    async fn lookup_species(
        &self,
        request: Request<SpeciesRequest>,
    ) -> Result<Response<SpeciesResponse>, Status> {
        let name = request.into_inner().name;
        if name.trim().is_empty() {
            return Err(Status::invalid_argument("species name is empty"));
        }
        let species = self.pipeline.knowledge().get_by_name(&name).map(convert_species);
        Ok(Response::new(SpeciesResponse {
            found: species.is_some(),
            species,
        }))
    }

    async fn list_species(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<SpeciesList>, Status> {
        let knowledge = self.pipeline.knowledge();
        let species = self
            .pipeline
            .labels()
            .iter()
            .enumerate()
            .map(|(index, label)| SpeciesEntry {
                index: index as u32,
                label: label.to_string(),
                has_record: knowledge.has_record(index, label),
            })
            .collect();
        Ok(Response::new(SpeciesList { species }))
    }
}

use crate::grpc::{
    IdentifyResponse, IdentifyStatus,
    Prediction as ProtoPrediction,
    RankedClass as ProtoRankedClass,
    Species as ProtoSpecies,
    Taxonomy as ProtoTaxonomy,
};
use crate::knowledge::{Field, SpeciesRecord};
use crate::pipeline::{Outcome, PredictionResult};

pub const MSG_NO_RECORD: &str = "Detailed information for this species is not yet in our database.";
pub const MSG_UNIDENTIFIED: &str = "Unable to identify. Please upload a clearer image of a single insect.";
pub const MSG_INVALID_IMAGE: &str = "Could not read the image. Please upload a clear JPEG or PNG photo.";
pub const MSG_FAILED: &str = "Identification failed for this image. Please try again.";

/// Converts a species record to the gRPC message, filling placeholders.
pub fn convert_species(record: &SpeciesRecord) -> ProtoSpecies {
    let text = |field: Field| record.field_or_placeholder(field).to_string();
    ProtoSpecies {
        name: record.name.clone(),
        common_name: text(Field::CommonName),
        taxonomy: Some(ProtoTaxonomy {
            kingdom: text(Field::Kingdom),
            phylum: text(Field::Phylum),
            class: text(Field::Class),
            order: text(Field::Order),
            family: text(Field::Family),
            genus: text(Field::Genus),
            species: text(Field::Species),
        }),
        host_crops: text(Field::HostCrops),
        damage_symptoms: text(Field::DamageSymptoms),
        ipm_measures: text(Field::IpmMeasures),
        chemical_control: text(Field::ChemicalControl),
    }
}

pub fn convert_prediction(internal: &PredictionResult) -> ProtoPrediction {
    let top_k = internal
        .top_k
        .iter()
        .map(|r| ProtoRankedClass {
            index: r.index as u32,
            label: r.label.clone().unwrap_or_default(),
            probability: r.probability,
        })
        .collect::<Vec<_>>();

    ProtoPrediction {
        index: internal.index as u32,
        label: internal.label.clone(),
        confidence: internal.confidence,
        top_k,
        inference_time_ms: internal.inference_time_ms,
    }
}

/// Converts a pipeline outcome to the response the client renders.
pub fn convert_outcome(outcome: &Outcome) -> IdentifyResponse {
    let mut response = IdentifyResponse::default();
    match outcome {
        Outcome::Identified(prediction) => {
            response.set_status(IdentifyStatus::Identified);
            response.message = format!("Identified as: {}", prediction.label);
            response.prediction = Some(convert_prediction(prediction));
            response.species = prediction.record.record().map(convert_species);
        }
        Outcome::NoRecord(prediction) => {
            response.set_status(IdentifyStatus::NoRecord);
            response.message = MSG_NO_RECORD.to_string();
            response.prediction = Some(convert_prediction(prediction));
        }
        Outcome::Unidentified { .. } => {
            response.set_status(IdentifyStatus::Unidentified);
            response.message = MSG_UNIDENTIFIED.to_string();
        }
        Outcome::InvalidImage(_) => {
            response.set_status(IdentifyStatus::InvalidImage);
            response.message = MSG_INVALID_IMAGE.to_string();
        }
    }
    response
}

/// Response for a batch slot that failed after the forward pass.
pub fn convert_failure() -> IdentifyResponse {
    let mut response = IdentifyResponse {
        message: MSG_FAILED.to_string(),
        ..Default::default()
    };
    response.set_status(IdentifyStatus::Failed);
    response
}

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array2, ArrayD};
use tonic::{Code, Request};

use insectifica::grpc::identifier_server::Identifier;
use insectifica::grpc::{BatchImageRequest, Empty, IdentifyStatus, ImageRequest, SpeciesRequest};
use insectifica::knowledge::NOT_AVAILABLE;
use insectifica::{
    ClassLabels, Classifier, Error, InferencePipeline, InsectService, KnowledgeStore,
    ModelProfile, Result,
};

/// Picks the class from the red channel of the first pixel so each upload
/// can steer its own prediction. Class 11 yields a row of NaN.
struct RedChannelClassifier {
    classes: usize,
}

impl Classifier for RedChannelClassifier {
    fn predict(&self, batch: ArrayD<f32>) -> Result<Array2<f32>> {
        let n = batch.shape()[0];
        let mut out = Array2::zeros((n, self.classes));
        for i in 0..n {
            // MobileNet normalization maps 0..=255 onto -1..=1
            let red = batch[&[i, 0, 0, 0][..]];
            let index = (((red + 1.0) * 127.5).round() as usize) / 20;
            if index >= self.classes {
                return Err(Error::Inference(format!("class {} out of model range", index)));
            }
            if index == 11 {
                out.row_mut(i).fill(f32::NAN);
                continue;
            }
            out[[i, index]] = 1.0;
        }
        Ok(out)
    }
}

/// Upload whose red channel selects `class` (0..=12).
fn upload(class: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([class * 20 + 5, 0, 0])))
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Model with 12 outputs, 5 labels, records for D only.
fn service() -> InsectService {
    let labels = ClassLabels::new(["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect());
    let store = KnowledgeStore::from_json_str(
        r#"{ "D": { "Common Name": "Rhinoceros beetle", "Taxonomy": { "Order": "Coleoptera" } } }"#,
    )
    .unwrap();
    let pipeline = InferencePipeline::new(
        Arc::new(RedChannelClassifier { classes: 12 }),
        ModelProfile::default(),
        Arc::new(labels),
        Arc::new(store),
    )
    .unwrap();
    InsectService::new(Arc::new(pipeline))
}

#[tokio::test]
async fn identify_found_record() {
    let response = service()
        .identify(Request::new(ImageRequest { image_data: upload(3), top_k: 2 }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), IdentifyStatus::Identified);
    let prediction = response.prediction.unwrap();
    assert_eq!(prediction.label, "D");
    assert_eq!(prediction.confidence, 1.0);
    assert_eq!(prediction.top_k.len(), 2);

    let species = response.species.unwrap();
    assert_eq!(species.common_name, "Rhinoceros beetle");
    let taxonomy = species.taxonomy.unwrap();
    assert_eq!(taxonomy.order, "Coleoptera");
    assert_eq!(taxonomy.family, NOT_AVAILABLE);
    assert_eq!(species.chemical_control, NOT_AVAILABLE);
}

#[tokio::test]
async fn identify_without_record() {
    let response = service()
        .identify(Request::new(ImageRequest { image_data: upload(1), top_k: 0 }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), IdentifyStatus::NoRecord);
    assert_eq!(response.prediction.unwrap().label, "B");
    assert!(response.species.is_none());
}

#[tokio::test]
async fn out_of_range_is_unidentified_not_an_error() {
    let response = service()
        .identify(Request::new(ImageRequest { image_data: upload(10), top_k: 0 }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), IdentifyStatus::Unidentified);
    assert!(response.prediction.is_none());
}

#[tokio::test]
async fn bad_upload_is_invalid_image() {
    let response = service()
        .identify(Request::new(ImageRequest { image_data: b"hello".to_vec(), top_k: 0 }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), IdentifyStatus::InvalidImage);
}

#[tokio::test]
async fn classifier_failure_is_internal() {
    let status = service()
        .identify(Request::new(ImageRequest { image_data: upload(12), top_k: 0 }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
}

#[tokio::test]
async fn batch_keeps_request_order() {
    let images = vec![upload(3), b"nope".to_vec(), upload(1), upload(7)];
    let response = service()
        .identify_batch(Request::new(BatchImageRequest { images, top_k: 1 }))
        .await
        .unwrap()
        .into_inner();

    let statuses: Vec<_> = response.results.iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        [
            IdentifyStatus::Identified,
            IdentifyStatus::InvalidImage,
            IdentifyStatus::NoRecord,
            IdentifyStatus::Unidentified,
        ]
    );
}

#[tokio::test]
async fn nan_scores_fail_only_their_batch_slot() {
    let images = vec![upload(3), upload(11), upload(1)];
    let response = service()
        .identify_batch(Request::new(BatchImageRequest { images, top_k: 0 }))
        .await
        .unwrap()
        .into_inner();

    let statuses: Vec<_> = response.results.iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        [IdentifyStatus::Identified, IdentifyStatus::Failed, IdentifyStatus::NoRecord]
    );
    assert_eq!(response.results[0].prediction.as_ref().unwrap().label, "D");
    assert!(response.results[1].prediction.is_none());
}

#[tokio::test]
async fn nan_scores_on_a_single_upload_are_internal() {
    let status = service()
        .identify(Request::new(ImageRequest { image_data: upload(11), top_k: 0 }))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
}

#[tokio::test]
async fn empty_batch_is_empty() {
    let response = service()
        .identify_batch(Request::new(BatchImageRequest { images: vec![], top_k: 0 }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn lookup_and_list_species() {
    let service = service();

    let found = service
        .lookup_species(Request::new(SpeciesRequest { name: "d".into() }))
        .await
        .unwrap()
        .into_inner();
    assert!(found.found);
    assert_eq!(found.species.unwrap().name, "D");

    let missing = service
        .lookup_species(Request::new(SpeciesRequest { name: "Z".into() }))
        .await
        .unwrap()
        .into_inner();
    assert!(!missing.found);

    let blank = service
        .lookup_species(Request::new(SpeciesRequest { name: "  ".into() }))
        .await
        .unwrap_err();
    assert_eq!(blank.code(), Code::InvalidArgument);

    let list = service.list_species(Request::new(Empty {})).await.unwrap().into_inner();
    assert_eq!(list.species.len(), 5);
    assert!(list.species[3].has_record);
    assert!(!list.species[0].has_record);
    assert_eq!(list.species[4].label, "E");
}

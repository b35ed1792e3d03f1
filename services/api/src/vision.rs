//! Facial-expression analysis of video frames through the Google Cloud
//! Vision REST API.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use polly_core::expression::{EmotionScores, ExpressionResult, FaceMetadata, likelihood_to_score};
use serde::{Deserialize, Serialize};

use crate::audio_utils;

const VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

#[async_trait]
pub trait ExpressionAnalyzer: Send + Sync {
    /// Analyzes one JPEG frame. A frame without a face is a successful
    /// `no_face` result, not an error.
    async fn analyze(&self, jpeg: &[u8]) -> Result<ExpressionResult>;
}

pub struct GoogleVisionAnalyzer {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleVisionAnalyzer {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<ImageRequest>,
}

#[derive(Serialize)]
struct ImageRequest {
    image: Image,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct Image {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

#[derive(Deserialize, Default)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    face_annotations: Vec<FaceAnnotation>,
    error: Option<VisionStatus>,
}

#[derive(Deserialize)]
struct VisionStatus {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct FaceAnnotation {
    detection_confidence: f32,
    landmarking_confidence: f32,
    roll_angle: f32,
    pan_angle: f32,
    tilt_angle: f32,
    joy_likelihood: String,
    sorrow_likelihood: String,
    anger_likelihood: String,
    surprise_likelihood: String,
    under_exposed_likelihood: String,
    blurred_likelihood: String,
    headwear_likelihood: String,
}

impl FaceAnnotation {
    fn into_metadata(self) -> FaceMetadata {
        FaceMetadata {
            detection_confidence: self.detection_confidence,
            landmarking_confidence: self.landmarking_confidence,
            headwear_likelihood: likelihood_to_score(&self.headwear_likelihood),
            under_exposed_likelihood: likelihood_to_score(&self.under_exposed_likelihood),
            blurred_likelihood: likelihood_to_score(&self.blurred_likelihood),
            roll_angle: self.roll_angle,
            pan_angle: self.pan_angle,
            tilt_angle: self.tilt_angle,
            all_emotions: EmotionScores {
                joy: likelihood_to_score(&self.joy_likelihood),
                sorrow: likelihood_to_score(&self.sorrow_likelihood),
                anger: likelihood_to_score(&self.anger_likelihood),
                surprise: likelihood_to_score(&self.surprise_likelihood),
            },
        }
    }
}

/// Turns a raw `images:annotate` response body into an expression result,
/// using the first detected face.
fn interpret_response(body: &str) -> Result<ExpressionResult> {
    let response: AnnotateResponse =
        serde_json::from_str(body).context("Invalid Vision API response")?;
    let Some(image) = response.responses.into_iter().next() else {
        return Ok(ExpressionResult::no_face());
    };
    if let Some(status) = image.error {
        bail!("Vision API error: {}", status.message);
    }
    Ok(image
        .face_annotations
        .into_iter()
        .next()
        .map(|face| ExpressionResult::from_face(face.into_metadata()))
        .unwrap_or_else(ExpressionResult::no_face))
}

#[async_trait]
impl ExpressionAnalyzer for GoogleVisionAnalyzer {
    async fn analyze(&self, jpeg: &[u8]) -> Result<ExpressionResult> {
        let request = AnnotateRequest {
            requests: vec![ImageRequest {
                image: Image {
                    content: audio_utils::encode_bytes(jpeg),
                },
                features: vec![Feature {
                    kind: "FACE_DETECTION",
                    max_results: 1,
                }],
            }],
        };

        let response = self
            .client
            .post(VISION_ENDPOINT)
            .query(&[("key", &self.api_key)])
            .json(&request)
            .send()
            .await
            .context("Vision API request failed")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("Vision API error {status}: {body}");
        }
        interpret_response(&body)
    }
}

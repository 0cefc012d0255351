use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::{
    error::AppError,
    matching::{confirms, get_ocr_matches, MatchThresholds, OcrMatch},
    model::{Classifier, Prediction},
    ocr::OcrReader,
    recipe::RecipeGenerator,
};

const UPLOAD_FIELD: &str = "file";

pub struct AppState {
    pub classifier: Mutex<Box<dyn Classifier>>,
    pub ocr: Box<dyn OcrReader>,
    /// `None` when no language-model key is configured.
    pub recipes: Option<Box<dyn RecipeGenerator>>,
    pub thresholds: MatchThresholds,
    pub model_name: String,
    pub model_stage: String,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub prediction: Option<String>,
    pub probabilities: Vec<Prediction>,
    pub ocr_matches: Vec<OcrMatch>,
    /// Whether OCR text matched the top prediction.
    pub ocr_confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub struct RecipeRequest {
    pub labels: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    pub labels: Vec<String>,
    pub recipe: String,
}

pub fn router(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/predict", post(predict_handler))
        .route("/recipe", post(recipe_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "DGMD Application APIs",
        "model": { "name": state.model_name, "stage": state.model_stage },
    }))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    let mut multipart = multipart?;
    let mut image_data = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(UPLOAD_FIELD) {
            image_data = field.bytes().await?.to_vec();
            break;
        }
    }

    if image_data.is_empty() {
        return Err(AppError::BadRequest("No file uploaded".into()));
    }

    let (probabilities, labels) = {
        let classifier = state.classifier.lock().await;
        (classifier.predict(&image_data)?, classifier.labels().to_vec())
    };

    let detections = state.ocr.read_text(&image_data).await?;
    let ocr_matches = get_ocr_matches(&detections, &labels, &state.thresholds);

    let prediction = probabilities.first().map(|p| p.class.clone());
    let ocr_confirmed = prediction
        .as_deref()
        .is_some_and(|class| confirms(&ocr_matches, class));

    info!(
        prediction = prediction.as_deref().unwrap_or("none"),
        ocr_lines = detections.len(),
        ocr_confirmed,
        "prediction served"
    );

    Ok(Json(PredictResponse {
        prediction,
        probabilities,
        ocr_matches,
        ocr_confirmed,
    }))
}

async fn recipe_handler(
    State(state): State<Arc<AppState>>,
    request: Result<Json<RecipeRequest>, JsonRejection>,
) -> Result<Json<RecipeResponse>, AppError> {
    let Json(request) = request?;

    let mut labels: Vec<String> = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for label in request.labels {
        let label = label.trim();
        let folded = label.to_lowercase();
        if !label.is_empty() && !seen.contains(&folded) {
            seen.push(folded);
            labels.push(label.to_string());
        }
    }

    if labels.is_empty() {
        return Err(AppError::BadRequest("At least one label is required".into()));
    }

    let generator = state.recipes.as_ref().ok_or(AppError::RecipeUnavailable)?;
    let recipe = generator.suggest(&labels).await?;

    Ok(Json(RecipeResponse { labels, recipe }))
}

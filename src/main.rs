use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
use config::Settings;
mod error;
mod matching;
mod model;
use model::Model;
mod ocr;
use ocr::TesseractReader;
mod recipe;
use recipe::{OpenAiRecipes, RecipeGenerator};
mod routes;
use routes::AppState;
mod utils;
use utils::ensure_files_exist;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let settings = Settings::from_env().context("invalid configuration")?;

    ensure_files_exist(&settings)
        .await
        .context("failed to fetch model artifacts")?;

    let model = Model::new(
        &settings.model_path(),
        &settings.class_list_path(),
        (settings.image_width, settings.image_height),
    )
    .context("failed to load model")?;

    let recipes: Option<Box<dyn RecipeGenerator>> = match &settings.openai_key {
        Some(key) => Some(Box::new(OpenAiRecipes::new(
            key.clone(),
            settings.openai_model.clone(),
            &settings.openai_base_url,
        ))),
        None => {
            warn!("OPENAI_KEY not set, /recipe will answer 503");
            None
        }
    };

    let shared_state = Arc::new(AppState {
        classifier: Mutex::new(Box::new(model)),
        ocr: Box::new(TesseractReader::new(
            settings.ocr_binary.clone(),
            settings.ocr_language.clone(),
        )),
        recipes,
        thresholds: settings.thresholds,
        model_name: settings.model_name.clone(),
        model_stage: settings.model_stage.clone(),
    });

    let app = routes::router(shared_state, settings.body_limit_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        %addr,
        ocr_threshold = settings.thresholds.ocr_threshold,
        levenshtein_threshold = settings.thresholds.levenshtein_threshold,
        "listening"
    );
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

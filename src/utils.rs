use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use tracing::info;

use crate::config::Settings;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{0} is missing and {1} is not set")]
    MissingUrl(String, &'static str),
    #[error("invalid S3 path {0:?}: expected s3://<bucket>/<key>")]
    InvalidS3Path(String),
    #[error("invalid download token")]
    InvalidToken,
    #[error("failed to download {url}: {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn parse(path: &str) -> Result<Self, DownloadError> {
        let invalid = || DownloadError::InvalidS3Path(path.to_string());

        let rest = path.strip_prefix("s3://").ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        let key = key.trim_start_matches('/');
        if bucket.is_empty() || key.is_empty() {
            return Err(invalid());
        }

        Ok(S3Location {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn https_url(&self) -> String {
        format!("https://{}.s3.amazonaws.com/{}", self.bucket, self.key)
    }
}

/// `s3://` paths become their public HTTPS endpoint; anything else is fetched as given.
pub fn resolve_download_url(url: &str) -> Result<String, DownloadError> {
    if url.starts_with("s3://") {
        Ok(S3Location::parse(url)?.https_url())
    } else {
        Ok(url.to_string())
    }
}

async fn download_file(url: &str, path: &Path, token: Option<&str>) -> Result<(), DownloadError> {
    let url = resolve_download_url(url)?;
    info!(%url, path = %path.display(), "downloading model artifact");

    let mut header_map = HeaderMap::new();

    if let Some(token) = token {
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| DownloadError::InvalidToken)?;
        header_map.insert(AUTHORIZATION, auth_value);
    }
    header_map.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));

    let client = reqwest::Client::new();
    let response = client.get(&url).headers(header_map).send().await?;

    if !response.status().is_success() {
        return Err(DownloadError::Status {
            url,
            status: response.status(),
        });
    }

    let bytes = response.bytes().await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

async fn ensure_file(
    path: &Path,
    url: Option<&str>,
    url_var: &'static str,
    token: Option<&str>,
) -> Result<(), DownloadError> {
    if path.exists() {
        return Ok(());
    }
    let url = url.ok_or_else(|| DownloadError::MissingUrl(path.display().to_string(), url_var))?;
    download_file(url, path, token).await
}

pub async fn ensure_files_exist(settings: &Settings) -> Result<(), DownloadError> {
    info!(
        model = %settings.model_name,
        stage = %settings.model_stage,
        "checking model artifacts"
    );
    let token = settings.download_token.as_deref();

    ensure_file(
        &settings.model_path(),
        settings.model_url.as_deref(),
        "MODEL_URL",
        token,
    )
    .await?;
    ensure_file(
        &settings.class_list_path(),
        settings.class_list_url.as_deref(),
        "CLASS_LIST_URL",
        token,
    )
    .await
}

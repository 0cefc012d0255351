use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RecipeError {
    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("language model returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("language model returned no recipe")]
    EmptyResponse,
}

#[async_trait]
pub trait RecipeGenerator: Send + Sync {
    async fn suggest(&self, labels: &[String]) -> Result<String, RecipeError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat-completions client for OpenAI-compatible APIs.
pub struct OpenAiRecipes {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiRecipes {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

pub fn recipe_prompt(labels: &[String]) -> String {
    format!(
        "Suggest a recipe that uses the following spices: {}. \
         Give it a title, list the ingredients and number the steps.",
        labels.join(", ")
    )
}

#[async_trait]
impl RecipeGenerator for OpenAiRecipes {
    async fn suggest(&self, labels: &[String]) -> Result<String, RecipeError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".into(),
                content: recipe_prompt(labels),
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecipeError::Status { status, body });
        }

        let body: ChatResponse = response.json().await?;
        let recipe = body
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(RecipeError::EmptyResponse)?;

        debug!(model = %self.model, chars = recipe.len(), "recipe generated");
        Ok(recipe)
    }
}

//! Model metadata lookup on the HuggingFace Hub.

/// Hub used when `HF_ENDPOINT` is not set
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Answers questions about a model repository
pub trait ModelMetadataService {
    /// Pipeline tag (task) declared for `model_id`, if any
    fn pipeline_tag(&self, model_id: &str) -> crate::Result<Option<String>>;
}

/// HTTP client for the Hub's model API
#[derive(Debug, Clone)]
pub struct HubMetadataClient {
    endpoint: String,
    token: Option<String>,
}

impl HubMetadataClient {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Client configured from `HF_ENDPOINT` and `HF_TOKEN`
    pub fn from_env() -> Self {
        let endpoint = std::env::var("HF_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let token = std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty());
        Self::new(endpoint, token)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the model info document
    pub async fn model_info(&self, model_id: &str) -> crate::Result<serde_json::Value> {
        let api_url = format!("{}/api/models/{}", self.endpoint, model_id);
        tracing::debug!("Fetching model info from {}", api_url);

        let client = reqwest::Client::new();
        let mut request = client.get(&api_url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            crate::PtqError::MetadataError(format!("Failed to fetch model info for {}: {}", model_id, e))
        })?;

        if !response.status().is_success() {
            return Err(crate::PtqError::MetadataError(format!(
                "Failed to fetch model info for {}: HTTP {}",
                model_id,
                response.status()
            )));
        }

        response.json().await.map_err(|e| {
            crate::PtqError::MetadataError(format!("Failed to parse model info for {}: {}", model_id, e))
        })
    }

    pub async fn pipeline_tag_async(&self, model_id: &str) -> crate::Result<Option<String>> {
        let info = self.model_info(model_id).await?;
        Ok(info["pipeline_tag"].as_str().map(str::to_string))
    }
}

impl Default for HubMetadataClient {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ModelMetadataService for HubMetadataClient {
    fn pipeline_tag(&self, model_id: &str) -> crate::Result<Option<String>> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.pipeline_tag_async(model_id))
    }
}

//! Client side of the analysis exchange: the model selector and the HTTP
//! call to the local relay.

use std::fmt;
use std::net::SocketAddr;

use crate::relay::{AnalyzeReply, AnalyzeRequest};

const UNREACHABLE: &str =
    "Could not reach the analysis service. Please try again in a moment.";
const GENERIC_FAILURE: &str =
    "Something went wrong while analyzing your food. Please try again or use a different input.";

/// Which backend analysis strategy handles the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisModel {
    /// General-purpose analysis.
    Gemini,
    /// Nutrition-specialized analysis.
    #[default]
    Nutrix,
}

impl AnalysisModel {
    pub const ALL: [AnalysisModel; 2] = [AnalysisModel::Gemini, AnalysisModel::Nutrix];

    pub fn id(self) -> &'static str {
        match self {
            AnalysisModel::Gemini => "gemini",
            AnalysisModel::Nutrix => "nutrix",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "gemini" => Some(AnalysisModel::Gemini),
            "nutrix" => Some(AnalysisModel::Nutrix),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AnalysisModel::Gemini => "Gemini AI",
            AnalysisModel::Nutrix => "Nutrix AI",
        })
    }
}

/// One submission: text or an image encoded as a data URI, never both.
#[derive(Debug, Clone)]
pub enum AnalysisQuery {
    Text(String),
    Image { data_uri: String },
}

#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: reqwest::Client,
    endpoint: String,
}

impl AnalysisClient {
    pub fn new(relay: SocketAddr) -> Self {
        AnalysisClient {
            http: reqwest::Client::new(),
            endpoint: format!("http://{relay}/api/analyze"),
        }
    }

    /// Send one analysis request and normalize every failure into a
    /// human-readable explanation. The caller appends the result to the chat
    /// either way; nothing here panics or escapes.
    pub async fn analyze(
        &self,
        query: AnalysisQuery,
        model: AnalysisModel,
    ) -> Result<String, String> {
        let request = match query {
            AnalysisQuery::Text(text) => AnalyzeRequest {
                food_name: Some(text),
                image_data: None,
                model: Some(model.id().to_string()),
            },
            AnalysisQuery::Image { data_uri } => AnalyzeRequest {
                food_name: None,
                image_data: Some(data_uri),
                model: Some(model.id().to_string()),
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("analysis request failed: {e}");
                UNREACHABLE.to_string()
            })?;

        let reply: AnalyzeReply = response.json().await.map_err(|e| {
            tracing::warn!("analysis service returned an unreadable reply: {e}");
            UNREACHABLE.to_string()
        })?;

        if reply.success {
            reply.data.ok_or_else(|| GENERIC_FAILURE.to_string())
        } else {
            Err(reply.error.unwrap_or_else(|| GENERIC_FAILURE.to_string()))
        }
    }
}

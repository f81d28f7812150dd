use std::time::Duration;

use async_trait::async_trait;
use quiz_core::model::{TestCode, UserId};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

//
// ─── WIRE SHAPES ──────────────────────────────────────────────────────────────
//

/// Body of `GET /api/get_test`.
///
/// The backend answers either with a definition or with `{error: ...}`, so
/// every field is optional at this level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetTestResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<QuestionDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<EndTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDto {
    pub q: String,
    pub a: Vec<String>,
    pub c: usize,
}

/// `end_time` arrives either as epoch seconds or as RFC 3339 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndTime {
    Epoch(i64),
    Text(String),
}

/// Body of `POST /api/submit_result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub test_code: String,
    #[serde(rename = "userId")]
    pub user_id: Option<u64>,
    pub student_name: String,
    pub score: u32,
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitResponse {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Entry of `GET /api/tests`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummaryDto {
    pub id: i64,
    pub name: String,
}

//
// ─── TRANSPORT ────────────────────────────────────────────────────────────────
//

/// Transport seam for the quiz backend.
#[async_trait]
pub trait QuizApi: Send + Sync {
    /// Fetch a test definition, or the backend's error payload.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` when the request cannot be completed or decoded.
    async fn get_test(
        &self,
        code: &TestCode,
        user: Option<UserId>,
    ) -> Result<GetTestResponse, ApiError>;

    /// Submit a score.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` when the request cannot be completed or decoded.
    async fn submit_result(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError>;

    /// List currently active tests.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` when the request cannot be completed or decoded.
    async fn list_tests(&self) -> Result<Vec<TestSummaryDto>, ApiError>;
}

/// `reqwest`-backed client for the quiz REST backend.
#[derive(Clone)]
pub struct HttpQuizApi {
    client: Client,
    base_url: String,
}

impl HttpQuizApi {
    /// Build a client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Http` if the TLS backend cannot be initialised.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl QuizApi for HttpQuizApi {
    async fn get_test(
        &self,
        code: &TestCode,
        user: Option<UserId>,
    ) -> Result<GetTestResponse, ApiError> {
        let mut query = vec![("code", code.to_string())];
        if let Some(user) = user {
            query.push(("userId", user.to_string()));
        }

        let response = self
            .client
            .get(self.url("/api/get_test"))
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<GetTestResponse>(&body) {
            // Failure statuses only count as answers when they carry an outcome.
            Ok(parsed)
                if status.is_success() || parsed.error.is_some() || parsed.status.is_some() =>
            {
                Ok(parsed)
            }
            // A 404 without a readable error body still means "no such test".
            _ if status == StatusCode::NOT_FOUND => Ok(GetTestResponse {
                error: Some(format!("test {code} not found")),
                ..GetTestResponse::default()
            }),
            Err(err) if status.is_success() => {
                Err(ApiError::Unavailable(format!("undecodable body: {err}")))
            }
            _ => Err(ApiError::HttpStatus(status)),
        }
    }

    async fn submit_result(&self, request: &SubmitRequest) -> Result<SubmitResponse, ApiError> {
        let response = self
            .client
            .post(self.url("/api/submit_result"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        match serde_json::from_str::<SubmitResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(ApiError::HttpStatus(status)),
            Err(err) => Err(ApiError::Unavailable(format!("undecodable body: {err}"))),
        }
    }

    async fn list_tests(&self) -> Result<Vec<TestSummaryDto>, ApiError> {
        let response = self.client.get(self.url("/api/tests")).send().await?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status()));
        }

        Ok(response.json().await?)
    }
}

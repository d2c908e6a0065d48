use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::{ReviewableId, TopicId, UserId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        CurrentPayloadResponse, PerformRequest, PerformResult, ReviewableSummary,
        UpdateReviewableRequest, UpdateReviewableResponse,
    },
};

use crate::reconciler::PayloadSource;

#[derive(Serialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Serialize)]
struct ListQuery {
    user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic_id: Option<i64>,
}

/// HTTP client for the reviewable endpoints, acting as one user.
///
/// Rejections come back as an [`ApiException`] inside the `anyhow::Error`,
/// so callers can tell a conflict from a transport failure.
#[derive(Clone)]
pub struct ReviewablesClient {
    http: Client,
    server_url: String,
    user_id: UserId,
}

impl ReviewablesClient {
    pub fn new(server_url: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            user_id,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    fn user_query(&self) -> UserQuery {
        UserQuery {
            user_id: self.user_id.0,
        }
    }

    pub async fn list(&self, topic_id: Option<TopicId>) -> Result<Vec<ReviewableSummary>> {
        let response = self
            .http
            .get(format!("{}/reviewables", self.server_url))
            .query(&ListQuery {
                user_id: self.user_id.0,
                topic_id: topic_id.map(|id| id.0),
            })
            .send()
            .await
            .context("failed to list reviewables")?;
        decode(response).await
    }

    pub async fn update(
        &self,
        reviewable_id: ReviewableId,
        version: i64,
        fields: Map<String, Value>,
    ) -> Result<UpdateReviewableResponse> {
        let response = self
            .http
            .patch(format!("{}/reviewables/{}", self.server_url, reviewable_id.0))
            .query(&self.user_query())
            .json(&UpdateReviewableRequest {
                reviewable: fields,
                version,
            })
            .send()
            .await
            .with_context(|| format!("failed to update reviewable {}", reviewable_id.0))?;
        decode(response).await
    }

    /// A failed action (`success == false`) is returned as a result, not an
    /// error.
    pub async fn perform(
        &self,
        reviewable_id: ReviewableId,
        action_id: &str,
        version: i64,
        extra: Map<String, Value>,
    ) -> Result<PerformResult> {
        let response = self
            .http
            .put(format!(
                "{}/reviewables/{}/perform/{action_id}",
                self.server_url, reviewable_id.0
            ))
            .query(&self.user_query())
            .json(&PerformRequest { version, extra })
            .send()
            .await
            .with_context(|| format!("failed to perform {action_id} on reviewable {}", reviewable_id.0))?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await?;
            if let Ok(result) = serde_json::from_str::<PerformResult>(&body) {
                return Ok(result);
            }
            return Err(rejection(StatusCode::UNPROCESSABLE_ENTITY, &body));
        }
        decode(response).await
    }

    pub async fn claim(&self, reviewable_id: ReviewableId) -> Result<ReviewableSummary> {
        let response = self
            .http
            .post(format!("{}/reviewables/{}/claim", self.server_url, reviewable_id.0))
            .query(&self.user_query())
            .send()
            .await
            .context("failed to claim reviewable")?;
        decode(response).await
    }

    pub async fn release(&self, reviewable_id: ReviewableId) -> Result<bool> {
        let response = self
            .http
            .delete(format!("{}/reviewables/{}/claim", self.server_url, reviewable_id.0))
            .query(&self.user_query())
            .send()
            .await
            .context("failed to release claim")?;
        let body: Value = decode(response).await?;
        Ok(body.get("released").and_then(Value::as_bool).unwrap_or(false))
    }

    pub async fn fetch_current_payload(
        &self,
        reviewable_id: ReviewableId,
    ) -> Result<CurrentPayloadResponse> {
        let response = self
            .http
            .get(format!(
                "{}/reviewable/{}/current-payload",
                self.server_url, reviewable_id.0
            ))
            .query(&self.user_query())
            .send()
            .await
            .context("failed to fetch current payload")?;
        decode(response).await
    }
}

#[async_trait]
impl PayloadSource for ReviewablesClient {
    async fn current_payload(&self, reviewable_id: ReviewableId) -> Result<CurrentPayloadResponse> {
        self.fetch_current_payload(reviewable_id).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.context("invalid response body");
    }
    let body = response.text().await.unwrap_or_default();
    Err(rejection(status, &body))
}

fn rejection(status: StatusCode, body: &str) -> anyhow::Error {
    let exception = match serde_json::from_str::<ApiError>(body) {
        Ok(error) => ApiException::from(error),
        Err(_) => ApiException::new(code_for_status(status), format!("{status}: {body}")),
    };
    anyhow::Error::new(exception)
}

fn code_for_status(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::PAYLOAD_TOO_LARGE => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;

pub mod dto;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::{Direction, Lesson, StatusKind};

pub use dto::{BatchOperation, BatchSummary, LessonStatus, MAX_BATCH_OPERATIONS};

/// The remote lesson backend. Lessons come back already canonicalized.
#[async_trait]
pub trait LessonApi: Send + Sync {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ApiError>;
    async fn get_lesson(&self, slug: &str) -> Result<Lesson, ApiError>;
    async fn list_directions(&self) -> Result<Vec<Direction>, ApiError>;
    async fn get_direction(&self, slug: &str) -> Result<Direction, ApiError>;
    async fn direction_lessons(&self, slug: &str) -> Result<Vec<Lesson>, ApiError>;
    async fn favorites(&self, user_id: &str) -> Result<Vec<Lesson>, ApiError>;
    async fn completed(&self, user_id: &str) -> Result<Vec<Lesson>, ApiError>;
    /// Flips a status flag server-side and returns the resulting value.
    async fn toggle(&self, order: i64, kind: StatusKind, user_id: &str) -> Result<bool, ApiError>;
    async fn lesson_status(&self, order: i64, user_id: &str) -> Result<LessonStatus, ApiError>;
    async fn batch(&self, operations: &[BatchOperation]) -> Result<BatchSummary, ApiError>;
}

pub struct LessonHttpClient {
    client: Client,
    config: ApiConfig,
}

impl LessonHttpClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        Url::parse(&config.base_url)
            .map_err(|e| ApiError::InvalidInput(format!("invalid API base url: {}", e)))?;
        let client = Client::builder()
            .build()
            .map_err(|e| ApiError::Network(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| ApiError::InvalidInput(format!("invalid API base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidInput("API base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Sends the request, retrying retryable failures with exponential
    /// backoff starting at `retry_delay`.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let mut attempt: u32 = 0;
        loop {
            match self.send_once(method.clone(), url.clone(), body.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        "lesson API request {} {} failed (attempt {}/{}): {}",
                        method,
                        url.path(),
                        attempt + 1,
                        self.config.max_retries + 1,
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// POSTs a mutation. The configured timeout bounds all attempts
    /// together, so a dead server fails the mutation after one timeout.
    async fn mutate<T: DeserializeOwned>(&self, url: Url, body: serde_json::Value) -> Result<T, ApiError> {
        let path = url.path().to_string();
        tokio::time::timeout(self.config.timeout, self.request(Method::POST, url, Some(body)))
            .await
            .map_err(|_| {
                warn!("lesson API mutation {} gave up after {:?}", path, self.config.timeout);
                ApiError::Timeout(self.config.timeout)
            })?
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&serde_json::Value>,
    ) -> Result<T, ApiError> {
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.config.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body = serde_json::from_str::<ApiErrorBody>(&text).ok();
            return Err(ApiError::from_status(status.as_u16(), body));
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        if !is_json {
            return Err(ApiError::UnexpectedResponse(
                "response is not JSON".to_string(),
            ));
        }

        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str::<T>(&text).map_err(|e| {
            error!("Failed to parse lesson API response: {}", e);
            ApiError::UnexpectedResponse(format!("Failed to parse response: {}", e))
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::Timeout(self.config.timeout)
        } else {
            ApiError::Network(err.to_string())
        }
    }

    async fn get_lessons(&self, url: Url) -> Result<Vec<Lesson>, ApiError> {
        let envelope: dto::ListEnvelope<dto::LessonDto> = self.request(Method::GET, url, None).await?;
        let lessons = envelope
            .into_items()
            .into_iter()
            .map(dto::LessonDto::into_lesson)
            .collect::<Result<Vec<_>, _>>()?;
        debug!("fetched {} lessons", lessons.len());
        Ok(lessons)
    }
}

fn require_user(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::NotAuthenticated);
    }
    Ok(())
}

/// Lesson orders double as the public key of the mutation endpoints and
/// must be positive.
pub fn validate_order(order: i64) -> Result<i64, ApiError> {
    if order > 0 {
        Ok(order)
    } else {
        Err(ApiError::InvalidInput(format!(
            "Invalid lesson order: {}. Must be a positive integer.",
            order
        )))
    }
}

#[async_trait]
impl LessonApi for LessonHttpClient {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ApiError> {
        let url = self.endpoint(&["api", "lessons"])?;
        self.get_lessons(url).await
    }

    async fn get_lesson(&self, slug: &str) -> Result<Lesson, ApiError> {
        let url = self.endpoint(&["api", "lessons", slug])?;
        let envelope: dto::ItemEnvelope<dto::LessonDto> = self.request(Method::GET, url, None).await?;
        envelope.into_item().into_lesson()
    }

    async fn list_directions(&self) -> Result<Vec<Direction>, ApiError> {
        let url = self.endpoint(&["api", "directions"])?;
        let envelope: dto::ListEnvelope<Direction> = self.request(Method::GET, url, None).await?;
        Ok(envelope.into_items())
    }

    async fn get_direction(&self, slug: &str) -> Result<Direction, ApiError> {
        let url = self.endpoint(&["api", "directions", slug])?;
        let envelope: dto::ItemEnvelope<Direction> = self.request(Method::GET, url, None).await?;
        Ok(envelope.into_item())
    }

    async fn direction_lessons(&self, slug: &str) -> Result<Vec<Lesson>, ApiError> {
        let url = self.endpoint(&["api", "directions", slug, "lessons"])?;
        self.get_lessons(url).await
    }

    async fn favorites(&self, user_id: &str) -> Result<Vec<Lesson>, ApiError> {
        require_user(user_id)?;
        let url = self.endpoint(&["api", "users", user_id, "favorites"])?;
        self.get_lessons(url).await
    }

    async fn completed(&self, user_id: &str) -> Result<Vec<Lesson>, ApiError> {
        require_user(user_id)?;
        let url = self.endpoint(&["api", "users", user_id, "completed"])?;
        self.get_lessons(url).await
    }

    async fn toggle(&self, order: i64, kind: StatusKind, user_id: &str) -> Result<bool, ApiError> {
        let order = validate_order(order)?;
        require_user(user_id)?;
        let order = order.to_string();
        let url = self.endpoint(&["api", "lessons", &order, kind.as_str()])?;
        let body = serde_json::to_value(dto::ToggleRequest { user_id })
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        let response: dto::ToggleResponse = self.mutate(url, body).await?;
        if let Some(message) = &response.message {
            debug!("toggle {} on lesson {}: {}", kind, order, message);
        }
        response.value(kind)
    }

    async fn lesson_status(&self, order: i64, user_id: &str) -> Result<LessonStatus, ApiError> {
        let order = validate_order(order)?;
        require_user(user_id)?;
        let order = order.to_string();
        let mut url = self.endpoint(&["api", "lessons", &order, "status"])?;
        url.query_pairs_mut().append_pair("userId", user_id);
        self.request(Method::GET, url, None).await
    }

    async fn batch(&self, operations: &[BatchOperation]) -> Result<BatchSummary, ApiError> {
        if operations.is_empty() || operations.len() > MAX_BATCH_OPERATIONS {
            return Err(ApiError::InvalidInput(format!(
                "a batch carries between 1 and {} operations, got {}",
                MAX_BATCH_OPERATIONS,
                operations.len()
            )));
        }
        let url = self.endpoint(&["api", "lessons", "batch"])?;
        let body = serde_json::to_value(dto::BatchRequest { operations })
            .map_err(|e| ApiError::InvalidInput(e.to_string()))?;
        let response: dto::BatchResponse = self.mutate(url, body).await?;
        BatchSummary::try_from(response)
    }
}

/// Backend that has nothing and accepts every mutation as a no-op.
pub struct NoopLessonApi;

#[async_trait]
impl LessonApi for NoopLessonApi {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ApiError> {
        Ok(Vec::new())
    }

    async fn get_lesson(&self, slug: &str) -> Result<Lesson, ApiError> {
        Err(ApiError::from_status(404, Some(ApiErrorBody {
            message: Some(format!("lesson {} not found", slug)),
            ..ApiErrorBody::default()
        })))
    }

    async fn list_directions(&self) -> Result<Vec<Direction>, ApiError> {
        Ok(Vec::new())
    }

    async fn get_direction(&self, slug: &str) -> Result<Direction, ApiError> {
        Err(ApiError::from_status(404, Some(ApiErrorBody {
            message: Some(format!("direction {} not found", slug)),
            ..ApiErrorBody::default()
        })))
    }

    async fn direction_lessons(&self, _slug: &str) -> Result<Vec<Lesson>, ApiError> {
        Ok(Vec::new())
    }

    async fn favorites(&self, _user_id: &str) -> Result<Vec<Lesson>, ApiError> {
        Ok(Vec::new())
    }

    async fn completed(&self, _user_id: &str) -> Result<Vec<Lesson>, ApiError> {
        Ok(Vec::new())
    }

    async fn toggle(&self, _order: i64, _kind: StatusKind, _user_id: &str) -> Result<bool, ApiError> {
        Ok(false)
    }

    async fn lesson_status(&self, _order: i64, _user_id: &str) -> Result<LessonStatus, ApiError> {
        Ok(LessonStatus {
            is_favorite: false,
            is_completed: false,
        })
    }

    async fn batch(&self, operations: &[BatchOperation]) -> Result<BatchSummary, ApiError> {
        Ok(BatchSummary {
            processed: operations.len(),
            ..BatchSummary::default()
        })
    }
}

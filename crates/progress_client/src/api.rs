use progress_logging::{progress_debug, progress_warn};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::types::TaskList;
use crate::{AnalysisRequest, ApiError, ClientSettings, HttpSettings, StartedTask, TaskRecord};

/// JSON client for the analysis service.
///
/// Every call is retried after a fixed delay when it fails at the network
/// level (connect error or timeout). HTTP error statuses are not retried.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    settings: HttpSettings,
}

impl ApiClient {
    pub fn new(settings: &ClientSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.http.connect_timeout)
            .timeout(settings.http.request_timeout)
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base: settings.api_base_url.clone(),
            settings: settings.http.clone(),
        })
    }

    /// Starts a new analysis. Fails with [`ApiError::AlreadyRunning`] when the
    /// service already has an active task.
    pub async fn start_analysis(&self, request: &AnalysisRequest) -> Result<StartedTask, ApiError> {
        let body = serde_json::to_value(request).map_err(|err| ApiError::Decode(err.to_string()))?;
        self.call(Method::POST, &["api", "analysis", "start"], Some(&body))
            .await
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, ApiError> {
        let list: TaskList = self.call(Method::GET, &["api", "tasks"], None).await?;
        Ok(list.into_tasks())
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRecord, ApiError> {
        self.call(Method::GET, &["api", "tasks", task_id], None).await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), ApiError> {
        let _: Value = self
            .call(Method::DELETE, &["api", "tasks", task_id], None)
            .await?;
        Ok(())
    }

    pub async fn cancel_task(&self, task_id: &str) -> Result<(), ApiError> {
        let _: Value = self
            .call(Method::POST, &["api", "tasks", task_id, "cancel"], None)
            .await?;
        Ok(())
    }

    pub async fn get_results(&self, task_id: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, &["api", "tasks", task_id, "results"], None)
            .await
    }

    pub async fn get_analytics(&self, task_id: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, &["api", "tasks", task_id, "analytics"], None)
            .await
    }

    pub async fn data_sources(&self) -> Result<Value, ApiError> {
        self.call(Method::GET, &["api", "data-sources"], None).await
    }

    pub async fn query_examples(&self) -> Result<Value, ApiError> {
        self.call(Method::GET, &["api", "query-examples"], None).await
    }

    /// The single globally active task, if any. A `null` body and a 404 both
    /// mean there is none.
    pub async fn active_task(&self) -> Result<Option<TaskRecord>, ApiError> {
        match self.call(Method::GET, &["api", "tasks", "active"], None).await {
            Err(ApiError::Http { status: 404, .. }) => Ok(None),
            other => other,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let url = self.endpoint(segments)?;
        let mut attempt = 0;
        let bytes = loop {
            match self.send_once(method.clone(), url.clone(), body).await {
                Err(err) if err.is_transient() && attempt < self.settings.retries => {
                    attempt += 1;
                    progress_warn!(
                        "{} {} failed ({}); retrying in {:?}",
                        method,
                        url.path(),
                        err,
                        self.settings.retry_delay
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                other => break other?,
            }
        };

        let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &bytes
        };
        serde_json::from_slice(raw).map_err(|err| ApiError::Decode(err.to_string()))
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Vec<u8>, ApiError> {
        progress_debug!("{} {}", method, url);
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if status.is_success() {
            return Ok(bytes.to_vec());
        }

        let message = error_detail(&bytes).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        if status == StatusCode::CONFLICT {
            return Err(ApiError::AlreadyRunning { message });
        }
        Err(ApiError::Http {
            status: status.as_u16(),
            message,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Pulls a readable message out of an error body (`detail`, `message` or `error`).
fn error_detail(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    if let Value::String(text) = &value {
        return Some(text.clone());
    }
    ["detail", "message", "error"].iter().find_map(|key| match value.get(*key)? {
        Value::String(text) => Some(text.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    })
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout(err.to_string());
    }
    if err.is_builder() {
        return ApiError::InvalidUrl(err.to_string());
    }
    if err.is_decode() {
        return ApiError::Decode(err.to_string());
    }
    ApiError::Network(err.to_string())
}

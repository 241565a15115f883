//! HTTP management API transport using reqwest.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;

use crate::classify::{
    classify_http, describe_http_error, truncate, CallOutcome, Failure, FailureKind, Payload,
};
use crate::error::{DispatchError, Result, TransportError};
use crate::metrics::{RequestGuard, TransportMetrics};
use crate::target::Target;

/// Maximum length of a response excerpt in an upload failure.
const UPLOAD_EXCERPT_LEN: usize = 200;

/// HTTP method of a management API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ApiMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl ApiMethod {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiMethod::Get => "GET",
            ApiMethod::Put => "PUT",
            ApiMethod::Post => "POST",
            ApiMethod::Delete => "DELETE",
        }
    }

    /// Whether the call carries a form-encoded `data` body.
    pub fn has_body(&self) -> bool {
        matches!(self, ApiMethod::Put | ApiMethod::Post)
    }

    fn to_reqwest(self) -> Method {
        match self {
            ApiMethod::Get => Method::GET,
            ApiMethod::Put => Method::PUT,
            ApiMethod::Post => Method::POST,
            ApiMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiMethod {
    type Err = DispatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(ApiMethod::Get),
            "PUT" => Ok(ApiMethod::Put),
            "POST" => Ok(ApiMethod::Post),
            "DELETE" => Ok(ApiMethod::Delete),
            _ => Err(DispatchError::InvalidMethod {
                method: s.to_string(),
            }),
        }
    }
}

/// One management API call, shared by every target in a dispatch.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: ApiMethod,
    /// Path under `/api/`, e.g. `status/product_info`.
    pub path: String,
    /// Body for `PUT`/`POST`; ignored otherwise.
    pub payload: Option<Value>,
    pub timeout: Duration,
}

impl ApiRequest {
    /// A `GET` of `path`.
    pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: ApiMethod::Get,
            path: path.into(),
            payload: None,
            timeout,
        }
    }
}

/// A multipart file upload to a deploy endpoint.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Endpoint under the device root (not under `/api/`), e.g. `fw_upgrade`.
    pub endpoint: String,
    pub local_file: PathBuf,
    pub timeout: Duration,
}

/// Client side of a device's HTTP management API.
///
/// Implementations never return transport errors directly; every call is
/// classified into a [`CallOutcome`].
pub trait DeviceApi: Send + Sync + 'static {
    /// Issue `request` against `target`.
    fn call(&self, target: &Target, request: &ApiRequest) -> impl Future<Output = CallOutcome> + Send;

    /// Upload a file as multipart field `file`.
    fn upload(&self, target: &Target, request: &UploadRequest) -> impl Future<Output = CallOutcome> + Send;
}

/// [`DeviceApi`] over plain HTTP with basic authentication.
#[derive(Debug, Clone)]
pub struct HttpDeviceApi {
    client: Client,
    metrics: Option<Arc<TransportMetrics>>,
}

impl HttpDeviceApi {
    /// Create a client with reqwest defaults.
    pub fn new() -> Result<Self> {
        let client = Client::builder().build().map_err(TransportError::Http)?;
        Ok(Self::with_client(client))
    }

    /// Use an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            metrics: None,
        }
    }

    /// Report every call into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<TransportMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Shared counters, if configured.
    pub fn metrics(&self) -> Option<&Arc<TransportMetrics>> {
        self.metrics.as_ref()
    }

    async fn send(&self, target: &Target, request: &ApiRequest) -> CallOutcome {
        let url = format!(
            "{}/api/{}",
            target.base_url(),
            request.path.trim_start_matches('/')
        );
        trace!("{} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.to_reqwest(), &url)
            .basic_auth(&target.username, Some(target.password()))
            .timeout(request.timeout);

        if request.method.has_body() {
            let data = match &request.payload {
                Some(value) => value.to_string(),
                None => "{}".to_string(),
            };
            builder = builder.form(&[("data", data)]);
        }

        let response = builder.send().await.map_err(|e| describe_http_error(&e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| describe_http_error(&e))?;
        debug!("{} {} -> {}", request.method, url, status);
        classify_http(status, &body, request.method)
    }

    async fn send_upload(&self, target: &Target, request: &UploadRequest) -> CallOutcome {
        let url = format!(
            "{}/{}",
            target.base_url(),
            request.endpoint.trim_start_matches('/')
        );

        let contents = tokio::fs::read(&request.local_file)
            .await
            .map_err(|e| Failure::from_transport(&TransportError::Io(e)))?;
        let file_name = request
            .local_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let part = Part::bytes(contents)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| describe_http_error(&e))?;

        debug!("POST {} ({} upload)", url, request.endpoint);
        let response = self
            .client
            .post(&url)
            .basic_auth(&target.username, Some(target.password()))
            .multipart(Form::new().part("file", part))
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| describe_http_error(&e))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        if status < 300 {
            Ok(Payload::Text(body))
        } else {
            Err(Failure::new(
                FailureKind::TransportProtocolError,
                format!("{}: {} {}", url, status, truncate(&body, UPLOAD_EXCERPT_LEN, "")),
            ))
        }
    }

    fn record(&self, outcome: &CallOutcome, guard: Option<RequestGuard<'_>>) {
        if let Some(guard) = guard {
            let timed_out = outcome.as_ref().err().is_some_and(Failure::is_timeout);
            guard.finish(outcome.is_ok(), timed_out);
        }
    }
}

impl DeviceApi for HttpDeviceApi {
    async fn call(&self, target: &Target, request: &ApiRequest) -> CallOutcome {
        let guard = self.metrics.as_deref().map(TransportMetrics::start);
        let outcome = self.send(target, request).await;
        self.record(&outcome, guard);
        outcome
    }

    async fn upload(&self, target: &Target, request: &UploadRequest) -> CallOutcome {
        let guard = self.metrics.as_deref().map(TransportMetrics::start);
        let outcome = self.send_upload(target, request).await;
        self.record(&outcome, guard);
        outcome
    }
}

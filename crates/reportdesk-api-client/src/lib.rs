use std::time::Duration;

use async_trait::async_trait;
use reportdesk_client_core::api::{
    DataEnvelope, InitJobRequest, InitJobResponse, JobIdBody, RequestLinkBody,
    RequestLinkResponse, ReviewQueue, StatusPayload, UploadListing, VerifyResponse,
};
use reportdesk_client_core::auth::normalize_base_url;
use reportdesk_client_core::config::{DEFAULT_LONG_TIMEOUT_MS, DEFAULT_TIMEOUT_MS};
use reportdesk_client_core::{ClientConfig, ClientError, ReportApi, UploadFile};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

pub const MIN_TIMEOUT_MS: u64 = 250;
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct HttpReportApiConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    /// Used for admin operations that may run long server-side.
    pub long_timeout_ms: u64,
}

impl HttpReportApiConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            long_timeout_ms: DEFAULT_LONG_TIMEOUT_MS,
        }
    }
}

impl From<&ClientConfig> for HttpReportApiConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout_ms: config.request_timeout.as_millis() as u64,
            long_timeout_ms: config.long_request_timeout.as_millis() as u64,
        }
    }
}

/// [`ReportApi`] over HTTP. Every request carries a fresh `x-request-id`.
#[derive(Debug, Clone)]
pub struct HttpReportApi {
    base_url: String,
    timeout: Duration,
    long_timeout: Duration,
    http: reqwest::Client,
}

/// A fetched report document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl HttpReportApi {
    pub fn new(config: HttpReportApiConfig) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(MIN_TIMEOUT_MS)),
            long_timeout: Duration::from_millis(config.long_timeout_ms.max(MIN_TIMEOUT_MS)),
            http: reqwest::Client::new(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(HttpReportApiConfig::from(config))
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn health_path() -> &'static str {
        "/health"
    }

    #[must_use]
    pub fn request_link_path() -> &'static str {
        "/auth/request-link"
    }

    #[must_use]
    pub fn verify_path(one_time_token: &str) -> String {
        format!("/auth/verify?token={}", encode_query(one_time_token))
    }

    #[must_use]
    pub fn access_path() -> &'static str {
        "/access"
    }

    #[must_use]
    pub fn init_job_path() -> &'static str {
        "/uploads/init"
    }

    #[must_use]
    pub fn upload_path() -> &'static str {
        "/uploads/put"
    }

    #[must_use]
    pub fn list_uploads_path(job_id: &str) -> String {
        format!("/uploads/list?job_id={}", encode_query(job_id))
    }

    #[must_use]
    pub fn submit_path() -> &'static str {
        "/jobs/submit"
    }

    #[must_use]
    pub fn status_path(job_id: &str) -> String {
        format!("/jobs/status?job_id={}", encode_query(job_id))
    }

    #[must_use]
    pub fn download_path(job_id: &str, session_token: &str) -> String {
        format!(
            "/jobs/download?job_id={}&token={}",
            encode_query(job_id),
            encode_query(session_token)
        )
    }

    #[must_use]
    pub fn approve_path() -> &'static str {
        "/admin/approve"
    }

    #[must_use]
    pub fn review_queue_path() -> &'static str {
        "/admin/jobs?status=pending_review"
    }

    /// Downloads the document behind a [`ReportApi::download_url`] address.
    pub async fn fetch_document(&self, url: &str) -> Result<Document, ClientError> {
        let request_id = new_request_id();
        tracing::debug!(%request_id, "fetching report document");
        let response = send(
            self.http
                .get(url)
                .header(REQUEST_ID_HEADER, request_id)
                .timeout(self.long_timeout),
            self.long_timeout,
        )
        .await?;

        let status = response.status();
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        let filename = header(reqwest::header::CONTENT_DISPOSITION)
            .as_deref()
            .and_then(attachment_filename);
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let bytes = read_body(response, self.long_timeout).await?;
        if !status.is_success() {
            return Err(format_http_error(status, &bytes));
        }
        Ok(Document {
            filename,
            content_type,
            bytes,
        })
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        session_token: Option<&str>,
        timeout: Duration,
    ) -> Result<RequestBuilder, ClientError> {
        let url = self
            .endpoint(path)
            .ok_or_else(|| ClientError::NetworkFailure(format!("invalid request path '{path}'")))?;
        let request_id = new_request_id();
        tracing::debug!(%method, path, %request_id, "sending report service request");
        let mut builder = self
            .http
            .request(method, url)
            .header(REQUEST_ID_HEADER, request_id)
            .timeout(timeout);
        if let Some(token) = session_token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn get_json<T>(
        &self,
        path: &str,
        session_token: Option<&str>,
        timeout: Duration,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let request = self.request(Method::GET, path, session_token, timeout)?;
        let response = send(request, timeout).await?;
        decode_json_response(response, timeout).await
    }

    async fn post_json<Req, Res>(
        &self,
        path: &str,
        session_token: Option<&str>,
        payload: &Req,
        timeout: Duration,
    ) -> Result<Res, ClientError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let request = self
            .request(Method::POST, path, session_token, timeout)?
            .json(payload);
        let response = send(request, timeout).await?;
        decode_json_response(response, timeout).await
    }

    async fn post_ack<Req>(
        &self,
        path: &str,
        session_token: &str,
        payload: &Req,
        timeout: Duration,
    ) -> Result<(), ClientError>
    where
        Req: Serialize + ?Sized,
    {
        let request = self
            .request(Method::POST, path, Some(session_token), timeout)?
            .json(payload);
        let response = send(request, timeout).await?;
        expect_ack(response, timeout).await
    }
}

#[async_trait]
impl ReportApi for HttpReportApi {
    async fn health(&self) -> Result<(), ClientError> {
        let request = self.request(Method::GET, Self::health_path(), None, self.timeout)?;
        let response = send(request, self.timeout).await?;
        let status = response.status();
        let bytes = read_body(response, self.timeout).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(format_http_error(status, &bytes))
        }
    }

    async fn request_link(&self, email: &str) -> Result<RequestLinkResponse, ClientError> {
        let body = DataEnvelope::new(RequestLinkBody {
            email: email.to_string(),
        });
        self.post_json(Self::request_link_path(), None, &body, self.timeout)
            .await
    }

    async fn verify(&self, one_time_token: &str) -> Result<VerifyResponse, ClientError> {
        self.get_json(&Self::verify_path(one_time_token), None, self.timeout)
            .await
    }

    async fn access(&self, session_token: &str) -> Result<Value, ClientError> {
        self.get_json(Self::access_path(), Some(session_token), self.timeout)
            .await
    }

    async fn init_job(
        &self,
        session_token: &str,
        request: &InitJobRequest,
    ) -> Result<InitJobResponse, ClientError> {
        self.post_json(
            Self::init_job_path(),
            Some(session_token),
            &DataEnvelope::new(request),
            self.timeout,
        )
        .await
    }

    async fn upload_file(
        &self,
        session_token: &str,
        job_id: &str,
        file_set: &str,
        file: &UploadFile,
    ) -> Result<(), ClientError> {
        let form = Form::new()
            .text("job_id", job_id.to_string())
            .text("file_set", file_set.to_string())
            .part("file", file_part(file));
        let request = self
            .request(
                Method::POST,
                Self::upload_path(),
                Some(session_token),
                self.timeout,
            )?
            .multipart(form);
        let response = send(request, self.timeout).await?;
        expect_ack(response, self.timeout).await
    }

    async fn list_uploads(
        &self,
        session_token: &str,
        job_id: &str,
    ) -> Result<UploadListing, ClientError> {
        self.get_json(
            &Self::list_uploads_path(job_id),
            Some(session_token),
            self.timeout,
        )
        .await
    }

    async fn submit_job(&self, session_token: &str, job_id: &str) -> Result<(), ClientError> {
        let body = DataEnvelope::new(JobIdBody {
            job_id: job_id.to_string(),
        });
        self.post_ack(Self::submit_path(), session_token, &body, self.timeout)
            .await
    }

    async fn job_status(
        &self,
        session_token: &str,
        job_id: &str,
    ) -> Result<StatusPayload, ClientError> {
        self.get_json(&Self::status_path(job_id), Some(session_token), self.timeout)
            .await
    }

    async fn approve_job(&self, session_token: &str, job_id: &str) -> Result<(), ClientError> {
        let body = DataEnvelope::new(JobIdBody {
            job_id: job_id.to_string(),
        });
        self.post_ack(Self::approve_path(), session_token, &body, self.long_timeout)
            .await
    }

    async fn review_queue(&self, session_token: &str) -> Result<ReviewQueue, ClientError> {
        self.get_json(
            Self::review_queue_path(),
            Some(session_token),
            self.long_timeout,
        )
        .await
    }

    fn download_url(&self, session_token: &str, job_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            Self::download_path(job_id, session_token)
        )
    }
}

/// Maps a non-2xx response to [`ClientError::Http`], taking the message from
/// the body's `error`, `message`, or `detail` field.
pub fn format_http_error(status: StatusCode, body: &[u8]) -> ClientError {
    ClientError::http(status.as_u16(), error_message(body))
}

fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let text = |value: &Value| {
        value
            .as_str()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };
    if let Some(error) = value.get("error") {
        if let Some(message) = text(error).or_else(|| error.get("message").and_then(text)) {
            return Some(message);
        }
    }
    ["message", "detail"]
        .iter()
        .find_map(|key| value.get(key).and_then(text))
}

fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn encode_query(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn file_part(file: &UploadFile) -> Part {
    let part = || Part::bytes(file.bytes.clone()).file_name(file.filename.clone());
    match file.content_type.as_deref() {
        Some(content_type) => part().mime_str(content_type).unwrap_or_else(|error| {
            tracing::warn!(%error, content_type, "ignoring unparseable upload content type");
            part()
        }),
        None => part(),
    }
}

fn attachment_filename(disposition: &str) -> Option<String> {
    disposition
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("filename="))
        .map(|name| name.trim_matches('"').trim().to_string())
        .filter(|name| !name.is_empty())
}

fn transport_error(error: &reqwest::Error, timeout: Duration) -> ClientError {
    if error.is_timeout() {
        ClientError::NetworkTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        ClientError::NetworkFailure(error.to_string())
    }
}

async fn send(request: RequestBuilder, timeout: Duration) -> Result<Response, ClientError> {
    let response = request
        .send()
        .await
        .map_err(|error| transport_error(&error, timeout))?;
    tracing::debug!(status = response.status().as_u16(), "report service responded");
    Ok(response)
}

async fn read_body(response: Response, timeout: Duration) -> Result<Vec<u8>, ClientError> {
    response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|error| transport_error(&error, timeout))
}

async fn decode_json_response<T>(response: Response, timeout: Duration) -> Result<T, ClientError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let bytes = read_body(response, timeout).await?;
    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }
    serde_json::from_slice::<T>(&bytes).map_err(|error| ClientError::Decode(error.to_string()))
}

// A 2xx whose JSON body says `"ok": false` is still a rejection.
async fn expect_ack(response: Response, timeout: Duration) -> Result<(), ClientError> {
    let status = response.status();
    let bytes = read_body(response, timeout).await?;
    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }
    let rejected = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .filter(|body| body.get("ok").and_then(Value::as_bool) == Some(false));
    match rejected {
        Some(body) => Err(ClientError::Rejected(
            error_message(&bytes)
                .or_else(|| body.get("reason").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "request was rejected".to_string()),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_builder_normalizes_paths() {
        let api = HttpReportApi::new(HttpReportApiConfig::new("https://reports.example.com/"))
            .expect("api client");

        assert_eq!(
            api.endpoint("/uploads/init"),
            Some("https://reports.example.com/uploads/init".to_string())
        );
        assert_eq!(
            api.endpoint("uploads/init"),
            Some("https://reports.example.com/uploads/init".to_string())
        );
        assert_eq!(api.endpoint(""), None);
    }

    #[test]
    fn path_helpers_encode_query_values() {
        assert_eq!(
            HttpReportApi::verify_path("a b&c"),
            "/auth/verify?token=a+b%26c"
        );
        assert_eq!(
            HttpReportApi::status_path("job_1"),
            "/jobs/status?job_id=job_1"
        );
        assert_eq!(
            HttpReportApi::list_uploads_path("job/1"),
            "/uploads/list?job_id=job%2F1"
        );
        assert_eq!(
            HttpReportApi::download_path("job_1", "tok=1"),
            "/jobs/download?job_id=job_1&token=tok%3D1"
        );
        assert_eq!(
            HttpReportApi::review_queue_path(),
            "/admin/jobs?status=pending_review"
        );
    }

    #[test]
    fn download_url_is_absolute() {
        let api = HttpReportApi::new(HttpReportApiConfig::new("http://127.0.0.1:8787"))
            .expect("api client");
        assert_eq!(
            api.download_url("tok1", "job_1"),
            "http://127.0.0.1:8787/jobs/download?job_id=job_1&token=tok1"
        );
    }

    #[test]
    fn http_error_message_prefers_body_fields() {
        let error = format_http_error(StatusCode::BAD_REQUEST, br#"{"error":"email required"}"#);
        assert_eq!(error.to_string(), "email required");

        let error = format_http_error(
            StatusCode::SERVICE_UNAVAILABLE,
            br#"{"error":{"code":"busy","message":"try later"}}"#,
        );
        assert_eq!(error.to_string(), "try later");

        let error = format_http_error(StatusCode::FORBIDDEN, br#"{"detail":"admin only"}"#);
        assert_eq!(error.status_code(), Some(403));
        assert_eq!(error.to_string(), "admin only");

        let error = format_http_error(StatusCode::BAD_GATEWAY, b"<html>oops</html>");
        assert_eq!(error.to_string(), "HTTP 502");
    }

    #[test]
    fn attachment_filename_is_parsed() {
        assert_eq!(
            attachment_filename(r#"attachment; filename="sector-report.pdf""#),
            Some("sector-report.pdf".to_string())
        );
        assert_eq!(attachment_filename("inline"), None);
    }

    #[test]
    fn blank_base_url_is_rejected() {
        let result = HttpReportApi::new(HttpReportApiConfig::new("   "));
        assert!(matches!(result, Err(ClientError::InvalidInput(_))));
    }
}

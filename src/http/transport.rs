//! Request/response types and the blocking transport underneath the client

#[cfg(test)]
use std::io::Cursor;
use std::io::Read;
use std::time::Duration;

use crate::error::HttpError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Method {
    Get,
    Post,
    Put,
    Delete,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiRequest {
    pub(crate) method: Method,
    /// Path as given by the caller, relative to the base URL
    pub(crate) path: String,
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<Vec<u8>>,
    /// Session epoch under which a credential was attached, if any
    pub(crate) session_epoch: Option<u64>,
}

impl ApiRequest {
    pub(crate) fn new(method: Method, path: &str, url: String) -> Self {
        Self {
            method,
            path: path.to_string(),
            url,
            headers: Vec::new(),
            body: None,
            session_epoch: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }
}

pub(crate) struct ApiResponse {
    pub(crate) status: u16,
    pub(crate) body: Box<dyn Read + Send>,
}

impl ApiResponse {
    #[cfg(test)]
    pub(crate) fn from_bytes(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: Box::new(Cursor::new(body.into())),
        }
    }

    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Best-effort body text for error reporting; capped and lossy.
    pub(crate) fn error_text(self) -> String {
        let mut bytes = Vec::new();
        let _ = self.body.take(MAX_ERROR_BODY).read_to_end(&mut bytes);
        String::from_utf8_lossy(&bytes).trim().to_string()
    }
}

impl std::fmt::Debug for ApiResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

pub(crate) trait Transport: Send + Sync {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, HttpError>;
}

/// ureq-backed transport. Non-2xx statuses come back as responses, not errors,
/// so the middleware chain can see them.
pub(crate) struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub(crate) fn new() -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_connect(Some(CONNECT_TIMEOUT))
            .timeout_recv_response(Some(RESPONSE_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &ApiRequest,
) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

impl Transport for UreqTransport {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, HttpError> {
        let body = request.body.as_deref().unwrap_or_default();
        let result = match request.method {
            Method::Get => with_headers(self.agent.get(&request.url), request).call(),
            Method::Post => with_headers(self.agent.post(&request.url), request).send(body),
            Method::Put => with_headers(self.agent.put(&request.url), request).send(body),
            Method::Delete => match &request.body {
                Some(body) => with_headers(self.agent.delete(&request.url), request)
                    .force_send_body()
                    .send(body.as_slice()),
                None => with_headers(self.agent.delete(&request.url), request).call(),
            },
        };

        let response = result.map_err(|err| HttpError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response.into_body().into_reader();
        Ok(ApiResponse {
            status,
            body: Box::new(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut req = ApiRequest::new(Method::Get, "/x", "http://h/x".to_string());
        req.set_header("Accept", "application/json");
        req.set_header("accept", "application/x-ndjson");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("ACCEPT"), Some("application/x-ndjson"));
    }

    #[test]
    fn error_text_is_trimmed() {
        let resp = ApiResponse::from_bytes(500, "  boom \n");
        assert!(!resp.is_success());
        assert_eq!(resp.error_text(), "boom");
    }
}

//! API client with an explicit middleware pipeline
//!
//! `before_request` hooks run in registration order, `after_response` hooks in
//! reverse, around every call made through [`ApiClient::execute`].

use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::HttpError;

use super::transport::{ApiRequest, ApiResponse, Method, Transport};

pub(crate) trait Middleware: Send + Sync {
    fn before_request(&self, _request: &mut ApiRequest) {}

    fn after_response(&self, _request: &ApiRequest, _status: u16) {}
}

#[derive(Clone)]
pub(crate) struct ApiClient {
    base_url: String,
    transport: Arc<dyn Transport>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl ApiClient {
    pub(crate) fn new(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            middleware: Vec::new(),
        }
    }

    pub(crate) fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Resolve a path against the base URL; absolute URLs pass through.
    pub(crate) fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> ApiRequest {
        ApiRequest::new(method, path, self.url_for(path))
    }

    /// Send through the pipeline. 401 and other non-2xx statuses become errors
    /// after every `after_response` hook has seen them.
    pub(crate) fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse, HttpError> {
        for middleware in &self.middleware {
            middleware.before_request(&mut request);
        }

        tracing::debug!(method = ?request.method, url = %request.url, "sending request");
        let response = self.transport.send(&request)?;

        for middleware in self.middleware.iter().rev() {
            middleware.after_response(&request, response.status);
        }

        match response.status {
            401 => Err(HttpError::Unauthorized {
                body: response.error_text(),
            }),
            status if !response.is_success() => Err(HttpError::Status {
                status,
                body: response.error_text(),
            }),
            _ => Ok(response),
        }
    }

    pub(crate) fn get_json(&self, path: &str) -> Result<serde_json::Value, HttpError> {
        let mut request = self.request(Method::Get, path);
        request.set_header("Accept", "application/json");
        let response = self.execute(request)?;
        Ok(serde_json::from_reader(response.body)?)
    }

    pub(crate) fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, HttpError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let mut request = self.request(Method::Post, path);
        request.set_header("Content-Type", "application/json");
        request.set_header("Accept", "application/json");
        request.body = Some(serde_json::to_vec(body)?);
        let response = self.execute(request)?;
        Ok(serde_json::from_reader(response.body)?)
    }

    /// Any method with an optional JSON body. An empty reply (204, or a
    /// DELETE that answers nothing) comes back as `Null`.
    pub(crate) fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, HttpError> {
        let mut request = self.request(method, path);
        request.set_header("Accept", "application/json");
        if let Some(body) = body {
            request.set_header("Content-Type", "application/json");
            request.body = Some(serde_json::to_vec(body)?);
        }
        let mut response = self.execute(request)?;

        let mut bytes = Vec::new();
        response.body.read_to_end(&mut bytes)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// GET with a negotiated content type, handing back the unread body.
    pub(crate) fn open_stream(&self, path: &str, accept: &str) -> Result<ApiResponse, HttpError> {
        let mut request = self.request(Method::Get, path);
        request.set_header("Accept", accept);
        self.execute(request)
    }
}

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::retry::CallError;

pub fn user_agent() -> String {
    format!("stride-ingest/{}", env!("CARGO_PKG_VERSION"))
}

pub fn build_client(timeout: Duration, mut headers: HeaderMap) -> Result<Client, CallError> {
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent()).map_err(|err| CallError::Other(err.to_string()))?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|err| CallError::Other(err.to_string()))
}

pub fn send(request: RequestBuilder) -> Result<Response, CallError> {
    let response = request.send().map_err(classify_transport)?;
    check_status(response)
}

pub fn check_status(response: Response) -> Result<Response, CallError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .map(|body| truncate(&body, 300))
        .unwrap_or_else(|_| "request failed".to_string());
    Err(CallError::from_status(status, message))
}

pub fn classify_transport(err: reqwest::Error) -> CallError {
    if err.is_timeout() {
        return CallError::Timeout(err.to_string());
    }
    if let Some(status) = err.status() {
        return CallError::from_status(status.as_u16(), err.to_string());
    }
    if err.is_connect() || err.is_request() {
        // Connection resets and DNS hiccups behave like a busy server.
        return CallError::Server {
            status: 503,
            message: err.to_string(),
        };
    }
    CallError::Other(err.to_string())
}

pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max).collect();
    out.push('…');
    out
}

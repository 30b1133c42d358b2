use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{
    StatusCode,
    header::{self, HeaderMap, HeaderValue},
};
use serde::de::DeserializeOwned;

pub const API_BASE: &str = "https://api.github.com";

/// Fixed attempt count for transport-level failures. No backoff between
/// attempts.
const MAX_ATTEMPTS: u32 = 3;
/// Per-request timeout bounding the worst-case hang.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated GitHub REST client. Retries transport errors (connect,
/// timeout, body read) up to the fixed attempt count; a non-2xx status is
/// not an error here, it is returned for the caller to interpret.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    base: String,
    max_attempts: u32,
}

#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl Client {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_limits(token, API_BASE, MAX_ATTEMPTS, REQUEST_TIMEOUT)
    }

    /// Constructor with injectable base URL, attempt count, and timeout for
    /// tests.
    pub fn with_limits(
        token: &str,
        base: &str,
        max_attempts: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("Invalid characters in token")?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        let http = reqwest::Client::builder()
            .user_agent("ci-digest")
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { http, base: base.to_string(), max_attempts: max_attempts.max(1) })
    }

    /// Issue a GET for a path relative to the API base.
    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base, path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_get(&url).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        "GET {} failed (attempt {}/{}): {}",
                        url,
                        attempt,
                        self.max_attempts,
                        e
                    );
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)).with_context(|| {
                        format!("GET {url} failed after {} attempts", self.max_attempts)
                    });
                }
            }
        }
    }

    async fn try_get(&self, url: &str) -> Result<ApiResponse, reqwest::Error> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }

    /// GET for endpoints where anything but a 2xx with a parseable body is
    /// an error for the caller.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        if !response.is_success() {
            bail!("GET {path} returned {}", response.status);
        }
        serde_json::from_str(&response.body)
            .with_context(|| format!("Failed to parse response from {path}"))
    }
}

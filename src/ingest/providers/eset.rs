//! ESET Business Account IAM (token) and Incident Management (detections)
//! HTTP clients.

use std::collections::HashSet;

use async_trait::async_trait;
use metrics::counter;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde::Deserialize;

use crate::config::{Credentials, PollerConfig};
use crate::error::{ApiError, AuthError};
use crate::ingest::types::{AccessToken, Authenticator, DetectionEvent, DetectionFetcher};
use crate::metrics::{DETECTIONS_FETCHED, PROVIDER_ERRORS};
use crate::time::{format_query_millis, Timestamp};

/// Upper bound on followed `nextPageToken`s in one fetch.
pub const MAX_PAGES: usize = 1000;

/// One client for both endpoints, with explicit timeouts.
pub fn build_http_client(cfg: &PollerConfig) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
        .connect_timeout(cfg.http_connect_timeout)
        .timeout(cfg.http_timeout)
        .build()
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

pub struct IamAuthenticator {
    http: Client,
    token_url: String,
}

impl IamAuthenticator {
    pub fn new(http: Client, token_url: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
        }
    }
}

#[async_trait]
impl Authenticator for IamAuthenticator {
    async fn acquire_token(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
        tracing::info!(target: "auth", username = %credentials.username, "requesting access token");

        let form = [
            ("grant_type", "password"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("refresh_token", ""),
        ];
        let resp = self
            .http
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(AuthError::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(AuthError::Transport)?;
        if !status.is_success() {
            counter!(PROVIDER_ERRORS, "endpoint" => "token").increment(1);
            return Err(AuthError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(AuthError::Decode)?;
        parsed
            .access_token
            .filter(|t| !t.trim().is_empty())
            .map(AccessToken::new)
            .ok_or(AuthError::MissingToken)
    }
}

#[derive(Debug, Deserialize)]
struct DetectionsPage {
    #[serde(default)]
    detections: Option<Vec<DetectionEvent>>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
}

pub struct IncidentApiFetcher {
    http: Client,
    detections_url: String,
    page_size: Option<u32>,
}

impl IncidentApiFetcher {
    pub fn new(http: Client, detections_url: impl Into<String>) -> Self {
        Self {
            http,
            detections_url: detections_url.into(),
            page_size: None,
        }
    }

    pub fn with_page_size(mut self, page_size: Option<u32>) -> Self {
        self.page_size = page_size;
        self
    }

    async fn fetch_page(
        &self,
        token: &AccessToken,
        start_time: &str,
        page_token: Option<&str>,
    ) -> Result<DetectionsPage, ApiError> {
        let mut query: Vec<(&str, String)> = vec![("startTime", start_time.to_string())];
        if let Some(n) = self.page_size {
            query.push(("pageSize", n.to_string()));
        }
        if let Some(t) = page_token {
            query.push(("pageToken", t.to_string()));
        }

        let resp = self
            .http
            .get(&self.detections_url)
            .bearer_auth(token.secret())
            .header(ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(ApiError::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(ApiError::Transport)?;
        if !status.is_success() {
            tracing::error!(
                target: "ingest",
                status = status.as_u16(),
                %body,
                "detections API responded with an error"
            );
            counter!(PROVIDER_ERRORS, "endpoint" => "detections").increment(1);
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(ApiError::Decode)
    }
}

#[async_trait]
impl DetectionFetcher for IncidentApiFetcher {
    async fn fetch_since(
        &self,
        token: &AccessToken,
        start: &Timestamp,
    ) -> Result<Vec<DetectionEvent>, ApiError> {
        let start_time = format_query_millis(start);
        tracing::info!(target: "ingest", start_time = %start_time, "fetching detections");

        let mut out = Vec::new();
        let mut seen_tokens: HashSet<String> = HashSet::new();
        let mut page_token: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self
                .fetch_page(token, &start_time, page_token.as_deref())
                .await?;
            out.extend(page.detections.unwrap_or_default());

            match page.next_page_token.filter(|t| !t.is_empty()) {
                None => {
                    counter!(DETECTIONS_FETCHED).increment(out.len() as u64);
                    return Ok(out);
                }
                Some(next) => {
                    if !seen_tokens.insert(next.clone()) {
                        return Err(ApiError::Pagination(format!(
                            "page token {next:?} repeated"
                        )));
                    }
                    tracing::debug!(target: "ingest", fetched = out.len(), "following nextPageToken");
                    page_token = Some(next);
                }
            }
        }

        Err(ApiError::Pagination(format!(
            "more than {MAX_PAGES} pages"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_tolerates_missing_and_null_fields() {
        let p: DetectionsPage = serde_json::from_str("{}").unwrap();
        assert!(p.detections.is_none());
        assert!(p.next_page_token.is_none());

        let p: DetectionsPage =
            serde_json::from_str(r#"{"detections": null, "nextPageToken": ""}"#).unwrap();
        assert!(p.detections.is_none());
        assert_eq!(p.next_page_token.as_deref(), Some(""));

        let p: DetectionsPage = serde_json::from_str(
            r#"{"detections": [{"occurTime": "2024-01-01T00:00:00Z", "uuid": "a"}]}"#,
        )
        .unwrap();
        assert_eq!(p.detections.unwrap().len(), 1);
    }

    #[test]
    fn token_response_without_field_is_missing_token() {
        let t: TokenResponse = serde_json::from_str(r#"{"token_type": "Bearer"}"#).unwrap();
        assert!(t.access_token.is_none());
    }

    #[test]
    fn access_token_debug_hides_value() {
        let t = AccessToken::new("eyJhbGciOi.secret");
        assert!(!format!("{t:?}").contains("secret"));
    }
}

//! Google Custom Search JSON API client.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::client::{SearchClient, SearchError, SearchHit};
use crate::query::SearchTerm;

/// Default Custom Search JSON API endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

/// Query used by the connectivity check.
const PROBE_QUERY: &str = "test";

/// Longest raw body excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<Reason>,
    #[serde(default)]
    details: Vec<Reason>,
}

#[derive(Debug, Deserialize)]
struct Reason {
    #[serde(default)]
    reason: String,
}

/// Search client for the Google Custom Search JSON API.
pub struct GoogleSearchClient {
    http: Client,
    endpoint: String,
    api_key: String,
    engine_id: String,
}

impl GoogleSearchClient {
    /// Create a client with a per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns `SearchError::Transport` if the HTTP client cannot be built.
    pub fn new(
        endpoint: &str,
        api_key: &str,
        engine_id: &str,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("querybatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
        })
    }

    fn query(&self, query: &str) -> Result<Option<SearchHit>, SearchError> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", "1"),
            ])
            .send()
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        debug!(status = status.as_u16(), bytes = body.len(), "Search API responded");

        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &body));
        }

        parse_first_hit(&body)
    }
}

impl SearchClient for GoogleSearchClient {
    fn validate_connectivity(&self) -> Result<(), SearchError> {
        self.query(PROBE_QUERY).map(|_| ())
    }

    fn search_one(&self, term: &SearchTerm) -> Result<Option<SearchHit>, SearchError> {
        self.query(term.as_str())
    }
}

fn transport_error(e: reqwest::Error) -> SearchError {
    if e.is_timeout() {
        SearchError::Timeout(e.to_string())
    } else {
        SearchError::Transport(e.to_string())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

/// Map a non-success HTTP status and its body to a classified error.
fn classify_status(status: u16, body: &str) -> SearchError {
    let api_error = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_default();

    let message = if api_error.message.is_empty() {
        excerpt(body)
    } else {
        api_error.message.clone()
    };

    let has_reason = |wanted: &str| {
        api_error
            .errors
            .iter()
            .chain(&api_error.details)
            .any(|r| r.reason.eq_ignore_ascii_case(wanted))
    };

    if has_reason("dailyLimitExceeded") || has_reason("quotaExceeded") || message.contains("per day")
    {
        return SearchError::QuotaExhausted(message);
    }

    match status {
        429 => SearchError::RateLimited(message),
        403 if has_reason("rateLimitExceeded") || has_reason("userRateLimitExceeded") => {
            SearchError::RateLimited(message)
        }
        401 | 403 => SearchError::Authentication(message),
        400 if has_reason("keyInvalid")
            || has_reason("API_KEY_INVALID")
            || message.contains("API key not valid") =>
        {
            SearchError::Authentication(message)
        }
        500..=599 => SearchError::Server { status, message },
        _ => SearchError::Rejected { status, message },
    }
}

/// Extract the first item of a successful response.
fn parse_first_hit(body: &str) -> Result<Option<SearchHit>, SearchError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Decode(e.to_string()))?;

    Ok(response.items.into_iter().next().map(|item| SearchHit {
        title: item.title,
        url: item.link,
        snippet: item.snippet,
    }))
}

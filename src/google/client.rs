use crate::accounts::TokenSource;
use anyhow::{Result, anyhow};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Largest page requested from list endpoints
const MAX_PAGE_SIZE: usize = 250;

/// Build an endpoint URL from a base and raw path segments, percent-encoding
/// each segment (calendar ids contain `@` and `#`)
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("{} cannot be a base URL", base))?
        .extend(segments);
    Ok(url)
}

/// Authenticated client for Google REST APIs.
///
/// A token is fetched from the token source for every request, so a token
/// that expires midway through a long command is refreshed transparently.
pub struct GoogleClient<'a> {
    http: reqwest::Client,
    tokens: TokenSource<'a>,
}

impl<'a> GoogleClient<'a> {
    pub fn new(tokens: TokenSource<'a>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { http, tokens })
    }

    pub fn alias(&self) -> &str {
        self.tokens.alias()
    }

    pub async fn get(&self, url: Url, query: &[(&str, String)]) -> Result<Value> {
        self.execute(self.http.get(url).query(query)).await
    }

    pub async fn post(&self, url: Url, body: &Value) -> Result<Value> {
        self.execute(self.http.post(url).json(body)).await
    }

    /// POST without a body (trash/untrash style actions)
    pub async fn post_empty(&self, url: Url) -> Result<Value> {
        self.execute(self.http.post(url).header(reqwest::header::CONTENT_LENGTH, 0))
            .await
    }

    pub async fn patch(&self, url: Url, body: &Value) -> Result<Value> {
        self.execute(self.http.patch(url).json(body)).await
    }

    pub async fn delete(&self, url: Url) -> Result<()> {
        self.execute(self.http.delete(url)).await?;
        Ok(())
    }

    /// Follow `nextPageToken` until `limit` items under `items_key` are collected
    pub async fn get_paginated(
        &self,
        url: Url,
        base_query: &[(&str, String)],
        items_key: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut page_token: Option<String> = None;

        while all_items.len() < limit {
            let mut query = base_query.to_vec();
            query.push((
                "maxResults",
                (limit - all_items.len()).min(MAX_PAGE_SIZE).to_string(),
            ));
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let response = self.get(url.clone(), &query).await?;
            if let Some(items) = response.get(items_key).and_then(Value::as_array) {
                all_items.extend(items.iter().cloned());
            }

            match response.get("nextPageToken").and_then(Value::as_str) {
                Some(next) => page_token = Some(next.to_string()),
                None => break,
            }
        }

        all_items.truncate(limit);
        debug!(count = all_items.len(), "collected paginated results");
        Ok(all_items)
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Value> {
        let token = self.tokens.token().await?;
        let response = builder
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| anyhow!("HTTP request failed: {}", e))?;

        let status = response.status();
        debug!(%status, url = %response.url(), "Google API response");

        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body: {}", e))?;

        if !status.is_success() {
            return Err(anyhow!(error_message(status, &body, self.alias())));
        }

        // Empty successful responses (e.g., DELETE)
        if body.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&body).map_err(|e| anyhow!("Failed to parse JSON response: {}", e))
    }
}

/// Turn a Google error payload into an actionable message
fn error_message(status: StatusCode, body: &str, alias: &str) -> String {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        StatusCode::UNAUTHORIZED => format!(
            "Google rejected the access token for '{}' ({}). Run 'gwcli auth login --account {}'.",
            alias, detail, alias
        ),
        StatusCode::FORBIDDEN => format!(
            "Permission denied: {}. The account may lack the required scope; run 'gwcli auth login --account {} --scope ...'.",
            detail, alias
        ),
        StatusCode::TOO_MANY_REQUESTS => {
            warn!("rate limited by Google API");
            format!("Rate limited by Google ({}). Please try again later.", detail)
        }
        _ => format!("Google API error {}: {}", status.as_u16(), detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_segments() {
        let url = endpoint(
            "https://www.googleapis.com/calendar/v3",
            &["calendars", "en.usa#holiday@group.v.calendar.google.com", "events"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.googleapis.com/calendar/v3/calendars/en.usa%23holiday@group.v.calendar.google.com/events"
        );
    }

    #[test]
    fn test_error_message_extracts_google_error() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","errors":[]}}"#;
        assert_eq!(
            error_message(StatusCode::NOT_FOUND, body, "work"),
            "Google API error 404: Requested entity was not found."
        );
    }

    #[test]
    fn test_error_message_unauthorized_suggests_login() {
        let msg = error_message(StatusCode::UNAUTHORIZED, "not json", "work");
        assert!(msg.contains("gwcli auth login --account work"));
        assert!(msg.contains("HTTP 401"));
    }
}

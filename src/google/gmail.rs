//! Gmail API v1: messages, threads and labels.

use super::client::{GoogleClient, endpoint};
use anyhow::{Result, anyhow, bail};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use tracing::{debug, info};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Headers requested for list views
const SUMMARY_HEADERS: [&str; 4] = ["From", "To", "Subject", "Date"];

/// How much of a message to fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    Full,
    Metadata,
    Raw,
}

impl MessageFormat {
    fn as_str(self) -> &'static str {
        match self {
            MessageFormat::Full => "full",
            MessageFormat::Metadata => "metadata",
            MessageFormat::Raw => "raw",
        }
    }
}

/// Outgoing plain-text message
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingMessage {
    /// Assemble an RFC 2822 message with CRLF line endings
    pub fn to_rfc2822(&self) -> Result<String> {
        if self.to.is_empty() {
            bail!("At least one recipient is required");
        }

        let mut lines = vec![format!("To: {}", header_value(&self.to.join(", ")))];
        if !self.cc.is_empty() {
            lines.push(format!("Cc: {}", header_value(&self.cc.join(", "))));
        }
        if !self.bcc.is_empty() {
            lines.push(format!("Bcc: {}", header_value(&self.bcc.join(", "))));
        }
        lines.push(format!("Subject: {}", encode_subject(&self.subject)));
        lines.push("MIME-Version: 1.0".to_string());
        lines.push("Content-Type: text/plain; charset=UTF-8".to_string());
        lines.push("Content-Transfer-Encoding: 8bit".to_string());
        lines.push(String::new());
        lines.push(self.body.replace("\r\n", "\n").replace('\n', "\r\n"));

        Ok(lines.join("\r\n"))
    }

    /// base64url form expected by `messages.send`
    pub fn encode_raw(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_rfc2822()?.as_bytes()))
    }
}

/// Strip line breaks so a value cannot inject extra headers
fn header_value(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// RFC 2047 encoded-word for non-ASCII subjects
fn encode_subject(subject: &str) -> String {
    let subject = header_value(subject);
    if subject.is_ascii() {
        subject
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(subject.as_bytes()))
    }
}

/// Decode Gmail's base64url body data, with or without padding
pub fn decode_base64url(data: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(data.trim().trim_end_matches('='))
        .map_err(|e| anyhow!("Invalid base64 body data: {}", e))
}

/// Case-insensitive lookup of a header in `payload.headers`
pub fn header<'v>(message: &'v Value, name: &str) -> Option<&'v str> {
    message
        .get("payload")?
        .get("headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })?
        .get("value")?
        .as_str()
}

/// Fields shown when listing messages
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub received: Option<DateTime<Utc>>,
    pub snippet: String,
    pub labels: Vec<String>,
}

impl MessageSummary {
    pub fn from_json(message: &Value) -> Self {
        let text = |key: &str| {
            message
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        // internalDate is milliseconds since the epoch, as a string
        let received = message
            .get("internalDate")
            .and_then(Value::as_str)
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        let labels = message
            .get("labelIds")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: text("id"),
            thread_id: text("threadId"),
            from: header(message, "From").unwrap_or("unknown").to_string(),
            subject: header(message, "Subject")
                .unwrap_or("(No subject)")
                .to_string(),
            received,
            snippet: text("snippet"),
            labels,
        }
    }

    pub fn is_unread(&self) -> bool {
        self.labels.iter().any(|l| l == "UNREAD")
    }
}

/// First text/plain part of a `full` message, decoded
pub fn plain_text_body(message: &Value) -> Option<String> {
    fn walk(part: &Value) -> Option<String> {
        let mime = part.get("mimeType").and_then(Value::as_str).unwrap_or_default();
        if mime.eq_ignore_ascii_case("text/plain") {
            if let Some(data) = part
                .get("body")
                .and_then(|b| b.get("data"))
                .and_then(Value::as_str)
            {
                let bytes = decode_base64url(data).ok()?;
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        part.get("parts")?.as_array()?.iter().find_map(walk)
    }

    walk(message.get("payload")?)
}

/// Gmail API client bound to one account
pub struct Gmail<'a> {
    client: GoogleClient<'a>,
}

impl<'a> Gmail<'a> {
    pub fn new(client: GoogleClient<'a>) -> Self {
        Self { client }
    }

    /// List message ids, optionally filtered by labels and a search query
    pub async fn list_messages(
        &self,
        label_ids: &[String],
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        info!(account = self.client.alias(), "listing Gmail messages");
        let mut params = vec![];
        if let Some(q) = query {
            params.push(("q", q.to_string()));
        }
        for label in label_ids {
            params.push(("labelIds", label.clone()));
        }

        let url = endpoint(GMAIL_API_BASE, &["messages"])?;
        let messages = self
            .client
            .get_paginated(url, &params, "messages", limit)
            .await?;
        debug!("Retrieved {} messages", messages.len());
        Ok(messages)
    }

    pub async fn get_message(&self, id: &str, format: MessageFormat) -> Result<Value> {
        let mut params = vec![("format", format.as_str().to_string())];
        if format == MessageFormat::Metadata {
            for name in SUMMARY_HEADERS {
                params.push(("metadataHeaders", name.to_string()));
            }
        }
        let url = endpoint(GMAIL_API_BASE, &["messages", id])?;
        self.client.get(url, &params).await
    }

    /// List messages and fetch the summary headers of each
    pub async fn message_summaries(
        &self,
        label_ids: &[String],
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MessageSummary>> {
        let ids = self.list_messages(label_ids, query, limit).await?;
        let mut summaries = Vec::with_capacity(ids.len());
        for entry in &ids {
            let Some(id) = entry.get("id").and_then(Value::as_str) else {
                continue;
            };
            let message = self.get_message(id, MessageFormat::Metadata).await?;
            summaries.push(MessageSummary::from_json(&message));
        }
        Ok(summaries)
    }

    pub async fn send_message(&self, message: &OutgoingMessage) -> Result<Value> {
        info!(account = self.client.alias(), recipients = message.to.len(), "sending message");
        let url = endpoint(GMAIL_API_BASE, &["messages", "send"])?;
        self.client
            .post(url, &json!({ "raw": message.encode_raw()? }))
            .await
    }

    pub async fn modify_message(
        &self,
        id: &str,
        add_label_ids: &[String],
        remove_label_ids: &[String],
    ) -> Result<Value> {
        let url = endpoint(GMAIL_API_BASE, &["messages", id, "modify"])?;
        let body = json!({
            "addLabelIds": add_label_ids,
            "removeLabelIds": remove_label_ids,
        });
        self.client.post(url, &body).await
    }

    pub async fn trash_message(&self, id: &str) -> Result<Value> {
        let url = endpoint(GMAIL_API_BASE, &["messages", id, "trash"])?;
        self.client.post_empty(url).await
    }

    pub async fn untrash_message(&self, id: &str) -> Result<Value> {
        let url = endpoint(GMAIL_API_BASE, &["messages", id, "untrash"])?;
        self.client.post_empty(url).await
    }

    /// Permanently delete, bypassing trash
    pub async fn delete_message(&self, id: &str) -> Result<()> {
        info!(account = self.client.alias(), id, "permanently deleting message");
        let url = endpoint(GMAIL_API_BASE, &["messages", id])?;
        self.client.delete(url).await
    }

    pub async fn list_threads(
        &self,
        label_ids: &[String],
        query: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let mut params = vec![];
        if let Some(q) = query {
            params.push(("q", q.to_string()));
        }
        for label in label_ids {
            params.push(("labelIds", label.clone()));
        }
        let url = endpoint(GMAIL_API_BASE, &["threads"])?;
        self.client
            .get_paginated(url, &params, "threads", limit)
            .await
    }

    pub async fn get_thread(&self, id: &str) -> Result<Value> {
        let mut params = vec![("format", "metadata".to_string())];
        for name in SUMMARY_HEADERS {
            params.push(("metadataHeaders", name.to_string()));
        }
        let url = endpoint(GMAIL_API_BASE, &["threads", id])?;
        self.client.get(url, &params).await
    }

    pub async fn trash_thread(&self, id: &str) -> Result<Value> {
        let url = endpoint(GMAIL_API_BASE, &["threads", id, "trash"])?;
        self.client.post_empty(url).await
    }

    pub async fn list_labels(&self) -> Result<Vec<Value>> {
        let url = endpoint(GMAIL_API_BASE, &["labels"])?;
        let response = self.client.get(url, &[]).await?;
        Ok(response
            .get("labels")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    pub async fn create_label(&self, name: &str) -> Result<Value> {
        let url = endpoint(GMAIL_API_BASE, &["labels"])?;
        let body = json!({
            "name": name,
            "labelListVisibility": "labelShow",
            "messageListVisibility": "show",
        });
        self.client.post(url, &body).await
    }

    pub async fn delete_label(&self, id: &str) -> Result<()> {
        let url = endpoint(GMAIL_API_BASE, &["labels", id])?;
        self.client.delete(url).await
    }
}

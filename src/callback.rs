//! One-shot localhost listener for the OAuth authorization code redirect.

use anyhow::{Result, anyhow, bail};
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tracing::debug;

const SUCCESS_HTML: &str = "<html><body><h1>gwcli: authentication complete</h1><p>You may close this window.</p></body></html>";
const ERROR_HTML: &str = "<html><body><h1>gwcli: authentication failed</h1><p>Return to the terminal for details.</p></body></html>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPayload {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Bind an ephemeral port on the IPv4 loopback interface
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| anyhow!("Failed to bind OAuth callback listener: {}", e))?;
        let port = listener.local_addr()?.port();
        debug!(port, "OAuth callback listener bound");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port())
    }

    /// Wait for the provider redirect and return the authorization code.
    ///
    /// Requests that carry neither `code` nor `error` (favicon probes and the
    /// like) get a 404 and the listener keeps waiting.
    pub async fn wait_for_code(self, expected_state: &str, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            let (mut socket, _) = tokio::time::timeout_at(deadline, self.listener.accept())
                .await
                .map_err(|_| anyhow!("Timed out waiting for the browser to complete sign-in"))?
                .map_err(|e| anyhow!("OAuth callback accept failed: {}", e))?;

            let request = read_request(&mut socket).await?;
            let payload = match extract_request_target(&request).and_then(parse_callback_target) {
                Ok(payload) => payload,
                Err(e) => {
                    debug!("ignoring unrelated request on callback port: {}", e);
                    respond(&mut socket, "HTTP/1.1 404 Not Found", "").await;
                    continue;
                }
            };

            if let Err(e) = validate_state(&payload, expected_state) {
                respond(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML).await;
                return Err(e);
            }

            if let Some(error) = payload.error {
                respond(&mut socket, "HTTP/1.1 400 Bad Request", ERROR_HTML).await;
                match payload.error_description {
                    Some(description) => bail!("Authorization denied: {} ({})", error, description),
                    None => bail!("Authorization denied: {}", error),
                }
            }

            respond(&mut socket, "HTTP/1.1 200 OK", SUCCESS_HTML).await;
            return payload
                .code
                .ok_or_else(|| anyhow!("OAuth callback missing authorization code"));
        }
    }
}

async fn read_request(socket: &mut TcpStream) -> Result<String> {
    let mut buffer = vec![0u8; 8192];
    let size = socket
        .read(&mut buffer)
        .await
        .map_err(|e| anyhow!("OAuth callback read failed: {}", e))?;
    Ok(String::from_utf8_lossy(&buffer[..size]).into_owned())
}

async fn respond(socket: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "{status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

fn extract_request_target(request: &str) -> Result<&str> {
    let first = request
        .lines()
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = first.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts.next().unwrap_or_default();
    if method != "GET" || target.is_empty() {
        bail!("callback must be a GET request");
    }
    Ok(target)
}

pub(crate) fn parse_callback_target(target: &str) -> Result<CallbackPayload> {
    let url = Url::parse(&format!("http://127.0.0.1{}", target))
        .map_err(|e| anyhow!("invalid callback target: {}", e))?;

    let mut payload = CallbackPayload {
        code: None,
        state: None,
        error: None,
        error_description: None,
    };
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => payload.code = Some(value.to_string()),
            "state" => payload.state = Some(value.to_string()),
            "error" => payload.error = Some(value.to_string()),
            "error_description" => payload.error_description = Some(value.to_string()),
            _ => {}
        }
    }

    if payload.code.is_none() && payload.error.is_none() {
        bail!("callback missing code/error");
    }
    Ok(payload)
}

fn validate_state(payload: &CallbackPayload, expected_state: &str) -> Result<()> {
    let state = payload
        .state
        .as_deref()
        .ok_or_else(|| anyhow!("OAuth callback missing state"))?;
    if !constant_time_eq(state.as_bytes(), expected_state.as_bytes()) {
        bail!("OAuth callback state mismatch; the sign-in was not started by this command");
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

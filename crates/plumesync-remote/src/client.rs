//! Remote agent client
//!
//! Typed HTTP client for the remote agent surface. Every request passes
//! through the [`RequestGate`] (concurrency cap plus inter-start spacing)
//! and the shared [`RetryPolicy`] before it reaches the wire.
//!
//! ## Wire conventions
//!
//! - Shared-secret bearer auth on every request.
//! - `accountId` header with the target account.
//! - `pathBase64` header carrying the base64-encoded relative path, since
//!   arbitrary Unicode filenames are not representable in raw headers.
//! - `POST /upload` sends file bytes as the raw body with an optional
//!   `modifiedTime` header (RFC 3339).
//! - `POST /delete` treats 404 as success: the entry is already gone.

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use plumesync_core::config::RemoteConfig;
use plumesync_core::domain::{AccountId, MirrorPath};
use plumesync_core::ports::WatchControl;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::gate::RequestGate;
use crate::retry::{Retryable, RetryPolicy};

/// Header naming the target account.
pub const HEADER_ACCOUNT_ID: &str = "accountId";
/// Header carrying the base64-encoded relative path.
pub const HEADER_PATH: &str = "pathBase64";
/// Header carrying the local mtime of an uploaded file (RFC 3339).
pub const HEADER_MODIFIED: &str = "modifiedTime";

// ============================================================================
// Errors
// ============================================================================

/// Failure of an agent request.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response (connect failure, timeout, ...).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The agent answered with a non-success status.
    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },

    /// Client-side size rejection; no request was sent.
    #[error("upload of {path} rejected: {size} bytes exceeds limit of {limit}")]
    TooLarge {
        path: MirrorPath,
        size: u64,
        limit: u64,
    },

    /// Every attempt failed with a transient error.
    #[error("{url} failed after {attempts} attempts")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        source: Box<RemoteError>,
    },

    /// The response arrived but its body could not be decoded.
    #[error("invalid response body from {url}: {source}")]
    BadBody {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The admission gate is no longer usable.
    #[error("request gate unavailable: {0}")]
    Gate(String),
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { .. } => true,
            RemoteError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

// ============================================================================
// Options and response types
// ============================================================================

/// Per-call knobs for agent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Deadline for one attempt.
    pub timeout: Duration,
    /// Attempts before giving up.
    pub retries: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retries: 3,
        }
    }
}

/// Response of `POST /status`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Whether the agent considers the account watched.
    pub watching: bool,
    /// Entries waiting in the agent's own dispatch queue.
    #[serde(default)]
    pub queue_depth: u64,
    /// Agent-side error message, if the account is stuck.
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// AgentClient
// ============================================================================

/// HTTP client for the remote agent.
pub struct AgentClient {
    http: Client,
    base_url: String,
    shared_secret: String,
    gate: RequestGate,
    backoff: RetryPolicy,
    options: CallOptions,
    max_upload_bytes: u64,
}

impl AgentClient {
    /// Creates a client from the remote section of the configuration.
    /// Fails if the configured base URL is not a valid absolute URL.
    pub fn new(config: &RemoteConfig, max_upload_bytes: u64) -> anyhow::Result<Self> {
        url::Url::parse(&config.base_url)
            .with_context(|| format!("invalid agent base URL: {}", config.base_url))?;
        Ok(Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            shared_secret: config.shared_secret.clone(),
            gate: RequestGate::new(
                config.max_concurrent,
                Duration::from_millis(config.min_spacing_ms),
            ),
            backoff: RetryPolicy::remote_call(),
            options: CallOptions {
                timeout: Duration::from_secs(config.timeout_secs),
                retries: config.retries,
            },
            max_upload_bytes,
        })
    }

    /// Creates a client against a custom base URL (useful for testing).
    pub fn with_base_url(base_url: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            shared_secret: shared_secret.into(),
            gate: RequestGate::new(8, Duration::ZERO),
            backoff: RetryPolicy::remote_call(),
            options: CallOptions::default(),
            max_upload_bytes: u64::MAX,
        }
    }

    /// Overrides the backoff schedule (tests use millisecond delays).
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Overrides the default per-call options.
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Overrides the client-side upload size limit.
    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    // ------------------------------------------------------------------
    // Endpoints
    // ------------------------------------------------------------------

    /// Uploads file content to the mirror. Oversized files are rejected
    /// before any request is sent.
    pub async fn upload(
        &self,
        account: &AccountId,
        path: &MirrorPath,
        data: Vec<u8>,
        mtime: Option<DateTime<Utc>>,
    ) -> Result<(), RemoteError> {
        let size = data.len() as u64;
        if size > self.max_upload_bytes {
            warn!(
                account = %account,
                path = %path,
                bytes = size,
                limit = self.max_upload_bytes,
                "upload rejected client-side, file exceeds size limit"
            );
            return Err(RemoteError::TooLarge {
                path: path.clone(),
                size,
                limit: self.max_upload_bytes,
            });
        }

        debug!(account = %account, path = %path, bytes = size, "uploading file");
        self.call("upload", |req| {
            let mut req = req
                .header(HEADER_ACCOUNT_ID, account.as_str())
                .header(HEADER_PATH, path.to_base64());
            if let Some(mtime) = mtime {
                req = req.header(HEADER_MODIFIED, mtime.to_rfc3339());
            }
            req.body(data.clone())
        })
        .await?;
        Ok(())
    }

    /// Creates a mirror directory.
    pub async fn mkdir(&self, account: &AccountId, path: &MirrorPath) -> Result<(), RemoteError> {
        debug!(account = %account, path = %path, "creating mirror directory");
        self.call("mkdir", |req| {
            req.header(HEADER_ACCOUNT_ID, account.as_str())
                .header(HEADER_PATH, path.to_base64())
        })
        .await?;
        Ok(())
    }

    /// Removes a mirror entry. A 404 means the entry is already gone and
    /// counts as success.
    pub async fn delete(&self, account: &AccountId, path: &MirrorPath) -> Result<(), RemoteError> {
        debug!(account = %account, path = %path, "deleting mirror entry");
        let result = self
            .call("delete", |req| {
                req.header(HEADER_ACCOUNT_ID, account.as_str())
                    .header(HEADER_PATH, path.to_base64())
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(RemoteError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                debug!(account = %account, path = %path, "mirror entry already absent");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Tells the agent to start watching the account.
    pub async fn watch(&self, account: &AccountId) -> Result<(), RemoteError> {
        debug!(account = %account, "requesting agent watch");
        self.call("watch", |req| {
            req.header(HEADER_ACCOUNT_ID, account.as_str())
        })
        .await?;
        Ok(())
    }

    /// Tells the agent the account is disconnected.
    pub async fn disconnect(&self, account: &AccountId) -> Result<(), RemoteError> {
        debug!(account = %account, "requesting agent disconnect");
        self.call("disconnect", |req| {
            req.header(HEADER_ACCOUNT_ID, account.as_str())
        })
        .await?;
        Ok(())
    }

    /// Fetches the agent's view of an account.
    pub async fn status(&self, account: &AccountId) -> Result<AgentStatus, RemoteError> {
        let response = self
            .call("status", |req| {
                req.header(HEADER_ACCOUNT_ID, account.as_str())
                    .json(&serde_json::json!({ "accountId": account.as_str() }))
            })
            .await?;
        let url = response.url().to_string();
        response
            .json::<AgentStatus>()
            .await
            .map_err(|source| RemoteError::BadBody { url, source })
    }

    // ------------------------------------------------------------------
    // Request plumbing
    // ------------------------------------------------------------------

    /// Sends one gated, retried `POST` to `{base_url}/{endpoint}`. On
    /// transient exhaustion the error names the URL and attempt count.
    async fn call<B>(&self, endpoint: &str, build: B) -> Result<Response, RemoteError>
    where
        B: Fn(RequestBuilder) -> RequestBuilder,
    {
        let url = format!("{}/{}", self.base_url, endpoint);
        let opts = self.options;
        let policy = self.backoff.with_attempts(opts.retries);

        let result = policy
            .run(endpoint, || async {
                let _permit = self
                    .gate
                    .admit()
                    .await
                    .map_err(|e| RemoteError::Gate(e.to_string()))?;

                // auth is attached centrally so an endpoint can never forget it
                let request = build(self.http.post(&url).bearer_auth(&self.shared_secret))
                    .timeout(opts.timeout);
                let response = request.send().await.map_err(|source| {
                    if source.is_timeout() {
                        warn!(
                            url = %url,
                            timeout_ms = opts.timeout.as_millis() as u64,
                            deadline_fired = true,
                            "agent request hit its deadline"
                        );
                    }
                    RemoteError::Transport {
                        url: url.clone(),
                        source,
                    }
                })?;

                let status = response.status();
                if status.is_success() {
                    Ok(response)
                } else {
                    Err(RemoteError::Status {
                        url: url.clone(),
                        status,
                    })
                }
            })
            .await;

        result.map_err(|err| {
            if err.is_retryable() {
                RemoteError::Exhausted {
                    url: url.clone(),
                    attempts: opts.retries,
                    source: Box::new(err),
                }
            } else {
                err
            }
        })
    }

}

#[async_trait::async_trait]
impl WatchControl for AgentClient {
    async fn watch(&self, account: &AccountId) -> anyhow::Result<()> {
        AgentClient::watch(self, account).await?;
        Ok(())
    }

    async fn disconnect(&self, account: &AccountId) -> anyhow::Result<()> {
        AgentClient::disconnect(self, account).await?;
        Ok(())
    }
}

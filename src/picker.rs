//! Remote selection sessions: create one, wait for the user to finish
//! picking, then read back what they chose.

use std::future::Future;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::auth::Credential;
use crate::config::PickerConfig;
use crate::error::PickerError;

const MEDIA_ITEMS_PAGE_SIZE: u32 = 100;

/// A server-side picking session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionSession {
    pub id: String,
    /// Link the user opens (usually via QR code) to pick media.
    #[serde(default)]
    pub picker_uri: String,
    /// Flips to `true` once the user has finished picking.
    #[serde(default)]
    pub media_items_set: bool,
    #[serde(default)]
    pub expire_time: Option<String>,
}

/// One picked item and where to fetch its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub id: String,
    pub filename: String,
    pub base_url: String,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One page of a session's picked items.
#[derive(Debug, Clone, Default)]
pub struct MediaItemsPage {
    pub items: Vec<MediaDescriptor>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMediaItemsPage {
    #[serde(default)]
    media_items: Vec<WirePickedItem>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePickedItem {
    #[serde(default)]
    id: String,
    media_file: WireMediaFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMediaFile {
    base_url: String,
    filename: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    media_file_metadata: Option<WireMediaFileMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct WireMediaFileMetadata {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

impl From<WireMediaItemsPage> for MediaItemsPage {
    fn from(page: WireMediaItemsPage) -> Self {
        let items = page
            .media_items
            .into_iter()
            .map(|item| {
                let meta = item.media_file.media_file_metadata.unwrap_or_default();
                MediaDescriptor {
                    id: item.id,
                    filename: item.media_file.filename,
                    base_url: item.media_file.base_url,
                    mime_type: item.media_file.mime_type,
                    width: meta.width,
                    height: meta.height,
                }
            })
            .collect();
        Self {
            items,
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        }
    }
}

/// The three picker endpoints. [`HttpPickerApi`] talks to the real service.
pub trait PickerApi {
    fn create_session(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<SelectionSession, PickerError>> + Send;

    fn get_session(
        &self,
        credential: &Credential,
        session_id: &str,
    ) -> impl Future<Output = Result<SelectionSession, PickerError>> + Send;

    fn list_media_items(
        &self,
        credential: &Credential,
        session_id: &str,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<MediaItemsPage, PickerError>> + Send;
}

pub struct HttpPickerApi {
    http: Client,
    base_url: String,
}

impl HttpPickerApi {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(cfg: &PickerConfig) -> Result<Self, PickerError> {
        let http = Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|source| PickerError::Transport {
                stage: "http client setup",
                source,
            })?;
        Ok(Self::new(http, cfg.api_base_url.clone()))
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: Response,
    stage: &'static str,
) -> Result<T, PickerError> {
    response
        .json::<T>()
        .await
        .map_err(|source| PickerError::Decode { stage, source })
}

impl PickerApi for HttpPickerApi {
    async fn create_session(&self, credential: &Credential) -> Result<SelectionSession, PickerError> {
        const STAGE: &str = "session create";
        let response = self
            .http
            .post(format!("{}/sessions", self.base_url))
            .header(AUTHORIZATION, credential.bearer())
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|source| PickerError::Transport {
                stage: STAGE,
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PickerError::SessionCreate {
                status: status.as_u16(),
            });
        }
        decode(response, STAGE).await
    }

    async fn get_session(
        &self,
        credential: &Credential,
        session_id: &str,
    ) -> Result<SelectionSession, PickerError> {
        const STAGE: &str = "session poll";
        let response = self
            .http
            .get(format!("{}/sessions/{session_id}", self.base_url))
            .header(AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(|source| PickerError::Transport {
                stage: STAGE,
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PickerError::Poll {
                session_id: session_id.to_string(),
                status: status.as_u16(),
            });
        }
        decode(response, STAGE).await
    }

    async fn list_media_items(
        &self,
        credential: &Credential,
        session_id: &str,
        page_token: Option<&str>,
    ) -> Result<MediaItemsPage, PickerError> {
        const STAGE: &str = "selection fetch";
        let page_size = MEDIA_ITEMS_PAGE_SIZE.to_string();
        let mut query = vec![("sessionId", session_id), ("pageSize", page_size.as_str())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response = self
            .http
            .get(format!("{}/mediaItems", self.base_url))
            .header(AUTHORIZATION, credential.bearer())
            .query(&query)
            .send()
            .await
            .map_err(|source| PickerError::Transport {
                stage: STAGE,
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PickerError::Fetch {
                session_id: session_id.to_string(),
                status: status.as_u16(),
            });
        }
        let page: WireMediaItemsPage = decode(response, STAGE).await?;
        Ok(page.into())
    }
}

/// Fixed-interval polling budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(2000),
        }
    }
}

impl From<&PickerConfig> for PollPolicy {
    fn from(cfg: &PickerConfig) -> Self {
        Self {
            interval: cfg.poll_interval,
            timeout: cfg.poll_timeout,
        }
    }
}

/// How a wait for the user's selection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed { session: SelectionSession, polls: u32 },
    /// The budget ran out first; the session should be abandoned.
    TimedOut { elapsed: Duration, polls: u32 },
}

pub struct SessionClient<A> {
    api: A,
    policy: PollPolicy,
}

impl<A: PickerApi> SessionClient<A> {
    pub fn new(api: A, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Create a session. Non-success statuses are not retried.
    pub async fn create_session(&self, credential: &Credential) -> Result<SelectionSession, PickerError> {
        let session = self.api.create_session(credential).await?;
        info!(
            session_id = %session.id,
            picker_uri = %session.picker_uri,
            expire_time = session.expire_time.as_deref(),
            "picker session created"
        );
        Ok(session)
    }

    /// Poll the session's status at `policy.interval` until the user
    /// finishes or `policy.timeout` of wall-clock time has elapsed.
    ///
    /// A non-success poll ends the wait immediately with [`PickerError::Poll`].
    #[instrument(skip(self, credential), fields(interval = ?self.policy.interval, timeout = ?self.policy.timeout))]
    pub async fn wait_for_selection(
        &self,
        credential: &Credential,
        session_id: &str,
    ) -> Result<WaitOutcome, PickerError> {
        let PollPolicy { interval, timeout } = self.policy;
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            polls += 1;
            let session = match self.api.get_session(credential, session_id).await {
                Ok(session) => session,
                Err(err) => {
                    warn!(polls, error = %err, "session poll failed; abandoning wait");
                    return Err(err);
                }
            };
            if session.media_items_set {
                info!(polls, elapsed = ?started.elapsed(), "user finished selecting media");
                return Ok(WaitOutcome::Completed { session, polls });
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(self.timed_out(elapsed, polls));
            }
            let pause = interval.min(timeout - elapsed);
            debug!(polls, ?pause, "selection not finished; waiting before next poll");
            sleep(pause).await;

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Ok(self.timed_out(elapsed, polls));
            }
        }
    }

    fn timed_out(&self, elapsed: Duration, polls: u32) -> WaitOutcome {
        warn!(polls, ?elapsed, "selection not completed before timeout");
        WaitOutcome::TimedOut { elapsed, polls }
    }

    /// Read the finalized selection, following pagination. An empty
    /// selection is a valid, empty result.
    pub async fn fetch_selection(
        &self,
        credential: &Credential,
        session_id: &str,
    ) -> Result<Vec<MediaDescriptor>, PickerError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .api
                .list_media_items(credential, session_id, page_token.as_deref())
                .await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        info!(session_id, count = items.len(), "selection retrieved");
        Ok(items)
    }
}

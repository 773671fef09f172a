//! Credential lifecycle: load the cached token, refresh it when it has
//! expired, or fall back to the interactive consent flow. Every credential
//! this module hands out has been written to the token cache first.

mod installed;

use std::fmt;
use std::fs::{self, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AuthError;

pub use installed::{ClientSecrets, InstalledAppFlow};

/// An OAuth access credential as persisted in the token cache.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Valid,
    ExpiredRefreshable,
    Expired,
}

impl Credential {
    pub fn state(&self, now: DateTime<Utc>, skew: Duration) -> CredentialState {
        let skew = chrono::Duration::from_std(skew).unwrap_or(chrono::Duration::zero());
        if !self.access_token.is_empty() && now + skew < self.expires_at {
            CredentialState::Valid
        } else if self.refresh_token.as_deref().is_some_and(|t| !t.is_empty()) {
            CredentialState::ExpiredRefreshable
        } else {
            CredentialState::Expired
        }
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Source of fresh credentials. The production implementation is
/// [`InstalledAppFlow`]; tests substitute an in-memory one.
pub trait Authorizer {
    /// Run the interactive consent flow.
    fn authorize(&self) -> impl Future<Output = Result<Credential, AuthError>> + Send;

    /// Exchange the credential's refresh token for a new access token.
    fn refresh(
        &self,
        credential: &Credential,
    ) -> impl Future<Output = Result<Credential, AuthError>> + Send;
}

pub struct CredentialStore<A> {
    path: PathBuf,
    skew: Duration,
    authorizer: A,
}

impl<A: Authorizer> CredentialStore<A> {
    pub fn new(path: impl Into<PathBuf>, skew: Duration, authorizer: A) -> Self {
        Self {
            path: path.into(),
            skew,
            authorizer,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached credential. Missing or unreadable caches are `None`.
    pub fn load(&self) -> Option<Credential> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cached credential");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unreadable credential cache; ignoring");
                return None;
            }
        };
        match serde_json::from_slice::<Credential>(&raw) {
            Ok(credential) => Some(credential),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "corrupt credential cache; ignoring");
                None
            }
        }
    }

    /// Return a usable credential, refreshing or re-authorizing as needed.
    pub async fn obtain(&self) -> Result<Credential, AuthError> {
        if let Some(cached) = self.load() {
            match cached.state(Utc::now(), self.skew) {
                CredentialState::Valid => {
                    debug!(expires_at = %cached.expires_at, "cached credential is valid");
                    return Ok(cached);
                }
                CredentialState::ExpiredRefreshable => {
                    info!(expired_at = %cached.expires_at, "refreshing expired credential");
                    match self.authorizer.refresh(&cached).await {
                        Ok(fresh) if self.is_usable(&fresh) => {
                            self.persist(&fresh)?;
                            info!(expires_at = %fresh.expires_at, "credential refreshed");
                            return Ok(fresh);
                        }
                        Ok(_) => warn!("refresh returned an expired credential; re-authorizing"),
                        Err(err) => warn!(error = %err, "refresh failed; re-authorizing"),
                    }
                }
                CredentialState::Expired => {
                    info!("cached credential expired without a refresh token; re-authorizing");
                }
            }
        }

        let fresh = self.authorizer.authorize().await?;
        if !self.is_usable(&fresh) {
            return Err(AuthError::Denied(
                "identity provider issued an already expired token".to_string(),
            ));
        }
        self.persist(&fresh)?;
        info!(
            expires_at = %fresh.expires_at,
            has_refresh_token = fresh.refresh_token.is_some(),
            "credential authorized"
        );
        Ok(fresh)
    }

    fn is_usable(&self, credential: &Credential) -> bool {
        credential.state(Utc::now(), self.skew) == CredentialState::Valid
    }

    /// Write through a sibling temp file so a crash never leaves half a cache.
    pub fn persist(&self, credential: &Credential) -> Result<(), AuthError> {
        let persist_err = |source| AuthError::Persist {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(persist_err)?;
        }
        let json = serde_json::to_vec_pretty(credential)
            .map_err(|err| persist_err(std::io::Error::other(err)))?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).map_err(persist_err)?;
        file.write_all(&json).map_err(persist_err)?;
        file.sync_all().map_err(persist_err)?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(persist_err)?;
        debug!(path = %self.path.display(), "credential persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn credential(token: &str, expires_in_secs: i64, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: token.to_string(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            refresh_token: refresh.map(str::to_string),
            scopes: vec!["scope".to_string()],
        }
    }

    #[derive(Default)]
    struct FakeAuthorizer {
        authorize_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
        fail_authorize: bool,
        fail_refresh: bool,
        seen_refresh_token: Mutex<Option<String>>,
    }

    impl Authorizer for FakeAuthorizer {
        async fn authorize(&self) -> Result<Credential, AuthError> {
            self.authorize_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_authorize {
                return Err(AuthError::Denied("access_denied".to_string()));
            }
            Ok(credential("interactive", 3600, Some("r-new")))
        }

        async fn refresh(&self, credential_in: &Credential) -> Result<Credential, AuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_refresh_token.lock().unwrap() = credential_in.refresh_token.clone();
            if self.fail_refresh {
                return Err(AuthError::TokenEndpoint {
                    stage: "refresh",
                    status: 400,
                    body: "invalid_grant".to_string(),
                });
            }
            Ok(credential("refreshed", 3600, credential_in.refresh_token.as_deref()))
        }
    }

    fn store(dir: &Path, authorizer: FakeAuthorizer) -> CredentialStore<FakeAuthorizer> {
        CredentialStore::new(dir.join("token.json"), Duration::from_secs(60), authorizer)
    }

    #[test]
    fn state_classification_respects_skew() {
        let now = Utc::now();
        let skew = Duration::from_secs(60);
        assert_eq!(
            credential("t", 3600, None).state(now, skew),
            CredentialState::Valid
        );
        assert_eq!(
            credential("t", 30, Some("r")).state(now, skew),
            CredentialState::ExpiredRefreshable
        );
        assert_eq!(
            credential("t", -10, None).state(now, skew),
            CredentialState::Expired
        );
        assert_eq!(
            credential("", 3600, Some("")).state(now, skew),
            CredentialState::Expired
        );
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let rendered = format!("{:?}", credential("secret-token", 10, Some("secret-refresh")));
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("secret-refresh"));
    }

    #[tokio::test]
    async fn absent_cache_runs_interactive_flow_and_persists() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), FakeAuthorizer::default());

        let cred = store.obtain().await.unwrap();
        assert_eq!(cred.access_token, "interactive");
        assert_eq!(store.authorizer.authorize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.load(), Some(cred));
    }

    #[tokio::test]
    async fn valid_cache_is_returned_without_authorizer_calls() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), FakeAuthorizer::default());
        store.persist(&credential("cached", 3600, None)).unwrap();

        let cred = store.obtain().await.unwrap();
        assert_eq!(cred.access_token, "cached");
        assert_eq!(store.authorizer.authorize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.authorizer.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_cache_is_refreshed_in_place() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), FakeAuthorizer::default());
        store.persist(&credential("old", -5, Some("r-old"))).unwrap();

        let cred = store.obtain().await.unwrap();
        assert_eq!(cred.access_token, "refreshed");
        assert_eq!(cred.refresh_token.as_deref(), Some("r-old"));
        assert_eq!(
            store.authorizer.seen_refresh_token.lock().unwrap().as_deref(),
            Some("r-old")
        );
        assert_eq!(store.authorizer.authorize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.load().unwrap().access_token, "refreshed");
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_interactive_flow() {
        let dir = tempdir().unwrap();
        let authorizer = FakeAuthorizer {
            fail_refresh: true,
            ..Default::default()
        };
        let store = store(dir.path(), authorizer);
        store.persist(&credential("old", -5, Some("r-old"))).unwrap();

        let cred = store.obtain().await.unwrap();
        assert_eq!(cred.access_token, "interactive");
        assert_eq!(store.authorizer.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.authorizer.authorize_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.load().unwrap().access_token, "interactive");
    }

    #[tokio::test]
    async fn expired_without_refresh_token_reauthorizes() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), FakeAuthorizer::default());
        store.persist(&credential("old", -5, None)).unwrap();

        let cred = store.obtain().await.unwrap();
        assert_eq!(cred.access_token, "interactive");
        assert_eq!(store.authorizer.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_cache_triggers_reauthorization() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), FakeAuthorizer::default());
        fs::write(store.path(), b"\x80pickle-from-another-life").unwrap();

        let cred = store.obtain().await.unwrap();
        assert_eq!(cred.access_token, "interactive");
        assert_eq!(store.load().unwrap().access_token, "interactive");
    }

    #[tokio::test]
    async fn unknown_fields_in_cache_are_tolerated() {
        let dir = tempdir().unwrap();
        let store = store(dir.path(), FakeAuthorizer::default());
        let expires = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        fs::write(
            store.path(),
            format!(r#"{{"access_token":"cached","expires_at":"{expires}","token_type":"Bearer"}}"#),
        )
        .unwrap();

        let cred = store.obtain().await.unwrap();
        assert_eq!(cred.access_token, "cached");
        assert_eq!(store.authorizer.authorize_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authorization_failure_surfaces_and_writes_nothing() {
        let dir = tempdir().unwrap();
        let authorizer = FakeAuthorizer {
            fail_authorize: true,
            ..Default::default()
        };
        let store = store(dir.path(), authorizer);

        let err = store.obtain().await.unwrap_err();
        assert!(matches!(err, AuthError::Denied(_)));
        assert!(!store.path().exists());
    }
}

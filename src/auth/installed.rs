//! Installed-application OAuth flow with a loopback redirect.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::{Authorizer, Credential};
use crate::config::CredentialsConfig;
use crate::error::AuthError;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Used when the token endpoint omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// The `installed` (or `web`) entry of a client secrets file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let raw = std::fs::read(path).map_err(|source| AuthError::ClientSecrets {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ClientSecretsFile =
            serde_json::from_slice(&raw).map_err(|err| AuthError::MalformedSecrets {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        file.installed
            .or(file.web)
            .ok_or_else(|| AuthError::MalformedSecrets {
                path: path.to_path_buf(),
                reason: "expected an `installed` or `web` client entry".to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_credential(self, fallback_refresh: Option<&str>, requested: &[String]) -> Credential {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let scopes = match self.scope {
            Some(granted) => granted.split_whitespace().map(str::to_string).collect(),
            None => requested.to_vec(),
        };
        Credential {
            access_token: self.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime),
            refresh_token: self
                .refresh_token
                .or_else(|| fallback_refresh.map(str::to_string)),
            scopes,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    tx: Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>,
}

const CALLBACK_DONE_PAGE: &str = "<!doctype html><html><body><h1>Authorization received</h1>\
<p>You can close this window and return to the photo frame.</p></body></html>";
const CALLBACK_WAITING_PAGE: &str =
    "<!doctype html><html><body><p>Waiting for authorization…</p></body></html>";

/// Browser consent with a one-shot loopback listener for the redirect.
pub struct InstalledAppFlow {
    secrets: ClientSecrets,
    scopes: Vec<String>,
    redirect_port: u16,
    http: Client,
}

impl InstalledAppFlow {
    pub fn new(
        secrets: ClientSecrets,
        scopes: Vec<String>,
        redirect_port: u16,
        request_timeout: Duration,
    ) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|source| AuthError::Transport {
                stage: "http client setup",
                source,
            })?;
        Ok(Self {
            secrets,
            scopes,
            redirect_port,
            http,
        })
    }

    pub fn from_config(cfg: &CredentialsConfig, request_timeout: Duration) -> Result<Self, AuthError> {
        let secrets = ClientSecrets::from_file(&cfg.client_secrets)?;
        Self::new(
            secrets,
            cfg.scopes.clone(),
            cfg.redirect_port,
            request_timeout,
        )
    }

    fn consent_url(&self, redirect_uri: &str, state: &str) -> Result<Url, AuthError> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|err| AuthError::MalformedSecrets {
            path: Default::default(),
            reason: format!("invalid auth_uri {:?}: {err}", self.secrets.auth_uri),
        })
    }

    async fn token_request(
        &self,
        stage: &'static str,
        mut form: Vec<(&'static str, String)>,
    ) -> Result<TokenResponse, AuthError> {
        form.push(("client_id", self.secrets.client_id.clone()));
        if let Some(secret) = &self.secrets.client_secret {
            form.push(("client_secret", secret.clone()));
        }
        let response = self
            .http
            .post(&self.secrets.token_uri)
            .form(&form)
            .send()
            .await
            .map_err(|source| AuthError::Transport { stage, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpoint {
                stage,
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|source| AuthError::Transport { stage, source })
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Credential, AuthError> {
        let token = self
            .token_request(
                "code exchange",
                vec![
                    ("grant_type", "authorization_code".to_string()),
                    ("code", code.to_string()),
                    ("redirect_uri", redirect_uri.to_string()),
                ],
            )
            .await?;
        Ok(token.into_credential(None, &self.scopes))
    }
}

impl Authorizer for InstalledAppFlow {
    async fn authorize(&self) -> Result<Credential, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", self.redirect_port))
            .await
            .map_err(|source| AuthError::NoCallbackPort {
                port: self.redirect_port,
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| AuthError::NoCallbackPort {
                port: self.redirect_port,
                source,
            })?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}/");
        let state: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();

        let url = self.consent_url(&redirect_uri, &state)?;
        info!(port, "waiting for authorization redirect");
        println!("Open this URL in a browser to authorize photo access:\n\n{url}\n");

        let code = receive_code(listener, &state).await?;
        self.exchange_code(&code, &redirect_uri).await
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            return Err(AuthError::Denied("no refresh token".to_string()));
        };
        let token = self
            .token_request(
                "refresh",
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("refresh_token", refresh_token.to_string()),
                ],
            )
            .await?;
        Ok(token.into_credential(Some(refresh_token), &credential.scopes))
    }
}

/// Serve the redirect on `listener` until one request carries a code or an
/// error, then shut the listener down.
async fn receive_code(listener: TcpListener, expected_state: &str) -> Result<String, AuthError> {
    let (tx, rx) = oneshot::channel();
    let (done_tx, done_rx) = oneshot::channel::<()>();
    let router = Router::new()
        .route("/", get(handle_callback))
        .with_state(CallbackState {
            tx: Arc::new(Mutex::new(Some(tx))),
        });
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = done_rx.await;
            })
            .await
    });

    let received = rx.await;
    let _ = done_tx.send(());
    match tokio::time::timeout(Duration::from_secs(2), server).await {
        Ok(Ok(Err(err))) => warn!(error = %err, "callback server exited with error"),
        Err(_) => debug!("callback server still draining; detaching"),
        _ => {}
    }

    let params = received
        .map_err(|_| AuthError::Callback("callback server stopped before a redirect".to_string()))?;
    if let Some(error) = params.error {
        return Err(AuthError::Denied(error));
    }
    if params.state.as_deref() != Some(expected_state) {
        return Err(AuthError::StateMismatch);
    }
    params
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AuthError::Callback("redirect carried no authorization code".to_string()))
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    // Browsers sometimes probe the bare URL; keep waiting for the real redirect.
    if params.code.is_none() && params.error.is_none() {
        return Html(CALLBACK_WAITING_PAGE);
    }
    let sender = state.tx.lock().ok().and_then(|mut slot| slot.take());
    if let Some(tx) = sender {
        let _ = tx.send(params);
    }
    Html(CALLBACK_DONE_PAGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Form;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use tempfile::tempdir;

    fn secrets(token_uri: String) -> ClientSecrets {
        ClientSecrets {
            client_id: "client-123".to_string(),
            client_secret: Some("shh".to_string()),
            auth_uri: DEFAULT_AUTH_URI.to_string(),
            token_uri,
        }
    }

    async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> Response {
        if form.get("client_id").map(String::as_str) != Some("client-123") {
            return (StatusCode::UNAUTHORIZED, "bad client").into_response();
        }
        match form.get("grant_type").map(String::as_str) {
            Some("refresh_token") if form.get("refresh_token").map(String::as_str) == Some("r1") => {
                axum::Json(serde_json::json!({
                    "access_token": "fresh",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }))
                .into_response()
            }
            Some("authorization_code") if form.get("code").map(String::as_str) == Some("abc") => {
                axum::Json(serde_json::json!({
                    "access_token": "first",
                    "expires_in": 3599,
                    "refresh_token": "r-first",
                    "scope": "s1 s2"
                }))
                .into_response()
            }
            _ => (StatusCode::BAD_REQUEST, "invalid_grant").into_response(),
        }
    }

    async fn start_token_server() -> SocketAddr {
        let app = Router::new().route("/token", post(token_endpoint));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn flow(addr: SocketAddr) -> InstalledAppFlow {
        InstalledAppFlow::new(
            secrets(format!("http://{addr}/token")),
            vec!["s1".to_string()],
            0,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn reads_installed_client_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Credentials.json");
        std::fs::write(
            &path,
            r#"{"installed":{"client_id":"id","client_secret":"sec","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap();
        let secrets = ClientSecrets::from_file(&path).unwrap();
        assert_eq!(secrets.client_id, "id");
        assert_eq!(secrets.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn client_file_without_entries_is_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Credentials.json");
        std::fs::write(&path, "{}").unwrap();
        assert!(matches!(
            ClientSecrets::from_file(&path),
            Err(AuthError::MalformedSecrets { .. })
        ));
    }

    #[test]
    fn consent_url_requests_offline_access() {
        let flow = InstalledAppFlow::new(
            secrets(DEFAULT_TOKEN_URI.to_string()),
            vec!["a".to_string(), "b".to_string()],
            8080,
            Duration::from_secs(5),
        )
        .unwrap();
        let url = flow.consent_url("http://127.0.0.1:8080/", "xyz").unwrap();
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["scope"], "a b");
        assert_eq!(pairs["state"], "xyz");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["redirect_uri"], "http://127.0.0.1:8080/");
    }

    #[tokio::test]
    async fn refresh_keeps_previous_refresh_token() {
        let addr = start_token_server().await;
        let old = Credential {
            access_token: "stale".to_string(),
            expires_at: Utc::now(),
            refresh_token: Some("r1".to_string()),
            scopes: vec!["s1".to_string()],
        };
        let fresh = flow(addr).refresh(&old).await.unwrap();
        assert_eq!(fresh.access_token, "fresh");
        assert_eq!(fresh.refresh_token.as_deref(), Some("r1"));
        assert!(fresh.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn rejected_refresh_reports_status() {
        let addr = start_token_server().await;
        let old = Credential {
            access_token: "stale".to_string(),
            expires_at: Utc::now(),
            refresh_token: Some("revoked".to_string()),
            scopes: vec![],
        };
        let err = flow(addr).refresh(&old).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenEndpoint { status: 400, .. }));
    }

    #[tokio::test]
    async fn code_exchange_records_granted_scopes() {
        let addr = start_token_server().await;
        let cred = flow(addr)
            .exchange_code("abc", "http://127.0.0.1:1/")
            .await
            .unwrap();
        assert_eq!(cred.access_token, "first");
        assert_eq!(cred.refresh_token.as_deref(), Some("r-first"));
        assert_eq!(cred.scopes, vec!["s1", "s2"]);
    }

    async fn redirect(query: &'static str) -> Result<String, AuthError> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(async move { receive_code(listener, "st8").await });
        let client = Client::new();
        // A bare probe must not consume the one-shot slot.
        client.get(format!("http://{addr}/")).send().await.unwrap();
        client
            .get(format!("http://{addr}/?{query}"))
            .send()
            .await
            .unwrap();
        waiter.await.unwrap()
    }

    #[tokio::test]
    async fn callback_yields_code_for_matching_state() {
        assert_eq!(redirect("code=abc&state=st8").await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn callback_rejects_forged_state() {
        assert!(matches!(
            redirect("code=abc&state=other").await,
            Err(AuthError::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn callback_reports_user_denial() {
        assert!(matches!(
            redirect("error=access_denied&state=st8").await,
            Err(AuthError::Denied(reason)) if reason == "access_denied"
        ));
    }

    #[tokio::test]
    async fn occupied_callback_port_is_an_auth_failure() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let flow = InstalledAppFlow::new(
            secrets(DEFAULT_TOKEN_URI.to_string()),
            vec![],
            port,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = flow.authorize().await.unwrap_err();
        assert!(matches!(err, AuthError::NoCallbackPort { port: p, .. } if p == port));
    }
}

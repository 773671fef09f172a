use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// The credential could not be loaded, refreshed or obtained interactively.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The installed-app client file is missing or unreadable.
    #[error("failed to read client secrets at {path}: {source}")]
    ClientSecrets { path: PathBuf, source: io::Error },

    /// The client file parsed but holds neither an `installed` nor a `web` entry.
    #[error("client secrets at {path} are malformed: {reason}")]
    MalformedSecrets { path: PathBuf, reason: String },

    /// The loopback listener for the consent redirect could not bind.
    #[error("no callback port available on 127.0.0.1:{port}: {source}")]
    NoCallbackPort { port: u16, source: io::Error },

    /// The user (or the identity provider) refused consent.
    #[error("authorization denied: {0}")]
    Denied(String),

    /// The redirect carried an unexpected anti-forgery state value.
    #[error("authorization callback state mismatch")]
    StateMismatch,

    /// The callback server stopped before a code arrived.
    #[error("authorization callback failed: {0}")]
    Callback(String),

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint returned status {status} during {stage}: {body}")]
    TokenEndpoint {
        stage: &'static str,
        status: u16,
        body: String,
    },

    #[error("{stage} request failed: {source}")]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },

    /// A freshly obtained credential could not be written to the token cache.
    #[error("failed to persist credential to {path}: {source}")]
    Persist { path: PathBuf, source: io::Error },
}

/// One-shot and polling failures talking to the picker service.
#[derive(Debug, Error)]
pub enum PickerError {
    #[error("session create failed with status {status}")]
    SessionCreate { status: u16 },

    #[error("polling session {session_id} failed with status {status}")]
    Poll { session_id: String, status: u16 },

    #[error("fetching selection for session {session_id} failed with status {status}")]
    Fetch { session_id: String, status: u16 },

    #[error("{stage} request failed: {source}")]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },

    #[error("{stage} response was malformed: {source}")]
    Decode {
        stage: &'static str,
        source: reqwest::Error,
    },
}

/// Why a single media item did not land in local storage.
#[derive(Debug, Error)]
pub enum DownloadFailure {
    #[error("remote returned status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid filename {0:?}")]
    InvalidFilename(String),

    #[error("duplicate filename {0:?} skipped")]
    Duplicate(String),
}

/// Display-stage failures.
#[derive(Debug, Error)]
pub enum SlideshowError {
    /// Zero images is a precondition violation; the frame loop never starts.
    #[error("no displayable images")]
    EmptyImageSet,

    /// The image directory is missing or not a directory.
    #[error("invalid image directory: {0}")]
    BadDir(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("window error: {0}")]
    Window(String),
}

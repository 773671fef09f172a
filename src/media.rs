//! Downloads picked media into local storage, one item at a time.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::auth::Credential;
use crate::config::{DuplicatePolicy, MediaConfig};
use crate::error::DownloadFailure;
use crate::picker::MediaDescriptor;

const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug)]
pub enum DownloadResult {
    Saved {
        filename: String,
        path: PathBuf,
        bytes: u64,
    },
    Failed {
        filename: String,
        reason: DownloadFailure,
    },
}

impl DownloadResult {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }

    /// The descriptor's filename as reported by the service.
    pub fn filename(&self) -> &str {
        match self {
            Self::Saved { filename, .. } | Self::Failed { filename, .. } => filename,
        }
    }
}

/// Per-item outcomes for one selection, in selection order.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub results: Vec<DownloadResult>,
}

impl DownloadReport {
    pub fn saved(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| r.is_saved())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| !r.is_saved())
    }

    pub fn saved_count(&self) -> usize {
        self.saved().count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

pub struct MediaFetcher {
    http: Client,
    storage_dir: PathBuf,
    download_suffix: String,
    on_duplicate: DuplicatePolicy,
}

impl MediaFetcher {
    pub fn new(http: Client, cfg: &MediaConfig) -> Self {
        Self {
            http,
            storage_dir: cfg.storage_dir.clone(),
            download_suffix: cfg.download_suffix.clone(),
            on_duplicate: cfg.on_duplicate,
        }
    }

    /// Bodies can be large, so the whole transfer is unbounded; connecting
    /// and each read between chunks are bounded by `timeout`.
    pub fn from_config(cfg: &MediaConfig, timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self::new(http, cfg))
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub async fn ensure_storage_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.storage_dir).await
    }

    pub fn download_url(&self, descriptor: &MediaDescriptor) -> String {
        format!("{}{}", descriptor.base_url, self.download_suffix)
    }

    /// Download one item to `<storage-dir>/<filename>`, replacing any existing file.
    pub async fn download(&self, descriptor: &MediaDescriptor, credential: &Credential) -> DownloadResult {
        match local_name(&descriptor.filename) {
            Some(name) => self.download_as(descriptor, &name, credential).await,
            None => invalid_name(descriptor),
        }
    }

    /// Download every item sequentially, applying the duplicate-name policy
    /// within this batch.
    pub async fn download_all(
        &self,
        descriptors: &[MediaDescriptor],
        credential: &Credential,
    ) -> DownloadReport {
        let mut report = DownloadReport::default();
        let mut taken: HashSet<String> = HashSet::new();
        for descriptor in descriptors {
            let Some(name) = local_name(&descriptor.filename) else {
                report.results.push(invalid_name(descriptor));
                continue;
            };
            let target = if taken.contains(&name) {
                match self.on_duplicate {
                    DuplicatePolicy::Overwrite => name,
                    DuplicatePolicy::Rename => deduplicated_name(&name, &taken),
                    DuplicatePolicy::Skip => {
                        warn!(filename = %descriptor.filename, "duplicate filename skipped");
                        report.results.push(DownloadResult::Failed {
                            filename: descriptor.filename.clone(),
                            reason: DownloadFailure::Duplicate(name),
                        });
                        continue;
                    }
                }
            } else {
                name
            };
            taken.insert(target.clone());
            report
                .results
                .push(self.download_as(descriptor, &target, credential).await);
        }
        info!(
            saved = report.saved_count(),
            failed = report.failed_count(),
            "downloads finished"
        );
        report
    }

    async fn download_as(
        &self,
        descriptor: &MediaDescriptor,
        name: &str,
        credential: &Credential,
    ) -> DownloadResult {
        let url = self.download_url(descriptor);
        match self.stream_to_disk(&url, name, credential).await {
            Ok((path, bytes)) => {
                info!(filename = %descriptor.filename, path = %path.display(), bytes, "media saved");
                DownloadResult::Saved {
                    filename: descriptor.filename.clone(),
                    path,
                    bytes,
                }
            }
            Err(reason) => {
                warn!(filename = %descriptor.filename, error = %reason, "media download failed");
                DownloadResult::Failed {
                    filename: descriptor.filename.clone(),
                    reason,
                }
            }
        }
    }

    async fn stream_to_disk(
        &self,
        url: &str,
        name: &str,
        credential: &Credential,
    ) -> Result<(PathBuf, u64), DownloadFailure> {
        self.ensure_storage_dir().await?;
        let mut response = self
            .http
            .get(url)
            .header(AUTHORIZATION, credential.bearer())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadFailure::Status(status.as_u16()));
        }

        let final_path = self.storage_dir.join(name);
        let partial = self.storage_dir.join(format!("{name}{PARTIAL_SUFFIX}"));
        let written = async {
            let mut file = fs::File::create(&partial).await?;
            let mut bytes = 0u64;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                bytes += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&partial, &final_path).await?;
            Ok::<u64, DownloadFailure>(bytes)
        }
        .await;

        match written {
            Ok(bytes) => Ok((final_path, bytes)),
            Err(err) => {
                debug!(path = %partial.display(), "removing partial download");
                let _ = fs::remove_file(&partial).await;
                Err(err)
            }
        }
    }
}

fn invalid_name(descriptor: &MediaDescriptor) -> DownloadResult {
    warn!(filename = %descriptor.filename, "refusing unsafe filename");
    DownloadResult::Failed {
        filename: descriptor.filename.clone(),
        reason: DownloadFailure::InvalidFilename(descriptor.filename.clone()),
    }
}

/// Reduce a remote filename to a single safe path component, unchanged
/// otherwise. Dot-files are refused since local scans never show them.
fn local_name(remote: &str) -> Option<String> {
    let last = remote.rsplit(&['/', '\\'][..]).next()?;
    if last.is_empty() || last.starts_with('.') {
        return None;
    }
    Some(last.to_string())
}

/// `a.jpg` → `a (1).jpg`, `a (2).jpg`, ... whichever is free first.
fn deduplicated_name(name: &str, taken: &HashSet<String>) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1..)
        .map(|n| match &ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        })
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

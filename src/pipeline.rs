//! Credential → session → wait → fetch → download → local scan.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::auth::{Authorizer, CredentialStore};
use crate::config::Configuration;
use crate::media::{DownloadReport, DownloadResult, MediaFetcher};
use crate::picker::{PickerApi, SessionClient, WaitOutcome};
use crate::qr;
use crate::scan::LocalImageSet;

/// Result of one acquisition run.
#[derive(Debug)]
pub enum Acquisition {
    /// The user finished; `images` is what storage holds after downloading.
    Downloaded {
        report: DownloadReport,
        images: LocalImageSet,
    },
    /// The user never finished before the poll budget ran out.
    SelectionNotCompleted { session_id: String, elapsed: Duration },
}

pub struct Pipeline<A, P> {
    store: CredentialStore<A>,
    sessions: SessionClient<P>,
    fetcher: MediaFetcher,
    cfg: Configuration,
}

impl<A: Authorizer, P: PickerApi> Pipeline<A, P> {
    pub fn new(
        store: CredentialStore<A>,
        sessions: SessionClient<P>,
        fetcher: MediaFetcher,
        cfg: Configuration,
    ) -> Self {
        Self {
            store,
            sessions,
            fetcher,
            cfg,
        }
    }

    pub async fn acquire(&self) -> Result<Acquisition> {
        let credential = self
            .store
            .obtain()
            .await
            .context("failed to obtain an access credential")?;

        let session = self
            .sessions
            .create_session(&credential)
            .await
            .context("failed to create a picker session")?;
        qr::present_link(&session.picker_uri, &self.cfg.qr)
            .context("failed to present the picker link")?;

        let session = match self
            .sessions
            .wait_for_selection(&credential, &session.id)
            .await
            .context("failed while waiting for the selection")?
        {
            WaitOutcome::Completed { session, .. } => session,
            WaitOutcome::TimedOut { elapsed, .. } => {
                return Ok(Acquisition::SelectionNotCompleted {
                    session_id: session.id,
                    elapsed,
                });
            }
        };

        let descriptors = self
            .sessions
            .fetch_selection(&credential, &session.id)
            .await
            .context("failed to read the selection")?;

        self.fetcher.ensure_storage_dir().await.with_context(|| {
            format!(
                "failed to create storage directory {}",
                self.fetcher.storage_dir().display()
            )
        })?;
        let report = self.fetcher.download_all(&descriptors, &credential).await;
        for result in report.failed() {
            if let DownloadResult::Failed { filename, reason } = result {
                warn!(%filename, %reason, "item not downloaded");
            }
        }
        info!(
            selected = descriptors.len(),
            saved = report.saved_count(),
            failed = report.failed_count(),
            "selection downloaded"
        );

        let images = LocalImageSet::scan(self.fetcher.storage_dir(), &self.cfg.slideshow.extensions)
            .context("failed to scan local storage")?;
        Ok(Acquisition::Downloaded { report, images })
    }
}

//! The four reconciliation passes.
//!
//! Each pass is a pure function of current store/blob state: select
//! candidates past their grace window, claim them one row at a time, check
//! the external world, and commit the repair together with the claim. A
//! failure on one row releases that row's claim and moves on; a failure of
//! a whole pass is the scheduler's problem, never the process's.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use wallcat_core::config::ReconcileSettings;
use wallcat_core::models::{UploadMetadata, UploadState};
use wallcat_core::UploadStoredEvent;
use wallcat_db::{UploadClaim, UploadRepository};
use wallcat_events::EventPublisher;
use wallcat_storage::{storage_key_for, upload_id_from_key, BlobStore, WALLPAPER_PREFIX};

/// Outcome counts for one pass invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    /// Candidate rows (or objects) selected for this pass.
    pub examined: usize,
    /// Rows advanced / deleted, objects removed.
    pub repaired: usize,
    /// Candidates skipped: claimed elsewhere, aged out of the window in the
    /// meantime, or held back by a guard.
    pub skipped: usize,
    /// Candidates whose repair attempt errored; retried next cycle.
    pub failed: usize,
}

/// The reconciliation engine.
///
/// One instance per service process; all collaborators are injected by the
/// composition root. Safe to share behind an `Arc` and to run concurrently
/// with any number of identical instances on other processes.
pub struct Reconciler {
    uploads: UploadRepository,
    blobs: Arc<dyn BlobStore>,
    events: Arc<dyn EventPublisher>,
    bucket: String,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        uploads: UploadRepository,
        blobs: Arc<dyn BlobStore>,
        events: Arc<dyn EventPublisher>,
        bucket: String,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            uploads,
            blobs,
            events,
            bucket,
            settings,
        }
    }

    /// Bound an external call so a held row claim can never outlive a hung
    /// dependency.
    async fn bounded<T, E, F>(&self, what: &'static str, call: F) -> Result<T>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.settings.external_call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e).with_context(|| format!("{what} failed")),
            Err(_) => Err(anyhow!(
                "{what} timed out after {:?}",
                self.settings.external_call_timeout
            )),
        }
    }

    /// Repair `uploading` rows older than the stuck window.
    ///
    /// Blob present: the write finished but the confirmation was lost —
    /// promote to `stored`. Blob absent: the write died — grant another
    /// attempt, or fail the row once attempts are exhausted.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_stuck_uploads(&self) -> Result<PassSummary> {
        let window = self.settings.stuck_upload_window;
        let candidates = self
            .uploads
            .list_stuck_uploading(window, self.settings.batch_size)
            .await
            .context("Failed to list stuck uploads")?;

        let mut summary = PassSummary {
            examined: candidates.len(),
            ..Default::default()
        };

        for id in candidates {
            let claim = match self
                .uploads
                .claim_if_stale(id, UploadState::Uploading, window)
                .await
            {
                Ok(Some(claim)) => claim,
                Ok(None) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(upload_id = %id, error = %e, "Failed to claim stuck upload");
                    summary.failed += 1;
                    continue;
                }
            };

            match self.repair_stuck_upload(claim).await {
                Ok(true) => summary.repaired += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(upload_id = %id, error = %e, "Stuck upload repair failed, will retry next cycle");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            repaired = summary.repaired,
            skipped = summary.skipped,
            failed = summary.failed,
            "Stuck-uploads pass completed"
        );

        Ok(summary)
    }

    async fn repair_stuck_upload(&self, claim: UploadClaim) -> Result<bool> {
        let record = claim.record().clone();
        let key = storage_key_for(record.id);

        let exists = match self.bounded("blob existence check", self.blobs.exists(&key)).await {
            Ok(exists) => exists,
            Err(e) => {
                claim.release().await.ok();
                return Err(e);
            }
        };

        if exists {
            let Some(metadata) = record.pending_metadata.clone() else {
                // Integrity error: the row should carry the metadata the
                // intake validated. Leave it unresolved for investigation.
                tracing::error!(
                    upload_id = %record.id,
                    "Uploading row has a blob but no staged metadata, leaving unresolved"
                );
                claim.release().await.ok();
                return Ok(false);
            };
            self.promote_to_stored(claim, &metadata, &key).await?;
            return Ok(true);
        }

        if record.upload_attempts >= self.settings.max_upload_attempts {
            claim.commit_failed().await?;
        } else {
            claim.commit_retry().await?;
        }
        Ok(true)
    }

    async fn promote_to_stored(
        &self,
        claim: UploadClaim,
        metadata: &UploadMetadata,
        key: &str,
    ) -> Result<()> {
        claim
            .commit_stored(metadata, &self.bucket, key)
            .await
            .context("Failed to commit stored transition")?;
        Ok(())
    }

    /// Publish completion events for `stored` rows older than the event
    /// window and advance them to `processing`.
    ///
    /// The transition commits only after the publish is acknowledged
    /// durable; a failed publish leaves the row in `stored` for the next
    /// pass, and the dedup id makes a crash between publish and commit
    /// harmless.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_missing_events(&self) -> Result<PassSummary> {
        let window = self.settings.missing_event_window;
        let candidates = self
            .uploads
            .list_stale_stored(window, self.settings.batch_size)
            .await
            .context("Failed to list stored rows with missing events")?;

        let mut summary = PassSummary {
            examined: candidates.len(),
            ..Default::default()
        };

        for id in candidates {
            let claim = match self
                .uploads
                .claim_if_stale(id, UploadState::Stored, window)
                .await
            {
                Ok(Some(claim)) => claim,
                Ok(None) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(upload_id = %id, error = %e, "Failed to claim stored upload");
                    summary.failed += 1;
                    continue;
                }
            };

            match self.publish_and_advance(claim).await {
                Ok(true) => summary.repaired += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(upload_id = %id, error = %e, "Event publish failed, row stays stored");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            repaired = summary.repaired,
            skipped = summary.skipped,
            failed = summary.failed,
            "Missing-events pass completed"
        );

        Ok(summary)
    }

    async fn publish_and_advance(&self, claim: UploadClaim) -> Result<bool> {
        let event = match UploadStoredEvent::from_record(claim.record()) {
            Ok(event) => event,
            Err(e) => {
                // Integrity error: stored row without full metadata. Leave
                // it for investigation rather than force-advancing.
                tracing::error!(
                    upload_id = %claim.record().id,
                    error = %e,
                    "Stored row cannot build its completion event, leaving unresolved"
                );
                claim.release().await.ok();
                return Ok(false);
            }
        };

        if let Err(e) = self
            .bounded("event publish", self.events.publish_stored(&event))
            .await
        {
            claim.release().await.ok();
            return Err(e);
        }

        claim
            .commit_processing()
            .await
            .context("Failed to commit processing transition")?;
        Ok(true)
    }

    /// Delete `initiated` rows older than the intent window. No blob and no
    /// event exist for them, so a plain guarded bulk delete is enough.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_orphaned_intents(&self) -> Result<PassSummary> {
        let deleted = self
            .uploads
            .delete_orphaned_intents(self.settings.orphaned_intent_window)
            .await
            .context("Failed to delete orphaned intents")?;

        let summary = PassSummary {
            examined: deleted as usize,
            repaired: deleted as usize,
            ..Default::default()
        };

        tracing::info!(deleted = deleted, "Orphaned-intents pass completed");
        Ok(summary)
    }

    /// Delete blobs that no live upload row references.
    ///
    /// Runs on its own coarser cadence: listing the whole prefix is
    /// expensive and orphaned objects only cost storage. Objects younger
    /// than the minimum age are left alone — a fresh blob may belong to an
    /// upload whose confirmation is still in flight — as are foreign keys
    /// that do not parse as upload ids.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_orphaned_blobs(&self) -> Result<PassSummary> {
        let entries = self
            .blobs
            .list(WALLPAPER_PREFIX)
            .await
            .context("Failed to list blob objects")?;

        let mut summary = PassSummary {
            examined: entries.len(),
            ..Default::default()
        };

        let min_age =
            chrono::Duration::from_std(self.settings.orphaned_blob_min_age).unwrap_or_default();
        let now = Utc::now();

        let mut deletable: Vec<(Uuid, String)> = Vec::new();
        for entry in entries {
            let Some(id) = upload_id_from_key(&entry.key) else {
                tracing::warn!(key = %entry.key, "Foreign object under wallpaper prefix, skipping");
                summary.skipped += 1;
                continue;
            };
            match entry.last_modified {
                Some(modified) if now.signed_duration_since(modified) >= min_age => {
                    deletable.push((id, entry.key));
                }
                _ => {
                    summary.skipped += 1;
                }
            }
        }

        let ids: Vec<Uuid> = deletable.iter().map(|(id, _)| *id).collect();
        let live: HashSet<Uuid> = self
            .uploads
            .live_upload_ids(&ids)
            .await
            .context("Failed to resolve live uploads for orphan sweep")?
            .into_iter()
            .collect();

        for (id, key) in deletable {
            if live.contains(&id) {
                summary.skipped += 1;
                continue;
            }
            match self.bounded("orphaned blob delete", self.blobs.delete(&key)).await {
                Ok(()) => {
                    tracing::info!(key = %key, upload_id = %id, "Deleted orphaned blob");
                    summary.repaired += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to delete orphaned blob");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            repaired = summary.repaired,
            skipped = summary.skipped,
            failed = summary.failed,
            "Orphaned-blobs pass completed"
        );

        Ok(summary)
    }

    /// Run the three time-sensitive passes, isolating failures so one
    /// failing pass never blocks the others in the same cycle.
    pub async fn run_cycle(&self) {
        if let Err(e) = self.reconcile_stuck_uploads().await {
            tracing::error!(error = %e, "Stuck-uploads pass failed");
        }
        if let Err(e) = self.reconcile_missing_events().await {
            tracing::error!(error = %e, "Missing-events pass failed");
        }
        if let Err(e) = self.reconcile_orphaned_intents().await {
            tracing::error!(error = %e, "Orphaned-intents pass failed");
        }
    }

    /// Run the blob-orphan sweep, isolating failures.
    pub async fn run_orphan_sweep(&self) {
        if let Err(e) = self.reconcile_orphaned_blobs().await {
            tracing::error!(error = %e, "Orphaned-blobs pass failed");
        }
    }
}

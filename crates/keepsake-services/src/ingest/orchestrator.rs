use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use keepsake_core::{
    derivative_id_for, is_reserved_id, Asset, ErrorMetadata, FailureReason, LogLevel, Owner,
};
use keepsake_db::{MetadataError, MetadataStore};
use keepsake_processing::{
    sanitize_filename, validate_content_type, Derivative, DerivativeError, DerivativeGenerator,
    StageError, Stager,
};
use keepsake_storage::BlobStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::context::{InboundPart, IngestSettings, PendingAsset};
use super::report::BatchReport;

/// Batch-level errors: the input itself is malformed, so no item is attempted.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Owner '{0}' has no usable identity or storage bucket")]
    InvalidOwner(String),

    #[error("Asset {asset_id} does not belong to owner {owner_id}")]
    ForeignAsset { asset_id: String, owner_id: String },
}

/// Terminal state of one asset.
#[derive(Debug)]
enum Outcome {
    Committed { warning: Option<FailureReason> },
    Skipped(FailureReason),
    Failed(FailureReason),
}

/// Result of trying to store a preview before its original.
enum DerivativeCommit {
    Stored(Asset),
    /// Not stored; the asset continues without a preview.
    Omitted(FailureReason),
    /// The asset itself must stop.
    Aborted(FailureReason),
}

enum RollbackStep {
    Blob(String),
    Metadata(String),
}

enum StepError<E> {
    Failed(E),
    TimedOut(Duration),
    Cancelled,
}

impl<E: Display> StepError<E> {
    fn describe(&self, step: &str) -> String {
        match self {
            StepError::Failed(e) => format!("{}: {}", step, e),
            StepError::TimedOut(limit) => format!("{} timed out after {:?}", step, limit),
            StepError::Cancelled => format!("{} cancelled", step),
        }
    }
}

/// Run `fut` under `limit`, racing it against `cancel` when one is given.
async fn bounded<T, E, F>(
    cancel: Option<&CancellationToken>,
    limit: Duration,
    fut: F,
) -> Result<T, StepError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    let timed = tokio::time::timeout(limit, fut);
    let outcome = match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => return Err(StepError::Cancelled),
            outcome = timed => outcome,
        },
        None => timed.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StepError::Failed(e)),
        Err(_) => Err(StepError::TimedOut(limit)),
    }
}

fn log_item(name: &str, asset_id: &str, reason: &FailureReason) {
    match reason.log_level() {
        LogLevel::Debug => {
            tracing::debug!(name = %name, asset.id = %asset_id, code = reason.error_code(), reason = %reason, "Batch item not committed")
        }
        LogLevel::Warn => {
            tracing::warn!(name = %name, asset.id = %asset_id, code = reason.error_code(), reason = %reason, "Batch item problem")
        }
        LogLevel::Error => {
            tracing::error!(name = %name, asset.id = %asset_id, code = reason.error_code(), reason = %reason, "Batch item failed")
        }
    }
}

/// Commits batches of staged assets to the metadata and blob stores.
#[derive(Clone)]
pub struct IngestService {
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    derivatives: Arc<dyn DerivativeGenerator>,
    stager: Stager,
    settings: IngestSettings,
}

impl IngestService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        derivatives: Arc<dyn DerivativeGenerator>,
        stager: Stager,
        settings: IngestSettings,
    ) -> Self {
        Self {
            metadata,
            blobs,
            derivatives,
            stager,
            settings,
        }
    }

    pub fn stager(&self) -> &Stager {
        &self.stager
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    fn check_owner(owner: &Owner) -> Result<(), IngestError> {
        if owner.is_valid() {
            Ok(())
        } else {
            Err(IngestError::InvalidOwner(owner.id.clone()))
        }
    }

    /// A child of `cancel` that is also cancelled once the batch deadline passes.
    fn start_deadline(&self, cancel: &CancellationToken) -> (CancellationToken, JoinHandle<()>) {
        let batch_cancel = cancel.child_token();
        let token = batch_cancel.clone();
        let limit = self.settings.batch_timeout;
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            tracing::warn!(timeout_secs = limit.as_secs_f64(), "Batch deadline reached");
            token.cancel();
        });
        (batch_cancel, deadline)
    }

    /// Stage every acceptable part, then process them as one batch.
    ///
    /// Parts without a file name are ignored. Parts that are neither image nor video, or
    /// that carry a reserved id, are reported without being read. The batch deadline
    /// starts before the first part is staged.
    #[tracing::instrument(skip_all, fields(owner.id = %owner.id, parts = parts.len()))]
    pub async fn ingest(
        &self,
        owner: &Owner,
        parts: Vec<InboundPart>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, IngestError> {
        Self::check_owner(owner)?;

        let (batch_cancel, deadline) = self.start_deadline(cancel);
        let mut report = BatchReport::default();
        let mut batch = Vec::with_capacity(parts.len());

        for part in parts {
            let Some(name) = part
                .file_name
                .as_deref()
                .and_then(|n| sanitize_filename(n).ok())
            else {
                tracing::debug!(content_type = %part.content_type, "Ignoring part without a file name");
                continue;
            };

            if let Err(e) = validate_content_type(&part.content_type) {
                tracing::debug!(name = %name, error = %e, "Rejecting part");
                report.fail(&name, None, FailureReason::Rejected(part.content_type));
                continue;
            }

            if let Some(id) = part.id.as_deref().filter(|id| is_reserved_id(id)) {
                report.fail(&name, Some(id), FailureReason::InvalidId(id.to_string()));
                continue;
            }

            let id = part.id.unwrap_or_else(|| Uuid::new_v4().to_string());
            if batch_cancel.is_cancelled() {
                report.fail(
                    &name,
                    Some(&id),
                    FailureReason::Cancelled("before staging".to_string()),
                );
                continue;
            }

            let staging_id = Uuid::new_v4().to_string();
            match self.stager.stage(&batch_cancel, &staging_id, part.reader).await {
                Ok(staged) => {
                    let asset = Asset::original(
                        id,
                        name,
                        part.content_type,
                        staged.bytes_written() as i64,
                        owner.clone(),
                    );
                    batch.push(PendingAsset::new(asset, staged));
                }
                Err(StageError::Cancelled) => {
                    report.fail(
                        &name,
                        Some(&id),
                        FailureReason::Cancelled("while staging".to_string()),
                    );
                }
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Staging failed");
                    report.fail(&name, Some(&id), FailureReason::Io(e.to_string()));
                }
            }
        }

        let processed = self.run_batch(owner, batch, &batch_cancel).await;
        deadline.abort();
        report.merge(processed);
        Ok(report)
    }

    /// Process staged assets concurrently, one task per asset.
    ///
    /// Never fails because of an individual asset; see [`BatchReport`].
    pub async fn process_batch(
        &self,
        owner: &Owner,
        batch: Vec<PendingAsset>,
        cancel: &CancellationToken,
    ) -> Result<BatchReport, IngestError> {
        Self::check_owner(owner)?;
        if let Some(foreign) = batch
            .iter()
            .find(|p| p.asset.owner.id != owner.id || p.asset.owner.bucket != owner.bucket)
        {
            return Err(IngestError::ForeignAsset {
                asset_id: foreign.asset.id.clone(),
                owner_id: owner.id.clone(),
            });
        }

        let (batch_cancel, deadline) = self.start_deadline(cancel);
        let report = self.run_batch(owner, batch, &batch_cancel).await;
        deadline.abort();
        Ok(report)
    }

    #[tracing::instrument(skip_all, fields(owner.id = %owner.id, batch.size = batch.len()))]
    async fn run_batch(
        &self,
        owner: &Owner,
        batch: Vec<PendingAsset>,
        batch_cancel: &CancellationToken,
    ) -> BatchReport {
        let start = Instant::now();
        let total = batch.len();

        let labels: Vec<(String, String)> = batch
            .iter()
            .map(|p| (p.asset.name.clone(), p.asset.id.clone()))
            .collect();
        let mut slots: Vec<Option<Outcome>> = (0..total).map(|_| None).collect();

        // Every worker sends exactly once, so a channel sized to the batch never fills.
        let (tx, mut rx) = mpsc::channel::<(usize, Outcome)>(total.max(1));
        let mut handles = Vec::with_capacity(total);
        let mut seen = HashSet::with_capacity(total);

        for (index, pending) in batch.into_iter().enumerate() {
            if !seen.insert(pending.asset.id.clone()) {
                tracing::debug!(asset.id = %pending.asset.id, "Id repeated within batch");
                slots[index] = Some(Outcome::Skipped(FailureReason::Duplicate));
                continue;
            }

            let service = self.clone();
            let tx = tx.clone();
            let token = batch_cancel.clone();
            let handle = tokio::spawn(async move {
                let outcome = service.process_asset(pending, token).await;
                if tx.try_send((index, outcome)).is_err() {
                    tracing::warn!(index, "Batch aggregator gone, dropping item result");
                }
            });
            handles.push((index, handle));
        }
        drop(tx);

        while let Some((index, outcome)) = rx.recv().await {
            slots[index] = Some(outcome);
        }

        for (index, handle) in handles {
            if let Err(join_err) = handle.await {
                if slots[index].is_none() {
                    tracing::error!(asset.id = %labels[index].1, error = %join_err, "Asset worker aborted");
                    slots[index] = Some(Outcome::Failed(FailureReason::WorkerAborted(
                        join_err.to_string(),
                    )));
                }
            }
        }

        let mut report = BatchReport::default();
        for ((name, id), slot) in labels.iter().zip(slots) {
            let outcome = slot.unwrap_or_else(|| {
                Outcome::Failed(FailureReason::WorkerAborted("no result reported".to_string()))
            });
            match outcome {
                Outcome::Committed { warning } => {
                    report.committed.push(id.clone());
                    if let Some(reason) = warning {
                        log_item(name, id, &reason);
                        if matches!(reason, FailureReason::CriticalRollbackFailed { .. }) {
                            report.fail(name, Some(id), reason);
                        } else {
                            report.warn(name, Some(id), reason);
                        }
                    }
                }
                Outcome::Skipped(reason) | Outcome::Failed(reason) => {
                    log_item(name, id, &reason);
                    report.fail(name, Some(id), reason);
                }
            }
        }

        tracing::info!(
            committed = report.committed.len(),
            failures = report.failures.len(),
            warnings = report.warnings.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Batch processed"
        );

        report
    }

    #[tracing::instrument(skip_all, fields(asset.id = %pending.asset.id, bucket = %pending.asset.owner.bucket))]
    async fn process_asset(&self, pending: PendingAsset, cancel: CancellationToken) -> Outcome {
        let PendingAsset { mut asset, staged } = pending;
        let owner = asset.owner.clone();

        if cancel.is_cancelled() {
            return Outcome::Failed(FailureReason::Cancelled("before processing".to_string()));
        }
        if !asset.is_derivative() && is_reserved_id(&asset.id) {
            return Outcome::Failed(FailureReason::InvalidId(asset.id.clone()));
        }

        let lookup = bounded(
            Some(&cancel),
            self.settings.metadata_timeout,
            self.metadata.get(&asset.id, &owner),
        )
        .await;
        match lookup {
            Ok(_) => return Outcome::Skipped(FailureReason::Duplicate),
            Err(StepError::Failed(MetadataError::NotFound(_))) => {}
            Err(StepError::Cancelled) => {
                return Outcome::Failed(FailureReason::Cancelled(
                    "during duplicate check".to_string(),
                ))
            }
            Err(e) => {
                return Outcome::Failed(FailureReason::MetadataLookupFailed(
                    e.describe("duplicate check"),
                ))
            }
        }

        let mut warning = None;
        let derivative = match self
            .derivatives
            .generate(&cancel, &asset, staged.path())
            .await
        {
            Ok(Some(preview)) => match self.commit_derivative(&asset, preview, &cancel).await {
                DerivativeCommit::Stored(record) => Some(record),
                DerivativeCommit::Omitted(reason) => {
                    warning = Some(reason);
                    None
                }
                DerivativeCommit::Aborted(reason) => return Outcome::Failed(reason),
            },
            Ok(None) => None,
            Err(DerivativeError::Unsupported(content_type)) => {
                tracing::debug!(content_type = %content_type, "No preview for this format");
                None
            }
            Err(DerivativeError::Failed(message)) => {
                warning = Some(FailureReason::DerivativeFailed(message));
                None
            }
            Err(DerivativeError::Cancelled) => {
                return Outcome::Failed(FailureReason::Cancelled(
                    "while generating preview".to_string(),
                ))
            }
        };

        if cancel.is_cancelled() {
            return Outcome::Failed(FailureReason::Cancelled(
                "before original upload".to_string(),
            ));
        }

        asset.derivative_id = derivative.as_ref().map(|d| d.id.clone());

        let file = match staged.open().await {
            Ok(file) => file,
            Err(e) => {
                return Outcome::Failed(FailureReason::Io(format!(
                    "failed to reopen staged file: {}",
                    e
                )))
            }
        };

        let upload = bounded(
            Some(&cancel),
            self.settings.upload_timeout,
            self.blobs.upload(&asset.id, &owner.bucket, Box::pin(file)),
        )
        .await;
        let receipt = match upload {
            Ok(receipt) => receipt,
            Err(StepError::Cancelled) => {
                let cause = FailureReason::Cancelled("during original upload".to_string());
                let steps = vec![RollbackStep::Blob(asset.id.clone())];
                return Outcome::Failed(self.rollback(&owner, steps, cause).await);
            }
            Err(e) => {
                if let Some(record) = &derivative {
                    tracing::warn!(derivative.id = %record.id, "Preview left without its original");
                }
                return Outcome::Failed(FailureReason::UploadFailed(
                    e.describe("original upload"),
                ));
            }
        };
        asset.size = receipt.size;
        asset.uploaded_at = receipt.created_at;

        let mut steps = Vec::with_capacity(3);
        if let Some(record) = &derivative {
            steps.push(RollbackStep::Blob(record.id.clone()));
            steps.push(RollbackStep::Metadata(record.id.clone()));
        }
        steps.push(RollbackStep::Blob(asset.id.clone()));

        if cancel.is_cancelled() {
            let cause = FailureReason::Cancelled("before metadata save".to_string());
            return Outcome::Failed(self.rollback(&owner, steps, cause).await);
        }

        let save = bounded(
            None,
            self.settings.metadata_timeout,
            self.metadata.create(&asset),
        )
        .await;
        match save {
            Ok(()) => {
                tracing::info!(
                    size_bytes = asset.size,
                    derivative = asset.derivative_id.is_some(),
                    "Asset committed"
                );
                Outcome::Committed { warning }
            }
            Err(StepError::Failed(MetadataError::Conflict(_))) => {
                // Another request committed the same id between the duplicate check and
                // now; its record points at the same blob, so nothing is rolled back.
                Outcome::Skipped(FailureReason::MetadataConflict(asset.id.clone()))
            }
            Err(e) => {
                // A timed-out insert may still land; remove the record before its blobs.
                if matches!(e, StepError::TimedOut(_)) {
                    steps.insert(0, RollbackStep::Metadata(asset.id.clone()));
                }
                let cause = FailureReason::MetadataSaveFailed(e.describe("metadata save"));
                Outcome::Failed(self.rollback(&owner, steps, cause).await)
            }
        }
    }

    /// Upload the preview and save its record. On a failed save the uploaded preview
    /// blob is removed again.
    async fn commit_derivative(
        &self,
        parent: &Asset,
        preview: Derivative,
        cancel: &CancellationToken,
    ) -> DerivativeCommit {
        let owner = &parent.owner;
        let id = derivative_id_for(&parent.id);

        let existing = bounded(
            Some(cancel),
            self.settings.metadata_timeout,
            self.metadata.get(&id, owner),
        )
        .await;
        match existing {
            Ok(record) if !Self::is_preview_of(&record, parent) => {
                return DerivativeCommit::Omitted(Self::preview_id_taken(&id));
            }
            Ok(_) | Err(StepError::Failed(MetadataError::NotFound(_))) => {}
            Err(StepError::Cancelled) => {
                return DerivativeCommit::Aborted(FailureReason::Cancelled(
                    "while checking preview id".to_string(),
                ))
            }
            Err(e) => {
                return DerivativeCommit::Omitted(FailureReason::DerivativeFailed(
                    e.describe("preview lookup"),
                ))
            }
        }

        let upload = bounded(
            Some(cancel),
            self.settings.upload_timeout,
            self.blobs
                .upload(&id, &owner.bucket, Box::pin(preview.reader())),
        )
        .await;
        let receipt = match upload {
            Ok(receipt) => receipt,
            Err(StepError::Cancelled) => {
                let cause = FailureReason::Cancelled("during preview upload".to_string());
                let reason = self
                    .rollback(owner, vec![RollbackStep::Blob(id)], cause)
                    .await;
                return DerivativeCommit::Aborted(reason);
            }
            Err(e) => {
                return DerivativeCommit::Omitted(FailureReason::DerivativeFailed(
                    e.describe("preview upload"),
                ))
            }
        };

        let mut record = Asset::derivative_of(parent, receipt.size);
        record.uploaded_at = receipt.created_at;

        let save = bounded(
            None,
            self.settings.metadata_timeout,
            self.metadata.create(&record),
        )
        .await;
        match save {
            Ok(()) => DerivativeCommit::Stored(record),
            Err(StepError::Failed(MetadataError::Conflict(_))) => {
                let existing = bounded(
                    None,
                    self.settings.metadata_timeout,
                    self.metadata.get(&id, owner),
                )
                .await;
                match existing {
                    // Left by an earlier attempt whose original never committed.
                    Ok(existing) if Self::is_preview_of(&existing, parent) => {
                        tracing::debug!(derivative.id = %id, "Reusing existing preview record");
                        DerivativeCommit::Stored(record)
                    }
                    _ => {
                        tracing::error!(
                            bucket = %owner.bucket,
                            key = %id,
                            "Preview id claimed by another record during upload"
                        );
                        DerivativeCommit::Omitted(Self::preview_id_taken(&id))
                    }
                }
            }
            Err(e) => {
                let mut steps = Vec::with_capacity(2);
                if matches!(e, StepError::TimedOut(_)) {
                    steps.push(RollbackStep::Metadata(id.clone()));
                }
                steps.push(RollbackStep::Blob(id));
                let cause = FailureReason::DerivativeFailed(e.describe("preview metadata save"));
                DerivativeCommit::Omitted(self.rollback(owner, steps, cause).await)
            }
        }
    }

    fn is_preview_of(record: &Asset, parent: &Asset) -> bool {
        record.parent_id.as_deref() == Some(parent.id.as_str())
    }

    fn preview_id_taken(id: &str) -> FailureReason {
        FailureReason::DerivativeFailed(format!("preview id {} is taken by another asset", id))
    }

    /// Undo committed steps in order. Never cancelled; each step has its own timeout.
    ///
    /// Returns `cause` when everything was undone, otherwise a
    /// `CriticalRollbackFailed` naming what is left behind.
    async fn rollback(
        &self,
        owner: &Owner,
        steps: Vec<RollbackStep>,
        cause: FailureReason,
    ) -> FailureReason {
        let limit = self.settings.rollback_timeout;
        let mut orphans = Vec::new();

        for step in steps {
            match step {
                RollbackStep::Blob(key) => {
                    let deleted =
                        bounded(None, limit, self.blobs.delete(&key, &owner.bucket)).await;
                    if let Err(e) = deleted {
                        tracing::error!(
                            bucket = %owner.bucket,
                            key = %key,
                            error = %e.describe("blob delete"),
                            "Rollback step failed"
                        );
                        orphans.push(format!("blob:{}/{}", owner.bucket, key));
                    }
                }
                RollbackStep::Metadata(id) => {
                    let deleted = bounded(None, limit, self.metadata.delete(&id, owner)).await;
                    if let Err(e) = deleted {
                        tracing::error!(
                            owner.id = %owner.id,
                            record = %id,
                            error = %e.describe("metadata delete"),
                            "Rollback step failed"
                        );
                        orphans.push(format!("metadata:{}", id));
                    }
                }
            }
        }

        if orphans.is_empty() {
            tracing::debug!(cause = %cause, "Rolled back");
            return cause;
        }

        let reason = FailureReason::CriticalRollbackFailed {
            cause: cause.to_string(),
            orphans,
        };
        tracing::error!(error = %reason, "Rollback incomplete");
        reason
    }
}

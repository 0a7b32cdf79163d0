mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::*;
use keepsake_core::{derivative_id_for, Asset, FailureReason, Owner};
use keepsake_processing::{StagedFile, Stager};
use keepsake_services::{
    BatchStatus, InboundPart, IngestError, IngestSettings, PendingAsset, Severity,
};
use keepsake_db::MetadataStore;
use tokio_util::sync::CancellationToken;

async fn stage(dir: &std::path::Path, asset: Asset, bytes: Vec<u8>) -> PendingAsset {
    let stager = Stager::new(dir);
    let staged: StagedFile = stager
        .stage(&CancellationToken::new(), &format!("staged-{}", asset.id), std::io::Cursor::new(bytes))
        .await
        .unwrap();
    PendingAsset::new(asset, staged)
}

#[tokio::test]
async fn images_commit_with_square_jpeg_previews() {
    let h = Harness::new();
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![
                part("wide.png", "image/png", png_bytes(400, 120)).with_id("a1"),
                part("photo.jpg", "image/jpeg", jpeg_bytes(90, 300)).with_id("a2"),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status(), BatchStatus::Created);
    assert!(report.entries().is_empty());
    assert_eq!(report.committed, vec!["a1".to_string(), "a2".to_string()]);

    for id in ["a1", "a2"] {
        let asset = h.metadata.get(id, &owner).await.unwrap();
        let thumb_id = derivative_id_for(id);
        assert_eq!(asset.derivative_id.as_deref(), Some(thumb_id.as_str()));

        let thumb = h.metadata.get(&thumb_id, &owner).await.unwrap();
        assert_eq!(thumb.parent_id.as_deref(), Some(id));
        assert_eq!(thumb.content_type, "image/jpeg");
        assert_eq!(thumb.name, format!("thumb-{}", asset.name));

        let bytes = h.blobs.get(&owner.bucket, &thumb_id).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (150, 150));
        assert_eq!(thumb.size, bytes.len() as i64);

        assert!(h.blobs.contains(&owner.bucket, id));
    }

    assert_eq!(h.residual_staged_files(), 0);
}

#[tokio::test]
async fn resubmitting_an_id_is_skipped_as_duplicate() {
    let h = Harness::new();
    let owner = owner();

    let first = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(32, 32)).with_id("same")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(first.is_success());

    let second = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat-again.png", "image/png", png_bytes(16, 16)).with_id("same")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(second.status(), BatchStatus::MultiStatus);
    assert_eq!(second.failure("cat-again.png"), Some(&FailureReason::Duplicate));
    assert!(second.committed.is_empty());

    let stored = h.metadata.get("same", &owner).await.unwrap();
    assert_eq!(stored.name, "cat.png");
    // Asset, its preview, nothing else.
    assert_eq!(h.metadata.inner.len().await, 2);
    assert_eq!(h.residual_staged_files(), 0);
}

#[tokio::test]
async fn repeated_id_within_one_batch_is_skipped_after_the_first() {
    let h = Harness::new();
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![
                part("first.png", "image/png", png_bytes(20, 20)).with_id("dup"),
                part("second.png", "image/png", png_bytes(20, 20)).with_id("dup"),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.committed, vec!["dup".to_string()]);
    assert_eq!(report.failure("second.png"), Some(&FailureReason::Duplicate));
    assert_eq!(h.metadata.get("dup", &owner).await.unwrap().name, "first.png");
}

#[tokio::test]
async fn same_id_under_another_owner_is_not_a_duplicate() {
    let h = Harness::new();

    for owner in [owner(), other_owner()] {
        let report = h
            .ingest
            .ingest(
                &owner,
                vec![part("cat.png", "image/png", png_bytes(20, 20)).with_id("shared")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(report.is_success());
    }
}

#[tokio::test]
async fn failed_original_save_rolls_back_everything() {
    let h = Harness::new();
    let owner = owner();
    h.metadata.fail_create_of("a1");

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(64, 64)).with_id("a1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(
        report.failure("cat.png"),
        Some(FailureReason::MetadataSaveFailed(_))
    ));
    assert!(!h.metadata.exists("thumb-a1", &owner).await);
    assert!(!h.blobs.contains(&owner.bucket, "thumb-a1"));
    assert!(!h.blobs.contains(&owner.bucket, "a1"));
    assert_eq!(h.blobs.len(), 0);
    assert_eq!(h.residual_staged_files(), 0);
}

#[tokio::test]
async fn incomplete_rollback_is_escalated_with_orphans() {
    let h = Harness::new();
    let owner = owner();
    h.metadata.fail_create_of("a1");
    h.blobs.fail_delete_of("thumb-a1");

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(64, 64)).with_id("a1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    match report.failure("cat.png") {
        Some(FailureReason::CriticalRollbackFailed { cause, orphans }) => {
            assert!(cause.contains("metadata save"));
            assert_eq!(orphans, &vec![format!("blob:{}/thumb-a1", owner.bucket)]);
        }
        other => panic!("expected critical rollback failure, got {:?}", other),
    }
    let entry = &report.entries()[0];
    assert_eq!(entry.code, "CRITICAL_ROLLBACK_FAILED");
    assert!(entry.reason.starts_with("CRITICAL"));

    // The remaining steps still ran.
    assert!(!h.metadata.exists("thumb-a1", &owner).await);
    assert!(!h.blobs.contains(&owner.bucket, "a1"));
}

#[tokio::test]
async fn timed_out_original_save_removes_the_late_record() {
    let settings = IngestSettings {
        metadata_timeout: Duration::from_millis(200),
        ..IngestSettings::default()
    };
    let h = Harness::build(Arc::new(preview_generator()), settings);
    let owner = owner();
    h.metadata.stall_create_of("a1");

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(64, 64)).with_id("a1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    match report.failure("cat.png") {
        Some(FailureReason::MetadataSaveFailed(message)) => {
            assert!(message.contains("timed out"))
        }
        other => panic!("expected metadata save failure, got {:?}", other),
    }
    assert!(!h.metadata.exists("a1", &owner).await);
    assert!(!h.metadata.exists("thumb-a1", &owner).await);
    assert_eq!(h.blobs.len(), 0);
}

#[tokio::test]
async fn timed_out_preview_save_removes_the_late_record() {
    let settings = IngestSettings {
        metadata_timeout: Duration::from_millis(200),
        ..IngestSettings::default()
    };
    let h = Harness::build(Arc::new(preview_generator()), settings);
    let owner = owner();
    h.metadata.stall_create_of("thumb-a1");

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(64, 64)).with_id("a1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.committed, vec!["a1".to_string()]);
    assert!(matches!(
        report.warning("cat.png"),
        Some(FailureReason::DerivativeFailed(_))
    ));
    assert!(!h.metadata.exists("thumb-a1", &owner).await);
    assert!(!h.blobs.contains(&owner.bucket, "thumb-a1"));
    let asset = h.metadata.get("a1", &owner).await.unwrap();
    assert!(asset.derivative_id.is_none());
}

#[tokio::test]
async fn reserved_client_ids_are_rejected_before_staging() {
    let h = Harness::new();
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("x.png", "image/png", png_bytes(32, 32)).with_id("thumb-x")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        report.failure("x.png"),
        Some(&FailureReason::InvalidId("thumb-x".to_string()))
    );
    assert_eq!(report.entries()[0].code, "INVALID_ID");
    assert!(report.committed.is_empty());
    assert_eq!(h.blobs.len(), 0);
    assert_eq!(h.residual_staged_files(), 0);
}

#[tokio::test]
async fn pre_staged_assets_with_reserved_ids_are_refused() {
    let h = Harness::new();
    let owner = owner();
    let staging = h.dir.path().join("pre-staged");
    let batch = vec![
        stage(&staging, Asset::original("thumb-y", "y.png", "image/png", 0, owner.clone()), png_bytes(10, 10)).await,
    ];

    let report = h
        .ingest
        .process_batch(&owner, batch, &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        report.failure("y.png"),
        Some(FailureReason::InvalidId(_))
    ));
    assert_eq!(h.blobs.len(), 0);
}

#[tokio::test]
async fn preview_never_overwrites_an_unrelated_record() {
    let h = Harness::new();
    let owner = owner();
    let legacy = png_bytes(300, 300);
    h.metadata
        .create(&Asset::original(
            "thumb-x",
            "legacy.png",
            "image/png",
            legacy.len() as i64,
            owner.clone(),
        ))
        .await
        .unwrap();
    h.blobs.put(&owner.bucket, "thumb-x", legacy.clone());

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("x.png", "image/png", png_bytes(64, 64)).with_id("x")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.committed, vec!["x".to_string()]);
    match report.warning("x.png") {
        Some(FailureReason::DerivativeFailed(message)) => assert!(message.contains("thumb-x")),
        other => panic!("expected preview warning, got {:?}", other),
    }
    assert_eq!(h.blobs.get(&owner.bucket, "thumb-x"), Some(legacy));
    let untouched = h.metadata.get("thumb-x", &owner).await.unwrap();
    assert!(untouched.parent_id.is_none());
    assert_eq!(untouched.content_type, "image/png");
    assert!(h.metadata.get("x", &owner).await.unwrap().derivative_id.is_none());
}

#[tokio::test]
async fn batch_deadline_bounds_a_stalled_upload_stream() {
    let settings = IngestSettings {
        batch_timeout: Duration::from_millis(200),
        ..IngestSettings::default()
    };
    let h = Harness::build(Arc::new(preview_generator()), settings);
    let owner = owner();
    let (stalled, _writer) = tokio::io::duplex(64);

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        h.ingest.ingest(
            &owner,
            vec![
                InboundPart::new("stuck.png", "image/png", Box::pin(stalled)).with_id("st1"),
                part("late.png", "image/png", png_bytes(10, 10)).with_id("st2"),
            ],
            &CancellationToken::new(),
        ),
    )
    .await
    .expect("ingest must finish once the batch deadline passes")
    .unwrap();

    assert!(matches!(
        report.failure("stuck.png"),
        Some(FailureReason::Cancelled(_))
    ));
    assert!(matches!(
        report.failure("late.png"),
        Some(FailureReason::Cancelled(_))
    ));
    assert!(report.committed.is_empty());
    assert_eq!(h.residual_staged_files(), 0);
}

#[tokio::test]
async fn one_failing_asset_does_not_affect_the_rest() {
    let h = Harness::new();
    let owner = owner();
    h.blobs.fail_upload_of("a3");

    let parts = (1..=5)
        .map(|i| part(&format!("img-{i}.png"), "image/png", png_bytes(24, 24)).with_id(format!("a{i}")))
        .collect();

    let report = h
        .ingest
        .ingest(&owner, parts, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failure("img-3.png"),
        Some(FailureReason::UploadFailed(_))
    ));
    assert_eq!(report.committed.len(), 4);
    assert!(!report.committed.contains(&"a3".to_string()));
    // The preview committed before the failed original upload is tolerated.
    assert!(h.metadata.exists("thumb-a3", &owner).await);
    assert!(!h.metadata.exists("a3", &owner).await);
}

#[tokio::test]
async fn non_media_parts_are_rejected_before_staging() {
    let h = Harness::new();
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("report.pdf", "application/pdf", b"%PDF-1.7".to_vec())],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        report.failure("report.pdf"),
        Some(&FailureReason::Rejected("application/pdf".to_string()))
    );
    assert!(!h.staging_dir().exists());
    assert_eq!(h.blobs.len(), 0);
    assert!(h.metadata.inner.is_empty().await);
}

#[tokio::test]
async fn parts_without_a_name_are_ignored() {
    let h = Harness::new();
    let mut nameless = part("ignored.png", "image/png", png_bytes(8, 8));
    nameless.file_name = None;

    let report = h
        .ingest
        .ingest(
            &owner(),
            vec![nameless, part("../../kept.png", "image/png", png_bytes(8, 8))],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.committed.len(), 1);
    let listed = h.media.list(&owner()).await.unwrap();
    assert_eq!(listed[0].name, "kept.png");
}

#[tokio::test]
async fn preview_upload_failure_is_a_warning() {
    let h = Harness::new();
    let owner = owner();
    h.blobs.fail_upload_of("thumb-a1");

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(40, 40)).with_id("a1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status(), BatchStatus::Created);
    assert!(matches!(
        report.warning("cat.png"),
        Some(FailureReason::DerivativeFailed(_))
    ));
    let asset = h.metadata.get("a1", &owner).await.unwrap();
    assert!(asset.derivative_id.is_none());
}

#[tokio::test]
async fn preview_record_failure_removes_the_preview_blob() {
    let h = Harness::new();
    let owner = owner();
    h.metadata.fail_create_of("thumb-a1");

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(40, 40)).with_id("a1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(
        report.warning("cat.png"),
        Some(FailureReason::DerivativeFailed(_))
    ));
    assert!(!h.blobs.contains(&owner.bucket, "thumb-a1"));
    let asset = h.metadata.get("a1", &owner).await.unwrap();
    assert!(asset.derivative_id.is_none());
    assert!(h.blobs.contains(&owner.bucket, "a1"));
}

#[tokio::test]
async fn unsupported_image_format_commits_without_preview_or_warning() {
    let h = Harness::new();
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("logo.svg", "image/svg+xml", b"<svg/>".to_vec()).with_id("svg")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.entries().is_empty());
    assert!(h.metadata.get("svg", &owner).await.unwrap().derivative_id.is_none());
}

#[tokio::test]
async fn cancelled_batch_fails_each_item_and_leaves_no_staged_files() {
    let h = Harness::new();
    let owner = owner();
    let staging = h.dir.path().join("pre-staged");

    let batch = vec![
        stage(&staging, Asset::original("c1", "one.png", "image/png", 0, owner.clone()), png_bytes(10, 10)).await,
        stage(&staging, Asset::original("c2", "two.png", "image/png", 0, owner.clone()), png_bytes(10, 10)).await,
    ];

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = h.ingest.process_batch(&owner, batch, &cancel).await.unwrap();

    assert_eq!(report.failures.len(), 2);
    for entry in report.entries() {
        assert_eq!(entry.code, "CANCELLED");
    }
    assert_eq!(h.blobs.len(), 0);
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

#[tokio::test]
async fn batch_deadline_cancels_slow_items() {
    let settings = IngestSettings {
        batch_timeout: Duration::from_millis(100),
        ..IngestSettings::default()
    };
    let h = Harness::build(Arc::new(SlowGenerator), settings);
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("slow.png", "image/png", png_bytes(10, 10)).with_id("s1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(
        report.failure("slow.png"),
        Some(FailureReason::Cancelled(_))
    ));
    assert!(!h.metadata.exists("s1", &owner).await);
    assert_eq!(h.residual_staged_files(), 0);
}

#[tokio::test]
async fn panicking_worker_becomes_an_item_failure() {
    let generator = PanickingGenerator {
        inner: preview_generator(),
        poison: "boom.png".to_string(),
    };
    let h = Harness::with_generator(Arc::new(generator));
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![
                part("boom.png", "image/png", png_bytes(10, 10)).with_id("p1"),
                part("fine.png", "image/png", png_bytes(10, 10)).with_id("p2"),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(matches!(
        report.failure("boom.png"),
        Some(FailureReason::WorkerAborted(_))
    ));
    assert_eq!(report.committed, vec!["p2".to_string()]);
    assert_eq!(h.residual_staged_files(), 0);
}

#[tokio::test]
async fn invalid_owner_is_a_batch_error() {
    let h = Harness::new();
    let owner = Owner::new("someone", "", "someone@example.com");

    let result = h
        .ingest
        .ingest(
            &owner,
            vec![part("cat.png", "image/png", png_bytes(8, 8))],
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(IngestError::InvalidOwner(_))));
}

#[tokio::test]
async fn assets_of_another_owner_are_refused() {
    let h = Harness::new();
    let staging = h.dir.path().join("pre-staged");
    let batch = vec![
        stage(&staging, Asset::original("x1", "x.png", "image/png", 0, other_owner()), png_bytes(8, 8)).await,
    ];

    let result = h
        .ingest
        .process_batch(&owner(), batch, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(IngestError::ForeignAsset { .. })));
    assert_eq!(std::fs::read_dir(&staging).unwrap().count(), 0);
}

/// Mixed batch: a fresh image, a resubmitted id and a video whose frame extraction
/// outlives its timeout.
#[cfg(unix)]
#[tokio::test]
async fn mixed_batch_reports_duplicate_and_preview_timeout() {
    use keepsake_processing::{DerivativeSettings, PreviewGenerator};

    let scripts = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(scripts.path(), "sleep 5");
    let generator = PreviewGenerator::new(DerivativeSettings {
        ffmpeg_path: ffmpeg.to_string_lossy().to_string(),
        frame_timeout: Duration::from_millis(300),
    })
    .unwrap();
    let h = Harness::with_generator(Arc::new(generator));
    let owner = owner();

    h.metadata
        .create(&Asset::original("b-id", "b-old.png", "image/png", 10, owner.clone()))
        .await
        .unwrap();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![
                part("A.png", "image/png", png_bytes(300, 200)).with_id("a-id"),
                part("B.png", "image/png", png_bytes(50, 50)).with_id("b-id"),
                part("C.mp4", "video/mp4", vec![0u8; 2048]).with_id("c-id"),
            ],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let entries = report.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "B.png");
    assert_eq!(entries[0].severity, Severity::Failure);
    assert_eq!(entries[0].code, "DUPLICATE");
    assert_eq!(entries[1].name, "C.mp4");
    assert_eq!(entries[1].severity, Severity::Warning);
    assert_eq!(entries[1].code, "DERIVATIVE_FAILED");

    let a = h.metadata.get("a-id", &owner).await.unwrap();
    assert_eq!(a.derivative_id.as_deref(), Some("thumb-a-id"));
    let c = h.metadata.get("c-id", &owner).await.unwrap();
    assert!(c.derivative_id.is_none());
    assert_eq!(c.size, 2048);
    assert_eq!(h.metadata.get("b-id", &owner).await.unwrap().name, "b-old.png");
    assert_eq!(h.residual_staged_files(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn video_preview_comes_from_the_extracted_frame() {
    use keepsake_processing::{DerivativeSettings, PreviewGenerator};

    let scripts = tempfile::tempdir().unwrap();
    let frame = scripts.path().join("frame.jpg");
    std::fs::write(&frame, jpeg_bytes(150, 84)).unwrap();
    let ffmpeg = fake_ffmpeg(scripts.path(), &format!("cat '{}'", frame.display()));
    let generator = PreviewGenerator::new(DerivativeSettings {
        ffmpeg_path: ffmpeg.to_string_lossy().to_string(),
        frame_timeout: Duration::from_secs(5),
    })
    .unwrap();
    let h = Harness::with_generator(Arc::new(generator));
    let owner = owner();

    let report = h
        .ingest
        .ingest(
            &owner,
            vec![part("clip.mp4", "video/mp4", vec![1u8; 512]).with_id("v1")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.entries().is_empty());
    let bytes = h.blobs.get(&owner.bucket, "thumb-v1").unwrap();
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (150, 84));
}

/// Generates previews slowly enough to hit any short deadline.
struct SlowGenerator;

#[async_trait::async_trait]
impl keepsake_processing::DerivativeGenerator for SlowGenerator {
    async fn generate(
        &self,
        cancel: &CancellationToken,
        _asset: &Asset,
        _staged_path: &std::path::Path,
    ) -> Result<Option<keepsake_processing::Derivative>, keepsake_processing::DerivativeError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(keepsake_processing::DerivativeError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(None),
        }
    }
}

mod common;

use common::*;
use docker_image_archiver::error::{ArchiverError, TimeoutPhase};
use docker_image_archiver::{FailureKind, LayerEvent, LayerStatus, PullEvent, Status};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn layer(id: &str, status: LayerStatus) -> PullEvent {
    PullEvent::Layer(LayerEvent::new(id, status))
}

fn bytes(id: &str, current: u64, total: u64) -> PullEvent {
    PullEvent::Layer(LayerEvent::new(id, LayerStatus::Downloading).with_bytes(current, total))
}

fn alpine_pull() -> Vec<(Duration, PullEvent)> {
    let step = Duration::from_millis(20);
    vec![
        (step, PullEvent::Message("latest: Pulling from library/alpine".into())),
        (step, layer("a1", LayerStatus::PullingFsLayer)),
        (step, layer("b2", LayerStatus::PullingFsLayer)),
        (step, bytes("a1", 10, 100)),
        (step, bytes("b2", 40, 80)),
        (step, bytes("a1", 60, 100)),
        (step, layer("b2", LayerStatus::PullComplete)),
        (step, bytes("a1", 100, 100)),
        (step, layer("a1", LayerStatus::PullComplete)),
        (step, PullEvent::Message("Digest: sha256:0123abcd".into())),
    ]
}

#[tokio::test]
async fn end_to_end_alpine_latest() {
    println!("🧪 Archiving alpine:latest through every phase...");
    let dir = tempfile::tempdir().unwrap();
    let (service, runtime) = service(test_config(dir.path()), ScriptedRuntime::remote(alpine_pull()));

    let handle = service.start_acquisition("alpine:latest").unwrap();
    let seen = observe(&service, &handle).await;
    let path = handle.wait().await.unwrap();

    assert_eq!(
        statuses(&seen),
        vec![
            Status::Starting,
            Status::Downloading,
            Status::Saving,
            Status::Compressing,
            Status::Complete
        ]
    );
    for window in seen.windows(2) {
        assert!(window[0].1 <= window[1].1, "progress went backwards: {:?}", seen);
    }
    for (status, progress) in &seen {
        match status {
            Status::Starting => assert_eq!(*progress, 0),
            Status::Downloading => assert!((5..=65).contains(progress), "{:?}", seen),
            Status::Saving => assert_eq!(*progress, 70),
            Status::Compressing => assert!((80..=95).contains(progress), "{:?}", seen),
            Status::Complete => assert_eq!(*progress, 100),
            other => panic!("unexpected status {:?}", other),
        }
    }

    assert_eq!(path, dir.path().join("downloads").join("alpine_latest.tar.gz"));
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
    assert_eq!(archive_entries(&path), vec!["manifest.json", "config.json", "layer.tar"]);
    assert_eq!(runtime.pulls.load(Ordering::SeqCst), 1);

    let record = service.get_progress("alpine:latest");
    assert_eq!(record.archive.as_deref(), Some(path.as_path()));
    assert_eq!(record.layers.len(), 2);
    assert!(record.layers.values().all(|l| l.percent == 100));
    let messages: Vec<&str> = record.log.iter().map(|e| e.message.as_str()).collect();
    assert!(messages.contains(&"Digest: sha256:0123abcd"));
    assert!(messages.iter().any(|m| m.starts_with("Image digest: sha256:")));

    // scratch tar and the .tmp sibling are gone
    assert!(files_in(&dir.path().join("scratch")).is_empty());
    assert_eq!(files_in(&dir.path().join("downloads")), vec![path]);
    println!("✅ alpine:latest archived");
}

#[tokio::test]
async fn duplicate_request_is_rejected_until_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service(test_config(dir.path()), ScriptedRuntime::remote(alpine_pull()));

    let first = service.start_acquisition("alpine:latest").unwrap();
    let err = service.start_acquisition("alpine:latest").unwrap_err();
    assert!(matches!(err, ArchiverError::AlreadyRunning(ref image) if image == "alpine:latest"));

    // an unrelated identifier is not affected
    let other = service.start_acquisition("busybox:latest").unwrap();

    let first_id = first.task_id;
    first.wait().await.unwrap();
    other.wait().await.unwrap();

    let again = service.start_acquisition("alpine:latest").unwrap();
    assert_ne!(again.task_id, first_id);
    let record = service.get_progress("alpine:latest");
    assert_eq!(record.task_id, Some(again.task_id));
    again.wait().await.unwrap();
}

#[tokio::test]
async fn local_image_skips_download_events() {
    let dir = tempfile::tempdir().unwrap();
    let (service, runtime) = service(test_config(dir.path()), ScriptedRuntime::local());

    let handle = service.start_acquisition("alpine:latest").unwrap();
    let mut seen = Vec::new();
    loop {
        let record = service.get_progress("alpine:latest");
        assert!(record.layers.is_empty(), "layers appeared for a local image");
        let current = (record.status, record.progress);
        if seen.last() != Some(&current) {
            seen.push(current);
        }
        if record.status == Status::Saving || record.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    handle.wait().await.unwrap();

    assert_eq!(
        seen,
        vec![
            (Status::Starting, 0),
            (Status::Downloading, 30),
            (Status::Downloading, 60),
            (Status::Saving, 70)
        ]
    );
    assert_eq!(runtime.pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn partial_layers_aggregate_to_45() {
    let dir = tempfile::tempdir().unwrap();
    let script = vec![
        (Duration::ZERO, bytes("A", 50, 100)),
        (Duration::ZERO, layer("B", LayerStatus::PullComplete)),
        (Duration::from_millis(400), bytes("A", 100, 100)),
        (Duration::ZERO, layer("A", LayerStatus::PullComplete)),
    ];
    let (service, _) = service(test_config(dir.path()), ScriptedRuntime::remote(script));

    let handle = service.start_acquisition("alpine:latest").unwrap();
    let record = loop {
        let record = service.get_progress("alpine:latest");
        if record.layers.get("B").is_some_and(|l| l.percent == 100) {
            break record;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(record.status, Status::Downloading);
    assert_eq!(record.layers["A"].percent, 50);
    assert_eq!(record.progress, 45);
    assert_eq!(record.detail, "Downloading layers (1/2 complete)");

    handle.wait().await.unwrap();
}

#[tokio::test]
async fn hung_compressor_times_out_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.compression.program = "sh".into();
    config.compression.args = Some(vec!["-c".into(), "cat > /dev/null; exec sleep 30".into()]);
    config.compression.exit_grace = Duration::from_secs(1);
    let (service, _) = service(config, ScriptedRuntime::local());

    let handle = service.start_acquisition("alpine:latest").unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ArchiverError::Timeout { phase: TimeoutPhase::CompressorExit, .. }));

    let record = service.get_progress("alpine:latest");
    assert_eq!(record.status, Status::Error);
    assert_eq!(record.failure, Some(FailureKind::Timeout));
    assert!(record.detail.contains("timeout"), "{}", record.detail);

    let downloads = dir.path().join("downloads");
    assert!(!downloads.join("alpine_latest.tar.gz").exists());
    assert!(files_in(&downloads)
        .iter()
        .all(|p| p.extension().is_none_or(|ext| ext != "tmp")));
    assert!(files_in(&dir.path().join("scratch")).is_empty());
}

#[tokio::test]
async fn failing_compressor_keeps_its_stderr_in_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.compression.program = "sh".into();
    config.compression.args = Some(vec!["-c".into(), "echo 'cannot allocate' >&2; exit 3".into()]);
    let (service, _) = service(config, ScriptedRuntime::local());

    let handle = service.start_acquisition("alpine:latest").unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ArchiverError::ProcessFailure { .. }), "{:?}", err);
    assert_eq!(err.diagnostics().map(str::trim), Some("cannot allocate"));

    let record = service.get_progress("alpine:latest");
    assert_eq!(record.status, Status::Error);
    assert_eq!(record.failure, Some(FailureKind::ProcessFailure));
    assert!(
        record.log.iter().any(|e| e.message == "compressor: cannot allocate"),
        "{:?}",
        record.log
    );

    let downloads = dir.path().join("downloads");
    assert!(!downloads.join("alpine_latest.tar.gz").exists());
    assert!(files_in(&downloads).is_empty());
    assert!(files_in(&dir.path().join("scratch")).is_empty());
}

#[tokio::test]
async fn slow_save_times_out_without_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.save_timeout = Duration::from_millis(100);
    let mut runtime = ScriptedRuntime::local();
    runtime.export_delay = Duration::from_millis(30);
    let (service, _) = service(config, runtime);

    let handle = service.start_acquisition("alpine:latest").unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, ArchiverError::Timeout { phase: TimeoutPhase::Save, .. }), "{:?}", err);

    let record = service.get_progress("alpine:latest");
    assert_eq!(record.status, Status::Error);
    assert_eq!(record.failure, Some(FailureKind::Timeout));
    assert!(record.detail.starts_with("save timeout"), "{}", record.detail);

    assert!(files_in(&dir.path().join("scratch")).is_empty());
    assert!(!dir.path().join("downloads").join("alpine_latest.tar.gz").exists());
}

#[tokio::test]
async fn missing_compressor_falls_back_to_gzip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.compression.program = "definitely-not-a-real-compressor".into();
    config.compression.args = None;
    let (service, _) = service(config, ScriptedRuntime::local());

    let handle = service.start_acquisition("alpine:latest").unwrap();
    let path = handle.wait().await.unwrap();

    let record = service.get_progress("alpine:latest");
    assert_eq!(record.status, Status::Complete);
    assert_eq!(record.progress, 100);
    assert!(record.log.iter().any(|e| e.message.contains("serial gzip")));
    assert_eq!(archive_entries(&path).len(), 3);
}

#[tokio::test]
async fn runtime_error_is_kept_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let mut runtime = ScriptedRuntime::remote(vec![(Duration::ZERO, layer("a1", LayerStatus::Waiting))]);
    runtime.pull_error = Some("manifest for nope:latest not found: manifest unknown".into());
    let (service, _) = service(test_config(dir.path()), runtime);

    let handle = service.start_acquisition("nope:latest").unwrap();
    assert!(matches!(handle.wait().await, Err(ArchiverError::Runtime(_))));

    let record = service.get_progress("nope:latest");
    assert_eq!(record.status, Status::Error);
    assert_eq!(record.failure, Some(FailureKind::Runtime));
    assert!(record
        .log
        .iter()
        .any(|e| e.message.contains("manifest for nope:latest not found: manifest unknown")));
    assert!(!dir.path().join("downloads").join("nope_latest.tar.gz").exists());

    // a failed task frees its slot
    let retry = service.start_acquisition("nope:latest").unwrap();
    let _ = retry.wait().await;
}

#[tokio::test]
async fn existing_archive_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.downloads_dir).unwrap();
    std::fs::write(config.downloads_dir.join("alpine_latest.tar.gz"), b"cached").unwrap();
    let (service, runtime) = service(config, ScriptedRuntime::remote(alpine_pull()));

    let path = service.start_acquisition("alpine:latest").unwrap().wait().await.unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"cached");
    assert_eq!(runtime.pulls.load(Ordering::SeqCst), 0);
    assert_eq!(runtime.exports.load(Ordering::SeqCst), 0);
    assert_eq!(service.get_progress("alpine:latest").status, Status::Complete);
}

#[tokio::test]
async fn unknown_image_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _) = service(test_config(dir.path()), ScriptedRuntime::local());

    let record = service.get_progress("never:requested");
    assert_eq!(record.status, Status::NotFound);
    assert!(record.task_id.is_none());
    assert!(matches!(service.start_acquisition("   "), Err(ArchiverError::Config(_))));
}

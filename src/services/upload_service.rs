use crate::config::DefenseConfig;
use crate::error::{Rejection, RejectionKind, UploadError};
use crate::models::{Actor, StoredFileRecord, WorkspaceId};
use crate::services::archive_inspector::{
    ArchiveInspector, ArchiveLimits, ArchiveReport, ValidationContext, is_archive_extension,
};
use crate::services::blocklist::BlockSetProvider;
use crate::services::content_signature::{ContentSignatureGate, SignatureDetector, read_prefix};
use crate::services::extension_gate;
use crate::services::permissions;
use crate::services::records::FileRecordSink;
use crate::services::storage::{LocalStorage, StorageBackend, storage_key};
use crate::utils::hash::digest_hex;
use crate::utils::validation::normalize_extension;
use chrono::Utc;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::Xxh3;

const COPY_BUFFER_LEN: usize = 64 * 1024;

/// Outcome of the pre-storage stages for an accepted upload
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub extension: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub content_hash: String,
    pub archive: Option<ArchiveReport>,
}

/// Upload content spooled to disk; removed when dropped
struct StagedUpload {
    file: NamedTempFile,
    size: u64,
    hash: String,
}

/// Runs every defense stage for one upload, then stores, hardens and records it
pub struct UploadService {
    config: DefenseConfig,
    blocklist: Arc<dyn BlockSetProvider>,
    records: Arc<dyn FileRecordSink>,
    storage: Arc<dyn StorageBackend>,
    gate: Arc<ContentSignatureGate>,
    inspector: Arc<ArchiveInspector>,
}

impl UploadService {
    pub fn new(
        config: DefenseConfig,
        blocklist: Arc<dyn BlockSetProvider>,
        records: Arc<dyn FileRecordSink>,
    ) -> Self {
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(config.upload_dir.clone()));
        let gate = Arc::new(ContentSignatureGate::default());
        let inspector = Arc::new(ArchiveInspector::new(gate.clone()));
        Self {
            config,
            blocklist,
            records,
            storage,
            gate,
            inspector,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn SignatureDetector>) -> Self {
        self.gate = Arc::new(ContentSignatureGate::new(detector));
        self.inspector = Arc::new(ArchiveInspector::new(self.gate.clone()));
        self
    }

    pub fn config(&self) -> &DefenseConfig {
        &self.config
    }

    /// Fresh blocklist lookup; an empty extension counts as blocked
    pub async fn is_extension_blocked(
        &self,
        workspace_id: WorkspaceId,
        extension: &str,
    ) -> Result<bool, UploadError> {
        let normalized = normalize_extension(extension);
        if normalized.is_empty() {
            return Ok(true);
        }
        let blocked = self.blocklist.blocked_extensions(workspace_id).await?;
        Ok(blocked.contains(&normalized))
    }

    pub async fn upload_file<R>(
        &self,
        workspace_id: WorkspaceId,
        filename: &str,
        declared_size: u64,
        content: R,
        actor: Actor,
    ) -> Result<StoredFileRecord, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.upload_file_cancellable(
            workspace_id,
            filename,
            declared_size,
            content,
            actor,
            CancellationToken::new(),
        )
        .await
    }

    pub async fn upload_file_cancellable<R>(
        &self,
        workspace_id: WorkspaceId,
        filename: &str,
        declared_size: u64,
        content: R,
        actor: Actor,
        cancel: CancellationToken,
    ) -> Result<StoredFileRecord, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        info!(
            "Upload of '{}' ({} bytes declared) into workspace {} by member {}",
            filename, declared_size, workspace_id, actor.member_id
        );

        let result = async {
            let (verdict, staged) = self
                .validate(workspace_id, filename, declared_size, content, cancel)
                .await?;
            self.store(workspace_id, filename, verdict, staged, actor).await
        }
        .await;

        match &result {
            Ok(record) => info!(
                "Stored '{}' as {} ({} bytes, {})",
                record.original_name,
                record.storage_path.display(),
                record.byte_size,
                record.mime_type
            ),
            Err(e) => log_failure(workspace_id, filename, e),
        }
        result
    }

    /// Run the pre-storage stages only; nothing is written outside staging
    pub async fn check_upload<R>(
        &self,
        workspace_id: WorkspaceId,
        filename: &str,
        declared_size: u64,
        content: R,
        cancel: CancellationToken,
    ) -> Result<Verdict, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self
            .validate(workspace_id, filename, declared_size, content, cancel)
            .await
            .map(|(verdict, _staged)| verdict);
        if let Err(e) = &result {
            log_failure(workspace_id, filename, e);
        }
        result
    }

    async fn validate<R>(
        &self,
        workspace_id: WorkspaceId,
        filename: &str,
        declared_size: u64,
        content: R,
        cancel: CancellationToken,
    ) -> Result<(Verdict, StagedUpload), UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        // 1. Blocklist, fetched fresh for every upload
        let blocked = self.blocklist.blocked_extensions(workspace_id).await?;

        // 2. Extension gate
        let extension =
            extension_gate::check(filename, declared_size, &blocked, self.config.max_file_size)?;

        // 3. Spool to staging; the declared size is not trusted
        let staged = self.stage(content).await?;

        // 4. Signature and archive stages on a blocking thread
        let path = staged.file.path().to_path_buf();
        let gate = self.gate.clone();
        let inspector = self.inspector.clone();
        let limits = ArchiveLimits::from(&self.config);
        let deadline = self.config.scan_timeout.map(|timeout| Instant::now() + timeout);
        let name = filename.trim().to_string();
        let ext = extension.clone();

        // Dropping this future (a caller timeout) detaches the blocking task;
        // the guard cancels its token so the walk stops at the next entry.
        let scan_cancel = cancel.child_token();
        let _abort_scan_on_drop = scan_cancel.clone().drop_guard();

        let (mime_type, archive) = tokio::task::spawn_blocking(
            move || -> Result<(String, Option<ArchiveReport>), UploadError> {
                let prefix = read_prefix(std::fs::File::open(&path)?)?;
                let detected = gate.check(&prefix, &ext, &name, &blocked)?;

                let archive = if is_archive_extension(&ext) {
                    let mut ctx = ValidationContext::new(workspace_id, blocked, limits)
                        .with_cancellation(scan_cancel)
                        .with_deadline(deadline);
                    Some(inspector.inspect_path(&path, &name, &mut ctx)?)
                } else {
                    None
                };
                Ok((detected.mime, archive))
            },
        )
        .await
        .map_err(|e| UploadError::Io(io::Error::other(e)))??;

        let verdict = Verdict {
            extension,
            mime_type,
            byte_size: staged.size,
            content_hash: staged.hash.clone(),
            archive,
        };
        Ok((verdict, staged))
    }

    async fn stage<R>(&self, mut content: R) -> Result<StagedUpload, UploadError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let file = match &self.config.staging_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                NamedTempFile::new_in(dir)?
            }
            None => NamedTempFile::new()?,
        };
        let mut writer = tokio::fs::File::from_std(file.reopen()?);

        let mut hasher = Xxh3::new();
        let mut size: u64 = 0;
        let mut buffer = vec![0u8; COPY_BUFFER_LEN];

        loop {
            let n = content.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            size += n as u64;
            if size > self.config.max_file_size {
                return Err(Rejection::new(
                    RejectionKind::SizeExceeded,
                    format!(
                        "Upload exceeds maximum allowed {} bytes ({} MB)",
                        self.config.max_file_size,
                        self.config.max_file_size / 1024 / 1024
                    ),
                )
                .into());
            }
            hasher.update(&buffer[..n]);
            writer.write_all(&buffer[..n]).await?;
        }
        writer.flush().await?;

        if size == 0 {
            return Err(Rejection::new(RejectionKind::EmptyFile, "Upload has no content").into());
        }

        Ok(StagedUpload {
            file,
            size,
            hash: digest_hex(&hasher),
        })
    }

    async fn store(
        &self,
        workspace_id: WorkspaceId,
        filename: &str,
        verdict: Verdict,
        staged: StagedUpload,
        actor: Actor,
    ) -> Result<StoredFileRecord, UploadError> {
        let stored_name = format!("{}.{}", Uuid::new_v4(), verdict.extension);
        let key = storage_key(workspace_id, &stored_name);

        let storage_path = self.storage.store_from(&key, staged.file.path()).await?;
        drop(staged);

        let record = StoredFileRecord {
            id: None,
            workspace_id,
            original_name: filename.trim().to_string(),
            stored_name,
            extension: verdict.extension,
            byte_size: verdict.byte_size,
            mime_type: verdict.mime_type,
            storage_path: storage_path.clone(),
            content_hash: verdict.content_hash,
            uploaded_by: actor.member_id,
            created_at: Utc::now(),
        };

        match self.harden_and_persist(&storage_path, record).await {
            Ok(record) => Ok(record),
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&key).await {
                    error!(
                        "Failed to remove {} after failed upload: {:#}",
                        storage_path.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    async fn harden_and_persist(
        &self,
        storage_path: &Path,
        record: StoredFileRecord,
    ) -> Result<StoredFileRecord, UploadError> {
        permissions::harden(storage_path).await?;
        Ok(self.records.persist(record).await?)
    }
}

fn log_failure(workspace_id: WorkspaceId, filename: &str, err: &UploadError) {
    match err {
        UploadError::Rejected(rejection) => warn!(
            "Rejected '{}' in workspace {}: {}",
            filename, workspace_id, rejection
        ),
        UploadError::Cancelled(reason) => {
            warn!("Validation of '{}' cancelled: {}", filename, reason)
        }
        other => error!(
            "Upload of '{}' into workspace {} failed: {:#}",
            filename, workspace_id, other
        ),
    }
}

//! Third defense stage: stream every entry of an archive, recursing into
//! nested archives, while enforcing count, size, ratio and depth budgets.

use crate::config::DefenseConfig;
use crate::error::{Rejection, RejectionKind, UploadError};
use crate::models::{ArchiveEntryDescriptor, BlockSet, WorkspaceId};
use crate::services::content_signature::ContentSignatureGate;
use crate::utils::validation::{extract_extension, file_name_of};
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Top-level extensions that trigger archive inspection
pub const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "7z"];

const COPY_BUFFER_LEN: usize = 64 * 1024;
const FORMAT_SNIFF_LEN: usize = 512;
const TAR_MAGIC_OFFSET: usize = 257;
const SEVEN_ZIP_WALK_STOPPED: &str = "entry rejected";

pub fn is_archive_extension(extension: &str) -> bool {
    ARCHIVE_EXTENSIONS.contains(&extension)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    Tar,
    Gzip,
    SevenZip,
    Unknown,
}

impl ArchiveFormat {
    /// Container format from leading content bytes
    pub fn detect(prefix: &[u8]) -> Self {
        if prefix.starts_with(b"PK\x03\x04")
            || prefix.starts_with(b"PK\x05\x06")
            || prefix.starts_with(b"PK\x07\x08")
        {
            ArchiveFormat::Zip
        } else if prefix.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
            ArchiveFormat::SevenZip
        } else if prefix.starts_with(&[0x1F, 0x8B]) {
            ArchiveFormat::Gzip
        } else if has_tar_magic(prefix) {
            ArchiveFormat::Tar
        } else {
            ArchiveFormat::Unknown
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        match mime {
            "application/zip" | "application/x-zip-compressed" | "application/x-zip" => {
                ArchiveFormat::Zip
            }
            "application/x-tar" | "application/x-gtar" => ArchiveFormat::Tar,
            "application/gzip" | "application/x-gzip" | "application/x-tgz" => ArchiveFormat::Gzip,
            "application/x-7z-compressed" => ArchiveFormat::SevenZip,
            _ => ArchiveFormat::Unknown,
        }
    }
}

fn has_tar_magic(prefix: &[u8]) -> bool {
    prefix
        .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5)
        .is_some_and(|magic| magic == b"ustar")
}

#[derive(Debug, Clone)]
pub struct ArchiveLimits {
    pub max_nesting_depth: u8,
    pub max_file_count: u32,
    pub max_uncompressed_size: u64,
    pub max_compression_ratio: u64,
    pub entry_sample_size: usize,
}

impl From<&DefenseConfig> for ArchiveLimits {
    fn from(config: &DefenseConfig) -> Self {
        Self {
            max_nesting_depth: config.max_archive_nesting_depth,
            max_file_count: config.max_archive_file_count,
            max_uncompressed_size: config.max_archive_uncompressed_size,
            max_compression_ratio: config.max_archive_compression_ratio,
            entry_sample_size: config.archive_entry_sample_size,
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self::from(&DefenseConfig::default())
    }
}

/// Per-upload budget state threaded through the archive recursion
pub struct ValidationContext {
    pub workspace_id: WorkspaceId,
    pub blocked: BlockSet,
    pub limits: ArchiveLimits,
    /// Nesting level currently being scanned; the uploaded archive is 0
    pub depth: u8,
    pub deepest: u8,
    /// Files seen across all levels
    pub file_count: u32,
    /// Decompressed bytes charged across all levels
    pub uncompressed_total: u64,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl ValidationContext {
    pub fn new(workspace_id: WorkspaceId, blocked: BlockSet, limits: ArchiveLimits) -> Self {
        Self {
            workspace_id,
            blocked,
            limits,
            depth: 0,
            deepest: 0,
            file_count: 0,
            uncompressed_total: 0,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Checked between entries
    pub fn checkpoint(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled(
                "validation was cancelled by the caller".to_string(),
            ));
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(UploadError::Cancelled(
                "validation exceeded its deadline".to_string(),
            ));
        }
        Ok(())
    }

    fn charge(&mut self, bytes: u64, level: &mut LevelStats, name: &str) -> Result<(), UploadError> {
        self.uncompressed_total = self.uncompressed_total.saturating_add(bytes);
        level.uncompressed = level.uncompressed.saturating_add(bytes);

        if self.uncompressed_total > self.limits.max_uncompressed_size {
            return Err(Rejection::new(
                RejectionKind::ArchiveTooLarge,
                format!(
                    "Archive expands beyond {} bytes ({} MB)",
                    self.limits.max_uncompressed_size,
                    self.limits.max_uncompressed_size / 1024 / 1024
                ),
            )
            .with_offending(name)
            .into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LevelStats {
    entries: u32,
    uncompressed: u64,
}

/// Bytes of one entry consumed so far versus what has been charged for it
struct EntryBudget {
    charged: u64,
    consumed: u64,
}

impl EntryBudget {
    fn consume(
        &mut self,
        bytes: usize,
        ctx: &mut ValidationContext,
        level: &mut LevelStats,
        name: &str,
    ) -> Result<(), UploadError> {
        self.consumed = self.consumed.saturating_add(bytes as u64);
        if self.consumed > self.charged {
            let extra = self.consumed - self.charged;
            self.charged = self.consumed;
            ctx.charge(extra, level, name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub format: ArchiveFormat,
    pub file_count: u32,
    pub uncompressed_total: u64,
    pub deepest_level: u8,
}

/// `uncompressed / compressed > max_ratio`, evaluated exactly
pub fn check_compression_ratio(
    uncompressed: u64,
    compressed: u64,
    max_ratio: u64,
) -> Result<(), Rejection> {
    if uncompressed == 0 || compressed == 0 {
        return Ok(());
    }

    if uncompressed as u128 > compressed as u128 * max_ratio as u128 {
        return Err(Rejection::new(
            RejectionKind::ZipBombSuspected,
            format!(
                "Compression ratio {}x exceeds maximum {}x ({} bytes from {} bytes)",
                uncompressed / compressed,
                max_ratio,
                uncompressed,
                compressed
            ),
        ));
    }
    Ok(())
}

fn malformed(name: &str, reason: impl std::fmt::Display) -> UploadError {
    Rejection::new(
        RejectionKind::ArchiveMalformed,
        format!("Archive '{}' could not be read: {}", name, reason),
    )
    .with_offending(name)
    .into()
}

fn encrypted(name: &str) -> UploadError {
    Rejection::new(
        RejectionKind::ArchiveEncrypted,
        format!("Archive '{}' is password protected", name),
    )
    .with_offending(name)
    .into()
}

fn mentions_encryption(message: &str) -> bool {
    let lowered = message.to_lowercase();
    lowered.contains("password") || lowered.contains("encrypt")
}

fn zip_failure(name: &str, err: zip::result::ZipError) -> UploadError {
    match err {
        zip::result::ZipError::UnsupportedArchive(msg) if mentions_encryption(msg) => {
            encrypted(name)
        }
        other => malformed(name, other),
    }
}

fn sevenz_failure(name: &str, err: sevenz_rust::Error) -> UploadError {
    let reason = format!("{:?}", err);
    if mentions_encryption(&reason) {
        encrypted(name)
    } else {
        malformed(name, reason)
    }
}

/// Read errors while decoding an entry are container faults, not I/O failures
fn read_failure(name: &str, err: io::Error) -> UploadError {
    if mentions_encryption(&err.to_string()) {
        encrypted(name)
    } else {
        malformed(name, err)
    }
}

fn read_chunk<R: Read>(reader: &mut R, buf: &mut [u8], name: &str) -> Result<usize, UploadError> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_failure(name, e)),
        }
    }
}

fn strip_suffix_ignore_case<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let split = name.len().checked_sub(suffix.len())?;
    let tail = name.get(split..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &name[..split])
}

/// Name of the single member of a plain gzip stream
fn gunzipped_name(archive_name: &str) -> String {
    let base = file_name_of(archive_name);
    if let Some(stem) = strip_suffix_ignore_case(base, ".tgz") {
        format!("{}.tar", stem)
    } else if let Some(stem) = strip_suffix_ignore_case(base, ".gz") {
        stem.to_string()
    } else {
        base.to_string()
    }
}

fn is_tar_metadata(kind: tar::EntryType) -> bool {
    kind.is_dir()
        || kind.is_pax_global_extensions()
        || kind.is_pax_local_extensions()
        || kind.is_gnu_longname()
        || kind.is_gnu_longlink()
}

pub struct ArchiveInspector {
    gate: Arc<ContentSignatureGate>,
}

impl ArchiveInspector {
    pub fn new(gate: Arc<ContentSignatureGate>) -> Self {
        Self { gate }
    }

    pub fn inspect_path(
        &self,
        path: &Path,
        archive_name: &str,
        ctx: &mut ValidationContext,
    ) -> Result<ArchiveReport, UploadError> {
        self.inspect(File::open(path)?, archive_name, ctx)
    }

    /// Inspect a whole archive. Any rejection aborts the walk immediately.
    pub fn inspect<R: Read + Seek>(
        &self,
        mut reader: R,
        archive_name: &str,
        ctx: &mut ValidationContext,
    ) -> Result<ArchiveReport, UploadError> {
        let compressed_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let format = self.inspect_level(reader, compressed_len, archive_name, ctx)?;

        info!(
            "Archive '{}' passed inspection: {} files, {} bytes expanded, depth {}",
            archive_name, ctx.file_count, ctx.uncompressed_total, ctx.deepest
        );

        Ok(ArchiveReport {
            format,
            file_count: ctx.file_count,
            uncompressed_total: ctx.uncompressed_total,
            deepest_level: ctx.deepest,
        })
    }

    fn inspect_level<R: Read + Seek>(
        &self,
        mut reader: R,
        compressed_len: u64,
        name: &str,
        ctx: &mut ValidationContext,
    ) -> Result<ArchiveFormat, UploadError> {
        ctx.checkpoint()?;

        let mut sniffed = Vec::with_capacity(FORMAT_SNIFF_LEN);
        (&mut reader)
            .take(FORMAT_SNIFF_LEN as u64)
            .read_to_end(&mut sniffed)?;
        reader.seek(SeekFrom::Start(0))?;

        let format = ArchiveFormat::detect(&sniffed);
        debug!(
            "Scanning {:?} archive '{}' at depth {} ({} bytes)",
            format, name, ctx.depth, compressed_len
        );

        let mut level = LevelStats::default();
        match format {
            ArchiveFormat::Zip => self.scan_zip(reader, name, ctx, &mut level)?,
            ArchiveFormat::Tar => self.scan_tar(reader, name, ctx, &mut level)?,
            ArchiveFormat::Gzip => self.scan_gzip(reader, name, ctx, &mut level)?,
            ArchiveFormat::SevenZip => {
                self.scan_seven_zip(reader, compressed_len, name, ctx, &mut level)?
            }
            ArchiveFormat::Unknown => {
                return Err(malformed(name, "not a zip, tar, gzip or 7z container"));
            }
        }

        debug!(
            "Level {} of '{}': {} entries, {} bytes from {} bytes",
            ctx.depth, name, level.entries, level.uncompressed, compressed_len
        );

        check_compression_ratio(
            level.uncompressed,
            compressed_len,
            ctx.limits.max_compression_ratio,
        )
        .map_err(|rejection| rejection.with_offending(name))?;

        Ok(format)
    }

    fn scan_zip<R: Read + Seek>(
        &self,
        reader: R,
        name: &str,
        ctx: &mut ValidationContext,
        level: &mut LevelStats,
    ) -> Result<(), UploadError> {
        let mut archive = zip::ZipArchive::new(reader).map_err(|e| zip_failure(name, e))?;

        for i in 0..archive.len() {
            ctx.checkpoint()?;
            let entry = archive.by_index(i).map_err(|e| zip_failure(name, e))?;
            if entry.is_dir() {
                continue;
            }

            let entry_name = entry.name().to_string();
            let size = entry.size();
            let compressed = entry.compressed_size();
            self.process_entry(entry, entry_name, size, Some(compressed), ctx, level)?;
        }
        Ok(())
    }

    fn scan_tar<R: Read>(
        &self,
        reader: R,
        name: &str,
        ctx: &mut ValidationContext,
        level: &mut LevelStats,
    ) -> Result<(), UploadError> {
        let mut archive = tar::Archive::new(reader);
        let entries = archive.entries().map_err(|e| read_failure(name, e))?;

        for entry in entries {
            ctx.checkpoint()?;
            let entry = entry.map_err(|e| read_failure(name, e))?;
            if is_tar_metadata(entry.header().entry_type()) {
                continue;
            }

            let entry_name = entry
                .path()
                .map(|p| p.to_string_lossy().into_owned())
                .map_err(|e| read_failure(name, e))?;
            let size = entry.size();
            self.process_entry(entry, entry_name, size, None, ctx, level)?;
        }
        Ok(())
    }

    /// A gzip stream holding a tar is walked as tar; anything else is one entry
    fn scan_gzip<R: Read>(
        &self,
        reader: R,
        name: &str,
        ctx: &mut ValidationContext,
        level: &mut LevelStats,
    ) -> Result<(), UploadError> {
        let mut decoder = MultiGzDecoder::new(reader);
        let mut head = Vec::with_capacity(FORMAT_SNIFF_LEN);
        (&mut decoder)
            .take(FORMAT_SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| read_failure(name, e))?;

        if has_tar_magic(&head) {
            return self.scan_tar(Cursor::new(head).chain(decoder), name, ctx, level);
        }

        let member = gunzipped_name(name);
        self.process_entry(Cursor::new(head).chain(decoder), member, 0, None, ctx, level)
    }

    fn scan_seven_zip<R: Read + Seek>(
        &self,
        reader: R,
        compressed_len: u64,
        name: &str,
        ctx: &mut ValidationContext,
        level: &mut LevelStats,
    ) -> Result<(), UploadError> {
        let mut archive =
            sevenz_rust::SevenZReader::new(reader, compressed_len, sevenz_rust::Password::empty())
                .map_err(|e| sevenz_failure(name, e))?;

        // The callback cannot return our error type. Park the rejection and fail the
        // reader: a stop flag only ends the current folder, later folders still decode.
        let mut outcome: Result<(), UploadError> = Ok(());
        let walked = archive.for_each_entries(|entry, entry_reader| {
            if entry.is_directory() {
                return Ok(true);
            }
            let step = ctx.checkpoint().and_then(|()| {
                self.process_entry(
                    entry_reader,
                    entry.name().to_string(),
                    entry.size(),
                    Some(entry.compressed_size),
                    ctx,
                    level,
                )
            });
            match step {
                Ok(()) => Ok(true),
                Err(e) => {
                    outcome = Err(e);
                    Err(sevenz_rust::Error::other(SEVEN_ZIP_WALK_STOPPED))
                }
            }
        });

        outcome?;
        walked.map_err(|e| sevenz_failure(name, e))
    }

    fn process_entry<R: Read>(
        &self,
        mut reader: R,
        name: String,
        size_hint: u64,
        compressed_size_hint: Option<u64>,
        ctx: &mut ValidationContext,
        level: &mut LevelStats,
    ) -> Result<(), UploadError> {
        ctx.file_count += 1;
        level.entries += 1;
        if ctx.file_count > ctx.limits.max_file_count {
            return Err(Rejection::new(
                RejectionKind::ArchiveTooManyFiles,
                format!(
                    "Archive contains more than {} files",
                    ctx.limits.max_file_count
                ),
            )
            .with_offending(name)
            .into());
        }

        ctx.charge(size_hint, level, &name)?;

        let declared_extension = extract_extension(&name);
        if !declared_extension.is_empty() && ctx.blocked.contains(&declared_extension) {
            return Err(Rejection::new(
                RejectionKind::ExtensionBlocked,
                format!(
                    "Archive contains '{}' with blocked extension '{}'",
                    name, declared_extension
                ),
            )
            .with_offending(name)
            .into());
        }

        let mut budget = EntryBudget {
            charged: size_hint,
            consumed: 0,
        };
        let mut buf = vec![0u8; COPY_BUFFER_LEN];
        let sample_size = ctx.limits.entry_sample_size;
        let mut sample = Vec::with_capacity(sample_size.min(size_hint as usize).min(COPY_BUFFER_LEN));

        while sample.len() < sample_size {
            let want = buf.len().min(sample_size - sample.len());
            let n = read_chunk(&mut reader, &mut buf[..want], &name)?;
            if n == 0 {
                break;
            }
            budget.consume(n, ctx, level, &name)?;
            sample.extend_from_slice(&buf[..n]);
        }

        let descriptor = ArchiveEntryDescriptor {
            name,
            declared_extension,
            compressed_size_hint,
            uncompressed_size_hint: size_hint,
            sampled_content: sample,
        };
        debug!(
            "Entry '{}' (.{}): {} bytes declared, {:?} compressed, {} sampled",
            descriptor.name,
            descriptor.declared_extension,
            descriptor.uncompressed_size_hint,
            descriptor.compressed_size_hint,
            descriptor.sampled_content.len()
        );

        if self
            .gate
            .is_native_executable(&descriptor.sampled_content, &descriptor.name)
        {
            return Err(Rejection::new(
                RejectionKind::ExecutableDetected,
                format!("Archive contains executable '{}'", descriptor.name),
            )
            .with_offending(descriptor.name)
            .into());
        }

        if ArchiveFormat::detect(&descriptor.sampled_content) == ArchiveFormat::Unknown {
            return Self::drain(&mut reader, None, &mut buf, &mut budget, ctx, level, &descriptor.name);
        }

        let next_depth = ctx.depth.saturating_add(1);
        if next_depth > ctx.limits.max_nesting_depth {
            return Err(Rejection::new(
                RejectionKind::ArchiveTooDeep,
                format!(
                    "Nested archive '{}' exceeds maximum nesting depth {}",
                    descriptor.name, ctx.limits.max_nesting_depth
                ),
            )
            .with_offending(descriptor.name)
            .into());
        }

        let mut spool = tempfile::tempfile()?;
        spool.write_all(&descriptor.sampled_content)?;
        Self::drain(
            &mut reader,
            Some(&mut spool),
            &mut buf,
            &mut budget,
            ctx,
            level,
            &descriptor.name,
        )?;
        let spool_len = spool.stream_position()?;
        spool.seek(SeekFrom::Start(0))?;

        ctx.depth = next_depth;
        ctx.deepest = ctx.deepest.max(next_depth);
        let nested = self.inspect_level(&mut spool, spool_len, &descriptor.name, ctx);
        ctx.depth -= 1;
        nested.map(|_| ())
    }

    /// Consume the rest of an entry, charging every byte, optionally copying it out
    fn drain<R: Read>(
        reader: &mut R,
        mut sink: Option<&mut File>,
        buf: &mut [u8],
        budget: &mut EntryBudget,
        ctx: &mut ValidationContext,
        level: &mut LevelStats,
        name: &str,
    ) -> Result<(), UploadError> {
        loop {
            let n = read_chunk(reader, buf, name)?;
            if n == 0 {
                return Ok(());
            }
            budget.consume(n, ctx, level, name)?;
            if let Some(file) = sink.as_deref_mut() {
                file.write_all(&buf[..n])?;
            }
        }
    }
}

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why an upload was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionKind {
    EmptyFile,
    ExtensionBlocked,
    SizeExceeded,
    ExecutableDetected,
    DisguisedExtension,
    ArchiveTooDeep,
    ArchiveTooManyFiles,
    ArchiveTooLarge,
    ZipBombSuspected,
    ArchiveEncrypted,
    ArchiveMalformed,
    Cancelled,
    IoFailure,
}

impl RejectionKind {
    pub fn code(&self) -> &'static str {
        match self {
            RejectionKind::EmptyFile => "EMPTY_FILE",
            RejectionKind::ExtensionBlocked => "EXTENSION_BLOCKED",
            RejectionKind::SizeExceeded => "SIZE_EXCEEDED",
            RejectionKind::ExecutableDetected => "EXECUTABLE_DETECTED",
            RejectionKind::DisguisedExtension => "DISGUISED_EXTENSION",
            RejectionKind::ArchiveTooDeep => "ARCHIVE_TOO_DEEP",
            RejectionKind::ArchiveTooManyFiles => "ARCHIVE_TOO_MANY_FILES",
            RejectionKind::ArchiveTooLarge => "ARCHIVE_TOO_LARGE",
            RejectionKind::ZipBombSuspected => "ZIP_BOMB_SUSPECTED",
            RejectionKind::ArchiveEncrypted => "ARCHIVE_ENCRYPTED",
            RejectionKind::ArchiveMalformed => "ARCHIVE_MALFORMED",
            RejectionKind::Cancelled => "CANCELLED",
            RejectionKind::IoFailure => "IO_FAILURE",
        }
    }

    /// Policy outcomes are expected and user-facing; the rest are failures
    pub fn is_policy(&self) -> bool {
        !matches!(self, RejectionKind::Cancelled | RejectionKind::IoFailure)
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Typed refusal returned by every pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{kind}: {detail}")]
pub struct Rejection {
    pub kind: RejectionKind,
    pub detail: String,
    pub offending_name: Option<String>,
}

impl Rejection {
    pub fn new(kind: RejectionKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            offending_name: None,
        }
    }

    pub fn with_offending(mut self, name: impl Into<String>) -> Self {
        self.offending_name = Some(name.into());
        self
    }
}

/// Everything `UploadService` can surface to its caller
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation cancelled: {0}")]
    Cancelled(String),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl UploadError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            UploadError::Rejected(rejection) => rejection.kind,
            UploadError::Cancelled(_) => RejectionKind::Cancelled,
            UploadError::Io(_) | UploadError::Collaborator(_) => RejectionKind::IoFailure,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            UploadError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    /// Render any outcome as the caller-facing payload
    pub fn to_rejection(&self) -> Rejection {
        match self {
            UploadError::Rejected(rejection) => rejection.clone(),
            UploadError::Cancelled(reason) => Rejection::new(RejectionKind::Cancelled, reason),
            UploadError::Io(e) => Rejection::new(RejectionKind::IoFailure, e.to_string()),
            UploadError::Collaborator(e) => {
                Rejection::new(RejectionKind::IoFailure, format!("{:#}", e))
            }
        }
    }
}

pub mod blocked_extension;

pub use blocked_extension::{
    BlockedExtensionRule, ExtensionOrigin, ExtensionToken, FIXED_EXTENSIONS, MAX_CUSTOM_EXTENSIONS,
    SoftDeletable,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

pub type WorkspaceId = i64;

/// Lower-cased, deduplicated extensions currently blocked for one workspace
pub type BlockSet = HashSet<String>;

/// Who is performing a mutating call; stamped onto what it creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub member_id: i64,
}

impl Actor {
    pub fn new(member_id: i64) -> Self {
        Self { member_id }
    }
}

/// An upload that passed every defense stage and now lives in storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFileRecord {
    /// Assigned by the record sink; `None` until persisted
    pub id: Option<i64>,
    pub workspace_id: WorkspaceId,
    pub original_name: String,
    pub stored_name: String,
    pub extension: String,
    pub byte_size: u64,
    pub mime_type: String,
    pub storage_path: PathBuf,
    pub content_hash: String,
    pub uploaded_by: i64,
    pub created_at: DateTime<Utc>,
}

/// One archive member as seen while streaming a single archive level
#[derive(Debug, Clone)]
pub struct ArchiveEntryDescriptor {
    pub name: String,
    pub declared_extension: String,
    pub compressed_size_hint: Option<u64>,
    pub uncompressed_size_hint: u64,
    pub sampled_content: Vec<u8>,
}

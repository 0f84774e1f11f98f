use crate::entities::{blocked_extensions, prelude::*, uploaded_files};
use crate::models::{
    BlockSet, MAX_CUSTOM_EXTENSIONS, SoftDeletable, StoredFileRecord, WorkspaceId,
};
use crate::services::blocklist::BlockSetProvider;
use crate::services::records::FileRecordSink;
use anyhow::{Result, bail};
use async_trait::async_trait;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::error;

/// Blocklist backed by the `blocked_extensions` table
#[derive(Clone)]
pub struct SeaOrmBlocklist {
    db: DatabaseConnection,
}

impl SeaOrmBlocklist {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BlockSetProvider for SeaOrmBlocklist {
    async fn blocked_extensions(&self, workspace_id: WorkspaceId) -> Result<BlockSet> {
        let rows = BlockedExtensions::find()
            .filter(blocked_extensions::Column::WorkspaceId.eq(workspace_id))
            .filter(blocked_extensions::Column::IsActive.eq(true))
            .all(&self.db)
            .await?;

        let rules: Vec<_> = rows
            .iter()
            .filter(|row| row.is_active())
            .filter_map(|row| row.to_rule())
            .collect();

        // Refuse to serve a blocklist that broke its bound rather than truncate it
        let custom = rules.iter().filter(|rule| !rule.is_fixed()).count();
        if custom > MAX_CUSTOM_EXTENSIONS {
            error!(
                "Workspace {} has {} active custom extensions (max {})",
                workspace_id, custom, MAX_CUSTOM_EXTENSIONS
            );
            bail!(
                "workspace {} exceeds {} active custom extensions",
                workspace_id,
                MAX_CUSTOM_EXTENSIONS
            );
        }

        Ok(rules
            .into_iter()
            .map(|rule| rule.extension.to_string())
            .collect())
    }
}

/// File record sink backed by the `uploaded_files` table
#[derive(Clone)]
pub struct SeaOrmFileRecords {
    db: DatabaseConnection,
}

impl SeaOrmFileRecords {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_workspace(&self, workspace_id: WorkspaceId) -> Result<Vec<StoredFileRecord>> {
        let rows = UploadedFiles::find()
            .filter(uploaded_files::Column::WorkspaceId.eq(workspace_id))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(StoredFileRecord::from).collect())
    }
}

#[async_trait]
impl FileRecordSink for SeaOrmFileRecords {
    async fn persist(&self, record: StoredFileRecord) -> Result<StoredFileRecord> {
        let model = uploaded_files::ActiveModel {
            workspace_id: Set(record.workspace_id),
            original_name: Set(record.original_name),
            stored_name: Set(record.stored_name),
            extension: Set(record.extension),
            byte_size: Set(i64::try_from(record.byte_size)?),
            mime_type: Set(record.mime_type),
            storage_path: Set(record.storage_path.to_string_lossy().into_owned()),
            content_hash: Set(record.content_hash),
            uploaded_by: Set(record.uploaded_by),
            created_at: Set(record.created_at),
            ..Default::default()
        };
        let saved = model.insert(&self.db).await?;
        Ok(StoredFileRecord::from(saved))
    }
}

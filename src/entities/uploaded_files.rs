use crate::models::StoredFileRecord;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "uploaded_files")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(indexed)]
    pub workspace_id: i64,
    pub original_name: String,
    #[sea_orm(unique)]
    pub stored_name: String,
    pub extension: String,
    pub byte_size: i64,
    pub mime_type: String,
    pub storage_path: String,
    pub content_hash: String,
    pub uploaded_by: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for StoredFileRecord {
    fn from(model: Model) -> Self {
        Self {
            id: Some(model.id),
            workspace_id: model.workspace_id,
            original_name: model.original_name,
            stored_name: model.stored_name,
            extension: model.extension,
            byte_size: model.byte_size.max(0) as u64,
            mime_type: model.mime_type,
            storage_path: PathBuf::from(model.storage_path),
            content_hash: model.content_hash,
            uploaded_by: model.uploaded_by,
            created_at: model.created_at,
        }
    }
}

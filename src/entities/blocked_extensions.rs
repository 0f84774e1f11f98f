use crate::models::{BlockedExtensionRule, ExtensionOrigin, ExtensionToken, SoftDeletable};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "blocked_extensions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub workspace_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub extension: String,
    pub is_fixed: bool,
    pub is_active: bool,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl SoftDeletable for Model {
    fn is_active(&self) -> bool {
        self.is_active
    }

    fn deactivate(&mut self) {
        self.is_active = false;
    }
}

impl Model {
    /// Domain view of the row; `None` if the stored token no longer validates
    pub fn to_rule(&self) -> Option<BlockedExtensionRule> {
        let extension = ExtensionToken::parse(&self.extension).ok()?;
        Some(BlockedExtensionRule {
            workspace_id: self.workspace_id,
            extension,
            origin: if self.is_fixed {
                ExtensionOrigin::Fixed
            } else {
                ExtensionOrigin::Custom
            },
            active: self.is_active,
        })
    }
}

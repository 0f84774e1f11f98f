use crate::entities::{blocked_extensions, prelude::*};
use crate::models::blocked_extension::fixed_rules;
use crate::models::{Actor, WorkspaceId};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::info;

/// Provision the fixed blocked extensions of a workspace, unchecked.
/// Existing rows are left untouched; returns how many were inserted.
pub async fn seed_fixed_extensions(
    db: &DatabaseConnection,
    workspace_id: WorkspaceId,
    actor: Actor,
) -> anyhow::Result<usize> {
    info!("🌱 Seeding fixed extensions for workspace {}...", workspace_id);

    let mut inserted = 0;
    for rule in fixed_rules(workspace_id) {
        let exists = BlockedExtensions::find()
            .filter(blocked_extensions::Column::WorkspaceId.eq(workspace_id))
            .filter(blocked_extensions::Column::Extension.eq(rule.extension.as_str()))
            .one(db)
            .await?;

        if exists.is_none() {
            let now = Utc::now();
            let model = blocked_extensions::ActiveModel {
                workspace_id: Set(workspace_id),
                extension: Set(rule.extension.to_string()),
                is_fixed: Set(rule.is_fixed()),
                is_active: Set(rule.active),
                created_by: Set(actor.member_id),
                updated_by: Set(actor.member_id),
                created_at: Set(now),
                updated_at: Set(now),
            };
            model.insert(db).await?;
            inserted += 1;
        }
    }

    info!(
        "✅ Workspace {}: {} fixed extensions seeded",
        workspace_id, inserted
    );
    Ok(inserted)
}

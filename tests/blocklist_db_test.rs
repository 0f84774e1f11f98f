use chrono::Utc;
use file_blocker::entities::{blocked_extensions, prelude::*};
use file_blocker::infrastructure::database::{run_migrations, setup_database};
use file_blocker::infrastructure::repository::{SeaOrmBlocklist, SeaOrmFileRecords};
use file_blocker::infrastructure::seed::seed_fixed_extensions;
use file_blocker::models::{FIXED_EXTENSIONS, MAX_CUSTOM_EXTENSIONS};
use file_blocker::{Actor, BlockSetProvider, DefenseConfig, RejectionKind, UploadService};
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, IntoActiveModel, Set};
use std::sync::Arc;

async fn setup_db() -> DatabaseConnection {
    setup_database("sqlite::memory:").await.unwrap()
}

async fn add_custom(db: &DatabaseConnection, workspace_id: i64, extension: &str) {
    let now = Utc::now();
    blocked_extensions::ActiveModel {
        workspace_id: Set(workspace_id),
        extension: Set(extension.to_string()),
        is_fixed: Set(false),
        is_active: Set(true),
        created_by: Set(1),
        updated_by: Set(1),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .unwrap();
}

async fn set_active(db: &DatabaseConnection, workspace_id: i64, extension: &str, active: bool) {
    let row = BlockedExtensions::find_by_id((workspace_id, extension.to_string()))
        .one(db)
        .await
        .unwrap()
        .unwrap();
    let mut model = row.into_active_model();
    model.is_active = Set(active);
    model.updated_at = Set(Utc::now());
    model.update(db).await.unwrap();
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let db = setup_db().await;
    run_migrations(&db).await.unwrap();
    run_migrations(&db).await.unwrap();
}

#[tokio::test]
async fn test_seeding_is_idempotent_and_unchecked() {
    let db = setup_db().await;

    let inserted = seed_fixed_extensions(&db, 5, Actor::new(1)).await.unwrap();
    assert_eq!(inserted, FIXED_EXTENSIONS.len());
    let again = seed_fixed_extensions(&db, 5, Actor::new(1)).await.unwrap();
    assert_eq!(again, 0);

    let rows = BlockedExtensions::find().all(&db).await.unwrap();
    assert_eq!(rows.len(), FIXED_EXTENSIONS.len());
    assert!(rows.iter().all(|r| r.is_fixed && !r.is_active));

    // Seeded but unchecked rules block nothing
    let blocklist = SeaOrmBlocklist::new(db.clone());
    assert!(blocklist.blocked_extensions(5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_only_active_rules_of_the_workspace_are_returned() {
    let db = setup_db().await;
    seed_fixed_extensions(&db, 5, Actor::new(1)).await.unwrap();
    seed_fixed_extensions(&db, 6, Actor::new(1)).await.unwrap();

    set_active(&db, 5, "exe", true).await;
    set_active(&db, 5, "bat", true).await;
    add_custom(&db, 5, "sh").await;
    add_custom(&db, 6, "php").await;

    let blocklist = SeaOrmBlocklist::new(db.clone());
    let mut blocked: Vec<String> = blocklist
        .blocked_extensions(5)
        .await
        .unwrap()
        .into_iter()
        .collect();
    blocked.sort();
    assert_eq!(blocked, vec!["bat", "exe", "sh"]);

    // Unchecking takes effect on the next lookup
    set_active(&db, 5, "exe", false).await;
    let blocked = blocklist.blocked_extensions(5).await.unwrap();
    assert!(!blocked.contains("exe"));
    assert!(blocked.contains("bat"));
}

#[tokio::test]
async fn test_custom_rule_cap_is_enforced_on_lookup() {
    let db = setup_db().await;
    seed_fixed_extensions(&db, 4, Actor::new(1)).await.unwrap();
    set_active(&db, 4, "exe", true).await;
    for i in 0..MAX_CUSTOM_EXTENSIONS {
        add_custom(&db, 4, &format!("c{i:03}")).await;
    }

    // Fixed rules do not count toward the cap
    let blocklist = SeaOrmBlocklist::new(db.clone());
    let blocked = blocklist.blocked_extensions(4).await.unwrap();
    assert_eq!(blocked.len(), MAX_CUSTOM_EXTENSIONS + 1);

    // One more active custom rule breaks the bound; the lookup fails closed
    add_custom(&db, 4, "overflow").await;
    assert!(blocklist.blocked_extensions(4).await.is_err());

    set_active(&db, 4, "overflow", false).await;
    assert!(blocklist.blocked_extensions(4).await.is_ok());
}

#[tokio::test]
async fn test_upload_against_database_rules() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup_db().await;
    seed_fixed_extensions(&db, 9, Actor::new(1)).await.unwrap();
    set_active(&db, 9, "exe", true).await;
    add_custom(&db, 9, "sh").await;

    let records = Arc::new(SeaOrmFileRecords::new(db.clone()));
    let service = UploadService::new(
        DefenseConfig {
            upload_dir: dir.path().join("uploads"),
            staging_dir: Some(dir.path().join("staging")),
            ..DefenseConfig::default()
        },
        Arc::new(SeaOrmBlocklist::new(db.clone())),
        records.clone(),
    );

    // 1. Blocked by a checked fixed rule
    let err = service
        .upload_file(9, "tool.exe", 4, &b"data"[..], Actor::new(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::ExtensionBlocked);

    // 2. Shell script disguised as text, blocked by a custom rule
    let script = b"#!/usr/bin/env bash\necho pwned\n";
    let err = service
        .upload_file(9, "notes.txt", script.len() as u64, &script[..], Actor::new(2))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RejectionKind::DisguisedExtension);

    // 3. Accepted upload is recorded in the database
    let record = service
        .upload_file(9, "notes.txt", 11, &b"plain notes"[..], Actor::new(2))
        .await
        .unwrap();
    assert!(record.id.is_some());

    let stored = records.find_by_workspace(9).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].original_name, "notes.txt");
    assert_eq!(stored[0].stored_name, record.stored_name);
    assert_eq!(stored[0].byte_size, 11);
    assert_eq!(stored[0].uploaded_by, 2);
    assert!(records.find_by_workspace(10).await.unwrap().is_empty());
}

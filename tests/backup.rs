//! Backup contract: online snapshots, listing, staged restore.

mod common;

use plinth::service::backup::{apply_staged_restore, BackupService};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

#[tokio::test]
async fn snapshot_list_and_remove() {
    let engine = common::engine().await;
    let backup = BackupService::new(engine.pool.clone(), engine.data_dir.clone());

    let name = backup.create().await.unwrap();
    assert!(name.starts_with("backup-") && name.ends_with(".sqlite"));
    assert_eq!(backup.list().unwrap(), vec![name.clone()]);

    backup.remove(&name).unwrap();
    assert!(backup.list().unwrap().is_empty());

    // Path traversal in a snapshot name is refused.
    assert!(backup.remove("backup-../x.sqlite").is_err());
    assert!(backup.stage_restore("../../database.sqlite").is_err());
}

#[tokio::test]
async fn staged_restore_replaces_the_live_database() {
    let engine = common::engine().await;
    let backup = BackupService::new(engine.pool.clone(), engine.data_dir.clone());

    engine.schema().create(&common::products_def()).await.unwrap();
    let name = backup.create().await.unwrap();

    // Lose the table, then restore the snapshot taken before the loss.
    engine.schema().drop("products").await.unwrap();
    backup.stage_restore(&name).unwrap();

    engine.pool.close().await;
    assert!(apply_staged_restore(&engine.data_dir).unwrap());
    // A second boot without a staged file is a no-op.
    assert!(!apply_staged_restore(&engine.data_dir).unwrap());

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new().filename(engine.data_dir.join("database.sqlite")),
    )
    .await
    .unwrap();
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _tables WHERE name = 'products'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1, "snapshot state is back");
}

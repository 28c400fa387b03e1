//! Auth-table behavior: credential column redaction, registration-only
//! inserts, and self-ownership.

mod common;

use common::{admin, engine, field, user};
use plinth::service::rows::FetchOptions;
use plinth::service::schema::CreateTableRequest;
use plinth::{AccessPolicy, AppError};
use serde_json::json;

fn users_def() -> CreateTableRequest {
    CreateTableRequest {
        name: "users".to_string(),
        fields: vec![field("display_name", "text")],
        indexes: vec![],
        table_type: "users".to_string(),
    }
}

fn obj(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    v.as_object().cloned().expect("object")
}

async fn seed_user(pool: &sqlx::SqlitePool, email: &str, name: &str) -> i64 {
    // Registration is an external collaborator; tests seed principals
    // directly.
    sqlx::query("INSERT INTO users (email, password, salt, display_name) VALUES (?, 'h', 's', ?)")
        .bind(email)
        .bind(name)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
}

#[tokio::test]
async fn credential_columns_are_redacted() {
    let engine = engine().await;
    engine.schema().create(&users_def()).await.unwrap();

    let names: Vec<String> = engine
        .registry
        .columns("users", false)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert!(names.contains(&"email".to_string()));
    assert!(names.contains(&"display_name".to_string()));
    assert!(!names.contains(&"password".to_string()));
    assert!(!names.contains(&"salt".to_string()));

    let names: Vec<String> = engine
        .registry
        .columns("users", true)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert!(names.contains(&"salt".to_string()));
    assert!(!names.contains(&"password".to_string()));
}

#[tokio::test]
async fn generic_insert_into_auth_table_is_rejected() {
    let engine = engine().await;
    engine.schema().create(&users_def()).await.unwrap();

    let caller = admin();
    let err = engine
        .rows()
        .insert(
            Some(&caller),
            "users",
            obj(json!({"email": "a@b.c", "password": "x", "salt": "y"})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)), "got {:?}", err);
}

#[tokio::test]
async fn listed_rows_never_contain_secrets() {
    let engine = engine().await;
    engine.schema().create(&users_def()).await.unwrap();
    engine
        .registry
        .update_access("users", &AccessPolicy::parse("2;2;0;0;0"))
        .await
        .unwrap();
    seed_user(&engine.pool, "a@b.c", "Ada").await;

    let rows = engine
        .rows()
        .list(None, "users", &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let row = rows[0].as_object().unwrap();
    assert!(row.contains_key("email"));
    assert!(!row.contains_key("password"));
    assert!(!row.contains_key("salt"));
}

#[tokio::test]
async fn auth_ownership_is_the_row_itself() {
    let engine = engine().await;
    engine.schema().create(&users_def()).await.unwrap();
    engine
        .registry
        .update_access("users", &AccessPolicy::parse("own;2;0;own;own"))
        .await
        .unwrap();
    let ada = seed_user(&engine.pool, "ada@b.c", "Ada").await;
    let bob = seed_user(&engine.pool, "bob@b.c", "Bob").await;

    let rows = engine.rows();
    let as_ada = user(ada);

    // Ada sees and edits her own row.
    assert!(rows.view(Some(&as_ada), "users", ada).await.is_ok());
    rows.update(
        Some(&as_ada),
        "users",
        obj(json!({"id": ada, "display_name": "Countess"})),
    )
    .await
    .unwrap();

    // ... but not Bob's.
    assert!(matches!(
        rows.view(Some(&as_ada), "users", bob).await.unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert!(matches!(
        rows.update(
            Some(&as_ada),
            "users",
            obj(json!({"id": bob, "display_name": "Hacked"})),
        )
        .await
        .unwrap_err(),
        AppError::Forbidden(_)
    ));

    // Deleting more than one auth row at a time is refused outright.
    assert!(matches!(
        rows.batch_delete(Some(&as_ada), "users", &[json!(ada), json!(bob)])
            .await
            .unwrap_err(),
        AppError::BadRequest(_)
    ));
    assert!(matches!(
        rows.batch_delete(Some(&as_ada), "users", &[json!(bob)])
            .await
            .unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert_eq!(
        rows.batch_delete(Some(&as_ada), "users", &[json!(ada)])
            .await
            .unwrap(),
        1
    );
}

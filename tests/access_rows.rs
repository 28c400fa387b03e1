//! Access-policy behavior of the generic row engine.

mod common;

use common::{admin, engine, field, products_def, user};
use plinth::service::rows::FetchOptions;
use plinth::service::schema::CreateTableRequest;
use plinth::{AccessPolicy, AppError};
use serde_json::json;

fn obj(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    v.as_object().cloned().expect("object")
}

#[tokio::test]
async fn public_read_denied_insert() {
    let engine = engine().await;
    engine.schema().create(&products_def()).await.unwrap();
    engine
        .registry
        .update_access("products", &AccessPolicy::parse("2;2;0;0;0"))
        .await
        .unwrap();

    let caller = admin();
    let rows = engine.rows();
    let id = rows
        .insert(Some(&caller), "products", obj(json!({"name": "pen", "qty": 10})))
        .await
        .unwrap();

    // Unauthenticated callers can read.
    let listed = rows
        .list(None, "products", &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let viewed = rows.view(None, "products", id).await.unwrap();
    assert_eq!(viewed.get("name"), Some(&json!("pen")));

    // ... but cannot write.
    let err = rows
        .insert(None, "products", obj(json!({"name": "pencil"})))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)), "got {:?}", err);
}

#[tokio::test]
async fn denied_slot_rejects_every_non_admin() {
    let engine = engine().await;
    engine.schema().create(&products_def()).await.unwrap();
    // New tables default to admin-only on every slot.

    let caller = admin();
    let rows = engine.rows();
    let id = rows
        .insert(Some(&caller), "products", obj(json!({"name": "pen"})))
        .await
        .unwrap();

    assert!(matches!(
        rows.view(None, "products", id).await.unwrap_err(),
        AppError::Forbidden(_)
    ));
    let someone = user(9);
    assert!(matches!(
        rows.view(Some(&someone), "products", id).await.unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert!(rows.view(Some(&caller), "products", id).await.is_ok());
}

#[tokio::test]
async fn authenticated_slot_needs_a_caller() {
    let engine = engine().await;
    engine.schema().create(&products_def()).await.unwrap();
    engine
        .registry
        .update_access("products", &AccessPolicy::parse("1;1;1;0;0"))
        .await
        .unwrap();

    let rows = engine.rows();
    assert!(matches!(
        rows.list(None, "products", &FetchOptions::default())
            .await
            .unwrap_err(),
        AppError::Forbidden(_)
    ));
    let someone = user(3);
    assert!(rows
        .list(Some(&someone), "products", &FetchOptions::default())
        .await
        .is_ok());
}

fn notes_def() -> CreateTableRequest {
    CreateTableRequest {
        name: "notes".to_string(),
        fields: vec![field("body", "text"), field("owner_id", "number")],
        indexes: vec![],
        table_type: String::new(),
    }
}

#[tokio::test]
async fn ownership_column_scopes_mutations() {
    let engine = engine().await;
    engine.schema().create(&notes_def()).await.unwrap();
    engine
        .registry
        .update_access("notes", &AccessPolicy::parse("2;2;1;owner_id;owner_id"))
        .await
        .unwrap();

    let caller = admin();
    let rows = engine.rows();
    let id = rows
        .insert(Some(&caller), "notes", obj(json!({"body": "hi", "owner_id": 7})))
        .await
        .unwrap();

    let owner = user(7);
    let stranger = user(8);

    rows.update(
        Some(&owner),
        "notes",
        obj(json!({"id": id, "body": "mine"})),
    )
    .await
    .unwrap();
    assert!(matches!(
        rows.update(
            Some(&stranger),
            "notes",
            obj(json!({"id": id, "body": "stolen"})),
        )
        .await
        .unwrap_err(),
        AppError::Forbidden(_)
    ));

    assert!(matches!(
        rows.batch_delete(Some(&stranger), "notes", &[json!(id)])
            .await
            .unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert_eq!(
        rows.batch_delete(Some(&owner), "notes", &[json!(id)])
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn ownership_list_only_shows_owned_rows() {
    let engine = engine().await;
    engine.schema().create(&notes_def()).await.unwrap();
    engine
        .registry
        .update_access("notes", &AccessPolicy::parse("2;owner_id;1;0;0"))
        .await
        .unwrap();

    let caller = admin();
    let rows = engine.rows();
    rows.insert(Some(&caller), "notes", obj(json!({"body": "a", "owner_id": 7})))
        .await
        .unwrap();
    rows.insert(Some(&caller), "notes", obj(json!({"body": "b", "owner_id": 8})))
        .await
        .unwrap();

    let owner = user(7);
    let listed = rows
        .list(Some(&owner), "notes", &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("body"), Some(&json!("a")));
}

#[tokio::test]
async fn caller_filter_without_identity_is_rejected() {
    let engine = engine().await;
    engine.schema().create(&notes_def()).await.unwrap();
    engine
        .registry
        .update_access("notes", &AccessPolicy::parse("2;2;2;2;2"))
        .await
        .unwrap();

    let rows = engine.rows();
    let opts = FetchOptions {
        filter: Some("owner_id = @caller.id".to_string()),
        ..FetchOptions::default()
    };
    assert!(matches!(
        rows.list(None, "notes", &opts).await.unwrap_err(),
        AppError::BadRequest(_)
    ));

    let owner = user(7);
    assert!(rows.list(Some(&owner), "notes", &opts).await.is_ok());
}

#[tokio::test]
async fn malformed_structured_filter_is_rejected() {
    let engine = engine().await;
    engine.schema().create(&products_def()).await.unwrap();
    engine
        .registry
        .update_access("products", &AccessPolicy::parse("2;2;0;0;0"))
        .await
        .unwrap();

    let rows = engine.rows();
    let opts = FetchOptions {
        filter: Some("qty > > 3".to_string()),
        ..FetchOptions::default()
    };
    assert!(matches!(
        rows.list(None, "products", &opts).await.unwrap_err(),
        AppError::BadRequest(_)
    ));
}

#[tokio::test]
async fn free_text_filter_searches_all_columns() {
    let engine = engine().await;
    engine.schema().create(&products_def()).await.unwrap();
    engine
        .registry
        .update_access("products", &AccessPolicy::parse("2;2;0;0;0"))
        .await
        .unwrap();

    let caller = admin();
    let rows = engine.rows();
    rows.insert(Some(&caller), "products", obj(json!({"name": "fountain pen", "qty": 2})))
        .await
        .unwrap();
    rows.insert(Some(&caller), "products", obj(json!({"name": "notebook", "qty": 5})))
        .await
        .unwrap();

    let opts = FetchOptions {
        filter: Some("pen".to_string()),
        ..FetchOptions::default()
    };
    let listed = rows.list(None, "products", &opts).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("name"), Some(&json!("fountain pen")));
}

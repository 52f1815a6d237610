mod common;

use anyhow::Result;
use serde_json::{json, Map, Value};

use encarte_api::database::{Document, MemoryStore};
use encarte_api::identity::{Actor, Outcome};
use encarte_api::types::Collection;

fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => Document::from_stored(map),
        other => panic!("not an object: {}", other),
    }
}

#[tokio::test]
async fn legacy_owner_field_grants_ownership() -> Result<()> {
    let service = common::service(common::seeded_store().await);
    let tenant = doc(json!({ "id": "t1", "usuarioId": "u1" }));

    assert!(service.verify_ownership(&tenant, "u1"));
    assert!(!service.verify_ownership(&tenant, "u2"));
    Ok(())
}

#[tokio::test]
async fn ownership_fails_closed() -> Result<()> {
    let service = common::service(common::seeded_store().await);

    let unowned = doc(json!({ "id": "t9", "slug": "sem-dono" }));
    assert!(!service.verify_ownership(&unowned, "u1"));

    let owned = doc(json!({ "id": "t1", "ownerRef": "u1" }));
    assert!(!service.verify_ownership(&owned, ""));
    assert!(!service.verify_ownership(&owned, "   "));

    let garbage = doc(json!({ "id": "t2", "ownerRef": ["u1"], "usuarioId": "u1" }));
    assert!(!service.verify_ownership(&garbage, "u1"));
    Ok(())
}

#[tokio::test]
async fn owner_ref_takes_precedence_over_legacy_fields() -> Result<()> {
    let service = common::service(common::seeded_store().await);
    let tenant = doc(json!({ "id": "t1", "ownerRef": "u3", "usuarioId": "u1" }));

    assert!(service.verify_ownership(&tenant, "u3"));
    assert!(!service.verify_ownership(&tenant, "u1"));
    Ok(())
}

#[tokio::test]
async fn canonical_ids_match_across_shapes() -> Result<()> {
    let service = common::service(common::seeded_store().await);
    let id = uuid::Uuid::new_v4();
    let tenant = doc(json!({ "id": "t1", "userId": { "$uuid": id.to_string() } }));

    assert!(service.verify_ownership(&tenant, &id.to_string()));
    assert!(service.verify_ownership(&tenant, &id.simple().to_string()));
    Ok(())
}

#[tokio::test]
async fn stranger_cannot_mutate_but_admin_can() -> Result<()> {
    common::init_tracing();
    let store = common::seeded_store().await;
    let service = common::service(store.clone());

    let stranger = Actor::principal(common::STRANGER);
    assert_eq!(service.attach_image(&stranger, "r1", "b.png").await?.applied(), None);
    let mut fields = Map::new();
    fields.insert("logo".to_string(), json!("x.png"));
    assert!(matches!(
        service.update_tenant(&stranger, "loja-x", fields.clone()).await?,
        Outcome::Unauthorized
    ));

    let admin = Actor::admin(common::ADMIN);
    let updated = service.update_tenant(&admin, "loja-x", fields).await?.applied().expect("admin update");
    assert_eq!(updated.str_field("logo"), Some("x.png"));

    let owner = Actor::principal(common::OWNER);
    assert!(service.attach_image(&owner, "r1", "b.png").await?.is_applied());
    Ok(())
}

#[tokio::test]
async fn orphaned_resources_are_admin_only() -> Result<()> {
    let store = std::sync::Arc::new(MemoryStore::new());
    store
        .seed(Collection::Resources, vec![json!({ "id": "r9", "tenantId": "gone", "images": [] })])
        .await;
    let service = common::service(store);

    let owner = Actor::principal(common::OWNER);
    assert!(matches!(service.attach_image(&owner, "r9", "a.png").await?, Outcome::Unauthorized));

    let admin = Actor::admin(common::ADMIN);
    assert!(service.attach_image(&admin, "r9", "a.png").await?.is_applied());
    Ok(())
}

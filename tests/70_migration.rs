mod common;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use encarte_api::database::MemoryStore;
use encarte_api::identity::{Actor, IdentityError, NewTenant, OwnerMigration};
use encarte_api::types::Collection;

async fn legacy_tenants() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let typed = uuid::Uuid::parse_str("7d444840-9dc0-11d1-b245-5ffdce74fad2").expect("uuid");
    store
        .seed(Collection::Tenants, vec![
            json!({ "id": "t1", "slug": "um", "usuarioId": "u1" }),
            json!({ "id": "t2", "slug": "dois", "usuarioId": typed.to_string(), "userId": { "$uuid": typed.to_string() } }),
            json!({ "id": "t3", "slug": "tres", "usuarioId": "u3", "userId": "u4" }),
            json!({ "id": "t4", "slug": "quatro" }),
        ])
        .await;
    store
}

#[tokio::test]
async fn migration_collapses_and_reports() -> Result<()> {
    common::init_tracing();
    let store = legacy_tenants().await;

    let dry = OwnerMigration::new(store.clone(), 2).run(true).await?;
    assert_eq!((dry.scanned, dry.migrated, dry.conflicts, dry.unowned), (4, 2, 1, 1));
    assert!(common::tenant(&store, json!({ "id": "t1" })).await.get("ownerRef").is_none());

    let report = OwnerMigration::new(store.clone(), 2).run(false).await?;
    assert_eq!(report.migrated, 2);
    assert!(!report.dry_run);

    let t2 = common::tenant(&store, json!({ "id": "t2" })).await;
    assert_eq!(t2.str_field("ownerRef"), Some("7d444840-9dc0-11d1-b245-5ffdce74fad2"));
    assert!(t2.get("usuarioId").is_none() && t2.get("userId").is_none());
    Ok(())
}

#[tokio::test]
async fn ownership_survives_migration() -> Result<()> {
    let store = legacy_tenants().await;
    let service = common::service(store.clone());

    OwnerMigration::new(store.clone(), 4).run(false).await?;

    let t1 = service.resolve_tenant("um").await?.found().expect("t1");
    assert!(service.verify_ownership(&t1.document, "u1"));

    // conflicting legacy owners keep access until resolved by hand
    let t3 = service.resolve_tenant("tres").await?.found().expect("t3");
    assert!(service.verify_ownership(&t3.document, "u3"));
    assert!(service.verify_ownership(&t3.document, "u4"));

    let second = NewTenant {
        name: "Outra".to_string(),
        ..NewTenant::default()
    };
    let err = service.create_tenant(&Actor::principal("u1"), second).await.expect_err("already owns t1");
    assert!(matches!(err, IdentityError::AlreadyOwnsTenant));
    Ok(())
}

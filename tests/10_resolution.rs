mod common;

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use encarte_api::database::{typed_id, DocumentStore, MemoryStore};
use encarte_api::identity::{normalize, Actor, EntityResolver, MatchedBy, NewTenant};
use encarte_api::types::{Collection, EntityKind};

async fn tenant_store(id: Uuid) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(Collection::Tenants, vec![
            json!({ "id": "other", "slug": "outra-loja", "normalizedName": "outra-loja" }),
            json!({ "id": id.to_string(), "slug": "loja-da-ana", "normalizedName": "loja-da-ana", "name": "Loja da Ana" }),
        ])
        .await;
    store
}

#[tokio::test]
async fn id_slug_and_name_resolve_to_the_same_tenant() -> Result<()> {
    let id = Uuid::new_v4();
    let resolver = EntityResolver::new(tenant_store(id).await, 5);

    for raw in [id.to_string(), "loja-da-ana".to_string(), "Loja da Ána".to_string(), id.simple().to_string()] {
        let resolved = resolver
            .resolve_raw(EntityKind::Tenant, &raw)
            .await?
            .found()
            .unwrap_or_else(|| panic!("{} did not resolve", raw));
        assert_eq!(resolved.document.str_field("slug"), Some("loja-da-ana"), "raw {}", raw);
    }
    Ok(())
}

#[tokio::test]
async fn canonical_id_wins_before_fallback() -> Result<()> {
    let id = Uuid::new_v4();
    let resolver = EntityResolver::new(tenant_store(id).await, 5);

    let by_id = resolver.resolve_raw(EntityKind::Tenant, &id.to_string()).await?.found().expect("found");
    assert_eq!(by_id.matched_by, MatchedBy::CanonicalId);
    assert_eq!(by_id.primary, json!({ "id": id.to_string() }));

    let by_slug = resolver.resolve_raw(EntityKind::Tenant, "loja-da-ana").await?.found().expect("found");
    assert_eq!(by_slug.matched_by, MatchedBy::Fallback);
    Ok(())
}

#[tokio::test]
async fn typed_and_legacy_ids_are_found() -> Result<()> {
    let typed = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    store
        .seed(Collection::Tenants, vec![
            json!({ "id": typed_id(typed), "slug": "tipada" }),
            json!({ "_id": "legacy-7", "slug": "velha" }),
            json!({ "lojaId": "42", "slug": "numerada" }),
        ])
        .await;
    let resolver = EntityResolver::new(store, 5);

    let found = resolver.resolve_raw(EntityKind::Tenant, &typed.to_string()).await?.found().expect("typed id");
    assert_eq!(found.document.str_field("slug"), Some("tipada"));
    assert_eq!(found.primary, json!({ "id": typed_id(typed) }));

    let legacy = resolver.resolve_raw(EntityKind::Tenant, "legacy-7").await?.found().expect("_id");
    assert_eq!(legacy.document.str_field("slug"), Some("velha"));
    assert_eq!(legacy.primary, json!({ "_id": "legacy-7" }));

    let numbered = resolver.resolve_raw(EntityKind::Tenant, "42").await?.found().expect("lojaId");
    assert_eq!(numbered.document.str_field("slug"), Some("numerada"));
    Ok(())
}

#[tokio::test]
async fn malformed_id_falls_through_to_slug() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(Collection::Tenants, vec![json!({ "id": "t1", "slug": "123e4567-e89b-12d3-a456-42661417400z" })])
        .await;
    let resolver = EntityResolver::new(store, 5);

    let resolved = resolver
        .resolve_raw(EntityKind::Tenant, "123e4567-e89b-12d3-a456-42661417400z")
        .await?;
    assert!(resolved.is_found());
    Ok(())
}

#[tokio::test]
async fn rejected_canonical_predicate_degrades_to_fallback() -> Result<()> {
    common::init_tracing();
    let id = Uuid::new_v4();
    let faulty = common::FaultyStore::new(tenant_store(id).await);
    faulty.reject_next_finds(1);
    let resolver = EntityResolver::new(faulty, 5);

    let resolved = resolver.resolve_raw(EntityKind::Tenant, &id.to_string()).await?.found().expect("found");
    assert_eq!(resolved.matched_by, MatchedBy::Fallback);
    assert_eq!(resolved.document.str_field("slug"), Some("loja-da-ana"));
    Ok(())
}

#[tokio::test]
async fn upper_case_slug_resolves() -> Result<()> {
    let store = common::seeded_store().await;
    let resolver = EntityResolver::new(store, 5);
    let resolved = resolver.resolve_raw(EntityKind::Tenant, "LOJA-X").await?.found().expect("found");
    assert_eq!(resolved.document.str_field("id"), Some("t1"));
    Ok(())
}

#[tokio::test]
async fn unknown_and_empty_identifiers_are_not_found() -> Result<()> {
    let resolver = EntityResolver::new(common::seeded_store().await, 5);
    assert!(!resolver.resolve_raw(EntityKind::Tenant, "nao-existe").await?.is_found());
    assert!(!resolver.resolve_raw(EntityKind::Tenant, "   ").await?.is_found());
    assert!(normalize("   ").is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_names_report_an_inconsistency() -> Result<()> {
    common::init_tracing();
    let store = Arc::new(MemoryStore::new());
    store
        .seed(Collection::Tenants, vec![
            json!({ "id": "a", "slug": "loja-x", "normalizedName": "loja-x" }),
            json!({ "id": "b", "slug": "loja-x-1f2e3d", "normalizedName": "loja-x" }),
        ])
        .await;
    let resolver = EntityResolver::new(store, 5);

    let resolved = resolver.resolve_raw(EntityKind::Tenant, "Loja X").await?.found().expect("found");
    assert_eq!(resolved.document.str_field("id"), Some("a"));
    let inconsistency = resolved.inconsistency.expect("inconsistency reported");
    assert_eq!(inconsistency.candidates, 2);
    assert_eq!(inconsistency.chosen.as_deref(), Some("a"));
    Ok(())
}

#[tokio::test]
async fn resources_resolve_by_sku() -> Result<()> {
    let store = common::seeded_store().await;
    let resolver = EntityResolver::new(store.clone(), 5);
    let resolved = resolver.resolve_raw(EntityKind::Resource, "Camiseta Azul").await?.found().expect("found");
    assert_eq!(resolved.document.str_field("id"), Some("r1"));
    assert_eq!(store.count(Collection::Resources, &json!({})).await?, 1);
    Ok(())
}

#[tokio::test]
async fn created_neighbours_each_resolve_to_themselves() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let service = common::service(store.clone());

    let mut created = Vec::new();
    for (owner, name) in [("ana", "Loja X"), ("bia", "Loja X"), ("caio", "loja-x"), ("duda", "Loja X!")] {
        let input = NewTenant {
            name: name.to_string(),
            ..NewTenant::default()
        };
        created.push(service.create_tenant(&Actor::principal(owner), input).await?);
    }

    for tenant in &created {
        let id = tenant.str_field("id").expect("id");
        for key in ["id", "slug", "normalizedName"] {
            let raw = tenant.str_field(key).expect(key);
            let resolved = service.resolve_tenant(raw).await?.found().expect("resolves");
            assert_eq!(resolved.document.str_field("id"), Some(id), "{} {}", key, raw);
            assert!(resolved.inconsistency.is_none(), "{} {}", key, raw);
        }
    }

    let resolved = service.resolve_tenant("LOJA X").await?.found().expect("resolves");
    assert_eq!(resolved.document.str_field("id"), created[0].str_field("id"));
    Ok(())
}

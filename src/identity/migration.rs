//! One-time collapse of legacy owner fields into `ownerRef`.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::database::document::Document;
use crate::database::store::{StoreError, Update};
use crate::filter::Filter;
use crate::identity::ownership::{OwnerRef, LEGACY_OWNER_FIELDS, OWNER_FIELD};
use crate::identity::SharedStore;
use crate::types::Collection;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub scanned: u64,
    pub migrated: u64,
    /// Legacy fields name different owners; left untouched
    pub conflicts: u64,
    pub unowned: u64,
    /// Tenants whose stored shape changed under the migration
    pub skipped: u64,
}

enum Step {
    Migrated,
    Conflict,
    Unowned,
    Skipped,
}

pub struct OwnerMigration {
    store: SharedStore,
    concurrency: usize,
}

impl OwnerMigration {
    pub fn new(store: SharedStore, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, dry_run: bool) -> Result<MigrationReport, StoreError> {
        let filter = Filter::parse(Collection::Tenants, &json!({ OWNER_FIELD: { "$exists": false } }))?;
        let tenants = self.store.find(&filter).await?;
        info!("Owner migration scanning {} tenants (dry_run={})", tenants.len(), dry_run);

        let steps: Vec<Result<Step, StoreError>> = stream::iter(tenants)
            .map(|tenant| self.migrate_one(tenant, dry_run))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = MigrationReport {
            dry_run,
            ..MigrationReport::default()
        };
        for step in steps {
            report.scanned += 1;
            match step? {
                Step::Migrated => report.migrated += 1,
                Step::Conflict => report.conflicts += 1,
                Step::Unowned => report.unowned += 1,
                Step::Skipped => report.skipped += 1,
            }
        }
        info!(
            "Owner migration done: {} migrated, {} conflicts, {} unowned, {} skipped",
            report.migrated, report.conflicts, report.unowned, report.skipped
        );
        Ok(report)
    }

    async fn migrate_one(&self, tenant: Document, dry_run: bool) -> Result<Step, StoreError> {
        let owner = OwnerRef::from_document(&tenant);
        let collapsed = match &owner {
            OwnerRef::Unowned => return Ok(Step::Unowned),
            OwnerRef::Canonical(_) => return Ok(Step::Skipped),
            OwnerRef::Legacy(_) => owner.collapsed(),
        };
        let Some(owner_id) = collapsed else {
            warn!(
                tenant = %tenant.id_ref().map(|i| i.to_string()).unwrap_or_default(),
                "Legacy owner fields disagree, leaving tenant for manual review"
            );
            return Ok(Step::Conflict);
        };
        if dry_run {
            return Ok(Step::Migrated);
        }

        let Some((id_field, id_value)) = tenant.id_field() else {
            return Ok(Step::Skipped);
        };

        // Guard on the legacy values read, so concurrent edits are not lost
        let mut guards = vec![json!({ id_field: id_value }), json!({ OWNER_FIELD: { "$exists": false } })];
        for field in LEGACY_OWNER_FIELDS {
            guards.push(json!({ *field: tenant.get(field).cloned().unwrap_or(Value::Null) }));
        }

        let mut update = Update::default().set(OWNER_FIELD, OwnerRef::to_value(owner_id));
        for field in LEGACY_OWNER_FIELDS {
            update = update.unset(*field);
        }

        let result = self
            .store
            .update_one(Collection::Tenants, &json!({ "$and": guards }), &update)
            .await?;
        Ok(if result.matched == 0 { Step::Skipped } else { Step::Migrated })
    }
}

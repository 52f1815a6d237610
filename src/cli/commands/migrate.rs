use serde_json::json;

use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::identity::{OwnerMigration, SharedStore};

pub async fn handle(store: SharedStore, config: &AppConfig, dry_run: bool, output_format: OutputFormat) -> anyhow::Result<()> {
    let migration = OwnerMigration::new(store, config.identity.migration_concurrency);
    let report = migration.run(dry_run).await?;

    let verb = if dry_run { "would migrate" } else { "migrated" };
    let message = format!(
        "Scanned {} tenants: {} {}, {} conflicts, {} unowned, {} skipped",
        report.scanned, verb, report.migrated, report.conflicts, report.unowned, report.skipped
    );
    output_success(output_format, &message, Some(json!({ "report": report })))
}

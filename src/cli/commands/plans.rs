use serde_json::json;

use crate::cli::utils::{format_table, output_success};
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::identity::PlanCatalog;

pub fn handle(config: &AppConfig, output_format: OutputFormat) -> anyhow::Result<()> {
    let catalog = PlanCatalog::load(config.plans.catalog_path.as_deref())?;

    match output_format {
        OutputFormat::Json => output_success(
            output_format,
            &format!("Plan catalog {}", catalog.version),
            Some(json!({ "catalog": catalog })),
        ),
        OutputFormat::Text => {
            let rows: Vec<Vec<String>> = catalog
                .plans
                .iter()
                .map(|(id, policy)| {
                    let marker = if *id == catalog.default_plan { " (default)" } else { "" };
                    vec![
                        format!("{}{}", id, marker),
                        policy.max_images_per_resource.to_string(),
                        policy.max_resources_per_tenant.to_string(),
                    ]
                })
                .collect();
            println!("Plan catalog {}", catalog.version);
            println!("{}", format_table(&["plan", "images/resource", "resources/tenant"], &rows));
            Ok(())
        }
    }
}

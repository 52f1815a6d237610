use serde_json::json;

use crate::cli::utils::{output_error, output_success};
use crate::cli::OutputFormat;
use crate::config::AppConfig;
use crate::identity::{normalize, EntityResolver, Resolution, SharedStore};
use crate::types::EntityKind;

pub async fn handle(
    store: SharedStore,
    config: &AppConfig,
    kind: EntityKind,
    raw: &str,
    output_format: OutputFormat,
) -> anyhow::Result<()> {
    let keys = normalize(raw);
    if keys.is_empty() {
        return output_error(output_format, "Identifier is empty", Some("INVALID_INPUT"));
    }

    let resolver = EntityResolver::new(store, config.identity.ambiguity_probe_limit);
    let resolved = match resolver.resolve(kind, &keys).await? {
        Resolution::Found(resolved) => resolved,
        Resolution::NotFound => {
            return output_error(output_format, &format!("No {} matches '{}'", kind, raw), Some("NOT_FOUND"));
        }
    };

    let id = resolved.id().map(|i| i.to_string()).unwrap_or_default();
    match output_format {
        OutputFormat::Json => output_success(
            output_format,
            &format!("Resolved {} {}", kind, id),
            Some(json!({
                "kind": kind,
                "matched_by": resolved.matched_by,
                "candidate_keys": keys.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
                "inconsistency": resolved.inconsistency,
                "document": resolved.document.to_json(),
            })),
        ),
        OutputFormat::Text => {
            println!("{} {} (matched by {:?})", kind, id, resolved.matched_by);
            if let Some(inconsistency) = &resolved.inconsistency {
                println!(
                    "warning: {} documents in {} answer to '{}'",
                    inconsistency.candidates, inconsistency.collection, raw
                );
            }
            println!("{}", serde_json::to_string_pretty(&resolved.document.to_json())?);
            Ok(())
        }
    }
}

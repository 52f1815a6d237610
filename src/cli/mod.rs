pub mod commands;
pub mod utils;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::database::PgDocumentStore;
use crate::identity::SharedStore;
use crate::types::EntityKind;

#[derive(Parser)]
#[command(name = "encarte")]
#[command(about = "Encarte CLI - store identity and plan administration")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Show the plan catalog and its quotas")]
    Plans,

    #[command(about = "Resolve a raw identifier to one stored document")]
    Resolve {
        #[arg(help = "Entity kind: tenant, resource or principal")]
        kind: EntityKind,
        #[arg(help = "Raw identifier (id, slug, name or sku)")]
        raw: String,
    },

    #[command(about = "Collapse legacy owner fields into ownerRef")]
    MigrateOwners {
        #[arg(long, help = "Report what would change without writing")]
        dry_run: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

pub async fn run(cli: Cli, config: &AppConfig) -> anyhow::Result<()> {
    let output_format = OutputFormat::from_cli(&cli);

    match cli.command {
        Commands::Plans => commands::plans::handle(config, output_format),
        Commands::Resolve { kind, raw } => {
            let store = connect(config).await?;
            commands::resolve::handle(store, config, kind, &raw, output_format).await
        }
        Commands::MigrateOwners { dry_run } => {
            let store = connect(config).await?;
            commands::migrate::handle(store, config, dry_run, output_format).await
        }
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<SharedStore> {
    let store = PgDocumentStore::connect(&config.database).await?;
    Ok(Arc::new(store))
}

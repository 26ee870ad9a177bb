use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use venue_ingest::db::Db;
use venue_ingest::media::MediaAcquirer;
use venue_ingest::pipeline::{failure_response, run_ingest, IngestConfig};
use venue_ingest::storage::SupabaseStorage;
use venue_ingest::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "venues", version, about = "Venue CSV ingestion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Ingest a structured venue CSV: normalize rows, upload photos, persist
    Ingest {
        /// Path to the structured CSV
        #[arg(long, default_value = "files/pubs.csv")]
        csv: PathBuf,
        /// Maximum number of data rows to process (defaults to ROW_LIMIT env, then 5)
        #[arg(long)]
        limit: Option<usize>,
        /// Optional override for the storage bucket
        #[arg(long)]
        bucket: Option<String>,
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
    /// Strip URL tokens from the description/student_discount columns, in place
    Clean {
        /// Path to the CSV to rewrite
        #[arg(long)]
        csv: PathBuf,
    },
    /// Validate required configuration and log a redacted snapshot
    ValidateEnv,
    /// Print the venues row count
    DbCounts {
        /// Optional override for the database URL
        #[arg(long)]
        db_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    venue_ingest::tracing::init_tracing("info")?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest {
            csv,
            limit,
            bucket,
            db_url,
        } => {
            let row_limit = limit.unwrap_or_else(|| env_util::env_parse("ROW_LIMIT", 5usize));
            let config = IngestConfig::new(csv, row_limit);

            let mut store = SupabaseStorage::from_env()?;
            if let Some(bucket) = bucket {
                store = store.with_bucket(bucket);
            }

            let db_url = match db_url {
                Some(url) => url,
                None => env_util::db_url()?,
            };
            let db = Db::connect(&db_url, env_util::env_parse("DB_MAX_CONNECTIONS", 5u32))
                .await
                .context("connecting to database")?;
            let acquirer = MediaAcquirer::new()?;

            match run_ingest(&config, &acquirer, &store, &db).await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(err) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&failure_response(&err.to_string()))?
                    );
                    std::process::exit(1);
                }
            }
        }
        Commands::Clean { csv } => {
            let rows = venue_ingest::clean::clean_csv(&csv)?;
            println!("cleaned {rows} rows in {}", csv.display());
        }
        Commands::ValidateEnv => {
            env_util::preflight_check(
                "venues",
                &["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"],
                &[
                    "SUPABASE_URL",
                    "STORAGE_BUCKET",
                    "SUPABASE_DB_URL",
                    "DATABASE_URL",
                    "DB_URL",
                    "ROW_LIMIT",
                ],
            )?;
            env_util::db_url().context("database URL")?;
            println!("environment ok");
        }
        Commands::DbCounts { db_url } => {
            let db_url = match db_url {
                Some(url) => url,
                None => env_util::db_url()?,
            };
            let db = Db::connect(&db_url, 1).await?;
            let count = db.venue_count().await?;
            println!("venues: {count}");
        }
    }
    Ok(())
}

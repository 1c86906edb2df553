use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use krx_dart_sync::api::{build_http_client, DartClient, KrxClient, RetryPolicy, RetryingFetcher};
use krx_dart_sync::archive::{ArchiveStore, LocalArchiveStore};
use krx_dart_sync::database_sqlx::ReferenceStore;
use krx_dart_sync::models::{Config, CredentialCategory, PipelineResponse};
use krx_dart_sync::pipelines::{CorpCodePipeline, FinancialDataRequest, FinancialPipeline, StockListPipeline};

#[derive(Parser)]
#[command(
    name = "krx-dart-sync",
    about = "🔄 KRX / DART reference data sync",
    long_about = "Refreshes the KRX stock list, the DART corporate-code mapping, or one stock's financial statements."
)]
struct Cli {
    /// SQLite database path (overrides DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh the listed-security directory from KRX
    Stocks,
    /// Refresh the stock code -> DART identifier mapping
    CorpCodes,
    /// Fetch five fiscal years of statements for one stock
    Financials {
        #[arg(long)]
        stock_code: String,
        /// Use this DART key instead of the stored credential
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Store an API key for a credential category (e.g. DART)
    SetCredential {
        #[arg(long)]
        category: CredentialCategory,
        #[arg(long)]
        key: String,
    },
    /// List archived corp-code snapshots
    Archives {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("krx_dart_sync=info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    let store = ReferenceStore::new(&config.database_path).await?;
    let client = build_http_client(&config)?;
    let fetcher = RetryingFetcher::new(client.clone(), RetryPolicy::from_config(&config));
    let dart = DartClient::new(client.clone(), fetcher, &config.dart_base_url);
    let archive = Arc::new(LocalArchiveStore::new(&config.archive_dir));

    let succeeded = match cli.command {
        Command::Stocks => {
            let pipeline = StockListPipeline::new(KrxClient::new(client, &config), store);
            print_response(&pipeline.run().await)?
        }
        Command::CorpCodes => {
            let pipeline = CorpCodePipeline::new(
                Arc::new(store.clone()),
                dart,
                archive,
                config.archive_bucket.clone(),
                config.dart_cache_paths.clone(),
                store,
            );
            print_response(&pipeline.run().await)?
        }
        Command::Financials { stock_code, api_key } => {
            let pipeline = FinancialPipeline::new(Arc::new(store.clone()), dart, store);
            let request = FinancialDataRequest {
                stock_code: Some(stock_code),
                api_key,
            };
            print_response(&pipeline.run(request).await)?
        }
        Command::SetCredential { category, key } => {
            store.set_credential(category, &key).await?;
            println!("✅ Stored {} credential", category);
            true
        }
        Command::Archives { limit } => {
            for name in archive.list(&config.archive_bucket, limit).await? {
                println!("{}", name);
            }
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn print_response<T: Serialize>(response: &PipelineResponse<T>) -> Result<bool> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(response.is_success())
}

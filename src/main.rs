use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dataset_query_service::domain::{OutputFormat, QueryRequest};
use dataset_query_service::{AnalysisEngine, DatasetAnnotation, DatasetUpload, ServiceConfig};

/// Upload tabular files and query them with SQL or plain questions
#[derive(Parser)]
#[clap(name = "dataset-query", about = "Dataset ingestion and ad-hoc query tool", version)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a CSV or TXT file as a new table
    Ingest {
        /// Path to the file to upload
        file: PathBuf,

        /// Table name to create
        #[clap(short, long)]
        table: String,

        /// Uploading user
        #[clap(long)]
        owner: String,

        /// Display name, defaults to the table name
        #[clap(long, default_value = "")]
        name: String,

        /// Description passed to the language model
        #[clap(short, long, default_value = "")]
        description: String,
    },

    /// List catalog entries, newest first
    List,

    /// Show one catalog entry as JSON
    Show { id: String },

    /// Change the display name or description of your dataset
    Edit {
        id: String,

        #[clap(long)]
        owner: String,

        #[clap(long)]
        name: Option<String>,

        #[clap(short, long)]
        description: Option<String>,
    },

    /// Delete your dataset and its table
    Delete {
        id: String,

        #[clap(long)]
        owner: String,
    },

    /// Write the original upload to disk
    Download {
        id: String,

        /// Destination, defaults to the original filename
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a SQL query
    Query {
        sql: String,

        /// Output format (json, csv)
        #[clap(short, long)]
        format: Option<String>,
    },

    /// Ask a question; SQL is generated by the language model
    Ask {
        question: String,

        /// Output format (json, csv)
        #[clap(short, long)]
        format: Option<String>,
    },

    /// Report tables that have no catalog entry
    Orphans,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dataset_query_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    info!("Data directory: {}", config.data_dir.display());
    info!("Upload directory: {}", config.upload_dir.display());

    let engine = AnalysisEngine::new(&config)
        .await
        .context("Failed to initialize analysis engine")?;

    match cli.command {
        Command::Ingest {
            file,
            table,
            owner,
            name,
            description,
        } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let original_filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let entry = engine
                .ingest_dataset(DatasetUpload {
                    table_name: table,
                    display_name: name,
                    description,
                    original_filename,
                    owner,
                    content: Bytes::from(content),
                })
                .await?;

            println!(
                "Dataset {} created: table '{}', {} rows, {} columns",
                entry.id, entry.table_name, entry.row_count, entry.column_count
            );
            println!("Columns: {}", entry.column_types);
        }
        Command::List => {
            for entry in engine.datasets().list_datasets().await? {
                println!(
                    "{}  {}  {} rows  {}  {}",
                    entry.id, entry.table_name, entry.row_count, entry.owner, entry.display_name
                );
            }
        }
        Command::Show { id } => {
            let entry = engine.datasets().get_dataset(&id).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::Edit {
            id,
            owner,
            name,
            description,
        } => {
            let entry = engine
                .datasets()
                .update_dataset(
                    &id,
                    &owner,
                    DatasetAnnotation {
                        display_name: name,
                        description,
                    },
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Command::Delete { id, owner } => {
            engine.datasets().delete_dataset(&id, &owner).await?;
            println!("Dataset {} deleted", id);
        }
        Command::Download { id, output } => {
            let (filename, content) = engine.datasets().download_dataset(&id).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&filename));
            tokio::fs::write(&path, &content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", content.len(), path.display());
        }
        Command::Query { sql, format } => {
            let request = QueryRequest::sql(sql, OutputFormat::from_param(format.as_deref()));
            respond(&engine, request).await;
        }
        Command::Ask { question, format } => {
            let request =
                QueryRequest::natural_language(question, OutputFormat::from_param(format.as_deref()));
            respond(&engine, request).await;
        }
        Command::Orphans => {
            let orphans = engine.datasets().find_orphan_tables().await?;
            if orphans.is_empty() {
                println!("No orphaned tables");
            }
            for table in orphans {
                println!("{}", table);
            }
        }
    }

    Ok(())
}

async fn respond(engine: &AnalysisEngine, request: QueryRequest) {
    let response = engine.handle_query(request).await;

    if let Some(sql) = &response.generated_sql {
        eprintln!("Generated SQL: {}", sql);
    }

    match (response.result, response.error) {
        (Some(body), _) => println!("{}", body),
        (None, error) => {
            eprintln!("Error: {}", error.unwrap_or_else(|| "query failed".to_string()));
            process::exit(1);
        }
    }
}

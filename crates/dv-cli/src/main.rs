use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dv_extract::{DataKind, EngineConfig, JobOutcome, JobRegistry};
use dv_store::{
    load_settings, save_settings, ExportFormat, ExportOptions, ExportOutcome, ExportScope,
    Exporter, RecordFilter, Store, VaultSettings,
};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod paths;

#[derive(Parser, Debug)]
#[command(name = "datavault", author, version, about = "Encrypted local data vault", long_about = None)]
struct Cli {
    /// Vault directory (defaults to $DATAVAULT_DIR, then the platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the vault database and its key
    Init,
    /// Pull one kind of data from the source into the vault
    Extract {
        /// friends, messages, posts or groups
        kind: DataKind,
        /// Override the pause between items
        #[arg(long)]
        delay_ms: Option<u64>,
        /// Override the number of retries per item
        #[arg(long)]
        retries: Option<u32>,
    },
    /// List stored records
    List {
        /// Only records of this type (singular or plural)
        #[arg(long = "type")]
        record_type: Option<String>,
        /// Only records from this source
        #[arg(long)]
        source: Option<String>,
    },
    /// Record counts per type
    Stats,
    /// Print one decrypted record
    Show { id: String },
    /// Write records to a file
    Export {
        /// all, or a record type such as friends
        #[arg(long = "type", default_value = "all")]
        scope: String,
        /// csv, json or text (defaults to the configured format)
        #[arg(long)]
        format: Option<String>,
        /// Output directory (defaults to the configured export dir)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete one record
    Delete { id: String },
    /// Delete every record. The vault key is kept.
    Clear {
        #[arg(long)]
        yes: bool,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Show,
    Set { field: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data = paths::data_dir(cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Init => init_command(&data).await,
        Commands::Extract {
            kind,
            delay_ms,
            retries,
        } => extract_command(&data, kind, delay_ms, retries).await,
        Commands::List {
            record_type,
            source,
        } => list_command(&data, record_type, source).await,
        Commands::Stats => stats_command(&data).await,
        Commands::Show { id } => show_command(&data, &id).await,
        Commands::Export { scope, format, out } => export_command(&data, &scope, format, out).await,
        Commands::Delete { id } => delete_command(&data, &id).await,
        Commands::Clear { yes } => clear_command(&data, yes).await,
        Commands::Config { action } => config_command(&data, action).await,
    }
}

async fn open_store(data: &Path) -> Result<Store> {
    std::fs::create_dir_all(data)
        .with_context(|| format!("creating data directory {}", data.display()))?;
    let store = Store::open(&paths::db_path(data))
        .await
        .context("opening vault")?;
    Ok(store)
}

async fn init_command(data: &Path) -> Result<()> {
    let store = open_store(data).await?;
    let settings = load_settings(&store).await?;
    save_settings(&store, &settings).await?;
    println!("Vault ready at {}", paths::db_path(data).display());
    store.close().await;
    Ok(())
}

async fn extract_command(
    data: &Path,
    kind: DataKind,
    delay_ms: Option<u64>,
    retries: Option<u32>,
) -> Result<()> {
    let store = open_store(data).await?;
    let mut settings = load_settings(&store).await?;
    if let Some(ms) = delay_ms {
        settings.extraction_interval_ms = ms;
    }
    if let Some(n) = retries {
        settings.retry_attempts = n;
    }
    settings.validate()?;

    let registry = JobRegistry::with_mock_sources(
        store.clone(),
        EngineConfig::from_settings(&settings),
        settings.source_name.clone(),
    );
    let engine = registry.engine(kind);

    let status_sub = engine.on_status_change(|change| println!("[{}] {}", change.status, change.message));
    let progress_sub = engine.on_progress_change(|p| {
        if p.total > 0 {
            println!("  {}/{}", p.current, p.total);
        }
    });

    let mut job = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.extract().await })
    };

    let finished = tokio::select! {
        res = &mut job => Some(res),
        _ = signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(res) => res?,
        None => {
            info!("interrupt received, stopping extraction");
            registry.stop_all();
            job.await?
        }
    };

    status_sub.unsubscribe();
    progress_sub.unsubscribe();
    store.close().await;

    match outcome? {
        JobOutcome::Completed { stored, failed } => {
            if failed > 0 {
                warn!(failed, "some items could not be extracted");
            }
            println!("Stored {stored} {}.", kind);
            Ok(())
        }
        JobOutcome::Stopped => {
            println!("Extraction stopped.");
            Ok(())
        }
        other => Err(anyhow!("extraction ended unexpectedly: {other:?}")),
    }
}

fn parse_filter(record_type: Option<String>, source: Option<String>) -> Result<RecordFilter> {
    let record_type = match record_type {
        Some(t) => match t.parse::<ExportScope>()? {
            ExportScope::All => None,
            ExportScope::Type(t) => Some(t),
        },
        None => None,
    };
    Ok(RecordFilter {
        record_type,
        source,
        ..RecordFilter::default()
    })
}

async fn list_command(data: &Path, record_type: Option<String>, source: Option<String>) -> Result<()> {
    let store = open_store(data).await?;
    let filter = parse_filter(record_type, source)?;
    let read = store.query(&filter).await?;

    for r in &read.records {
        println!(
            "{:<16} {:<8} {:<10} {:<24} {}",
            r.id,
            r.record_type,
            r.source,
            r.extracted_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            r.name.as_deref().unwrap_or("-")
        );
    }
    println!("{} record(s)", read.records.len());
    if !read.skipped.is_empty() {
        warn!(skipped = read.skipped.len(), ids = ?read.skipped, "some records could not be decrypted");
    }
    store.close().await;
    Ok(())
}

async fn stats_command(data: &Path) -> Result<()> {
    let store = open_store(data).await?;
    let counts = store.count_by_type().await?;
    for kind in DataKind::ALL {
        let n = counts.get(kind.record_type()).copied().unwrap_or(0);
        println!("{:<10} {n}", kind.plural());
    }
    for (other, n) in counts
        .iter()
        .filter(|(t, _)| !DataKind::ALL.iter().any(|k| k.record_type() == t.as_str()))
    {
        println!("{other:<10} {n}");
    }
    println!("{:<10} {}", "total", counts.values().sum::<u64>());
    store.close().await;
    Ok(())
}

async fn show_command(data: &Path, id: &str) -> Result<()> {
    let store = open_store(data).await?;
    let record = store
        .get(id)
        .await?
        .ok_or_else(|| anyhow!("no record with id {id}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    store.close().await;
    Ok(())
}

async fn export_command(
    data: &Path,
    scope: &str,
    format: Option<String>,
    out: Option<PathBuf>,
) -> Result<()> {
    let store = open_store(data).await?;
    let settings = load_settings(&store).await?;

    let format = match format {
        Some(f) => f.parse::<ExportFormat>()?,
        None => settings.default_export_format,
    };
    let out_dir = out
        .or_else(|| settings.export_dir.clone())
        .unwrap_or_else(|| paths::default_export_dir(data));
    let exporter = Exporter::new(store.clone(), out_dir, settings.source_name.clone());

    let outcome = exporter
        .export_data(&ExportOptions {
            scope: scope.parse()?,
            format,
        })
        .await?;
    match outcome {
        ExportOutcome::Written { path, records } => {
            println!("Exported {records} record(s) to {}", path.display())
        }
        ExportOutcome::NoData => println!("No data matching your export criteria."),
    }
    store.close().await;
    Ok(())
}

async fn delete_command(data: &Path, id: &str) -> Result<()> {
    let store = open_store(data).await?;
    store.delete(id).await?;
    println!("Deleted {id}");
    store.close().await;
    Ok(())
}

async fn clear_command(data: &Path, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to clear the vault without --yes");
    }
    let store = open_store(data).await?;
    let removed = store.clear().await?;
    println!("Removed {removed} record(s)");
    store.close().await;
    Ok(())
}

async fn config_command(data: &Path, action: ConfigAction) -> Result<()> {
    let store = open_store(data).await?;
    match action {
        ConfigAction::Show => {
            let settings = load_settings(&store).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        ConfigAction::Set { field, value } => {
            let mut settings: VaultSettings = load_settings(&store).await?;
            settings.set_field(&field, &value)?;
            save_settings(&store, &settings).await?;
            println!("{field} = {value}");
        }
    }
    store.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_extract_and_export() {
        let cli = Cli::parse_from(["datavault", "--data-dir", "/tmp/v", "extract", "friends", "--delay-ms", "200"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/v")));
        match cli.command {
            Commands::Extract { kind, delay_ms, .. } => {
                assert_eq!(kind, DataKind::Friend);
                assert_eq!(delay_ms, Some(200));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::parse_from(["datavault", "export", "--type", "posts", "--format", "csv"]);
        assert!(matches!(cli.command, Commands::Export { ref scope, .. } if scope == "posts"));
    }

    #[test]
    fn list_filter_accepts_plural_types() {
        let filter = parse_filter(Some("friends".into()), None).unwrap();
        assert_eq!(filter.record_type.as_deref(), Some("friend"));
        let filter = parse_filter(Some("all".into()), Some("Facebook".into())).unwrap();
        assert!(filter.record_type.is_none());
        assert_eq!(filter.source.as_deref(), Some("Facebook"));
    }

    #[tokio::test]
    async fn export_without_data_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        init_command(dir.path()).await.unwrap();
        export_command(dir.path(), "all", Some("json".into()), None)
            .await
            .unwrap();
        assert!(!paths::default_export_dir(dir.path()).exists());
    }
}

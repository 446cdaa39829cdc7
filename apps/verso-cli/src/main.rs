use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use verso_common::EntityId;
use verso_history::{Repository, TrackingConfig};
use verso_kernel::{Document, Fields, RelationDescriptor, Schema};
use verso_persist::{FileHistoryStore, HistoryRecord, HistoryStore, MemoryDocumentStore};

#[derive(Parser)]
#[command(name = "verso-cli", about = "CLI tool for verso history stores")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML tracking configuration to install as the process default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save, edit and revert a sample article, printing each version
    Demo {
        /// History store directory
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// List every root with recorded history
    Roots {
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// List the versions of one root
    Log {
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long)]
        kind: String,
        #[arg(short, long)]
        id: EntityId,
    },
    /// Print one version as pretty JSON
    Show {
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long)]
        kind: String,
        #[arg(short, long)]
        id: EntityId,
        #[arg(long)]
        version: u64,
    },
    /// Check the integrity manifest
    Verify {
        #[arg(short, long)]
        dir: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    if let Some(path) = &cli.config {
        TrackingConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .install_global()?;
    }

    match cli.command {
        Commands::Demo { dir } => demo(dir)?,
        Commands::Roots { dir } => {
            let store = FileHistoryStore::open(&dir)?;
            for (kind, id) in store.roots()? {
                let latest = store.latest_version(&kind, id)?.unwrap_or(0);
                println!("{kind} {id} v{latest}");
            }
        }
        Commands::Log { dir, kind, id } => {
            let store = FileHistoryStore::open(&dir)?;
            let records = store.query(&kind, id)?;
            if records.is_empty() {
                println!("no history for {kind} {id}");
            }
            for record in &records {
                print_summary(record);
            }
        }
        Commands::Show {
            dir,
            kind,
            id,
            version,
        } => {
            let store = FileHistoryStore::open(&dir)?;
            let record = store
                .query_at(&kind, id, version)?
                .with_context(|| format!("{kind} {id} has no version {version}"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Verify { dir } => {
            let store = FileHistoryStore::open(&dir)?;
            store.verify_integrity()?;
            println!(
                "OK: {} records, schema v{}",
                store.meta().record_count,
                store.meta().history_schema_version
            );
        }
    }

    Ok(())
}

fn article_schema() -> anyhow::Result<Arc<Schema>> {
    let schema = Schema::builder()
        .root("Article", [RelationDescriptor::many("pages", "Page")])
        .embedded(
            "Page",
            [
                RelationDescriptor::many("sections", "Section"),
                RelationDescriptor::one("footer", "Footer"),
            ],
        )
        .embedded("Section", [])
        .embedded("Footer", [])
        .build()?;
    Ok(Arc::new(schema))
}

fn named(name: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("name".into(), name.into());
    fields
}

fn demo(dir: PathBuf) -> anyhow::Result<()> {
    tracing::info!(dir = %dir.display(), "running demo");
    let schema = article_schema()?;
    let mut repo = Repository::new(
        MemoryDocumentStore::new(),
        FileHistoryStore::open(&dir)?,
        TrackingConfig::global().clone(),
    );

    let mut doc = Document::new(schema, "Article")?;
    let root = doc.root();
    println!("Article {root}");

    doc.set(root, "title", "Versioned article")?;
    let page = doc.embed(root, "pages", named("Page 1"))?;
    repo.save(&mut doc, root)?;

    doc.set(page, "name", "The Page 1")?;
    repo.save(&mut doc, page)?;

    doc.embed(root, "pages", named("Page 2"))?;
    let mut footer = Fields::new();
    footer.insert("text".into(), "fin".into());
    doc.embed(page, "footer", footer)?;
    repo.save(&mut doc, root)?;

    doc.without_history_tracking(root, |doc| -> anyhow::Result<()> {
        doc.set(root, "draft", true)?;
        repo.save(doc, root)?;
        Ok(())
    })??;

    repo.revert(&mut doc, Some(2))?;

    for record in repo.versions(&doc)? {
        print_summary(&record);
    }
    println!(
        "Current version: {}",
        doc.version().map_or_else(|| "none".to_string(), |v| v.to_string())
    );
    Ok(())
}

fn print_summary(record: &HistoryRecord) {
    let changed: Vec<&str> = record.altered_attributes.keys().map(String::as_str).collect();
    println!(
        "v{} at {}: {}",
        record.version,
        record.created_at.to_rfc3339(),
        changed.join(", ")
    );
}

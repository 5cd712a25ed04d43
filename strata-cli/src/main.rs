/*!
Strata CLI - command-line interface for the Strata media snapshot store.

Takes snapshots of media package documents, lists and inspects stored versions, deletes
versions and migrates payloads between the storage tiers named in the configuration.
*/

use anyhow::{anyhow, Context};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strata_core::observability::{init_observability_with_directive, DEFAULT_LOG_DIRECTIVE};
use strata_core::query::{mediapackage_id, owner, storage_tier, version, OrderBy};
use strata_core::{
    create_manager_from_config, AssetManager, ElementFilter, FileWorkspace, MediaPackage, PayloadStore,
    Predicate, SelectQuery, StaticSecurityContext, StrataConfig, StrataError, SubJobStatus, Version,
};
use tabled::{Table, Tabled};
use tracing::{error, info};

const DEFAULT_INDEX_PATH: &str = "./strata-index.json.gz";

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "CLI for the Strata media snapshot store")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// JSON configuration file; defaults to a single local tier under ./strata-data
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Snapshot index file, overriding the configuration
    #[arg(long, global = true, env = "STRATA_INDEX")]
    index: Option<PathBuf>,

    /// Organization all operations are scoped to
    #[arg(long, global = true, env = "STRATA_ORG", default_value = "default-org")]
    org: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a media package document
    Take {
        /// Media package JSON document
        document: PathBuf,
        /// Snapshot owner; defaults to the owner of the latest version
        #[arg(short, long)]
        owner: Option<String>,
        /// Directory element URIs are resolved against
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
        /// Only keep elements matching this flavor (repeatable, `*` wildcards)
        #[arg(long)]
        flavor: Vec<String>,
        /// Only keep elements carrying one of these tags (repeatable)
        #[arg(long)]
        tag: Vec<String>,
    },
    /// List snapshots
    List {
        /// Only versions of this media package
        #[arg(short, long)]
        media_package: Option<String>,
        /// Only snapshots of this owner
        #[arg(short, long)]
        owner: Option<String>,
        /// Only snapshots stored in this tier
        #[arg(short, long)]
        tier: Option<String>,
        /// Only the latest version of each media package
        #[arg(long)]
        latest: bool,
        /// Maximum number of rows
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show one snapshot
    Show {
        media_package: String,
        /// Version to show; defaults to the latest
        #[arg(long)]
        version: Option<Version>,
        /// Print the stored document as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete snapshot versions owned by an owner
    Delete {
        media_package: String,
        #[arg(short, long)]
        owner: String,
        /// Delete only this version
        #[arg(long, conflicts_with = "keep_latest")]
        version: Option<Version>,
        /// Keep the latest version
        #[arg(long)]
        keep_latest: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Move payloads of one or all versions to another tier and wait for the result
    Migrate {
        media_package: String,
        /// Target tier
        #[arg(long)]
        to: String,
        /// Move only this version
        #[arg(long)]
        version: Option<Version>,
        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List configured storage tiers
    Tiers,
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Media Package")]
    media_package_id: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Tier")]
    tier: String,
    #[tabled(rename = "Elements")]
    elements: usize,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Created")]
    created: String,
}

#[derive(Tabled)]
struct ElementRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Flavor")]
    flavor: String,
    #[tabled(rename = "Tags")]
    tags: String,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct SubJobRow {
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Error")]
    error: String,
}

#[derive(Tabled)]
struct TierRow {
    #[tabled(rename = "Tier")]
    name: String,
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "Primary")]
    primary: String,
    #[tabled(rename = "Reachable")]
    reachable: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "strata=debug" } else { DEFAULT_LOG_DIRECTIVE };
    init_observability_with_directive(cli.log_json, directive)?;

    let workspace_root = match &cli.command {
        Commands::Take { workspace, .. } => workspace.clone(),
        _ => PathBuf::from("."),
    };
    let manager = open_manager(&cli, workspace_root)?;

    match cli.command {
        Commands::Take {
            document,
            owner,
            flavor,
            tag,
            ..
        } => take_snapshot(&manager, &document, owner.as_deref(), flavor, tag)?,
        Commands::List {
            media_package,
            owner,
            tier,
            latest,
            limit,
        } => list_snapshots(&manager, media_package, owner, tier, latest, limit)?,
        Commands::Show {
            media_package,
            version,
            json,
        } => show_snapshot(&manager, &media_package, version, json)?,
        Commands::Delete {
            media_package,
            owner,
            version,
            keep_latest,
            force,
        } => delete_snapshots(&manager, &media_package, &owner, version, keep_latest, force)?,
        Commands::Migrate {
            media_package,
            to,
            version,
            timeout,
        } => migrate(&manager, &media_package, version, &to, timeout).await?,
        Commands::Tiers => list_tiers(&manager),
    }

    Ok(())
}

fn open_manager(cli: &Cli, workspace_root: PathBuf) -> Result<AssetManager, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => StrataConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => StrataConfig::default(),
    };
    match (&cli.index, &config.index_path) {
        (Some(index), _) => config.index_path = Some(index.clone()),
        (None, None) => config.index_path = Some(PathBuf::from(DEFAULT_INDEX_PATH)),
        (None, Some(_)) => {}
    }
    info!(
        primary_tier = %config.primary_tier,
        tiers = config.tiers.len(),
        index = ?config.index_path,
        "Opening snapshot store"
    );

    Ok(create_manager_from_config(
        &config,
        Arc::new(FileWorkspace::new(workspace_root)),
        Arc::new(StaticSecurityContext::new(cli.org.clone())),
    )?)
}

fn take_snapshot(
    manager: &AssetManager,
    path: &Path,
    owner: Option<&str>,
    flavors: Vec<String>,
    tags: Vec<String>,
) -> Result<(), anyhow::Error> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read document {}", path.display()))?;
    let document = MediaPackage::from_json(&json)?;

    let snapshot = if flavors.is_empty() && tags.is_empty() {
        match owner {
            Some(owner) => manager.take_snapshot(owner, document)?,
            None => manager.take_snapshot_default(document)?,
        }
    } else {
        let filter = ElementFilter {
            flavors,
            tags: tags.into_iter().collect(),
        };
        let owner = owner.unwrap_or(strata_core::DEFAULT_OWNER);
        manager.take_partial_snapshot(owner, document, &filter)?
    };

    println!(
        "✓ Took snapshot {} version {} in tier '{}'",
        snapshot.media_package_id, snapshot.version, snapshot.storage_tier
    );
    Ok(())
}

fn list_snapshots(
    manager: &AssetManager,
    media_package: Option<String>,
    owner_filter: Option<String>,
    tier: Option<String>,
    latest: bool,
    limit: Option<usize>,
) -> Result<(), anyhow::Error> {
    let mut filter = Predicate::Always;
    if let Some(id) = media_package {
        filter = filter & mediapackage_id(id);
    }
    if let Some(o) = owner_filter {
        filter = filter & owner(o);
    }
    if let Some(t) = tier {
        filter = filter & storage_tier(t);
    }
    if latest {
        filter = filter & version().is_latest();
    }

    let mut query = SelectQuery::new(filter)
        .order_by(OrderBy::MediaPackageId.asc())
        .order_by(OrderBy::Version.asc());
    if let Some(limit) = limit {
        query = query.limit(limit);
    }

    let snapshots = manager.select(&query)?;
    if snapshots.is_empty() {
        println!("No snapshots found");
        return Ok(());
    }

    let rows: Vec<SnapshotRow> = snapshots
        .into_iter()
        .map(|s| SnapshotRow {
            elements: s.document.elements.len(),
            size: format_size(s.document.elements.iter().filter_map(|e| e.size).sum()),
            created: format_timestamp(s.created_at),
            media_package_id: s.media_package_id,
            version: s.version.value(),
            owner: s.owner,
            tier: s.storage_tier,
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn show_snapshot(
    manager: &AssetManager,
    media_package: &str,
    version: Option<Version>,
    json: bool,
) -> Result<(), anyhow::Error> {
    let version = match version {
        Some(v) => v,
        None => manager.latest_version(media_package)?,
    };
    let snapshot = manager.get_snapshot(media_package, version)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.document)?);
        return Ok(());
    }

    println!("Snapshot Details:");
    println!("  Media Package: {}", snapshot.media_package_id);
    println!("  Version: {}", snapshot.version);
    println!("  Owner: {}", snapshot.owner);
    println!("  Organization: {}", snapshot.organization_id);
    println!("  Tier: {}", snapshot.storage_tier);
    println!("  Created: {}", format_timestamp(snapshot.created_at));
    if let Some(title) = &snapshot.document.title {
        println!("  Title: {title}");
    }

    let rows: Vec<ElementRow> = snapshot
        .document
        .elements
        .iter()
        .map(|e| ElementRow {
            id: e.id.clone(),
            kind: format!("{:?}", e.kind).to_lowercase(),
            flavor: e.flavor.clone(),
            tags: e.tags.iter().cloned().collect::<Vec<_>>().join(","),
            size: e.size.map(format_size).unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    if !rows.is_empty() {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

fn delete_snapshots(
    manager: &AssetManager,
    media_package: &str,
    owner: &str,
    version: Option<Version>,
    keep_latest: bool,
    force: bool,
) -> Result<(), anyhow::Error> {
    if !force {
        let what = match version {
            Some(v) => format!("version {v} of '{media_package}'"),
            None if keep_latest => format!("all but the latest version of '{media_package}'"),
            None => format!("all versions of '{media_package}'"),
        };
        print!("Delete {what} owned by '{owner}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    let deleted = match version {
        Some(v) => manager.delete_version(owner, media_package, v)?,
        None => manager.delete_all_versions(owner, media_package, keep_latest)?,
    };
    println!("✓ Deleted {deleted} version(s)");
    Ok(())
}

async fn migrate(
    manager: &AssetManager,
    media_package: &str,
    version: Option<Version>,
    target: &str,
    timeout: Option<u64>,
) -> Result<(), anyhow::Error> {
    let handle = manager.migrate(media_package, version, target)?;
    println!(
        "Moving {} version(s) of '{}' to '{}'",
        handle.jobs().len(),
        media_package,
        target
    );

    let report = match timeout {
        Some(secs) => handle.wait_timeout(Duration::from_secs(secs)).await?,
        None => handle.wait().await?,
    };

    let rows: Vec<SubJobRow> = report
        .statuses
        .iter()
        .map(|(v, status)| SubJobRow {
            version: v.value(),
            status: status.to_string(),
            error: report.errors.get(v).cloned().unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows));

    let failed = report.count(SubJobStatus::Failed);
    if failed > 0 {
        error!(failed, "Migration finished with failures");
        return Err(anyhow!("{failed} sub-job(s) failed"));
    }
    Ok(())
}

fn list_tiers(manager: &AssetManager) {
    let tiers = manager.tiers();
    let rows: Vec<TierRow> = tiers
        .names()
        .into_iter()
        .filter_map(|name| {
            let store = tiers.get(&name).ok()?;
            let reachable = match store.check_reachable() {
                Ok(()) => "yes".to_string(),
                Err(StrataError::BackendUnavailable(reason)) => format!("no ({reason})"),
                Err(e) => format!("no ({e})"),
            };
            Some(TierRow {
                backend: store.store_type().to_string(),
                primary: if name == tiers.primary_name() { "*" } else { "" }.to_string(),
                reachable,
                name,
            })
        })
        .collect();
    println!("{}", Table::new(rows));
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

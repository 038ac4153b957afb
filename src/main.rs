//! photomirror: incremental mirroring of remote photo collections.
//!
//! Collections (photostreams, albums, galleries, favorites, group pools) are
//! listed through the remote REST API, reconciled against a local SQLite
//! index, and the photos that changed are streamed to disk with
//! exponential-backoff retries on transient failures.

#![warn(clippy::all)]

mod cli;
mod config;
mod download;
mod identity;
mod model;
mod remote;
pub mod retry;
mod shutdown;
mod state;
mod sync;
#[cfg(test)]
mod testutil;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Command;
use config::Config;
use download::{BarObserver, DownloadConfig, DownloadPipeline, FsStorage, ProgressObserver};
use identity::{ClientCache, IdentityPool, SelectionMode};
use model::{resolver, CollectionKind, CollectionRef, OwnerRef, ResolveError};
use remote::{ApiUserDirectory, HttpApi, RemoteApi};
use state::{IndexDb, SqliteIndexDb, SyncRunStats};
use sync::SyncEngine;

/// Connect timeout for every outbound client.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a syncing command needs, wired together.
struct SyncContext {
    db: Arc<SqliteIndexDb>,
    engine: SyncEngine,
    pipeline: DownloadPipeline,
    observer: Arc<BarObserver>,
    shutdown: CancellationToken,
    config: Config,
}

impl SyncContext {
    async fn build(db_path: &Path, config: Config) -> anyhow::Result<Self> {
        let shutdown = shutdown::install_signal_handler()?;

        let mode = if config.options.switch_identities {
            SelectionMode::Randomized
        } else {
            SelectionMode::Pinned
        };
        let identities = Arc::new(IdentityPool::new(
            config.api_keys.clone(),
            config.user_agents.clone(),
            config.proxies.clone(),
            mode,
        )?);
        let clients = Arc::new(ClientCache::new(CONNECT_TIMEOUT));

        let api: Arc<dyn RemoteApi> = Arc::new(HttpApi::new(
            config.api_base_url.clone(),
            identities.clone(),
            clients.clone(),
            config.retry.clone(),
            config.timeout,
        ));
        let users = Arc::new(ApiUserDirectory::new(api.clone()));

        let db = Arc::new(SqliteIndexDb::open(db_path).await?);
        tracing::debug!(path = %db_path.display(), "Index opened");

        let engine = SyncEngine::new(db.clone(), api, users, config.per_page, shutdown.clone());

        let observer = Arc::new(BarObserver::new(config.no_progress_bar));
        let pipeline = DownloadPipeline::new(
            db.clone(),
            Arc::new(FsStorage::new(&config.directory)),
            identities,
            clients,
            DownloadConfig {
                batch_size: config.batch_size,
                retry: config.retry.clone(),
                timeout: config.download_timeout,
            },
        )
        .with_observer(observer.clone());

        Ok(Self {
            db,
            engine,
            pipeline,
            observer,
            shutdown,
            config,
        })
    }

    /// Sync every target in order. A failure of one never stops the rest.
    ///
    /// Returns the inputs that failed, for the operator to retry.
    async fn sync_all(
        &self,
        targets: Vec<(String, Result<CollectionRef, ResolveError>)>,
    ) -> anyhow::Result<Vec<String>> {
        let run_id = self.db.start_sync_run().await?;
        let mut stats = SyncRunStats::default();
        let mut failed = Vec::new();

        let mut targets = targets.into_iter();
        for (input, resolved) in targets.by_ref() {
            if self.shutdown.is_cancelled() {
                failed.push(input);
                break;
            }
            stats.collections_seen += 1;
            let target = match resolved {
                Ok(target) => target,
                Err(e) => {
                    tracing::error!(input = %input, error = %e, "Cannot resolve collection");
                    stats.collections_failed += 1;
                    failed.push(input);
                    continue;
                }
            };

            let result = self
                .engine
                .sync_collection(&target, &self.pipeline, &self.config.options)
                .await;
            match result {
                Ok(outcome) => {
                    stats.photos_queued += outcome.tally().map_or(0, |t| t.submitted);
                    if outcome.is_success() {
                        stats.collections_synced += 1;
                    } else {
                        tracing::debug!(
                            collection = %target,
                            failed_items = ?outcome.tally().map(|t| t.failed),
                            "Collection not synced"
                        );
                        stats.collections_failed += 1;
                        failed.push(input);
                    }
                }
                Err(e) => {
                    self.observer.suspend(&mut || {
                        tracing::error!(collection = %target, error = %e, "Sync failed");
                    });
                    stats.collections_failed += 1;
                    failed.push(input);
                }
            }
        }
        // Inputs never started because of a shutdown.
        failed.extend(targets.map(|(input, _)| input));

        let downloads = self.pipeline.stats();
        stats.photos_downloaded = downloads.downloaded;
        stats.photos_failed = downloads.failed;
        stats.interrupted = self.shutdown.is_cancelled();
        self.db.complete_sync_run(run_id, &stats).await?;

        tracing::info!(
            seen = stats.collections_seen,
            synced = stats.collections_synced,
            failed = stats.collections_failed,
            queued = stats.photos_queued,
            downloaded = downloads.downloaded,
            already_present = downloads.already_present,
            download_failures = downloads.failed,
            interrupted = stats.interrupted,
            "Run finished"
        );
        Ok(failed)
    }
}

/// Fail the process listing every input that did not sync.
fn report_failures(failed: &[String]) -> anyhow::Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    eprintln!("Failed collections:");
    for input in failed {
        eprintln!("  {input}");
    }
    anyhow::bail!("{} collection(s) failed", failed.len())
}

/// Run the sync command.
async fn run_sync(db_path: PathBuf, args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args.flags, args.remote)?;
    tracing::debug!(?config, "Starting photomirror");

    let kind = args.kind.map(CollectionKind::from);
    let targets: Vec<_> = args
        .inputs
        .into_iter()
        .map(|input| {
            let resolved = match kind {
                Some(kind) => resolver::resolve_parts(kind, Some(input.as_str()), args.owner.as_deref()),
                None => resolver::resolve(&input),
            };
            (input, resolved)
        })
        .collect();

    let ctx = SyncContext::build(&db_path, config).await?;
    let failed = ctx.sync_all(targets).await?;
    report_failures(&failed)
}

/// Run the sync-user command.
async fn run_sync_user(db_path: PathBuf, args: cli::SyncUserArgs) -> anyhow::Result<()> {
    let config = Config::from_cli(args.flags, args.remote)?;
    let kind = CollectionKind::from(args.kind);
    let ctx = SyncContext::build(&db_path, config).await?;

    let owner = OwnerRef::Alias(args.owner);
    let collections = ctx.engine.list_owner_collections(&owner, kind).await?;

    let targets = collections
        .into_iter()
        .map(|c| (c.to_string(), Ok(c)))
        .collect();
    let failed = ctx.sync_all(targets).await?;
    report_failures(&failed)
}

/// Open an existing index, or explain that there is none yet.
async fn open_existing(db_path: &Path) -> anyhow::Result<Option<SqliteIndexDb>> {
    if !db_path.exists() {
        println!("No index found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(None);
    }
    Ok(Some(SqliteIndexDb::open(db_path).await?))
}

/// Run the unlock command.
async fn run_unlock(db_path: PathBuf, args: cli::UnlockArgs) -> anyhow::Result<()> {
    let Some(db) = open_existing(&db_path).await? else {
        return Ok(());
    };

    let locked = db.list_locked().await?;
    if locked.is_empty() {
        println!("No write locks held.");
        return Ok(());
    }

    println!("Write-locked records:");
    for record in &locked {
        println!(
            "  {} (locked {})",
            record,
            record.locked_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    if !args.yes {
        println!();
        println!("Only clear these if no other photomirror process is running.");
        print!("Clear all {} lock(s)? [y/N] ", locked.len());
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let cleared = db.unlock_all().await?;
    tracing::info!(cleared, "Write locks cleared");
    println!("Cleared {cleared} lock(s).");
    Ok(())
}

/// Run the status command.
async fn run_status(db_path: PathBuf, args: cli::StatusArgs) -> anyhow::Result<()> {
    let Some(db) = open_existing(&db_path).await? else {
        return Ok(());
    };
    let summary = db.get_summary().await?;

    println!("Index: {}", db_path.display());
    println!();
    println!("Users:        {}", summary.users);
    println!("Photos:");
    println!("  Total:      {}", summary.photos);
    println!("  Downloaded: {}", summary.photos_on_disk);
    println!(
        "  Pending:    {}",
        summary.photos.saturating_sub(summary.photos_on_disk)
    );
    println!("  Failed:     {}", summary.photos_failed);
    println!("Collections:");
    println!("  Total:      {}", summary.collections);
    println!("  Synced:     {}", summary.collections_completed);
    println!("Locked:       {}", summary.locked);
    println!();

    if let Some(started) = &summary.last_sync_started {
        println!(
            "Last sync started:   {}",
            started.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(completed) = &summary.last_sync_completed {
        println!(
            "Last sync completed: {}",
            completed.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    if let Some(run) = &summary.last_run {
        println!(
            "Last run:            {} seen, {} synced, {} failed, {} photos queued{}",
            run.collections_seen,
            run.collections_synced,
            run.collections_failed,
            run.photos_queued,
            if run.interrupted { " (interrupted)" } else { "" }
        );
    }

    if args.failed && summary.photos_failed > 0 {
        println!();
        println!("Failed photos:");
        for photo in db.get_failed_photos().await? {
            println!(
                "  {} ({}, {} attempts) - {}",
                photo.id,
                photo.owner_id,
                photo.download_attempts,
                photo.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

/// Run the mark command.
async fn run_mark(db_path: PathBuf, args: cli::MarkArgs) -> anyhow::Result<()> {
    let Some(db) = open_existing(&db_path).await? else {
        return Ok(());
    };
    let (blacklisted, deleted) = (args.blacklist, args.delete);

    let (found, what) = match args.kind {
        Some(kind) => {
            let kind = CollectionKind::from(kind);
            (
                db.set_collection_flags(kind, &args.id, blacklisted, deleted)
                    .await?,
                format!("{kind} {}", args.id),
            )
        }
        None => (
            db.set_photo_flags(&args.id, blacklisted, deleted).await?,
            format!("photo {}", args.id),
        ),
    };
    if !found {
        anyhow::bail!("{what} is not in the index");
    }
    println!("Updated {what}: blacklisted={blacklisted} deleted={deleted}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let db_path = config::expand_tilde(&cli.db);
    match cli.command {
        Command::Sync(args) => run_sync(db_path, args).await,
        Command::SyncUser(args) => run_sync_user(db_path, args).await,
        Command::Unlock(args) => run_unlock(db_path, args).await,
        Command::Status(args) => run_status(db_path, args).await,
        Command::Mark(args) => run_mark(db_path, args).await,
    }
}

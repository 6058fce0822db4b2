//! Easel CLI - resource locks and lifecycles from the command line

use clap::{Parser, Subcommand};
use easel_core::config::Config;
use easel_core::domain::audit::{AuditRecorder, SqliteAuditLog};
use easel_core::domain::lifecycle::{LifecycleManager, LifecycleState, SqliteResourceRepository};
use easel_core::domain::locking::{Lock, LockManager, LockStatus, LockTier, ReleaseOutcome, SqliteLeaseStore};
use easel_core::error::Error;
use easel_core::storage::{Database, DatabaseConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;


#[derive(Parser)]
#[command(name = "easel")]
#[command(author, version, about = "Lease-based locking and lifecycle for shared canvases", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Database file (overrides the configured path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Acting identity (falls back to EASEL_ACTOR)
    #[arg(long, global = true)]
    actor: Option<String>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire, refresh, release and inspect locks
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },

    /// Register and move resources through their lifecycle
    Resource {
        #[command(subcommand)]
        action: ResourceAction,
    },

    /// Show the audit trail of a resource
    Audit {
        /// Resource ID
        resource_id: String,
        /// Only show the most recent entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Retire expired leases and purge old tombstones
    Sweep {
        /// Run a single pass instead of sweeping until Ctrl+C
        #[arg(long)]
        once: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum LockAction {
    /// Acquire a lock on a resource
    Acquire {
        resource_id: String,
        /// Lock tier (view, edit, system, emergency)
        #[arg(short, long, default_value = "edit")]
        tier: LockTier,
        /// Lease length in seconds (defaults per tier)
        #[arg(long)]
        ttl: Option<u64>,
        /// What the lock is for
        #[arg(short, long, default_value = "")]
        purpose: String,
    },
    /// Extend a lock you hold
    Refresh {
        lock_id: Uuid,
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Release a lock you hold
    Release { lock_id: Uuid },
    /// Take the lock from its holder
    Override {
        resource_id: String,
        #[arg(short, long)]
        tier: LockTier,
        /// Justification, recorded in the audit log
        #[arg(short, long)]
        reason: String,
    },
    /// Show who holds a resource
    Status { resource_id: String },
    /// List all active locks
    List,
}

#[derive(Subcommand)]
enum ResourceAction {
    /// Register a new resource
    Register {
        title: String,
        /// Resource ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Show resource details
    Show { id: String },
    /// List resources
    List {
        /// Filter by state (active, archived, deleted)
        #[arg(long)]
        state: Option<String>,
    },
    /// Archive a resource
    Archive { id: String },
    /// Restore an archived resource
    Restore { id: String },
    /// Permanently delete an archived resource
    Delete {
        id: String,
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show all settings
    Show,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// Write the current settings to the config file
    Init,
    /// Show config file path
    Path,
}

/// Everything a command needs, wired over one database
struct App {
    db: Database,
    locks: LockManager,
    lifecycle: LifecycleManager,
    audit: Arc<SqliteAuditLog>,
}

impl App {
    async fn open(config: &Config, db_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = db_path.unwrap_or_else(|| config.database_path());
        let db = Database::new(DatabaseConfig::with_path(path)).await?;
        let pool = db.pool().clone();

        let audit = Arc::new(SqliteAuditLog::new(pool.clone()));
        let locks = LockManager::new(
            Arc::new(SqliteLeaseStore::new(pool.clone())),
            audit.clone(),
            config.to_lock_config(),
        );
        let lifecycle = LifecycleManager::new(
            Arc::new(SqliteResourceRepository::new(pool)),
            locks,
            audit.clone(),
        )
        .with_policy(config.delete_policy());
        let locks = lifecycle.locks().clone();

        Ok(Self {
            db,
            locks,
            lifecycle,
            audit,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up EASEL_* variables from a local .env, if any
    dotenvy::dotenv().ok();

    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("easel=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Config { action } => cmd_config(action, out),

        Commands::Doctor => cmd_doctor(cli.db, out).await,

        command => {
            let config = Config::load()?;
            let app = App::open(&config, cli.db).await?;
            let result = match command {
                Commands::Lock { action } => cmd_lock(&app, action, cli.actor, out).await,
                Commands::Resource { action } => cmd_resource(&app, action, cli.actor, out).await,
                Commands::Audit { resource_id, limit } => {
                    cmd_audit(&app, &resource_id, limit, out).await
                }
                Commands::Sweep { once } => cmd_sweep(&app, once, out).await,
                Commands::Config { .. } | Commands::Doctor => Ok(()),
            };
            app.db.close().await;
            result
        }
    }
}

// ============================================================================
// Output helpers
// ============================================================================

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json(&self, value: serde_json::Value) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok(())
    }

    /// Informational line, suppressed by --quiet and in JSON mode
    fn note(&self, message: impl AsRef<str>) {
        if !self.quiet && !self.json() {
            println!("{}", message.as_ref());
        }
    }
}

/// Turn a domain error into a message carrying its code and a hint
fn explain(err: impl Into<Error>) -> anyhow::Error {
    let err = err.into();
    let mut message = format!("[{}] {}", err.code(), err);
    if err.is_indeterminate() {
        message.push_str("\n  The operation may or may not have taken effect.");
    }
    if let Some(hint) = err.suggestion() {
        message.push_str(&format!("\n  Try: {}", hint));
    }
    anyhow::anyhow!(message)
}

fn resolve_actor(actor: Option<String>) -> anyhow::Result<String> {
    actor
        .or_else(|| std::env::var("EASEL_ACTOR").ok())
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| anyhow::anyhow!("No actor given. Pass --actor <id> or set EASEL_ACTOR."))
}

fn parse_state(state: &str) -> anyhow::Result<LifecycleState> {
    LifecycleState::parse(state).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid state: {}. Valid options: active, archived, deleted",
            state
        )
    })
}

fn print_lock(lock: &Lock) {
    println!("Lock: {}", lock.id);
    println!("  Resource: {}", lock.resource_id);
    println!("  Holder: {}", lock.holder_id);
    println!("  Tier: {}", lock.tier);
    println!("  Expires: {}", lock.expires_at.format("%Y-%m-%d %H:%M:%S"));
    if !lock.purpose.is_empty() {
        println!("  Purpose: {}", lock.purpose);
    }
}

fn print_status(status: &LockStatus) {
    match (&status.holder_id, status.tier, status.expires_at) {
        (Some(holder), Some(tier), Some(expires_at)) if status.held => {
            println!(
                "{}: held by {} ({}) until {}",
                status.resource_id,
                holder,
                tier,
                expires_at.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(purpose) = status.purpose.as_deref().filter(|p| !p.is_empty()) {
                println!("  Purpose: {}", purpose);
            }
        }
        _ => println!("{}: free", status.resource_id),
    }
    if !status.viewers.is_empty() {
        println!("  Viewers: {}", status.viewers.join(", "));
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_lock(
    app: &App,
    action: LockAction,
    actor: Option<String>,
    out: Output,
) -> anyhow::Result<()> {
    match action {
        LockAction::Acquire {
            resource_id,
            tier,
            ttl,
            purpose,
        } => {
            let holder = resolve_actor(actor)?;
            let lock = app
                .locks
                .acquire(&resource_id, &holder, tier, ttl.map(Duration::from_secs), &purpose)
                .await
                .map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&lock)?)?;
            } else if out.quiet {
                println!("{}", lock.id);
            } else {
                println!("Lock acquired.");
                print_lock(&lock);
            }
        }
        LockAction::Refresh { lock_id, ttl } => {
            let holder = resolve_actor(actor)?;
            let lock = app
                .locks
                .refresh(lock_id, &holder, ttl.map(Duration::from_secs))
                .await
                .map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&lock)?)?;
            } else {
                out.note(format!(
                    "Lock {} extended until {}.",
                    lock.id,
                    lock.expires_at.format("%Y-%m-%d %H:%M:%S")
                ));
            }
        }
        LockAction::Release { lock_id } => {
            let holder = resolve_actor(actor)?;
            let outcome = app.locks.release(lock_id, &holder).await.map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::json!({
                    "lock_id": lock_id,
                    "released": outcome.changed(),
                }))?;
            } else {
                match outcome {
                    ReleaseOutcome::Released(_) => out.note(format!("Lock {} released.", lock_id)),
                    ReleaseOutcome::AlreadyReleased => {
                        out.note(format!("Lock {} was already released.", lock_id))
                    }
                }
            }
        }
        LockAction::Override {
            resource_id,
            tier,
            reason,
        } => {
            let actor = resolve_actor(actor)?;
            let lock = app
                .locks
                .override_lock(&resource_id, &actor, tier, &reason)
                .await
                .map_err(explain)?;
            warn!(resource_id = %resource_id, actor = %actor, "Override issued from CLI");
            if out.json() {
                out.print_json(serde_json::to_value(&lock)?)?;
            } else if out.quiet {
                println!("{}", lock.id);
            } else {
                println!("Lock overridden.");
                print_lock(&lock);
            }
        }
        LockAction::Status { resource_id } => {
            let status = app.locks.status(&resource_id).await.map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&status)?)?;
            } else {
                print_status(&status);
            }
        }
        LockAction::List => {
            let locks = app.locks.active_locks().await.map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&locks)?)?;
            } else if locks.is_empty() {
                out.note("No active locks.");
            } else {
                out.note("Active locks:");
                for lock in locks {
                    println!(
                        "  {} - {} held by {} ({}) until {}",
                        lock.id,
                        lock.resource_id,
                        lock.holder_id,
                        lock.tier,
                        lock.expires_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
    }
    Ok(())
}

async fn cmd_resource(
    app: &App,
    action: ResourceAction,
    actor: Option<String>,
    out: Output,
) -> anyhow::Result<()> {
    match action {
        ResourceAction::Register { title, id } => {
            let actor = resolve_actor(actor)?;
            let resource = app
                .lifecycle
                .register(id.as_deref(), &title, &actor)
                .await
                .map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&resource)?)?;
            } else if out.quiet {
                println!("{}", resource.id);
            } else {
                println!("Resource registered.");
                println!("  ID: {}", resource.id);
                println!("  Title: {}", resource.title);
            }
        }
        ResourceAction::Show { id } => {
            let resource = app.lifecycle.get(&id).await.map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&resource)?)?;
            } else {
                println!("Resource: {}", resource.title);
                println!("  ID: {}", resource.id);
                println!("  State: {}", resource.lifecycle_state);
                println!("  Created by: {}", resource.created_by);
                println!("  Created: {}", resource.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Updated: {}", resource.updated_at.format("%Y-%m-%d %H:%M:%S"));
                if let (Some(at), Some(by)) = (resource.archived_at, &resource.archived_by) {
                    println!("  Archived: {} by {}", at.format("%Y-%m-%d %H:%M:%S"), by);
                }
            }
        }
        ResourceAction::List { state } => {
            let state = state.as_deref().map(parse_state).transpose()?;
            let resources = app.lifecycle.list(state).await.map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&resources)?)?;
            } else if resources.is_empty() {
                out.note("No resources found.");
                out.note("\nRegister one with: easel resource register <title>");
            } else {
                out.note("Resources:");
                for r in resources {
                    let state_indicator = match r.lifecycle_state {
                        LifecycleState::Active => "",
                        LifecycleState::Archived => " [archived]",
                        LifecycleState::Deleted => " [deleted]",
                    };
                    println!("  {} - {}{}", r.id, r.title, state_indicator);
                }
            }
        }
        ResourceAction::Archive { id } => {
            let actor = resolve_actor(actor)?;
            let resource = app.lifecycle.archive(&id, &actor).await.map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&resource)?)?;
            } else {
                out.note(format!("Resource '{}' archived.", id));
            }
        }
        ResourceAction::Restore { id } => {
            let actor = resolve_actor(actor)?;
            let resource = app.lifecycle.restore(&id, &actor).await.map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&resource)?)?;
            } else {
                out.note(format!("Resource '{}' restored.", id));
            }
        }
        ResourceAction::Delete { id, force } => {
            if !force {
                if !out.quiet {
                    println!("Warning: This will permanently delete resource '{}'.", id);
                    println!("Use --force to confirm deletion.");
                }
                return Ok(());
            }
            let actor = resolve_actor(actor)?;
            let resource = app
                .lifecycle
                .permanent_delete(&id, &actor)
                .await
                .map_err(explain)?;
            if out.json() {
                out.print_json(serde_json::to_value(&resource)?)?;
            } else {
                out.note(format!("Resource '{}' permanently deleted.", id));
            }
        }
    }
    Ok(())
}

async fn cmd_audit(
    app: &App,
    resource_id: &str,
    limit: Option<usize>,
    out: Output,
) -> anyhow::Result<()> {
    let entries = app
        .audit
        .entries_for(resource_id, limit)
        .await
        .map_err(explain)?;

    if out.json() {
        return out.print_json(serde_json::to_value(&entries)?);
    }
    if entries.is_empty() {
        out.note(format!("No audit entries for '{}'.", resource_id));
        return Ok(());
    }

    for entry in entries {
        let mut line = format!(
            "{} {:<16} {:<16} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            entry.outcome.as_str(),
            entry.actor_id
        );
        if let Some(tier) = entry.tier {
            line.push_str(&format!(" [{}]", tier));
        }
        if let Some(reason) = &entry.reason {
            line.push_str(&format!(" \"{}\"", reason));
        }
        println!("{}", line);
    }
    Ok(())
}

async fn cmd_sweep(app: &App, once: bool, out: Output) -> anyhow::Result<()> {
    let sweeper = app.locks.sweeper();

    if once {
        let report = sweeper.sweep_once().await.map_err(explain)?;
        if out.json() {
            out.print_json(serde_json::to_value(report)?)?;
        } else {
            out.note(format!(
                "Sweep complete: {} expired, {} tombstones purged.",
                report.expired, report.purged
            ));
            if report.failed > 0 {
                out.note(format!(
                    "{} lease records could not be swept; they are retried on the next pass.",
                    report.failed
                ));
            }
        }
        return Ok(());
    }

    out.note(format!(
        "Sweeping every {}s. Press Ctrl+C to stop.",
        sweeper.interval().as_secs()
    ));
    let cancel = CancellationToken::new();
    let handle = sweeper.spawn(cancel.clone());

    tokio::signal::ctrl_c().await?;
    info!("Stopping sweeper");
    cancel.cancel();
    handle.await?;
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            if out.json() {
                out.print_json(serde_json::to_value(&config)?)?;
            } else {
                for (key, value) in config.list()? {
                    println!("{} = {}", key, value);
                }
            }
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            out.note(format!("Set {} = {}", key, value));
        }
        ConfigAction::Init => {
            let path = Config::config_path()?;
            if path.exists() {
                out.note(format!("Config file already exists: {}", path.display()));
            } else {
                let path = Config::default().save()?;
                out.note(format!("Wrote default configuration to {}", path.display()));
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(db_path: Option<PathBuf>, out: Output) -> anyhow::Result<()> {
    let quiet = out.quiet;
    if !quiet {
        println!("Easel Health Check");
        println!("==================");
        println!();
    }

    let mut all_ok = true;

    // Check configuration
    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
            Config::default()
        }
    };

    // Check config file location
    if !quiet {
        match Config::config_path() {
            Ok(path) => {
                if path.exists() {
                    println!("[OK] Config file: {}", path.display());
                } else {
                    println!("[--] Config file: {} (using defaults)", path.display());
                }
            }
            Err(e) => {
                println!("[!!] Config file: Error - {}", e);
            }
        }
    }

    // Check database
    match App::open(&config, db_path).await {
        Ok(app) => {
            match app.db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: Connected");
                        println!("     Path: {}", app.db.path().display());
                    }

                    match app.db.migration_status().await {
                        Ok(status) if status.needs_migration => {
                            all_ok = false;
                            if !quiet {
                                println!(
                                    "[!!] Database: Migrations pending (v{} -> v{})",
                                    status.current_version, status.target_version
                                );
                            }
                        }
                        Ok(status) => {
                            if !quiet {
                                println!("[OK] Database: Schema v{}", status.current_version);
                            }
                        }
                        Err(e) => {
                            all_ok = false;
                            if !quiet {
                                println!("[!!] Database: Migration check failed - {}", e);
                            }
                        }
                    }

                    if !quiet {
                        let locks = app.locks.active_locks().await.unwrap_or_default();
                        let resources = app.lifecycle.list(None).await.unwrap_or_default();
                        println!("     Active locks: {}", locks.len());
                        println!("     Resources: {}", resources.len());
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Health check failed - {}", e);
                    }
                }
            }
            app.db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Failed to initialize - {}", e);
            }
        }
    }

    // Summary
    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}

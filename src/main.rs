//! # Herald — broadcast dispatch coordinator
//!
//! Watches a content source for new items and fans them out to messaging
//! recipients, on demand or on a cron schedule.
//!
//! Usage:
//!   herald run                         # Run the daemon (connect + scheduler)
//!   herald dispatch                    # One-shot broadcast of the latest item
//!   herald dispatch --force            # Re-send even if already broadcast
//!   herald status                      # Connection, state, and schedule summary
//!   herald schedule list               # Show schedules and next run times
//!   herald schedule add --cron "0 9 * * 6" --name weekend
//!   herald recipient add <id>          # Add a recipient to the active selection

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use herald_core::HeraldConfig;
use herald_core::types::ScheduleDefinition;

mod app;
use app::App;

#[derive(Parser)]
#[command(
    name = "herald",
    version,
    about = "📣 Herald — watches a channel and broadcasts new items to your groups"
)]
struct Cli {
    /// Config file (default: ~/.herald/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon: connect, schedule, broadcast
    Run,
    /// Broadcast the latest item once and exit
    Dispatch {
        /// Re-send even if the latest item was already broadcast
        #[arg(long)]
        force: bool,
    },
    /// Show configuration, state, and schedule summary
    Status,
    /// Manage broadcast schedules
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },
    /// Manage the active recipient selection
    Recipient {
        #[command(subcommand)]
        command: RecipientCommand,
    },
    /// Inspect or force-clear dispatch locks
    Locks {
        #[command(subcommand)]
        command: LocksCommand,
    },
}

#[derive(Subcommand)]
enum LocksCommand {
    /// List currently held locks
    List,
    /// Force-clear every held lock
    Clear,
}

#[derive(Subcommand)]
enum ScheduleCommand {
    /// List schedules with their next run times
    List,
    /// Add a schedule (either --cron or --at)
    Add {
        /// Schedule name
        #[arg(long)]
        name: String,
        /// 5-field cron expression, e.g. "0 9 * * 6"
        #[arg(long)]
        cron: Option<String>,
        /// Daily time HH:MM (shorthand for "M H * * *")
        #[arg(long)]
        at: Option<String>,
        /// Weekdays for --at, comma-separated 0-6 (0 = Sunday)
        #[arg(long, value_delimiter = ',')]
        days: Vec<u32>,
    },
    /// Remove a schedule by id (built-in schedules are protected)
    Remove { id: String },
    /// Enable a schedule
    Enable { id: String },
    /// Disable a schedule without removing it
    Disable { id: String },
}

#[derive(Subcommand)]
enum RecipientCommand {
    /// List the active selection
    List,
    /// Add a recipient id to the active selection
    Add { id: String },
    /// Remove a recipient id from the active selection
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "herald=debug,herald_core=debug,herald_dispatch=debug,herald_scheduler=debug,herald_transport=debug"
    } else {
        "herald=info,herald_core=info,herald_dispatch=info,herald_scheduler=info,herald_transport=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => HeraldConfig::load_from(std::path::Path::new(path))?,
        None => HeraldConfig::load()?,
    };

    let app = App::build(config)?;

    match cli.command {
        Command::Run => run(&app).await,
        Command::Dispatch { force } => dispatch_once(&app, force).await,
        Command::Status => status(&app),
        Command::Schedule { command } => schedule(&app, command),
        Command::Recipient { command } => recipient(&app, command),
        Command::Locks { command } => locks(&app, command),
    }
}

fn locks(app: &App, command: LocksCommand) -> Result<()> {
    match command {
        LocksCommand::List => {
            let held = app.locks.snapshot();
            if held.is_empty() {
                println!("no locks held");
            }
            for (scope, key, age) in held {
                println!("{scope}:{key} held for {age:?}");
            }
        }
        LocksCommand::Clear => {
            let count = app.locks.held_count();
            app.locks.clear_all();
            println!("🔓 cleared {count} lock(s)");
        }
    }
    Ok(())
}

async fn run(app: &App) -> Result<()> {
    app.register_standard_schedules()?;
    let handles = app.spawn_background();

    if let Err(e) = app.connection.connect().await {
        // The daemon stays up: schedules skip slots until the operator
        // fixes credentials and the next connect succeeds.
        tracing::error!("❌ initial connect failed: {e}");
    }

    tracing::info!("📣 herald running — press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("👋 shutting down");

    app.connection.disconnect().await.ok();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn dispatch_once(app: &App, force: bool) -> Result<()> {
    // No scheduler for a one-shot, just the transport event loop.
    app.connection.spawn_event_loop();
    app.connection.connect().await?;

    let opts = if force {
        herald_dispatch::coordinator::DispatchOptions::forced()
    } else {
        herald_dispatch::coordinator::DispatchOptions::manual()
    };
    match app.coordinator.dispatch(opts).await {
        Ok(result) => {
            println!(
                "✅ dispatched to {}/{} recipients ({} failed)",
                result.succeeded, result.attempted, result.failed
            );
            for (recipient, reason) in &result.errors {
                println!("   ⚠️ {}: {reason}", recipient.name);
            }
        }
        Err(herald_core::HeraldError::NothingNew) => {
            println!("📭 nothing new — latest item was already broadcast (use --force to re-send)");
        }
        Err(e) => {
            app.connection.disconnect().await.ok();
            return Err(e.into());
        }
    }
    app.connection.disconnect().await.ok();
    Ok(())
}

fn status(app: &App) -> Result<()> {
    let state = app.store.snapshot();
    println!("📣 Herald status\n");
    println!("source channel:    {}", display_or_unset(&app.config.source.channel_id));
    println!("transport phone:   {}", display_or_unset(&app.config.transport.phone_number_id));
    println!("last item:         {}", state.last_item_id.as_deref().unwrap_or("(none)"));
    println!("active recipients: {}", state.active_recipients.len());
    for id in &state.active_recipients {
        println!("   • {id}");
    }
    println!("schedules:         {}", state.schedules.len());
    for def in &state.schedules {
        let kind = if def.standard { "built-in" } else { "custom" };
        let flag = if def.enabled { "on " } else { "off" };
        println!("   [{flag}] {} ({}, {kind}) — {}", def.name, def.expression, def.id);
    }
    let held = app.locks.snapshot();
    if !held.is_empty() {
        println!("held locks:        {}", held.len());
        for (scope, key, age) in held {
            println!("   • {scope}:{key} ({age:?})");
        }
    }
    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.is_empty() { "(not configured)" } else { value }
}

fn schedule(app: &App, command: ScheduleCommand) -> Result<()> {
    match command {
        ScheduleCommand::List => {
            for (def, next) in app.engine.list() {
                let next = next
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{:30} {:15} next: {next}   id: {}", def.name, def.expression, def.id);
            }
        }
        ScheduleCommand::Add { name, cron, at, days } => {
            let expression = match (cron, at) {
                (Some(expr), None) => expr,
                (None, Some(time)) => {
                    let (h, m) = time
                        .split_once(':')
                        .ok_or_else(|| anyhow::anyhow!("--at expects HH:MM"))?;
                    herald_scheduler::expression_for_time(h.parse()?, m.parse()?, &days)?
                }
                _ => anyhow::bail!("pass exactly one of --cron or --at"),
            };
            let def = ScheduleDefinition::custom(&name, &expression);
            let id = def.id.clone();
            app.engine.register(def)?;
            println!("📅 schedule '{name}' added ({expression}), id: {id}");
        }
        ScheduleCommand::Remove { id } => {
            if app.engine.remove(&id)? {
                println!("🗑️ schedule '{id}' removed");
            } else {
                println!("schedule '{id}' not found");
            }
        }
        ScheduleCommand::Enable { id } => {
            if app.engine.set_enabled(&id, true)? {
                println!("📅 schedule '{id}' enabled");
            } else {
                println!("schedule '{id}' not found");
            }
        }
        ScheduleCommand::Disable { id } => {
            if app.engine.set_enabled(&id, false)? {
                println!("📅 schedule '{id}' disabled");
            } else {
                println!("schedule '{id}' not found");
            }
        }
    }
    Ok(())
}

fn recipient(app: &App, command: RecipientCommand) -> Result<()> {
    match command {
        RecipientCommand::List => {
            for id in app.store.active_recipients() {
                println!("{id}");
            }
        }
        RecipientCommand::Add { id } => {
            if app.store.set_recipient_active(&id, true)? {
                println!("✅ '{id}' added to the active selection");
            } else {
                println!("'{id}' was already active");
            }
        }
        RecipientCommand::Remove { id } => {
            if app.store.set_recipient_active(&id, false)? {
                println!("🗑️ '{id}' removed from the active selection");
            } else {
                println!("'{id}' was not active");
            }
        }
    }
    Ok(())
}

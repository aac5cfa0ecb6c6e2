use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use watchpost::events::EventStore;
use watchpost::WatchpostConfig;

/// Inspect the watchpost event store.
#[derive(Parser, Debug)]
#[command(name = "eventlog")]
#[command(about = "Query events and actions recorded by watchpost")]
struct Args {
    /// Database file (defaults to events.database_path from the config)
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[arg(short = 'c', long, default_value = "watchpost.toml")]
    config: PathBuf,

    /// Print JSON instead of tables
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Most recent events, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// One event with the actions it produced
    Show { event: String },
    /// Events per day
    Daily {
        #[arg(short, long, default_value_t = 7)]
        days: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path = match args.database {
        Some(path) => path,
        None => {
            let config = WatchpostConfig::load_from_file(&args.config).with_context(|| {
                format!("no --database given and {} could not be read", args.config.display())
            })?;
            PathBuf::from(config.events.database_path)
        }
    };
    if !path.exists() {
        return Err(anyhow!("event store {} does not exist", path.display()));
    }
    let store = EventStore::open(&path)
        .with_context(|| format!("failed to open event store {}", path.display()))?;

    match args.command {
        Command::List { limit } => {
            let events = store.recent_events(limit)?;
            if args.json {
                return print_json(&events);
            }
            for event in events {
                println!(
                    "{}  {:<8} {:<16} {:<14} {}",
                    event.timestamp, event.event_type, event.trigger, event.trigger_type, event.trigger_param
                );
            }
        }
        Command::Show { event } => {
            let record = store
                .event(&event)?
                .ok_or_else(|| anyhow!("no event {}", event))?;
            let actions = store.actions_for(&event)?;
            if args.json {
                #[derive(Serialize)]
                struct Detail<'a> {
                    event: &'a watchpost::events::EventRecord,
                    actions: &'a [watchpost::events::ActionRecord],
                }
                return print_json(&Detail {
                    event: &record,
                    actions: &actions,
                });
            }
            println!("event    {}", record.timestamp);
            println!("trigger  {} ({}, {})", record.trigger, record.trigger_type, record.trigger_param);
            println!("type     {}", record.event_type);
            for action in actions {
                let duration = action
                    .action_duration
                    .map(|secs| format!("{:.1}s", secs))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {} {:<8} {:>7}  {}",
                    action.time, action.action_type, duration, action.fullpath
                );
            }
        }
        Command::Daily { days } => {
            let counts = store.daily_counts(days)?;
            if args.json {
                return print_json(&counts);
            }
            for day in counts {
                println!("{}  {}", day.date, day.events);
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

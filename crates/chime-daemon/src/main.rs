use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chime_core::ChimeConfig;
use chime_scheduler::{
    upcoming, AlarmEngine, AlarmGateway, DayInterval, FiredAlarm, MemoryTriggerStore, Repeat,
    TimeOfDay, Trigger, TriggerAction, TriggerRecord, TriggerService, WeekdayFormatter,
    WeekdaySet,
};
use chrono::{Local, Weekday};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "chime", version, about = "Timer trigger scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the next fire times of a trigger described on the command line
    Next {
        #[arg(long)]
        hour: i64,

        #[arg(long, default_value_t = 0)]
        minute: i64,

        #[arg(long, value_enum, default_value_t = RepeatArg::Once)]
        repeat: RepeatArg,

        /// Days for a weekly trigger, e.g. `mon,wed,fri`
        #[arg(long, value_delimiter = ',')]
        days: Vec<Weekday>,

        /// Interval for an every-N-days trigger (1..=127)
        #[arg(long, default_value_t = 1)]
        interval: i64,

        /// How many instants to print (default: 5)
        #[arg(long, default_value_t = 5)]
        count: usize,
    },

    /// Render a day selection in the configured week order
    Days {
        #[arg(value_delimiter = ',')]
        days: Vec<Weekday>,

        /// Override the configured first day of the week
        #[arg(long)]
        first_day: Option<Weekday>,
    },

    /// Arm the triggers from a JSON file and fire them until Ctrl-C
    Run {
        /// JSON array of trigger records
        #[arg(long)]
        triggers: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RepeatArg {
    Once,
    Weekly,
    EveryDays,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime_daemon=info,chime_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: CHIME_CONFIG env > ~/.chime/chime.toml
    let config_path = std::env::var("CHIME_CONFIG").ok();
    let config = ChimeConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ChimeConfig::default()
    });

    match cli.command {
        Command::Next {
            hour,
            minute,
            repeat,
            days,
            interval,
            count,
        } => {
            let trigger = Trigger::draft(0, TriggerAction::Start, TimeOfDay::new(hour, minute)?)
                .with_repeat(build_repeat(repeat, &days, interval)?);
            let formatter = WeekdayFormatter::from_config(&config.schedule)?;
            let summary = formatter.describe(&trigger.repeat);
            if summary.is_empty() {
                println!("{} once", trigger.time);
            } else {
                println!("{} {}", trigger.time, summary);
            }
            for at in upcoming(&trigger, &Local::now(), count) {
                println!("  {}", at.format("%a %Y-%m-%d %H:%M %Z"));
            }
        }

        Command::Days { days, first_day } => {
            let mut schedule = config.schedule.clone();
            if let Some(day) = first_day {
                schedule.first_day_of_week = day;
            }
            let formatter = WeekdayFormatter::from_config(&schedule)?;
            println!("{}", formatter.format(&WeekdaySet::from_days(days)));
        }

        Command::Run { triggers } => run(&config, &triggers).await?,
    }
    Ok(())
}

/// Assemble a repeat rule from CLI flags. A weekly rule with no days
/// collapses to a one-shot.
fn build_repeat(kind: RepeatArg, days: &[Weekday], interval: i64) -> Result<Repeat> {
    let repeat = match kind {
        RepeatArg::Once => {
            if !days.is_empty() {
                bail!("--days only applies to --repeat weekly");
            }
            Repeat::Once
        }
        RepeatArg::Weekly => Repeat::Weekly(WeekdaySet::from_days(days.iter().copied())),
        RepeatArg::EveryDays => Repeat::EveryDays(DayInterval::new(interval)?),
    };
    Ok(repeat.normalized())
}

async fn run(config: &ChimeConfig, triggers_path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(triggers_path)
        .with_context(|| format!("reading {}", triggers_path.display()))?;
    let records: Vec<TriggerRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", triggers_path.display()))?;

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    let gateway = Arc::new(AlarmGateway::new(db)?);
    let (fired_tx, mut fired_rx) = mpsc::channel(config.engine.channel_capacity.max(1));
    let engine = AlarmEngine::sharing(
        &gateway,
        Some(fired_tx),
        Duration::from_secs(config.engine.poll_interval_secs.max(1)),
    );

    let store = Arc::new(MemoryTriggerStore::from_records(records)?);
    let service = TriggerService::new(store, gateway.clone());
    let formatter = WeekdayFormatter::from_config(&config.schedule)?;

    for (id, outcome) in service.restore_all()? {
        if outcome.is_failed() {
            warn!(trigger_id = id, ?outcome, "trigger not armed");
        }
    }
    for alarm in gateway.pending()? {
        info!(
            trigger_id = alarm.trigger_id,
            fire_at = %alarm.fire_at.with_timezone(&Local),
            "pending"
        );
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("waiting for Ctrl-C failed: {e}");
        }
        info!("interrupt received");
    };
    consume_fired(&service, &formatter, &mut fired_rx, interrupted).await;

    // signal engine to stop
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    Ok(())
}

/// Apply fired alarms to their triggers until `stop` resolves or the engine
/// side of the channel goes away. A failing alarm is logged and skipped.
async fn consume_fired(
    service: &TriggerService,
    formatter: &WeekdayFormatter,
    fired_rx: &mut mpsc::Receiver<FiredAlarm>,
    stop: impl Future<Output = ()>,
) {
    tokio::pin!(stop);
    loop {
        tokio::select! {
            alarm = fired_rx.recv() => {
                let Some(alarm) = alarm else {
                    warn!("fired channel closed");
                    break;
                };
                match service.handle_fired(alarm.trigger_id) {
                    Ok(Some((trigger, outcome))) => info!(
                        timer_id = alarm.timer_id,
                        action = %alarm.action,
                        label = %trigger.label,
                        repeat = %formatter.describe(&trigger.repeat),
                        ?outcome,
                        "trigger fired"
                    ),
                    Ok(None) => warn!(trigger_id = alarm.trigger_id, "fired trigger no longer exists"),
                    Err(e) => error!(trigger_id = alarm.trigger_id, "handling fired alarm failed: {e}"),
                }
            }
            _ = &mut stop => break,
        }
    }
}

/// Create the parent directory of a file path if it doesn't exist.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

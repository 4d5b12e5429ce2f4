use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, Instant};

use crash_sos_rs::battery::{BatteryGauge, FixedBattery, TermuxBattery};
use crash_sos_rs::location::{FixedLocationSource, TermuxLocationSource};
use crash_sos_rs::sensors::{self, MockMotion, SampleSource, ScriptedImpact};
use crash_sos_rs::{
    Collaborators, DispatchOutcome, EngineConfig, EngineEvent, GeoFix, JsonContactStore,
    JsonlRecordStore, LocationSource, LogTransport, NotificationTransport, RecordStore, SosEngine,
    TermuxTransport,
};

#[derive(Parser, Debug)]
#[command(name = "crash_sos")]
#[command(about = "Accident detection with automatic SOS to emergency contacts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch motion samples and dispatch SOS on a detected accident
    Monitor(MonitorArgs),
    /// Manage emergency contacts
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
        #[arg(long, global = true, default_value = DEFAULT_CONTACTS)]
        contacts: PathBuf,
    },
    /// Show or clear the accident history
    History {
        #[command(subcommand)]
        action: HistoryAction,
        #[arg(long, global = true, default_value = DEFAULT_RECORDS)]
        records: PathBuf,
    },
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Engine config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the countdown length from the config
    #[arg(long, value_name = "SECONDS")]
    countdown: Option<u64>,

    /// Override the cooldown length from the config
    #[arg(long, value_name = "SECONDS")]
    cooldown: Option<u64>,

    #[arg(long, default_value = DEFAULT_CONTACTS)]
    contacts: PathBuf,

    #[arg(long, default_value = DEFAULT_RECORDS)]
    records: PathBuf,

    /// Replay a recorded sample log (.json or .json.gz) instead of live data
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Inject one impact into mock data, e.g. 10:42.9
    #[arg(long, value_name = "SECS:MAGNITUDE")]
    mock_impact: Option<String>,

    /// Fixed position reported for every dispatch
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    lat: Option<f64>,

    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    lon: Option<f64>,

    /// Use Termux:API for sensors, location, SMS and calls
    #[arg(long)]
    termux: bool,

    /// Output directory for live status
    #[arg(long, default_value = "crash_sos_sessions")]
    output_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum ContactsAction {
    List,
    Add { number: String },
    /// Remove by position as shown by `list`
    Remove { index: usize },
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    List,
    Clear,
}

const DEFAULT_CONTACTS: &str = "crash_sos_data/contacts.json";
const DEFAULT_RECORDS: &str = "crash_sos_data/accidents.jsonl";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Monitor(args) => monitor(args).await,
        Command::Contacts { action, contacts } => manage_contacts(action, &contacts),
        Command::History { action, records } => manage_history(action, records).await,
    }
}

async fn monitor(args: MonitorArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(secs) = args.countdown {
        config.countdown_secs = secs;
    }
    if let Some(secs) = args.cooldown {
        config.cooldown_secs = secs;
    }
    config.validate()?;

    let impact = args
        .mock_impact
        .as_deref()
        .map(ScriptedImpact::parse)
        .transpose()?;

    println!("[{}] Crash SOS Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!(
        "  Thresholds: low {:.1}, high {:.1} m/s²",
        config.low_threshold, config.high_threshold
    );
    println!(
        "  Countdown: {}s, cooldown: {}s",
        config.countdown_secs, config.cooldown_secs
    );
    println!("  Contacts: {}", args.contacts.display());
    println!("  Records: {}", args.records.display());
    println!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;

    let location: Arc<dyn LocationSource> = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Arc::new(FixedLocationSource::new(GeoFix::new(lat, lon))),
        _ if args.termux => Arc::new(TermuxLocationSource::new()),
        _ => {
            log::warn!("No --lat/--lon and no --termux: dispatches will have no location");
            Arc::new(FixedLocationSource::unavailable())
        }
    };
    let transport: Arc<dyn NotificationTransport> = if args.termux {
        Arc::new(TermuxTransport)
    } else {
        Arc::new(LogTransport)
    };

    let battery: Arc<dyn BatteryGauge> = if args.termux {
        let gauge = Arc::new(TermuxBattery::new());
        tokio::spawn(battery_loop(gauge.clone()));
        gauge
    } else {
        Arc::new(FixedBattery::new(None))
    };

    let contacts = JsonContactStore::new(&args.contacts);
    let known = contacts.load()?;
    if known.is_empty() {
        log::warn!("No emergency contacts in {}", args.contacts.display());
    }

    let engine = SosEngine::new(
        config,
        Collaborators {
            location,
            contacts: Arc::new(contacts),
            transport,
            records: Arc::new(JsonlRecordStore::new(&args.records)),
            battery,
        },
    )?;

    // Subscribe before samples flow so no event is missed
    let events = engine.subscribe();
    let _events_handle = tokio::spawn(print_events(events));

    let (tx, rx) = mpsc::channel(500);
    engine.start(rx)?;

    let _sensor_handle = match &args.replay {
        Some(path) => {
            let samples = sensors::load_replay(path)
                .with_context(|| format!("loading replay {}", path.display()))?;
            println!("[{}] Replaying {} samples", ts_now(), samples.len());
            tokio::spawn(sensors::replay_loop(tx, samples))
        }
        None => {
            let mock = MockMotion::new(0.02, impact);
            let source = if args.termux {
                SampleSource::Termux(mock)
            } else {
                SampleSource::Mock(mock)
            };
            tokio::spawn(sensors::accel_loop(tx, source))
        }
    };

    println!(
        "[{}] Monitoring. Type 'cancel', 'reset', 'sos' or 'status' and press Enter.",
        ts_now()
    );

    let start = Instant::now();
    let deadline = match args.duration {
        0 => None,
        secs => start.checked_add(Duration::from_secs(secs)),
    };
    let status_path = args.output_dir.join("live_status.json");
    let mut status_tick = interval(Duration::from_secs(2));
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = sleep_until_deadline(deadline) => {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = status_tick.tick() => {
                write_status(&engine, &status_path);
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(command)) => handle_command(&engine, command.trim()),
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    engine.stop();

    let final_path = args.output_dir.join("live_status_final.json");
    write_status(&engine, &final_path);

    let status = engine.status();
    println!("\n=== Final Stats ===");
    println!("Active time: {}", status.active_time());
    println!("Samples: {}", status.samples);
    println!("Incidents detected: {}", status.incidents_detected);
    println!("Incidents cancelled: {}", status.incidents_cancelled);
    println!("Dispatches: {}", status.dispatches);
    println!("Battery: {}", status.battery_label());
    println!("Final state: {:?}", status.state);

    Ok(())
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn handle_command(engine: &SosEngine, command: &str) {
    match command {
        "" => {}
        "cancel" => {
            if engine.request_cancel() {
                println!("[{}] Cancelled, no SOS sent", ts_now());
            } else {
                println!("[{}] Nothing to cancel ({:?})", ts_now(), engine.current_state());
            }
        }
        "reset" => {
            engine.force_reset();
            println!(
                "[{}] Detection paused for {}s",
                ts_now(),
                engine.config().cooldown_secs
            );
        }
        "sos" => match engine.trigger_manual_sos() {
            Ok(id) => println!("[{}] Manual SOS started (incident {})", ts_now(), id),
            Err(err) => println!("[{}] Manual SOS refused: {}", ts_now(), err),
        },
        "status" => {
            let status = engine.status();
            println!(
                "[{}] {:?} | active {} | GPS {:?} | battery {} | {} samples, {} incidents",
                ts_now(),
                status.state,
                status.active_time(),
                status.gps_signal,
                status.battery_label(),
                status.samples,
                status.incidents_detected
            );
        }
        other => println!("Unknown command '{}'", other),
    }
}

async fn battery_loop(gauge: Arc<TermuxBattery>) {
    let mut tick = interval(Duration::from_secs(30));
    loop {
        tick.tick().await;
        if gauge.refresh().await.is_none() {
            log::debug!("[BATTERY] Level unknown");
        }
    }
}

fn write_status(engine: &SosEngine, path: &Path) {
    if let Err(err) = engine.status().save(path) {
        log::warn!("Failed to write {}: {}", path.display(), err);
    }
}

async fn print_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::StateChanged { state }) => {
                println!("[{}] State: {:?}", ts_now(), state);
            }
            Ok(EngineEvent::CountdownTick {
                remaining_secs, ..
            }) => {
                println!("[{}] Auto-send in {} seconds", ts_now(), remaining_secs);
            }
            Ok(EngineEvent::DispatchCompleted { incident, outcome }) => {
                print_outcome(incident, &outcome);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("Event printer lagged, {} events missed", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_outcome(incident: u64, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Dispatched(report) => println!(
            "[{}] Incident {}: SOS sent to {} contact(s), called {}",
            ts_now(),
            incident,
            report.sms.len(),
            report.call.number
        ),
        other => {
            println!("[{}] Incident {}: dispatch finished with problems", ts_now(), incident);
            for err in other.errors() {
                println!("    {}", err);
            }
        }
    }
    if let Some(fix) = outcome.fix() {
        println!("    Location: {}", fix.maps_link());
    }
}

fn manage_contacts(action: ContactsAction, path: &Path) -> Result<()> {
    let store = JsonContactStore::new(path);
    let mut list = store.load()?;

    match action {
        ContactsAction::List => {
            if list.is_empty() {
                println!("No emergency contacts");
            }
            for (index, number) in list.numbers().iter().enumerate() {
                println!("{:>3}  {}", index, number);
            }
        }
        ContactsAction::Add { number } => {
            let added = list.add(&number)?;
            store.save(&list)?;
            println!("Added {} ({} contacts)", added, list.len());
        }
        ContactsAction::Remove { index } => {
            let removed = list.remove(index)?;
            store.save(&list)?;
            println!("Removed {} ({} contacts)", removed, list.len());
        }
    }
    Ok(())
}

async fn manage_history(action: HistoryAction, path: PathBuf) -> Result<()> {
    let store = JsonlRecordStore::new(path);

    match action {
        HistoryAction::List => {
            let records = store.list().await?;
            if records.is_empty() {
                println!("No accidents recorded");
            }
            for record in records {
                let when = match record.time() {
                    Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
                    None => bail!("record {} has an invalid timestamp", record.id),
                };
                println!("{}  {}  {}", record.id, when, record.fix().maps_link());
            }
        }
        HistoryAction::Clear => {
            store.clear().await?;
            println!("Accident history cleared");
        }
    }
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

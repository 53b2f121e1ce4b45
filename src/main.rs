use clap::{Parser, Subcommand};
use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use wristlog::clock::SystemClock;
use wristlog::connection::{BleLink, RadioLink};
use wristlog::engine::{Command, Engine, EngineHandle, LinkFactory};
use wristlog::hardware::{Hardware, HostHardware, Reading};
use wristlog::oplog::{OpLog, OpLogWriter, OPLOG_FILE};
use wristlog::storage::{FsStorage, Storage};
use wristlog::transfer::TransferSession;
use wristlog::{
    device_scanner, SensorRegistry, Settings, SettingsStore, TransferError, TransferMode,
};

#[derive(Parser, Debug)]
#[command(name = "wristlog")]
#[command(author, version, long_about = None)]
#[command(about = "Record wrist sensors into daily logs and ship them over BLE")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Directory holding the log files
    #[arg(long, global = true, value_name = "DIR")]
    storage: Option<PathBuf>,

    /// Report a pressure sensor so the barometer is available
    #[arg(long, global = true)]
    barometer: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record samples fed on stdin until EOF or Ctrl-C
    Record,
    /// List the sensors that can be recorded
    Sensors,
    /// List log files, newest first
    Files,
    /// Delete a log file
    Delete { file: String },
    /// Enable or disable a sensor
    Toggle { sensor: String },
    /// Set the sampling rate in Hz
    Period { hz: u32 },
    /// Send a log file to the configured peer
    Send {
        file: String,
        /// Send the whole file as one JSON envelope
        #[arg(long)]
        envelope: bool,
    },
    /// Scan for nearby Bluetooth LE devices
    Scan {
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
}

/// Everything a subcommand needs, opened from the command line options
struct Context {
    store: SettingsStore,
    settings: Settings,
    storage: Arc<dyn Storage>,
    hardware: Arc<dyn Hardware>,
    registry: SensorRegistry,
    oplog: OpLog,
    _oplog_writer: OpLogWriter,
}

impl Context {
    fn open(cli: &Cli) -> Result<Self, Box<dyn Error>> {
        let settings_path = cli.settings.clone().unwrap_or_else(SettingsStore::default_path);
        let store = SettingsStore::new(settings_path);
        let settings = store.load();

        let dir = cli.storage.clone().unwrap_or_else(|| settings.storage_dir());
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(&dir)?);
        let hardware: Arc<dyn Hardware> = Arc::new(HostHardware::new(cli.barometer));
        let registry = SensorRegistry::discover(hardware.as_ref(), &[], Some(dir.as_path()));
        let (oplog, oplog_writer) = OpLog::start(storage.clone(), OPLOG_FILE);

        log::debug!("Settings at {}, logs in {}", store.path().display(), dir.display());

        Ok(Context {
            store,
            settings,
            storage,
            hardware,
            registry,
            oplog,
            _oplog_writer: oplog_writer,
        })
    }

    fn engine(&self) -> (Engine, EngineHandle) {
        let links: LinkFactory = Arc::new(|| Box::new(BleLink::default()) as Box<dyn RadioLink>);
        Engine::new(
            self.store.clone(),
            self.registry.clone(),
            self.hardware.clone(),
            self.storage.clone(),
            Arc::new(SystemClock),
            links,
            self.oplog.clone(),
        )
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let context = Context::open(&cli)?;

    match cli.command {
        Commands::Record => record(&context),
        Commands::Sensors => {
            for descriptor in context.registry.list() {
                let selected = context.settings.record.contains(&descriptor.key);
                let marker = if selected { "*" } else { " " };
                println!(
                    "{} {:<8} {:<10} {}",
                    marker,
                    descriptor.key,
                    descriptor.name,
                    descriptor.fields.join(",")
                );
            }
            Ok(())
        }
        Commands::Files => {
            let (engine, _handle) = context.engine();
            for file in engine.log_files() {
                println!("{}", file);
            }
            Ok(())
        }
        Commands::Delete { file } => {
            let (mut engine, _handle) = context.engine();
            // Only a running session holds a file; a persisted one will resume into it
            let settings = engine.settings();
            if settings.recording && settings.file.as_deref() == Some(file.as_str()) {
                return Err(wristlog::StorageError::FileInUse(file).into());
            }
            engine.delete_file(&file)?;
            println!("Deleted {}", file);
            Ok(())
        }
        Commands::Toggle { sensor } => {
            let (mut engine, _handle) = context.engine();
            engine.apply(Command::ToggleSensor(sensor.clone()));
            let enabled = engine.settings().record.contains(&sensor);
            println!("{} {}", sensor, if enabled { "enabled" } else { "disabled" });
            Ok(())
        }
        Commands::Period { hz } => {
            let (mut engine, _handle) = context.engine();
            engine.apply(Command::SetPeriod(hz));
            println!("Period {} Hz", engine.settings().period);
            Ok(())
        }
        Commands::Send { file, envelope } => send(&context, &file, envelope),
        Commands::Scan { seconds } => {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            let scan = device_scanner::scan_devices(Duration::from_secs(seconds));
            let devices = runtime.block_on(scan)?;
            for device in devices {
                println!("{}  {}", device.address, device.name);
            }
            Ok(())
        }
    }
}

/// Run the engine on its own thread and feed it from stdin.
///
/// Lines starting with `:` are control lines (`:start`, `:stop`, `:period <hz>`,
/// `:toggle <sensor>`, `:send <file>`, `:delete <file>`); anything else is a
/// sensor reading.
fn record(context: &Context) -> Result<(), Box<dyn Error>> {
    let (engine, handle) = context.engine();
    let engine_thread = std::thread::spawn(move || engine.run());

    handle.set_recording(true);

    let feeder = handle.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let accepted = match line.strip_prefix(':') {
                Some(control) => parse_control(control).map(|command| feeder.send(command)),
                None => Reading::parse_line(line).map(|reading| feeder.reading(reading)),
            };
            match accepted {
                Some(true) => {}
                // Engine has shut down
                Some(false) => return,
                None => log::warn!("Ignoring line: {}", line),
            }
        }
        feeder.set_recording(false);
        feeder.shutdown();
    });

    // Returns on EOF, Ctrl-C or a failed runtime
    if engine_thread.join().is_err() {
        return Err("engine thread panicked".into());
    }
    Ok(())
}

fn parse_control(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match (parts.next()?, parts.next()) {
        ("start", None) => Command::SetRecording(true),
        ("stop", None) => Command::SetRecording(false),
        ("period", Some(hz)) => Command::SetPeriod(hz.parse().ok()?),
        ("toggle", Some(sensor)) => Command::ToggleSensor(sensor.to_string()),
        ("send", Some(file)) => Command::SendFile(file.to_string()),
        ("delete", Some(file)) => Command::DeleteFile(file.to_string()),
        _ => return None,
    };
    Some(command)
}

fn send(context: &Context, file: &str, envelope: bool) -> Result<(), Box<dyn Error>> {
    let settings = &context.settings;
    let peer = settings.peer_address.clone().ok_or(TransferError::NoPeer)?;
    let content = context
        .storage
        .read(file)
        .map_err(|_| TransferError::FileNotFound(file.to_string()))?;

    let mut config = settings.transfer.clone();
    if envelope {
        config.mode = TransferMode::Envelope;
    }

    let session = TransferSession::new(
        file,
        content,
        &peer,
        &config,
        settings.locale_offset,
        Arc::new(SystemClock),
        context.oplog.clone(),
    );

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let mut link = BleLink::default();
    let sent = runtime.block_on(session.run(&mut link))?;
    println!("Sent {} ({} bytes) to {}", file, sent, peer);
    Ok(())
}

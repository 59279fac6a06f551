//! IP Scrambler demo
//!
//! Drives the controller against a simulated relay service: query status,
//! configure routing, start, watch traffic, stop. Prints what a UI would
//! show.

mod relay_sim;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, Sender};
use ipscrambler::{
    FilePreferences, IpScrambler, MemoryPreferences, PreferenceStore, RoutingList,
    ScramblerListener, ScramblerSettings, Status, TrafficSample,
};
use relay_sim::SimulatedRelay;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Drive the IP scrambler against a simulated relay service
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Applications to route through the relay (comma separated)
    #[arg(long, value_delimiter = ',')]
    apps: Vec<String>,

    /// Exit country code, empty for no preference
    #[arg(long, default_value = "")]
    exit: String,

    /// Preference file (JSON); in-memory when omitted
    #[arg(long)]
    prefs: Option<PathBuf>,

    /// Settings file (TOML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bandwidth samples the relay reports after starting
    #[arg(long, default_value_t = 5)]
    steps: u32,

    /// Simulated relay tick in milliseconds
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,
}

/// Prints what the demo screen would show
struct ConsoleListener {
    statuses: Sender<Status>,
}

impl ScramblerListener for ConsoleListener {
    fn on_status_changed(&self, status: Status) {
        println!("[status] {status}");
        let _ = self.statuses.send(status);
    }

    fn on_log(&self, line: &str) {
        println!("[relay ] {line}");
    }

    fn on_traffic_update(&self, sample: TrafficSample) {
        println!("[traffic] {}", sample.format());
    }
}

fn wait_for(statuses: &Receiver<Status>, wanted: Status, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match statuses.recv_timeout(remaining) {
            Ok(status) if status == wanted => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => ScramblerSettings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => ScramblerSettings::default(),
    };

    let prefs: Arc<dyn PreferenceStore> = match &args.prefs {
        Some(path) => Arc::new(
            FilePreferences::open(path)
                .with_context(|| format!("opening preferences {}", path.display()))?,
        ),
        None => Arc::new(MemoryPreferences::new()),
    };

    let tick = Duration::from_millis(args.tick_ms);
    let relay = SimulatedRelay::spawn(args.steps, tick).context("spawning relay simulator")?;

    let mut scrambler = IpScrambler::new(settings, prefs, relay.link(), relay.notifications())
        .context("creating IP scrambler")?;
    relay.attach(scrambler.intake());

    let (status_tx, status_rx) = unbounded();
    scrambler.add_listener(Arc::new(ConsoleListener {
        statuses: status_tx,
    }));

    info!(
        "IP scrambler demo starting (dns port {})",
        scrambler.settings().dns_port
    );

    // Nothing is running yet: answered locally with OFF
    scrambler.request_status();
    wait_for(&status_rx, Status::Off, tick * 5);

    let apps: RoutingList = args.apps.iter().cloned().collect();
    scrambler.set_app_list(&apps)?;
    scrambler.set_exit_country(&args.exit)?;
    println!("Routing apps: {:?}", scrambler.app_list());
    let exit = scrambler.exit_country();
    println!(
        "Exit country: {} (available: {})",
        if exit.is_empty() { "any" } else { exit.as_str() },
        scrambler.available_locations().join(" ")
    );

    scrambler.start()?;
    let settle = tick * (args.steps + 5);
    if wait_for(&status_rx, Status::On, settle) {
        println!("Service active: {}", scrambler.is_service_active());
        println!(
            "Proxies: http={} socks={}",
            scrambler.http_proxy_port(),
            scrambler.socks_proxy_port()
        );
    } else {
        warn!("Relay did not report traffic within {:?}", settle);
    }

    // Live reconfiguration restarts routing
    scrambler.set_app_list(&apps)?;
    scrambler.request_status();
    scrambler.flush();

    scrambler.stop()?;
    if !wait_for(&status_rx, Status::Off, settle) {
        warn!("Relay did not report OFF within {:?}", settle);
    }

    scrambler.flush();
    println!("--- relay log (newest first) ---");
    print!("{}", scrambler.log_history());

    scrambler.shutdown();
    drop(scrambler);
    relay.join();

    info!("IP scrambler demo finished");
    Ok(())
}

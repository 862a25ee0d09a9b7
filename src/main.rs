use std::{
    future::Future,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{info, warn};

use kasactl::{
    bridge::Bridge,
    controller::{BatchReport, Controller, Update, UPDATE_CAPACITY},
    credentials::Credentials,
    logging, tui, DeviceRecord, KasaClient, Settings,
};

fn parse_secs(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|e| format!("{}", e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{}", e))
}

fn cli() -> Command {
    let address = || {
        Arg::new("address")
            .required(true)
            .value_parser(value_parser!(IpAddr))
            .help("IP address of the device")
    };
    let seconds = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .long(name)
            .value_name("SECS")
            .value_parser(parse_secs)
            .global(true)
            .help(help)
    };

    Command::new("kasactl")
        .version(crate_version!())
        .about("Discover and interact with TPLink Kasa smart devices on the local network.")
        .arg(Arg::new("env-file")
            .long("env-file")
            .value_name("PATH")
            .value_parser(value_parser!(PathBuf))
            .global(true)
            .help("File holding KASA_USERNAME and KASA_PASSWORD [default: .env]")
        )
        .arg(seconds("discovery-timeout", "How long to listen for discovery replies [default: 5]"))
        .arg(seconds("timeout", "Connection timeout [default: 10]"))
        .arg(seconds("update-timeout", "State refresh timeout [default: 15]"))
        .arg(Arg::new("concurrency")
            .long("concurrency")
            .value_name("N")
            .value_parser(value_parser!(u16).range(1..))
            .global(true)
            .help("Devices talked to at once [default: 8]")
        )
        .arg(Arg::new("broadcast")
            .long("broadcast")
            .value_name("ADDR")
            .value_parser(value_parser!(Ipv4Addr))
            .global(true)
            .help("Discovery broadcast address [default: 255.255.255.255]")
        )
        .arg(Arg::new("log-file")
            .long("log-file")
            .value_name("PATH")
            .value_parser(value_parser!(PathBuf))
            .default_value("kasactl.log")
            .global(true)
            .help("Where the interactive UI writes its log")
        )
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Log debug output.")
        )
        .arg(Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Respond with JSON.")
        )
        .subcommand(Command::new("tui")
            .about("Interactive device list (the default)")
        )
        .subcommand(Command::new("discover")
            .about("Discover devices on the local network")
        )
        .subcommand(Command::new("info")
            .about("Show one device")
            .arg(address())
        )
        .subcommand(Command::new("on")
            .about("Turn one device on")
            .arg(address())
        )
        .subcommand(Command::new("off")
            .about("Turn one device off")
            .arg(address())
        )
        .subcommand(Command::new("toggle")
            .about("Flip one device")
            .arg(address())
        )
        .subcommand(Command::new("all-on")
            .about("Discover, then turn every device on")
        )
        .subcommand(Command::new("all-off")
            .about("Discover, then turn every device off")
        )
        .subcommand(Command::new("refresh")
            .about("Discover, then re-read every device")
        )
}

fn settings(matches: &ArgMatches) -> Settings {
    let mut settings = Settings::default();
    if let Some(path) = matches.get_one::<PathBuf>("env-file") {
        settings.env_file = path.clone();
    }
    if let Some(timeout) = matches.get_one::<Duration>("discovery-timeout") {
        settings.discovery_timeout = *timeout;
    }
    if let Some(timeout) = matches.get_one::<Duration>("timeout") {
        settings.timeout = *timeout;
    }
    if let Some(timeout) = matches.get_one::<Duration>("update-timeout") {
        settings.update_timeout = *timeout;
    }
    if let Some(concurrency) = matches.get_one::<u16>("concurrency") {
        settings.concurrency = usize::from(*concurrency);
    }
    if let Some(broadcast) = matches.get_one::<Ipv4Addr>("broadcast") {
        settings.broadcast = *broadcast;
    }
    settings
}

fn start(settings: Settings, updates: mpsc::Sender<Update>) -> Result<(Bridge, Controller)> {
    let credentials = Credentials::from_env_file(&settings.env_file);
    let bridge = Bridge::start().context("failed to start the worker thread")?;
    let client = Arc::new(KasaClient::new(&settings));
    let controller = Controller::new(client, settings, credentials, updates);
    Ok((bridge, controller))
}

fn command_tui(settings: Settings, log_file: &Path, verbose: bool) -> Result<()> {
    let _guard = logging::init_file(log_file, verbose)?;
    let grace = settings.shutdown_grace;
    let (tx, rx) = mpsc::channel(UPDATE_CAPACITY);
    let (bridge, controller) = start(settings, tx)?;

    let result = tui::run(&bridge, controller, rx);
    bridge.shutdown(grace);
    result
}

/// Run one controller operation on the worker and wait for it.
fn on_worker<T, F, Fut>(bridge: &Bridge, controller: &Controller, op: F) -> Result<T>
where
    F: FnOnce(Controller) -> Fut,
    Fut: Future<Output = kasactl::error::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let output = bridge
        .run(op(controller.clone()))
        .context("worker stopped before the command finished")?;
    Ok(output?)
}

fn power(device: &DeviceRecord) -> &'static str {
    match device.is_on() {
        Some(true) => "on",
        Some(false) => "off",
        None => "unknown",
    }
}

fn pad(value: &str, padding: usize) -> String {
    let pad = " ".repeat(padding.saturating_sub(value.chars().count()));
    format!("{}{}", value, pad)
}

fn print_human(device: &DeviceRecord) {
    let sysinfo = &device.sysinfo;
    println!(
        "{}\t{}\t{}\t{}\t{}",
        pad(&device.addr.to_string(), 15),
        pad(&device.name(), 18),
        pad(&device.kind.to_string(), 12),
        pad(&sysinfo.model, 20),
        power(device),
    );
}

fn print_devices(devices: &[DeviceRecord], json: bool) -> Result<()> {
    for device in devices {
        if json {
            println!("{}", serde_json::to_string(device)?);
        } else {
            print_human(device);
        }
    }
    Ok(())
}

fn print_report(report: &BatchReport) -> Result<()> {
    for (addr, e) in report.failures() {
        eprintln!("{}\t{}\t{}", pad(&addr.to_string(), 15), e.kind(), e);
    }
    println!("{}", report.status_message());
    if report.failed() > 0 {
        bail!("{} of {} devices failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}

fn run_command(bridge: &Bridge, controller: Controller, name: &str, matches: &ArgMatches) -> Result<()> {
    let json = matches.get_flag("json");
    let address = || {
        matches
            .get_one::<IpAddr>("address")
            .copied()
            .context("missing device address")
    };

    match name {
        "discover" => {
            let devices = on_worker(bridge, &controller, move |c| async move { c.discover().await })?;
            print_devices(&devices, json)
        }
        "info" => {
            let addr = address()?;
            let device = on_worker(bridge, &controller, move |c| async move { c.connect(addr).await })?;
            print_devices(&[device], json)
        }
        "on" | "off" => {
            let on = name == "on";
            let addr = address()?;
            let device = on_worker(bridge, &controller, move |c| async move {
                let device = c.connect(addr).await?;
                c.switch(device, on).await
            })?;
            print_devices(&[device], json)
        }
        "toggle" => {
            let addr = address()?;
            let on = on_worker(bridge, &controller, move |c| async move {
                let device = c.connect(addr).await?;
                c.toggle(device).await
            })?;
            if json {
                println!("{}", json!({ "addr": addr, "on": on }));
            } else {
                println!("{}\t{}", addr, if on { "on" } else { "off" });
            }
            Ok(())
        }
        "all-on" | "all-off" | "refresh" => {
            let devices = on_worker(bridge, &controller, move |c| async move { c.discover().await })?;
            if devices.is_empty() {
                bail!("no devices found on the network");
            }
            let report = match name {
                "refresh" => on_worker(bridge, &controller, move |c| async move { c.refresh(devices).await })?,
                _ => {
                    let on = name == "all-on";
                    on_worker(bridge, &controller, move |c| async move { c.set_all(devices, on).await })?
                }
            };
            print_report(&report)
        }
        other => bail!("unknown command {}", other),
    }
}

fn command_cli(settings: Settings, name: &str, matches: &ArgMatches, verbose: bool) -> Result<()> {
    logging::init_stderr(verbose)?;
    let grace = settings.shutdown_grace;
    let (tx, mut rx) = mpsc::channel(UPDATE_CAPACITY);
    let printer = thread::Builder::new()
        .name(String::from("kasactl-status"))
        .spawn(move || {
            while let Some(update) = rx.blocking_recv() {
                match update {
                    Update::Status(status) => info!("{}", status),
                    Update::Alert { title, message } => warn!(%title, "{}", message),
                    _ => {}
                }
            }
        })
        .context("failed to start the status thread")?;
    let (bridge, controller) = start(settings, tx)?;

    let result = run_command(&bridge, controller, name, matches);
    bridge.shutdown(grace);
    // every sender is gone once the worker has stopped
    if printer.join().is_err() {
        warn!("status thread panicked");
    }
    result
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let (name, sub) = match matches.subcommand() {
        Some((name, sub)) => (name, sub),
        None => ("tui", &matches),
    };
    let settings = settings(sub);
    let verbose = sub.get_flag("verbose");

    match name {
        "tui" => {
            let log_file = sub
                .get_one::<PathBuf>("log-file")
                .cloned()
                .unwrap_or_else(|| PathBuf::from("kasactl.log"));
            command_tui(settings, &log_file, verbose)
        }
        _ => command_cli(settings, name, sub, verbose),
    }
}

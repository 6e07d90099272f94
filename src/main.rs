//! podd — USB HID pod polling daemon.
//!
//! Discovers control pods, polls them at a fixed rate, and feeds lifecycle
//! and update events to the stock handlers: announce devices as they come
//! and go, and log decoded reports.

use std::process::ExitCode;

use clap::Parser;
use log::{debug, error, info};

use podd::config::{expand_tilde, Config};
use podd::eventbus::{CallbackHost, ON_DEVICE_ADDED, ON_DEVICE_REMOVED};
use podd::manager::{CancelToken, PodManager, PollSettings};
use podd::protocol::{self, LedAux};
use podd::transport::HidapiTransport;
use podd::HandlerError;

#[derive(Parser, Debug)]
#[command(
    name = "podd",
    about = "Polls USB HID control pods and dispatches device events"
)]
struct Args {
    /// USB vendor id (decimal or 0x-prefixed hex)
    #[arg(short = 'V', long, value_name = "ID", value_parser = parse_id)]
    vendor_id: Option<u16>,

    /// USB product id (decimal or 0x-prefixed hex)
    #[arg(short = 'P', long, value_name = "ID", value_parser = parse_id)]
    product_id: Option<u16>,

    /// Fixed device path; disables scanning and exits on disconnect
    #[arg(short = 'd', long, value_name = "PATH")]
    device: Option<String>,

    /// Update interval in milliseconds
    #[arg(short = 'u', long, value_name = "MSECS")]
    update_interval: Option<u64>,

    /// Device scan interval in milliseconds (0 disables rescans)
    #[arg(short = 'S', long, value_name = "MSECS")]
    device_scan_interval: Option<u64>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "PATH")]
    config: Option<String>,
}

fn parse_id(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid id {s:?}: {e}"))
}

fn load_config(args: &Args) -> Result<Config, podd::PodError> {
    let path = match &args.config {
        Some(p) => expand_tilde(p),
        None => Config::default_path(),
    };
    let mut config = Config::load_or_default(&path)?;
    if let Some(v) = args.vendor_id {
        config.vendor_id = v;
    }
    if let Some(p) = args.product_id {
        config.product_id = p;
    }
    if let Some(d) = &args.device {
        config.device = Some(d.clone());
    }
    if let Some(u) = args.update_interval {
        config.update_interval_ms = u;
    }
    if let Some(s) = args.device_scan_interval {
        config.scan_interval_ms = s;
    }
    Ok(config)
}

/// Stock handlers: greet a new pod audibly, announce removals, and log every
/// decoded report with a running encoder position.
fn default_host() -> CallbackHost {
    let mut host = CallbackHost::new();

    host.on_fleet(ON_DEVICE_ADDED, |pod| {
        let to_handler = |e: podd::PodError| HandlerError(e.to_string());
        let id = pod.identity().map_err(to_handler)?;
        let version = pod.firmware_version().map_err(to_handler)?;
        info!(
            "{} {} {} (V {version:.2}) added",
            pod.manufacturer().unwrap_or("?"),
            pod.product().unwrap_or("?"),
            id.unwrap_or_default(),
        );
        pod.beep(3, 2, 5).map_err(to_handler)?;
        pod.led_aux_control(LedAux::LED1 | LedAux::LED2)
            .map_err(to_handler)?;
        pod.configure(200, true).map_err(to_handler)?;
        Ok(())
    });

    host.on_fleet(ON_DEVICE_REMOVED, |pod| {
        info!("{} removed", pod.path());
        Ok(())
    });

    let mut pos: i64 = 0;
    host.on_update(move |pod, frame| {
        let report = protocol::decode_report(frame);
        pos += i64::from(report.ticks);
        debug!(
            "{}: pos = {pos}; ticks = {}; button = {}; hold = {}; rocker = {:?}",
            pod.path(),
            report.ticks,
            report.controls.button(),
            report.controls.hold(),
            report.controls.rocker(),
        );
        Ok(())
    });

    host
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            error!("failed to install signal handler: {e}");
            return ExitCode::from(1);
        }
    }

    let transport = match HidapiTransport::new() {
        Ok(t) => t,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(3);
        }
    };

    let mut manager = PodManager::new(
        Box::new(transport),
        Box::new(default_host()),
        PollSettings::from(&config),
    );
    match manager.run(&cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(3)
        }
    }
}

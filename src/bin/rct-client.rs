// ABOUTME: Entry point for the rct-client binary: parses args, wires up logging and a sink, dispatches to the driver

use clap::Parser;
use rct_client::cli::Args;
use rct_client::driver::{self, DriverConfig};
use rct_client::sink::{LineProtocolSink, LoggingSink, TelemetrySink};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(&args) {
        tracing::error!(error = %e, "rct-client exiting with error");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: &Args) -> rct_client::Result<()> {
    let config: DriverConfig = args.driver_config();
    let mut sink: Box<dyn TelemetrySink> = match &args.influx_host {
        Some(host) => Box::new(LineProtocolSink::connect((host.as_str(), args.influx_port))?),
        None => Box::new(LoggingSink),
    };

    if let Some(command) = &args.command {
        driver::read_command(&config, sink.as_mut(), command)
    } else if args.read_all {
        driver::read_all(&config, sink.as_mut())
    } else if args.listen_only {
        driver::listen_only(&config)
    } else {
        driver::monitor(
            &config,
            &SHORT_INTERVAL_PARAMETERS,
            &LONG_INTERVAL_PARAMETERS,
            Duration::from_secs(5),
            Duration::from_secs(60),
            sink.as_mut(),
        )
    }
}

/// Polled every short interval tick. Mirrors `pv_reader.py`'s
/// `short_interval_readings`.
const SHORT_INTERVAL_PARAMETERS: [&str; 9] = [
    "dc_conv.dc_conv_struct[0].p_dc",
    "dc_conv.dc_conv_struct[1].p_dc",
    "g_sync.p_ac_load_sum_lp",
    "g_sync.p_ac_grid_sum_lp",
    "g_sync.p_ac_load[0]",
    "g_sync.p_ac_load[1]",
    "g_sync.p_ac_load[2]",
    "g_sync.p_acc_lp",
    "grid_pll[0].f",
];

/// Polled every long interval tick. Mirrors `pv_reader.py`'s
/// `long_interval_readings`.
const LONG_INTERVAL_PARAMETERS: [&str; 14] = [
    "battery.soc",
    "battery.soc_target",
    "power_mng.amp_hours",
    "battery.voltage",
    "battery.used_energy",
    "battery.stored_energy",
    "prim_sm.island_flag",
    "energy.e_ac_day",
    "energy.e_load_day",
    "energy.e_ac_total",
    "energy.e_grid_feed_day_sum",
    "energy.e_grid_load_day",
    "energy.e_dc_day[0]",
    "energy.e_dc_day[1]",
];

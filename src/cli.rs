// ABOUTME: Command-line surface for the rct-client binary
// ABOUTME: Mirrors `pv_reader.py`'s argparse flags, translated to a clap-derived struct

use std::time::Duration;

use clap::Parser;

use crate::driver::DriverConfig;

/// Read data from an RCT inverter.
#[derive(Parser)]
pub struct Args {
    /// host name or IP of the device
    #[arg(long)]
    pub host: String,

    /// port to connect to
    #[arg(long, default_value_t = 8899)]
    pub port: u16,

    /// send a single named command and print the response, then exit
    #[arg(long)]
    pub command: Option<String>,

    /// read every known value once and print each, then exit
    #[arg(long)]
    pub read_all: bool,

    /// passively log frames without sending requests
    #[arg(long)]
    pub listen_only: bool,

    /// host of an InfluxDB line-protocol listener to report readings to
    #[arg(long)]
    pub influx_host: Option<String>,

    /// port of the InfluxDB line-protocol listener
    #[arg(long, default_value_t = 8899)]
    pub influx_port: u16,

    /// ignore CRC mismatches instead of treating them as errors
    #[arg(long)]
    pub ignore_crc: bool,

    /// enable debug logging
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Args {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            host: self.host.clone(),
            port: self.port,
            read_timeout: Duration::from_secs(3),
            buffer_size: 512,
            ignore_crc_mismatch: self.ignore_crc,
            max_retries: 5,
        }
    }
}

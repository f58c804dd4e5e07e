// ABOUTME: Reconnect/retry driver loops: short/long interval polling, read-all, and passive listen
// ABOUTME: Grounded in `pv_reader.py`'s `monitor_inverter`, `read_all_values`, and `listen_only`

use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use tracing::{error, info, warn};

use crate::codec::decode_value;
use crate::error::{Result, SessionError};
use crate::registry::{DataType, OidRegistry, StaticRegistry};
use crate::session::SessionReader;
use crate::sink::{Reading, TelemetrySink};

/// Connection and retry parameters shared by all driver entry points.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub host: String,
    pub port: u16,
    pub read_timeout: Duration,
    pub buffer_size: usize,
    pub ignore_crc_mismatch: bool,
    pub max_retries: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            host: "localhost".to_string(),
            port: 8899,
            read_timeout: Duration::from_secs(3),
            buffer_size: 512,
            ignore_crc_mismatch: true,
            max_retries: 5,
        }
    }
}

fn connect(config: &DriverConfig, registry: StaticRegistry) -> Result<SessionReader<StaticRegistry>> {
    let session = SessionReader::connect(
        (config.host.as_str(), config.port),
        config.read_timeout,
        config.buffer_size,
        config.ignore_crc_mismatch,
        registry,
    )?;
    Ok(session)
}

/// Reads one batch of named oids and decodes each into a `(name, Value)`
/// pair, skipping any whose data type is `Unknown` (mirrors
/// `read_oid_set`'s `oi.response_data_type != DataType.UNKNOWN` guard).
fn read_named_oids(
    session: &mut SessionReader<StaticRegistry>,
    registry: &StaticRegistry,
    names: &[&str],
) -> Result<Vec<(String, crate::codec::Value)>> {
    let mut out = Vec::with_capacity(names.len());
    for &name in names {
        let info = registry
            .get_by_name(name)
            .ok_or_else(|| anyhow!("unknown parameter name: {name}"))?;
        if info.response_data_type == DataType::Unknown {
            continue;
        }
        let frame = session.read_oid(info.oid)?;
        let value = decode_value(info.response_data_type, &frame.payload)?;
        out.push((name.to_string(), value));
    }
    Ok(out)
}

/// Polls `short_interval_oids` on `short_interval` and `long_interval_oids`
/// on `long_interval`, reporting each batch to `sink`. Reconnects with a
/// `5s * retry` backoff on socket errors, immediately on a clean remote
/// close, and gives up after `config.max_retries` consecutive connection
/// attempts fail.
pub fn monitor(
    config: &DriverConfig,
    short_interval_oids: &[&str],
    long_interval_oids: &[&str],
    short_interval: Duration,
    long_interval: Duration,
    sink: &mut dyn TelemetrySink,
) -> Result<()> {
    let mut connect_retries = 0u32;

    while connect_retries < config.max_retries {
        match run_monitor_session(config, short_interval_oids, long_interval_oids, short_interval, long_interval, sink) {
            Ok(()) => unreachable!("monitor session loop only exits via error"),
            Err(err) => {
                if let Some(SessionError::RemoteClose) = err.downcast_ref::<SessionError>() {
                    error!("server closed connection, reconnecting immediately");
                } else {
                    connect_retries += 1;
                    let backoff = Duration::from_secs(5 * connect_retries as u64);
                    error!(error = %err, retry = connect_retries, "monitor session failed, reconnecting in {backoff:?}");
                    thread::sleep(backoff);
                }
            }
        }
    }

    Err(anyhow!("too many attempts to connect to inverter"))
}

fn run_monitor_session(
    config: &DriverConfig,
    short_interval_oids: &[&str],
    long_interval_oids: &[&str],
    short_interval: Duration,
    long_interval: Duration,
    sink: &mut dyn TelemetrySink,
) -> Result<()> {
    let registry = StaticRegistry::new();
    let mut session = connect(config, StaticRegistry::new())?;
    let mut read_retries = 0u32;
    let mut last_long_read = Instant::now() - long_interval;

    loop {
        let start = Instant::now();
        let outcome = read_named_oids(&mut session, &registry, short_interval_oids);
        match outcome {
            Ok(readings) => {
                report(sink, "pv_short", &readings);
                read_retries = 0;

                if start.duration_since(last_long_read) >= long_interval {
                    let long_readings = read_named_oids(&mut session, &registry, long_interval_oids)?;
                    report(sink, "pv_long", &long_readings);
                    last_long_read = start;
                }
            }
            Err(err) => {
                read_retries += 1;
                warn!(error = %err, read_retries, "error during poll cycle");
                if read_retries >= config.max_retries {
                    return Err(err);
                }
            }
        }

        let elapsed = start.elapsed();
        if elapsed < short_interval {
            thread::sleep(short_interval - elapsed);
        }
    }
}

fn report(sink: &mut dyn TelemetrySink, measurement: &str, readings: &[(String, crate::codec::Value)]) {
    if readings.is_empty() {
        return;
    }
    let as_readings: Vec<Reading<'_>> = readings
        .iter()
        .map(|(name, value)| Reading { name, value, unit: None })
        .collect();
    if let Err(e) = sink.report(measurement, &as_readings) {
        warn!(error = %e, "failed to report readings");
    }
}

/// Reads every object the registry knows about, once, logging each value as
/// it arrives. Mirrors `read_all_values`.
pub fn read_all(config: &DriverConfig, sink: &mut dyn TelemetrySink) -> Result<()> {
    let registry = StaticRegistry::new();
    let names: Vec<String> = registry.all().map(|o| o.name.to_string()).collect();
    let mut session = connect(config, StaticRegistry::new())?;

    info!(count = names.len(), "reading all known values");
    for name in &names {
        let info = registry.get_by_name(name).expect("name came from this registry");
        if info.response_data_type == DataType::Unknown {
            continue;
        }
        let mut retry = 0u32;
        loop {
            match session.read_oid(info.oid) {
                Ok(frame) => {
                    let value = decode_value(info.response_data_type, &frame.payload)?;
                    report(sink, "pv_all", std::slice::from_ref(&(name.clone(), value)));
                    break;
                }
                Err(SessionError::Timeout) if retry < 3 => {
                    retry += 1;
                    warn!(name, retry, "timeout reading value, retrying");
                    thread::sleep(Duration::from_secs(retry as u64));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

/// Sends a single named read request and reports the decoded response.
/// Mirrors `send_command`.
pub fn read_command(config: &DriverConfig, sink: &mut dyn TelemetrySink, name: &str) -> Result<()> {
    let registry = StaticRegistry::new();
    let info = registry
        .get_by_name(name)
        .ok_or_else(|| anyhow!("unknown parameter name: {name}"))?;
    let mut session = connect(config, StaticRegistry::new())?;

    info!(name, "sending command");
    let frame = session.read_oid(info.oid)?;
    let value = decode_value(info.response_data_type, &frame.payload)?;
    report(sink, "pv_command", std::slice::from_ref(&(name.to_string(), value)));
    Ok(())
}

/// Connects and passively logs every frame the device sends without
/// requesting anything (mirrors `listen_only`: useful for sniffing whatever
/// the device reports on its own schedule).
pub fn listen_only(config: &DriverConfig) -> Result<()> {
    let registry = StaticRegistry::new();
    let mut session = connect(config, registry)?;
    session.register_callback(|frame| {
        info!(oid = frame.oid, crc_ok = frame.crc_ok, len = frame.payload.len(), "frame received");
    });
    info!("listening passively, sending no requests");
    loop {
        // `recv_frame(0)` never returns a batch on its own; every frame goes
        // through the callback above instead, so this only returns on a
        // genuine timeout or I/O error.
        match session.recv_frame(0) {
            Ok(_) => {}
            Err(SessionError::Timeout) => warn!("timeout while listening, continuing"),
            Err(e) => return Err(e.into()),
        }
    }
}

// ABOUTME: Telemetry sink abstraction: where decoded readings go once a poll cycle completes
// ABOUTME: Stands in for `pv_reader.py`'s InfluxDB write_api, which is an out-of-scope external collaborator

use std::io::Write;
use std::net::TcpStream;

use tracing::{info, warn};

use crate::codec::Value;

/// A named reading ready to be reported: `(field name, decoded value, unit)`.
pub struct Reading<'a> {
    pub name: &'a str,
    pub value: &'a Value,
    pub unit: Option<&'a str>,
}

/// Destination for a batch of readings collected in one poll cycle.
/// `pv_reader.py`'s monitor loop writes to a full InfluxDB client; that
/// client isn't part of this crate's dependency stack, so it's represented
/// here as a trait with two concrete, dependency-free implementations.
pub trait TelemetrySink {
    fn report(&mut self, measurement: &str, readings: &[Reading<'_>]) -> std::io::Result<()>;
}

/// Logs each reading at `info` level. The default sink, and what
/// `listen_only`/`read_all` effectively reduce to.
pub struct LoggingSink;

impl TelemetrySink for LoggingSink {
    fn report(&mut self, measurement: &str, readings: &[Reading<'_>]) -> std::io::Result<()> {
        info!(measurement, "reporting {} reading(s)", readings.len());
        for r in readings {
            match r.unit {
                Some(unit) => info!("{}: {:?} {}", r.name, r.value, unit),
                None => info!("{}: {:?}", r.name, r.value),
            }
        }
        Ok(())
    }
}

/// Writes readings as InfluxDB line protocol over a plain TCP connection to
/// a Telegraf-style listener (host:port), avoiding a dependency on a full
/// InfluxDB client crate that isn't part of this pack's stack.
pub struct LineProtocolSink {
    stream: TcpStream,
}

impl LineProtocolSink {
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(LineProtocolSink { stream })
    }
}

impl TelemetrySink for LineProtocolSink {
    fn report(&mut self, measurement: &str, readings: &[Reading<'_>]) -> std::io::Result<()> {
        if readings.is_empty() {
            return Ok(());
        }
        let mut line = format!("{measurement},inverter=RCT ");
        for (i, r) in readings.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&format_field(r.name, r.value));
        }
        line.push('\n');
        self.stream.write_all(line.as_bytes()).inspect_err(|e| {
            warn!(error = %e, "failed to write to line protocol sink");
        })
    }
}

fn format_field(name: &str, value: &Value) -> String {
    match value {
        Value::Bool(b) => format!("{name}={b}"),
        Value::U8(v) => format!("{name}={v}i"),
        Value::I8(v) => format!("{name}={v}i"),
        Value::U16(v) => format!("{name}={v}i"),
        Value::I16(v) => format!("{name}={v}i"),
        Value::U32(v) => format!("{name}={v}i"),
        Value::I32(v) => format!("{name}={v}i"),
        Value::Enum(v) => format!("{name}={v}i"),
        Value::Float(v) => format!("{name}={v}"),
        Value::String(s) => format!("{name}=\"{}\"", s.replace('"', "\\\"")),
        Value::Bytes(b) => format!("{name}=\"{}\"", b.iter().map(|x| format!("{x:02x}")).collect::<String>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_sink_accepts_empty_batch() {
        let mut sink = LoggingSink;
        sink.report("pv", &[]).unwrap();
    }

    #[test]
    fn formats_float_field_without_integer_suffix() {
        assert_eq!(format_field("power", &Value::Float(12.5)), "power=12.5");
    }

    #[test]
    fn formats_integer_field_with_i_suffix() {
        assert_eq!(format_field("count", &Value::I32(7)), "count=7i");
    }

    #[test]
    fn escapes_quotes_in_string_field() {
        assert_eq!(format_field("note", &Value::String("a\"b".into())), "note=\"a\\\"b\"");
    }
}

/*!
Reading output.

Every completed window becomes exactly one line on the output stream. Logs
go to stderr, so stdout carries nothing but readings.
*/

use crate::config::OutputFormat;
use crate::poller::DeviceReading;
use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;
use shared::{AngleFilter, Reading, Transport};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

#[derive(Serialize)]
struct JsonLine<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
    timestamp: f64,
    degrees: f64,
}

/// Format a reading as one output line (without the newline)
pub fn format_line(device: Option<&str>, reading: &Reading, format: OutputFormat) -> Result<String> {
    let line = match format {
        OutputFormat::Csv => match device {
            Some(name) => format!("{}, {}", name, reading),
            None => reading.to_string(),
        },
        OutputFormat::Json => serde_json::to_string(&JsonLine {
            device,
            timestamp: reading.timestamp,
            degrees: reading.degrees,
        })?,
    };
    Ok(line)
}

/// Writes one line per reading to the output stream
pub struct Reporter<W: Write> {
    out: W,
    format: OutputFormat,
    lines: u64,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format, lines: 0 }
    }

    /// Emit a single reading and flush it immediately
    pub fn emit(&mut self, device: Option<&str>, reading: &Reading) -> Result<()> {
        let line = format_line(device, reading, self.format)?;
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        self.lines += 1;
        Ok(())
    }

    /// Drive a single filter on the calling thread until `running` is cleared.
    ///
    /// The flag is checked between windows; the filter itself also gives up
    /// on a stalled link once the flag is cleared.
    pub fn run<T: Transport>(&mut self, filter: &mut AngleFilter<T>, running: &AtomicBool) -> Result<u64> {
        info!("▶️ Reporting averaged readings");

        while running.load(Ordering::SeqCst) {
            match filter.next_reading() {
                Ok(reading) => self.emit(None, &reading)?,
                Err(e) if e.is_cancelled() => break,
                Err(e) => return Err(e.into()),
            }
        }

        info!("⏹️ Reporter stopped after {} readings", self.lines);
        Ok(self.lines)
    }

    /// Emit readings arriving from device threads, in arrival order
    pub fn run_channel(&mut self, readings: Receiver<DeviceReading>, running: &AtomicBool) -> Result<u64> {
        info!("▶️ Reporting averaged readings from device channel");

        while running.load(Ordering::SeqCst) || !readings.is_empty() {
            match readings.recv_timeout(Duration::from_millis(100)) {
                Ok(item) => self.emit(Some(&item.device), &item.reading)?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("All device pollers have stopped");
                    break;
                }
            }
        }

        info!("⏹️ Reporter stopped after {} readings", self.lines);
        Ok(self.lines)
    }

    /// Lines written so far
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Release the output stream
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::frame::synthetic_response;
    use shared::transport::mock::MockTransport;
    use shared::ReaderConfig;
    use std::sync::Arc;

    #[test]
    fn test_csv_line_format() {
        let reading = Reading { timestamp: 1726412345.04, degrees: 180.0 };

        assert_eq!(
            format_line(None, &reading, OutputFormat::Csv).unwrap(),
            "1726412345.0, 180.000"
        );
        assert_eq!(
            format_line(Some("tilt"), &reading, OutputFormat::Csv).unwrap(),
            "tilt, 1726412345.0, 180.000"
        );
    }

    #[test]
    fn test_json_line_format() {
        let reading = Reading { timestamp: 10.5, degrees: -45.25 };

        let line = format_line(None, &reading, OutputFormat::Json).unwrap();
        assert_eq!(line, r#"{"timestamp":10.5,"degrees":-45.25}"#);

        let line = format_line(Some("tilt"), &reading, OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["device"], "tilt");
        assert_eq!(value["degrees"], -45.25);
    }

    #[test]
    fn test_run_emits_one_line_per_window() {
        let mut config = ReaderConfig::default();
        config.sampling.averages = 4;

        let running = Arc::new(AtomicBool::new(true));
        let mut responses = Vec::new();
        for _ in 0..4 {
            responses.push(synthetic_response(16384));
        }
        responses.push(vec![0u8; 12]);
        for _ in 0..4 {
            responses.push(synthetic_response(8192));
        }
        let mock = MockTransport::new(responses).stop_when_empty(running.clone());

        let mut filter = AngleFilter::new(mock, &config).unwrap().with_running_flag(running.clone());
        let mut reporter = Reporter::new(Vec::new(), OutputFormat::Csv);

        let lines = reporter.run(&mut filter, &running).unwrap();
        assert_eq!(lines, 2);

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        let rows: Vec<&str> = output.lines().collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].ends_with(", 180.000"));
        assert!(rows[1].ends_with(", 90.000"));

        let (timestamp, _) = rows[0].split_once(", ").unwrap();
        let (_, fraction) = timestamp.split_once('.').unwrap();
        assert_eq!(fraction.len(), 1);
    }

    #[test]
    fn test_run_stops_immediately_when_not_running() {
        let running = AtomicBool::new(false);
        let mut filter = AngleFilter::new(MockTransport::default(), &ReaderConfig::default()).unwrap();
        let mut reporter = Reporter::new(Vec::new(), OutputFormat::Csv);

        assert_eq!(reporter.run(&mut filter, &running).unwrap(), 0);
        assert_eq!(filter.stats().exchanges, 0);
    }

    #[test]
    fn test_run_propagates_transport_failure() {
        let running = AtomicBool::new(true);
        let mock = MockTransport::default().failing_writes();
        let mut filter = AngleFilter::new(mock, &ReaderConfig::default()).unwrap();
        let mut reporter = Reporter::new(Vec::new(), OutputFormat::Csv);

        assert!(reporter.run(&mut filter, &running).is_err());
        assert!(reporter.into_inner().is_empty());
    }

    #[test]
    fn test_run_channel_drains_until_disconnected() {
        let (tx, rx) = crossbeam_channel::unbounded();
        for (name, degrees) in [("a", 1.0), ("b", 2.0)] {
            tx.send(DeviceReading {
                device: name.to_string(),
                reading: Reading { timestamp: 0.0, degrees },
            })
            .unwrap();
        }
        drop(tx);

        let running = AtomicBool::new(true);
        let mut reporter = Reporter::new(Vec::new(), OutputFormat::Csv);
        assert_eq!(reporter.run_channel(rx, &running).unwrap(), 2);

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(output, "a, 0.0, 1.000\nb, 0.0, 2.000\n");
    }
}

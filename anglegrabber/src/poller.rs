/*!
Concurrent polling of several encoders.

Each device keeps its own transport and filter on a dedicated thread, so
exchanges stay strictly sequential per port. Completed readings are funnelled
through a single ordered channel to the reporter.
*/

use crate::reporter::Reporter;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Sender};
use shared::{AngleFilter, FilterStats, Reading, SharedError, Transport};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Channel capacity between device threads and the reporter
const READING_CHANNEL_CAPACITY: usize = 256;

/// A reading tagged with the device that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub device: String,
    pub reading: Reading,
}

/// Poll one device until `running` is cleared, forwarding every reading.
///
/// A fatal error clears `running` so the other devices wind down as well.
fn poll_device<T: Transport>(
    device: String,
    mut filter: AngleFilter<T>,
    readings: Sender<DeviceReading>,
    running: Arc<AtomicBool>,
) -> Result<FilterStats, SharedError> {
    info!("📡 Poller for {} started", device);

    while running.load(Ordering::SeqCst) {
        match filter.next_reading() {
            Ok(reading) => {
                let item = DeviceReading {
                    device: device.clone(),
                    reading,
                };
                if readings.send(item).is_err() {
                    info!("Reading channel closed, stopping poller for {}", device);
                    break;
                }
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                error!("❌ Poller for {} failed: {}", device, e);
                running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
    }

    info!("📡 Poller for {} stopped", device);
    Ok(filter.stats())
}

/// Run every device on its own thread and report readings until all stop.
///
/// Returns the per-device statistics, or the first device failure.
pub fn run_devices<T, W>(
    devices: Vec<(String, AngleFilter<T>)>,
    reporter: &mut Reporter<W>,
    running: Arc<AtomicBool>,
) -> Result<Vec<(String, FilterStats)>>
where
    T: Transport + Send + 'static,
    W: Write,
{
    let (tx, rx) = bounded::<DeviceReading>(READING_CHANNEL_CAPACITY);

    let mut handles = Vec::with_capacity(devices.len());
    for (name, filter) in devices {
        let filter = filter.with_running_flag(Arc::clone(&running));
        let tx = tx.clone();
        let running = Arc::clone(&running);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(format!("poll-{}", name))
            .spawn(move || poll_device(thread_name, filter, tx, running))?;
        handles.push((name, handle));
    }
    drop(tx);

    let report_result = reporter.run_channel(rx, &running);
    if report_result.is_err() {
        running.store(false, Ordering::SeqCst);
    }

    let mut stats = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for (name, handle) in handles {
        match handle.join() {
            Ok(Ok(device_stats)) => stats.push((name, device_stats)),
            Ok(Err(e)) => {
                if first_error.is_none() {
                    first_error = Some(anyhow!("Device '{}' failed: {}", name, e));
                }
            }
            Err(_) => {
                if first_error.is_none() {
                    first_error = Some(anyhow!("Poller thread for '{}' panicked", name));
                }
            }
        }
    }

    report_result?;
    match first_error {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use shared::frame::synthetic_response;
    use shared::transport::mock::MockTransport;
    use shared::ReaderConfig;
    use std::sync::atomic::AtomicUsize;

    /// Clears `running` once every device has used up its script
    struct Countdown {
        inner: MockTransport,
        live: Arc<AtomicUsize>,
        running: Arc<AtomicBool>,
        finished: bool,
    }

    impl Transport for Countdown {
        fn write_frame(&mut self, bytes: &[u8]) -> shared::Result<()> {
            self.inner.write_frame(bytes)
        }

        fn read_frame(&mut self, len: usize) -> shared::Result<Vec<u8>> {
            if self.inner.remaining() == 0 {
                if !self.finished {
                    self.finished = true;
                    if self.live.fetch_sub(1, Ordering::SeqCst) == 1 {
                        self.running.store(false, Ordering::SeqCst);
                    }
                }
                return Ok(Vec::new());
            }
            self.inner.read_frame(len)
        }
    }

    fn config(averages: usize) -> ReaderConfig {
        let mut config = ReaderConfig::default();
        config.sampling.averages = averages;
        config
    }

    #[test]
    fn test_readings_from_all_devices_reach_reporter() {
        let running = Arc::new(AtomicBool::new(true));
        let live = Arc::new(AtomicUsize::new(2));

        let scripts = [("left", 8192u16, 4usize), ("right", 16384, 2)];
        let devices = scripts
            .iter()
            .map(|&(name, count, frames)| {
                let transport = Countdown {
                    inner: MockTransport::new((0..frames).map(|_| synthetic_response(count))),
                    live: Arc::clone(&live),
                    running: Arc::clone(&running),
                    finished: false,
                };
                (name.to_string(), AngleFilter::new(transport, &config(2)).unwrap())
            })
            .collect();

        let mut reporter = Reporter::new(Vec::new(), OutputFormat::Csv);
        let stats = run_devices(devices, &mut reporter, Arc::clone(&running)).unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].0, "left");
        assert_eq!(stats[0].1.windows, 2);
        assert_eq!(stats[1].1.windows, 1);

        let output = String::from_utf8(reporter.into_inner()).unwrap();
        let left: Vec<&str> = output.lines().filter(|l| l.starts_with("left, ")).collect();
        let right: Vec<&str> = output.lines().filter(|l| l.starts_with("right, ")).collect();
        assert_eq!(left.len(), 2);
        assert_eq!(right.len(), 1);
        assert!(left.iter().all(|l| l.ends_with(", 90.000")));
        assert!(right[0].ends_with(", 180.000"));
    }

    #[test]
    fn test_device_failure_stops_everything() {
        let running = Arc::new(AtomicBool::new(true));

        let broken = MockTransport::default().failing_writes();
        let idle = MockTransport::default();
        let devices: Vec<(String, AngleFilter<MockTransport>)> = vec![
            ("broken".to_string(), AngleFilter::new(broken, &config(2)).unwrap()),
            ("idle".to_string(), AngleFilter::new(idle, &config(2)).unwrap()),
        ];

        let mut reporter = Reporter::new(Vec::new(), OutputFormat::Csv);
        let result = run_devices(devices, &mut reporter, Arc::clone(&running));

        let err = result.unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(reporter.lines(), 0);
    }
}

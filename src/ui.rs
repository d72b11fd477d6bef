use crate::structs::*;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const REPORT_PERIOD: Duration = Duration::from_secs(5);

/// Generation statistics shared between the threads, and the early stop flag
pub struct Stats {
    pub start_time: Instant,
    pub packets_counter: AtomicU64,
    pub bytes_counter: AtomicU64,
    pub pcap_counter: AtomicU64,
    pub early_stop: AtomicBool,
    pub done: AtomicBool,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            start_time: Instant::now(),
            packets_counter: AtomicU64::new(0),
            bytes_counter: AtomicU64::new(0),
            pcap_counter: AtomicU64::new(0),
            early_stop: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }
}

impl Stats {
    pub fn increase(&self, p: &Packets) {
        self.packets_counter
            .fetch_add(p.len() as u64, Ordering::Relaxed);
        self.bytes_counter.fetch_add(p.bytes(), Ordering::Relaxed);
    }

    pub fn increase_pcap(&self, count: u64) {
        self.pcap_counter.fetch_add(count, Ordering::Relaxed);
    }

    pub fn packets(&self) -> u64 {
        self.packets_counter.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes_counter.load(Ordering::Relaxed)
    }

    pub fn pcap_packets(&self) -> u64 {
        self.pcap_counter.load(Ordering::Relaxed)
    }

    /// Set by the first Ctrl-C: the generation ends after the current packet
    pub fn should_stop(&self) -> bool {
        self.early_stop.load(Ordering::Relaxed)
    }

    pub fn stop_early(&self) {
        self.early_stop.store(true, Ordering::Relaxed);
    }

    pub fn finish(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }
}

/// Log the progression periodically until the run is over
pub fn run(stats: Arc<Stats>) {
    let mut last_report = Instant::now();
    while !stats.is_done() {
        thread::sleep(Duration::from_millis(100));
        if last_report.elapsed() < REPORT_PERIOD {
            continue;
        }
        last_report = Instant::now();

        let pc = stats.packets();
        let throughput = (stats.bytes() as f64)
            / Instant::now().duration_since(stats.start_time).as_secs_f64()
            * 8.
            / 1_000_000.;
        if throughput < 1. {
            log::info!("{pc} created packets ({:.2} kbps)", throughput * 1000.);
        } else if throughput < 1000. {
            log::info!("{pc} created packets ({:.2} Mbps)", throughput);
        } else {
            log::info!("{pc} created packets ({:.2} Gbps)", throughput / 1000.);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let stats = Stats::default();
        let mut batch = Packets::default();
        batch.packets.push(Packet {
            timestamp: Duration::ZERO,
            data: vec![0; 100],
        });
        batch.packets.push(Packet {
            timestamp: Duration::ZERO,
            data: vec![0; 50],
        });
        stats.increase(&batch);
        stats.increase_pcap(2);
        assert_eq!(stats.packets(), 2);
        assert_eq!(stats.bytes(), 150);
        assert_eq!(stats.pcap_packets(), 2);
        assert!(!stats.should_stop());
        stats.stop_early();
        assert!(stats.should_stop());
    }
}

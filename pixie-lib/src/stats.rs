//! Streaming statistics of a run
//!
//! The counters are updated by the FIFO worker and read by anyone,
//! so they are atomics. Words are counted, the output is in bytes.

use std::fmt;
use std::sync::atomic::{AtomicU64,
                        AtomicUsize,
                        Ordering};
use std::sync::Mutex;
use std::time::{Duration,
                Instant};

use chrono::{DateTime,
             Utc};

use crate::memory::SIZEOF_U32;

/// Shortest period a bandwidth is calculated over
pub const BW_UPDATE_PERIOD_USECS : u64 = 100000;

#[derive(Debug, Default)]
struct Interval {
  started     : Option<Instant>,
  /// wall clock time of the start
  started_at  : Option<DateTime<Utc>>,
  stopped     : Option<Duration>,
  /// usecs into the interval of the last bandwidth update
  last_update : u64,
  last_dma_in : usize,
}

impl Interval {
  fn running(&self) -> bool {
    self.started.is_some() && self.stopped.is_none()
  }

  fn usecs(&self) -> u64 {
    match (self.started, self.stopped) {
      (_, Some(period))    => period.as_micros() as u64,
      (Some(started), None) => started.elapsed().as_micros() as u64,
      (None, None)         => 0,
    }
  }
}

#[derive(Debug, Default)]
pub struct FifoStats {
  pub in_           : AtomicUsize,
  pub out           : AtomicUsize,
  pub dma_in        : AtomicUsize,
  pub overflows     : AtomicUsize,
  pub dropped       : AtomicUsize,
  pub hw_overflows  : AtomicUsize,
  // MB/s as f64 bits
  bandwidth         : AtomicU64,
  max_bandwidth     : AtomicU64,
  min_bandwidth     : AtomicU64,
  interval          : Mutex<Interval>,
}

fn load_f64(value : &AtomicU64) -> f64 {
  f64::from_bits(value.load(Ordering::SeqCst))
}

fn store_f64(value : &AtomicU64, x : f64) {
  value.store(x.to_bits(), Ordering::SeqCst);
}

impl FifoStats {
  pub fn new() -> Self {
    Self::default()
  }

  fn interval(&self) -> std::sync::MutexGuard<'_, Interval> {
    match self.interval.lock() {
      Ok(g)         => g,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// Clear the counters and start the interval
  pub fn start(&self) {
    self.clear();
    let mut interval = self.interval();
    interval.started    = Some(Instant::now());
    interval.started_at = Some(Utc::now());
  }

  /// Freeze the interval, the bandwidth becomes the average over
  /// the whole run
  pub fn stop(&self) {
    {
      let mut interval = self.interval();
      if let Some(started) = interval.started {
        if interval.stopped.is_none() {
          interval.stopped = Some(started.elapsed());
        }
      }
      interval.last_update = 0;
      interval.last_dma_in = 0;
    }
    self.calc_bandwidth(false);
  }

  pub fn clear(&self) {
    self.in_.store(0, Ordering::SeqCst);
    self.out.store(0, Ordering::SeqCst);
    self.dma_in.store(0, Ordering::SeqCst);
    self.overflows.store(0, Ordering::SeqCst);
    self.dropped.store(0, Ordering::SeqCst);
    self.hw_overflows.store(0, Ordering::SeqCst);
    store_f64(&self.bandwidth, 0.0);
    store_f64(&self.max_bandwidth, 0.0);
    store_f64(&self.min_bandwidth, 0.0);
    *self.interval() = Interval::default();
  }

  /// Called by the worker each loop, true when a new value
  /// has been calculated
  pub fn update_bandwidth(&self) -> bool {
    if !self.interval().running() {
      return false;
    }
    self.calc_bandwidth(true)
  }

  fn calc_bandwidth(&self, update_min_max : bool) -> bool {
    let mut interval = self.interval();
    let period        = interval.usecs();
    let update_period = period.saturating_sub(interval.last_update);
    if update_period < BW_UPDATE_PERIOD_USECS {
      return false;
    }
    let this_dma_in = self.dma_in.load(Ordering::SeqCst);
    let delta = (this_dma_in.saturating_sub(interval.last_dma_in) * SIZEOF_U32) as f64;
    // bytes per usec is MB/s
    let bw = delta / update_period as f64;
    store_f64(&self.bandwidth, bw);
    if update_min_max {
      if bw > load_f64(&self.max_bandwidth) {
        store_f64(&self.max_bandwidth, bw);
      }
      let min = load_f64(&self.min_bandwidth);
      if min == 0.0 || bw < min {
        store_f64(&self.min_bandwidth, bw);
      }
    }
    interval.last_dma_in = this_dma_in;
    interval.last_update = period;
    true
  }

  pub fn bandwidth(&self) -> f64 {
    load_f64(&self.bandwidth)
  }

  pub fn max_bandwidth(&self) -> f64 {
    load_f64(&self.max_bandwidth)
  }

  pub fn min_bandwidth(&self) -> f64 {
    load_f64(&self.min_bandwidth)
  }

  pub fn period_usecs(&self) -> u64 {
    self.interval().usecs()
  }

  pub fn started_at(&self) -> Option<DateTime<Utc>> {
    self.interval().started_at
  }

  pub fn snapshot(&self) -> RunStats {
    RunStats {
      started_at    : self.started_at(),
      period_usecs  : self.period_usecs(),
      in_           : self.in_.load(Ordering::SeqCst),
      out           : self.out.load(Ordering::SeqCst),
      dma_in        : self.dma_in.load(Ordering::SeqCst),
      overflows     : self.overflows.load(Ordering::SeqCst),
      dropped       : self.dropped.load(Ordering::SeqCst),
      hw_overflows  : self.hw_overflows.load(Ordering::SeqCst),
      bandwidth     : self.bandwidth(),
      max_bandwidth : self.max_bandwidth(),
      min_bandwidth : self.min_bandwidth(),
    }
  }
}

/// Statistics at one moment, counters in words
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct RunStats {
  pub started_at    : Option<DateTime<Utc>>,
  pub period_usecs  : u64,
  pub in_           : usize,
  pub out           : usize,
  pub dma_in        : usize,
  pub overflows     : usize,
  pub dropped       : usize,
  pub hw_overflows  : usize,
  pub bandwidth     : f64,
  pub max_bandwidth : f64,
  pub min_bandwidth : f64,
}

impl fmt::Display for RunStats {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "period={:.3}s bw={:.3}MB/s max-bw={:.3}MB/s min-bw={:.3}MB/s in={} out={} dma-in={} overflows={} dropped={} hw-overflows={}",
           self.period_usecs as f64 / 1e6,
           self.bandwidth,
           self.max_bandwidth,
           self.min_bandwidth,
           self.in_ * SIZEOF_U32,
           self.out * SIZEOF_U32,
           self.dma_in * SIZEOF_U32,
           self.overflows,
           self.dropped,
           self.hw_overflows)
  }
}

impl fmt::Display for FifoStats {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.snapshot())
  }
}

#[cfg(test)]
mod test_stats {
  use super::*;

  #[test]
  fn start_clears_and_stop_freezes() {
    let stats = FifoStats::new();
    assert!(stats.started_at().is_none());
    stats.in_.store(10, Ordering::SeqCst);
    stats.start();
    assert!(stats.snapshot().started_at.is_some());
    assert_eq!(stats.in_.load(Ordering::SeqCst), 0);
    stats.dma_in.fetch_add(25000, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(120));
    stats.stop();
    let period = stats.period_usecs();
    assert!(period >= BW_UPDATE_PERIOD_USECS);
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(stats.period_usecs(), period);
    // 100000 bytes over at least 120ms
    assert!(stats.bandwidth() > 0.0);
    assert!(stats.bandwidth() < 1.0);
    assert!(!stats.update_bandwidth());
  }

  #[test]
  fn bandwidth_needs_a_full_period() {
    let stats = FifoStats::new();
    stats.start();
    stats.dma_in.fetch_add(1000, Ordering::SeqCst);
    assert!(!stats.update_bandwidth());
    std::thread::sleep(Duration::from_millis(110));
    assert!(stats.update_bandwidth());
    assert!(stats.max_bandwidth() > 0.0);
    assert_eq!(stats.max_bandwidth(), stats.min_bandwidth());
  }

  #[test]
  fn output_in_bytes() {
    let stats = RunStats {
      in_     : 4,
      out     : 2,
      dma_in  : 5,
      dropped : 1,
      ..Default::default()
    };
    let repr = stats.to_string();
    assert!(repr.contains(" in=16 out=8 dma-in=20 "));
    assert!(repr.contains("dropped=1 hw-overflows=0"));
  }
}

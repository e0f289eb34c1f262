use std::sync::atomic::{AtomicBool,
                        AtomicU32,
                        AtomicUsize,
                        Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver,
                        RecvTimeoutError,
                        Sender};

use crate::buffer::{Pool,
                    Queue};
use crate::bus::Device;
use crate::control;
use crate::errors::{ErrorCode,
                    PixieError};
use crate::registers::{FIFO_SIZE_WORDS,
                       PCI_BUS_DATARATE};
use crate::run::RunTask;
use crate::settings::FifoSettings;
use crate::stats::FifoStats;

/// Wait for a request while the module is offline
const OFFLINE_WAIT       : Duration = Duration::from_millis(100);
/// Wait for a request when the worker is driven by the readers
const SYNC_WAIT          : Duration = Duration::from_millis(100);
/// Loops an asynchronous worker keeps draining before a forced
/// request is answered
const REQUESTED_LOOPS    : usize = 5;
/// Polls, 10ms apart, for the buffers to come home on exit
const FLUSH_POLLS        : usize = 500;

/// Streaming state shared by the module and its FIFO worker
///
/// The worker only ever sees this, never the module itself.
#[derive(Default)]
pub struct StreamShared {
  pub running              : AtomicBool,
  pub paused               : AtomicBool,
  pub online               : AtomicBool,
  pub test_active          : AtomicBool,
  run_task                 : AtomicU32,
  pub run_wait_usecs       : AtomicUsize,
  pub idle_wait_usecs      : AtomicUsize,
  pub hold_usecs           : AtomicUsize,
  pub dma_trigger_level    : AtomicUsize,
  pub bandwidth_mb_per_sec : AtomicUsize,
  pub pool                 : Pool,
  pub queue                : Queue,
  pub stats                : FifoStats,
}

impl StreamShared {
  pub fn new(settings : &FifoSettings) -> Self {
    let shared = Self::default();
    shared.paused.store(true, Ordering::SeqCst);
    shared.set_fifo(settings);
    shared
  }

  /// Apply the tuning, the worker picks it up on its next loop
  pub fn set_fifo(&self, settings : &FifoSettings) {
    self.run_wait_usecs.store(settings.run_wait_usecs, Ordering::SeqCst);
    self.idle_wait_usecs.store(settings.idle_wait_usecs, Ordering::SeqCst);
    self.hold_usecs.store(settings.hold_usecs, Ordering::SeqCst);
    self.dma_trigger_level.store(settings.dma_trigger_level, Ordering::SeqCst);
    self.bandwidth_mb_per_sec.store(settings.bandwidth_mb_per_sec, Ordering::SeqCst);
  }

  pub fn run_task(&self) -> RunTask {
    RunTask::from_code(self.run_task.load(Ordering::SeqCst))
  }

  pub fn set_run_task(&self, task : RunTask) {
    self.run_task.store(task.code(), Ordering::SeqCst);
  }

  /// Readers drive the worker when there is no run wait
  pub fn synchronous(&self) -> bool {
    self.run_wait_usecs.load(Ordering::SeqCst) == 0
  }
}

/// Handle on a running FIFO worker thread
pub struct FifoWorker {
  handle  : Option<thread::JoinHandle<()>>,
  req_tx  : Sender<()>,
  resp_rx : Receiver<()>,
  shared  : Arc<StreamShared>,
}

impl FifoWorker {
  /// Start the thread, it comes up paused
  pub fn spawn(label  : String,
               dev    : Arc<Device>,
               shared : Arc<StreamShared>) -> Result<Self, PixieError> {
    let (req_tx, req_rx)   = crossbeam_channel::unbounded::<()>();
    let (resp_tx, resp_rx) = crossbeam_channel::unbounded::<()>();
    shared.paused.store(true, Ordering::SeqCst);
    shared.running.store(true, Ordering::SeqCst);
    let thread_shared = Arc::clone(&shared);
    let thread_label  = label.clone();
    let spawned = thread::Builder::new()
      .name(String::from("fifo-worker"))
      .spawn(move || {
        fifo_worker(&thread_label, &dev, &thread_shared, &req_rx, &resp_tx);
      });
    match spawned {
      Err(err) => {
        shared.running.store(false, Ordering::SeqCst);
        error!("{}fifo: worker failed to start! {}", label, err);
        Err(PixieError::new(ErrorCode::ResourceUnavailable,
                            format!("fifo worker: {}", err)))
      }
      Ok(handle) => {
        Ok(Self {
          handle : Some(handle),
          req_tx,
          resp_rx,
          shared,
        })
      }
    }
  }

  pub fn running(&self) -> bool {
    self.handle.is_some() && self.shared.running.load(Ordering::SeqCst)
  }

  /// Ask the worker for a drain and wait for the answer
  pub fn request(&self, timeout : Duration) -> bool {
    // a late answer to an earlier request must not count
    while self.resp_rx.try_recv().is_ok() {}
    if self.req_tx.send(()).is_err() {
      return false;
    }
    self.resp_rx.recv_timeout(timeout).is_ok()
  }

  /// Stop the thread and wait for it
  pub fn stop(&mut self) {
    if let Some(handle) = self.handle.take() {
      self.shared.running.store(false, Ordering::SeqCst);
      let _ = self.req_tx.send(());
      match handle.join() {
        Err(_) => error!("fifo: worker thread panicked"),
        Ok(_)  => debug!("fifo: worker stopped"),
      }
    }
  }
}

impl Drop for FifoWorker {
  fn drop(&mut self) {
    self.stop();
  }
}

fn load(value : &AtomicUsize) -> usize {
  value.load(Ordering::SeqCst)
}

/// Run-time state of the worker loop
struct Pacing {
  wait_usecs           : usize,
  hold_usecs           : usize,
  requester_waiting    : bool,
  requested_wait_loops : usize,
  hw_overflow_warned   : bool,
}

/// Move data out of the external FIFO of a module
///
/// Words are read in blocks no bigger than a buffer and queued in
/// arrival order. Without a free buffer to spare the words are
/// dropped and counted, the worker never blocks on the pool. With a
/// run wait the worker paces itself, without one it drains once per
/// request.
///
/// # Arguments
///
/// * label   : module label for the log
/// * dev     : the module's device
/// * shared  : streaming state shared with the module
/// * req_rx  : drain requests
/// * resp_tx : answer to a drain request
pub fn fifo_worker(label   : &str,
                   dev     : &Device,
                   shared  : &StreamShared,
                   req_rx  : &Receiver<()>,
                   resp_tx : &Sender<()>) {
  info!("{}fifo: worker running", label);
  let mut pacing = Pacing {
    wait_usecs           : load(&shared.run_wait_usecs),
    hold_usecs           : 0,
    requester_waiting    : false,
    requested_wait_loops : 0,
    hw_overflow_warned   : false,
  };
  while shared.running.load(Ordering::SeqCst) {
    if !shared.online.load(Ordering::SeqCst) {
      match req_rx.recv_timeout(OFFLINE_WAIT) {
        Ok(_) => {
          let _ = resp_tx.send(());
        }
        Err(RecvTimeoutError::Timeout) => (),
        Err(RecvTimeoutError::Disconnected) => break,
      }
      continue;
    }
    match worker_loop(label, dev, shared, req_rx, resp_tx, &mut pacing) {
      Err(err) => {
        error!("{}fifo: {}", label, err);
        // do not spin on a failing bus
        thread::sleep(OFFLINE_WAIT);
      }
      Ok(true)  => (),
      Ok(false) => break,
    }
  }
  shared.queue.flush();
  let mut polls = FLUSH_POLLS;
  while shared.pool.valid() && !shared.pool.full() && polls > 0 {
    thread::sleep(Duration::from_millis(10));
    polls -= 1;
  }
  if shared.pool.valid() && !shared.pool.full() {
    warn!("{}fifo: worker exit: {} of {} buffers not returned",
          label, shared.pool.number() - shared.pool.count(), shared.pool.number());
  }
  info!("{}fifo: worker stopped", label);
}

/// One pass of the worker. False when the request channel is gone.
fn worker_loop(label   : &str,
               dev     : &Device,
               shared  : &StreamShared,
               req_rx  : &Receiver<()>,
               resp_tx : &Sender<()>,
               pacing  : &mut Pacing) -> Result<bool, PixieError> {
  let run_wait  = load(&shared.run_wait_usecs);
  let idle_wait = load(&shared.idle_wait_usecs);
  let hold      = load(&shared.hold_usecs);
  let trigger   = load(&shared.dma_trigger_level);
  let bw_cap    = load(&shared.bandwidth_mb_per_sec);
  let run_async = run_wait != 0;

  if !run_async {
    // the readers drive a synchronous worker, each request is
    // answered after one drain
    if pacing.requester_waiting {
      // taken while the worker was still asynchronous
      pacing.requester_waiting = false;
    } else {
      match req_rx.recv_timeout(SYNC_WAIT) {
        Ok(_) => (),
        Err(RecvTimeoutError::Timeout)      => return Ok(true),
        Err(RecvTimeoutError::Disconnected) => return Ok(false),
      }
    }
    let result = drain(label, dev, shared, false, pacing, trigger, hold, 0);
    let _ = resp_tx.send(());
    result?;
    return Ok(true);
  }

  if pacing.wait_usecs == 0
    || shared.run_task() == RunTask::ListMode
    || shared.test_active.load(Ordering::SeqCst) {
    pacing.wait_usecs = run_wait;
  } else if pacing.wait_usecs > idle_wait {
    pacing.wait_usecs = idle_wait;
  } else if pacing.wait_usecs < idle_wait && pacing.hold_usecs >= hold {
    pacing.wait_usecs = std::cmp::min(pacing.wait_usecs * 2, idle_wait);
    pacing.hold_usecs = 0;
  }

  drain(label, dev, shared, true, pacing, trigger, hold, bw_cap)?;

  if pacing.requester_waiting {
    if pacing.requested_wait_loops == 0 {
      let _ = resp_tx.send(());
      pacing.requester_waiting = false;
    } else {
      pacing.requested_wait_loops -= 1;
    }
  }

  match req_rx.recv_timeout(Duration::from_micros(pacing.wait_usecs as u64)) {
    Ok(_) => {
      pacing.requester_waiting    = true;
      pacing.requested_wait_loops = REQUESTED_LOOPS;
    }
    Err(RecvTimeoutError::Timeout)      => (),
    Err(RecvTimeoutError::Disconnected) => return Ok(false),
  }

  if pacing.hold_usecs < hold {
    pacing.hold_usecs += pacing.wait_usecs;
  }
  Ok(true)
}

/// Read the FIFO until it is empty or it is not worth a DMA yet
#[allow(clippy::too_many_arguments)]
fn drain(label     : &str,
         dev       : &Device,
         shared    : &StreamShared,
         run_async : bool,
         pacing    : &mut Pacing,
         trigger   : usize,
         hold      : usize,
         bw_cap    : usize) -> Result<(), PixieError> {
  let mut level = if run_async { 0 } else { control::fifo_level(dev)? };
  while shared.running.load(Ordering::SeqCst) && !shared.paused.load(Ordering::SeqCst) {
    let run_task = shared.run_task();
    if run_task != RunTask::Nop && run_task != RunTask::RunStopping && !control::run_active(dev)? {
      debug!("{}fifo: run not active", label);
      shared.set_run_task(RunTask::Nop);
    }
    if run_async {
      level = control::fifo_level(dev)?;
    }
    if level >= FIFO_SIZE_WORDS {
      shared.stats.hw_overflows.fetch_add(1, Ordering::SeqCst);
      if !pacing.hw_overflow_warned {
        warn!("{}fifo: hardware FIFO full, data may be lost", label);
        pacing.hw_overflow_warned = true;
      }
    }
    if level == 0
      || (run_async && !pacing.requester_waiting && pacing.hold_usecs < hold && level < trigger) {
      break;
    }
    if level == u32::MAX as usize {
      break;
    }
    let pool_count = shared.pool.count();
    if pool_count > 1 && pool_count < 4 {
      shared.queue.compact();
    }
    let queue_buf = pool_count > 1 && !shared.paused.load(Ordering::SeqCst);
    match shared.pool.request() {
      None => {
        warn!("{}fifo: pool empty, dropping FIFO data", label);
        shared.stats.overflows.fetch_add(1, Ordering::SeqCst);
        break;
      }
      Some(mut buf) => {
        let read_words = std::cmp::min(level, buf.capacity_words());
        buf.resize(read_words, 0);
        control::fifo_read(dev, &mut buf)?;
        shared.stats.dma_in.fetch_add(read_words, Ordering::SeqCst);
        if queue_buf {
          shared.stats.in_.fetch_add(read_words, Ordering::SeqCst);
          shared.queue.push(buf);
        } else {
          // the buffer goes back to the pool when dropped
          shared.stats.dropped.fetch_add(read_words, Ordering::SeqCst);
        }
        pacing.hold_usecs = 0;
        level -= read_words;
      }
    }
    if shared.stats.update_bandwidth() {
      debug!("{}fifo: bandwidth={:.3}MB/s", label, shared.stats.bandwidth());
    }
    if run_async && bw_cap > 0 && shared.stats.bandwidth() >= bw_cap as f64 {
      let slice = (100 - (100 * bw_cap) / PCI_BUS_DATARATE) * 100;
      pacing.wait_usecs = std::cmp::max(pacing.wait_usecs, slice);
      break;
    }
  }
  Ok(())
}

#[cfg(test)]
mod test_fifo_worker {
  use super::*;
  use crossbeam_channel::unbounded;
  use crate::bus::DeviceInfo;
  use crate::buffer::Handle;
  use crate::settings::FIFO_BUFFER_SIZE;
  use crate::sim::SimulatedBus;

  /// A streaming module on a simulated bus with `buffers` free buffers
  fn streaming(buffers : usize) -> (Arc<SimulatedBus>, Device, StreamShared) {
    let sim    = Arc::new(SimulatedBus::new(DeviceInfo::default()));
    let dev    = Device::new(Box::new(Arc::clone(&sim)));
    let shared = StreamShared::new(&FifoSettings::default());
    shared.pool.create(buffers, FIFO_BUFFER_SIZE).unwrap();
    shared.running.store(true, Ordering::SeqCst);
    shared.paused.store(false, Ordering::SeqCst);
    shared.online.store(true, Ordering::SeqCst);
    (sim, dev, shared)
  }

  fn pacing(wait_usecs : usize, hold_usecs : usize) -> Pacing {
    Pacing {
      wait_usecs,
      hold_usecs,
      requester_waiting    : false,
      requested_wait_loops : 0,
      hw_overflow_warned   : false,
    }
  }

  #[test]
  fn shared_state_follows_settings() {
    let mut settings = FifoSettings::default();
    settings.run_wait_usecs = 0;
    let shared = StreamShared::new(&settings);
    assert!(shared.paused.load(Ordering::SeqCst));
    assert!(shared.synchronous());
    assert_eq!(shared.run_task(), RunTask::Nop);
    shared.set_run_task(RunTask::ListMode);
    assert_eq!(shared.run_task(), RunTask::ListMode);
    settings.run_wait_usecs = 5000;
    shared.set_fifo(&settings);
    assert!(!shared.synchronous());
  }

  #[test]
  fn last_buffer_is_kept_for_the_fifo() {
    let (sim, dev, shared) = streaming(10);
    let mut pacing = pacing(0, 0);
    for _ in 0..12 {
      sim.fill_fifo(&vec![7u32; FIFO_BUFFER_SIZE]);
      drain("", &dev, &shared, false, &mut pacing, 0, 0, 0).unwrap();
    }
    let stats = &shared.stats;
    let in_     = stats.in_.load(Ordering::SeqCst);
    let dropped = stats.dropped.load(Ordering::SeqCst);
    assert_eq!(in_ + dropped, stats.dma_in.load(Ordering::SeqCst));
    assert_eq!(in_, 9 * FIFO_BUFFER_SIZE);
    assert_eq!(dropped, 3 * FIFO_BUFFER_SIZE);
    assert_eq!(stats.overflows.load(Ordering::SeqCst), 0);
    assert_eq!(shared.queue.size(), in_);
    assert_eq!(shared.pool.count(), 1);
    assert_eq!(sim.fifo_len(), 0);
  }

  #[test]
  fn empty_pool_leaves_data_in_the_fifo() {
    let (sim, dev, shared) = streaming(10);
    let held : Vec<Handle> = (0..10).filter_map(|_| shared.pool.request()).collect();
    assert_eq!(held.len(), 10);
    sim.fill_fifo(&[1, 2, 3, 4]);
    let mut pacing = pacing(0, 0);
    drain("", &dev, &shared, false, &mut pacing, 0, 0, 0).unwrap();
    assert_eq!(shared.stats.overflows.load(Ordering::SeqCst), 1);
    assert_eq!(shared.stats.dma_in.load(Ordering::SeqCst), 0);
    assert_eq!(sim.fifo_len(), 4);
    drop(held);
    assert!(shared.pool.full());
  }

  #[test]
  fn full_hardware_fifo_is_counted() {
    let (sim, dev, shared) = streaming(10);
    sim.fill_fifo(&vec![3u32; FIFO_SIZE_WORDS]);
    let mut pacing = pacing(0, 0);
    drain("", &dev, &shared, false, &mut pacing, 0, 0, 0).unwrap();
    assert!(pacing.hw_overflow_warned);
    assert_eq!(shared.stats.hw_overflows.load(Ordering::SeqCst), 1);
    assert_eq!(shared.stats.in_.load(Ordering::SeqCst), FIFO_SIZE_WORDS);
    assert_eq!(sim.fifo_len(), 0);
  }

  #[test]
  fn paused_worker_does_not_read() {
    let (sim, dev, shared) = streaming(10);
    shared.paused.store(true, Ordering::SeqCst);
    sim.fill_fifo(&[5; 100]);
    let mut pacing = pacing(0, 0);
    drain("", &dev, &shared, false, &mut pacing, 0, 0, 0).unwrap();
    assert_eq!(sim.fifo_len(), 100);
    assert_eq!(shared.stats.dma_in.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn bandwidth_cap_widens_the_wait() {
    let (sim, dev, shared) = streaming(10);
    shared.stats.start();
    thread::sleep(Duration::from_millis(110));
    sim.fill_fifo(&vec![1u32; FIFO_BUFFER_SIZE]);
    let hold = 1000;
    let mut pacing = pacing(500, hold);
    drain("", &dev, &shared, true, &mut pacing, 0, hold, 1).unwrap();
    assert!(shared.stats.bandwidth() >= 1.0);
    // 1MB/s of the bus leaves 99% of each 10ms slice idle
    assert_eq!(pacing.wait_usecs, 9900);
  }

  #[test]
  fn uncapped_bandwidth_keeps_the_wait() {
    let (sim, dev, shared) = streaming(10);
    shared.stats.start();
    thread::sleep(Duration::from_millis(110));
    sim.fill_fifo(&vec![1u32; FIFO_BUFFER_SIZE]);
    let hold = 1000;
    let mut pacing = pacing(500, hold);
    drain("", &dev, &shared, true, &mut pacing, 0, hold, 0).unwrap();
    assert_eq!(pacing.wait_usecs, 500);
    assert_eq!(sim.fifo_len(), 0);
  }

  #[test]
  fn idle_wait_backs_off_until_a_run() {
    let (_sim, dev, shared) = streaming(10);
    let mut settings = FifoSettings::default();
    settings.run_wait_usecs  = 1000;
    settings.idle_wait_usecs = 10000;
    settings.hold_usecs      = 1000;
    shared.set_fifo(&settings);
    shared.paused.store(true, Ordering::SeqCst);
    let (_req_tx, req_rx)   = unbounded::<()>();
    let (resp_tx, _resp_rx) = unbounded::<()>();
    let mut pacing = pacing(0, 0);
    let mut waits  = Vec::<usize>::new();
    for _ in 0..6 {
      assert!(worker_loop("", &dev, &shared, &req_rx, &resp_tx, &mut pacing).unwrap());
      waits.push(pacing.wait_usecs);
    }
    assert_eq!(waits, vec![1000, 2000, 4000, 8000, 10000, 10000]);
    shared.set_run_task(RunTask::ListMode);
    assert!(worker_loop("", &dev, &shared, &req_rx, &resp_tx, &mut pacing).unwrap());
    assert_eq!(pacing.wait_usecs, 1000);
  }
}

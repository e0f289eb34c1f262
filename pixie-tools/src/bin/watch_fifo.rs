//! Watch list mode data arrive from one module
//!
//! Boots the module, starts a list mode run (or the FIFO test
//! pattern) and reads the host queue for a while, printing the
//! transfer statistics once per second.
//!
//! Without a settings file the module is simulated and a feeder
//! thread plays the part of the digitizer.

extern crate pixie_lib;
extern crate pixie_tools;

#[macro_use] extern crate log;

use std::thread;
use std::time::{Duration,
                Instant};

extern crate crossbeam_channel;
use crossbeam_channel as cbc;

extern crate clap;
use clap::Parser;
use colored::Colorize;

use pixie_lib::firmware::BootPattern;
use pixie_lib::module::TestMode;
use pixie_lib::run::RunMode;
use pixie_tools::{init_env_logger,
                  open_configured,
                  open_simulated};

/// Words handed to the simulated FIFO per feeder tick
const FEED_WORDS : usize = 4096;

#[derive(Parser, Default, Debug)]
#[command(author = "pixie developers", version, about, long_about = None)]
struct Args {
  /// Settings file with devices and firmware paths
  #[arg(short, long)]
  config : Option<String>,
  /// The module to read
  #[arg(short, long, default_value_t=0)]
  module : usize,
  /// Seconds to watch for
  #[arg(short, long, default_value_t=5)]
  seconds : u64,
  /// Run the FIFO test pattern instead of a list mode run
  #[arg(long, default_value_t=false)]
  test : bool,
  /// Words per host read
  #[arg(long, default_value_t=65536)]
  read_words : usize,
}

fn main() {
  init_env_logger();
  let args = Args::parse();

  let mut sims = Vec::new();
  let (chassis, firmware) = match &args.config {
    Some(config) => match open_configured(config) {
      Err(err) => {
        error!("Unable to open the crate! {}", err);
        std::process::exit(1);
      }
      Ok(opened) => opened,
    },
    None => match open_simulated(args.module + 1) {
      Err(err) => {
        error!("Unable to open simulated modules! {}", err);
        std::process::exit(1);
      }
      Ok((chassis, firmware, buses)) => {
        sims = buses;
        (chassis, firmware)
      }
    },
  };

  let handle = match chassis.handle(args.module) {
    Err(err) => {
      error!("{}", err);
      std::process::exit(1);
    }
    Ok(h) => h,
  };
  let mut module = match handle.lock() {
    Err(poisoned) => poisoned.into_inner(),
    Ok(m)         => m,
  };

  match module.boot(BootPattern::ALL, &firmware) {
    Err(err) => {
      error!("Boot failed! {}", err);
      drop(module);
      chassis.close();
      std::process::exit(1);
    }
    Ok(_) => println!("=> {} booted", module.label().trim()),
  }

  let started = if args.test {
    module.start_test(TestMode::LmFifo)
  } else {
    module.start_listmode(RunMode::NewRun)
  };
  if let Err(err) = started {
    error!("Unable to start! {}", err);
    drop(module);
    chassis.close();
    std::process::exit(1);
  }

  // the simulated digitizer only produces data in a list mode run
  let (stop_send, stop_recv) : (cbc::Sender<()>, cbc::Receiver<()>) = cbc::bounded(1);
  let mut feeder = None;
  if !args.test {
    if let Some(sim) = sims.get(args.module).cloned() {
      let spawned = thread::Builder::new()
        .name("sim-feeder".into())
        .spawn(move || {
          let mut count = 0u32;
          loop {
            match stop_recv.recv_timeout(Duration::from_millis(10)) {
              Err(cbc::RecvTimeoutError::Timeout) => (),
              _ => break,
            }
            let words : Vec<u32> = (0..FEED_WORDS).map(|i| count.wrapping_add(i as u32)).collect();
            count = count.wrapping_add(FEED_WORDS as u32);
            sim.fill_fifo(&words);
          }
        });
      match spawned {
        Err(err) => error!("Unable to spawn the feeder thread! {}", err),
        Ok(h)    => feeder = Some(h),
      }
    }
  }

  let mut buffer = vec![0u32; args.read_words];
  let mut total  = 0usize;
  let start      = Instant::now();
  let mut last   = Instant::now();
  while start.elapsed() < Duration::from_secs(args.seconds) {
    match module.read_list_mode_level() {
      Err(err) => {
        error!("Unable to read the list mode level! {}", err);
        break;
      }
      Ok(0)    => thread::sleep(Duration::from_millis(10)),
      Ok(_)    => match module.read_list_mode(&mut buffer) {
        Err(err) => {
          error!("List mode read failed! {}", err);
          break;
        }
        Ok(n) => total += n,
      },
    }
    if last.elapsed() >= Duration::from_secs(1) {
      last = Instant::now();
      println!("=> {} words: {}", "read".cyan(), total);
      println!("   {}", module.stats());
    }
  }

  let _ = stop_send.send(());
  if let Some(h) = feeder {
    if h.join().is_err() {
      error!("The feeder thread panicked!");
    }
  }

  let ended = if args.test { module.end_test() } else { module.run_end() };
  match ended {
    Err(err) => println!("{} {}", "=> Stop failed!".red().bold(), err),
    Ok(_)    => println!("=> {} after {} words", "Stopped".green(), total),
  }
  println!("{}", module.stats());
  drop(module);
  chassis.close();
}

//! Boot or probe the modules of a crate and show what they report
//!
//! This is for debugging purposes mainly. Without a settings file
//! the modules are simulated.

extern crate pixie_lib;
extern crate pixie_tools;

#[macro_use] extern crate log;

extern crate clap;
use clap::Parser;
use colored::Colorize;

use pixie_lib::firmware::BootPattern;
use pixie_tools::{init_env_logger,
                  open_configured,
                  open_simulated};

#[derive(Parser, Default, Debug)]
#[command(author = "pixie developers", version, about, long_about = None)]
struct Args {
  /// Settings file with devices and firmware paths
  #[arg(short, long)]
  config : Option<String>,
  /// Number of simulated modules when no settings file is given
  #[arg(long, default_value_t=1)]
  sim_modules : usize,
  /// Boot pattern, bit 0 comms, bit 1 fippi, bit 2 dsp
  #[arg(short, long, default_value_t=0x7)]
  pattern : u32,
  /// Only look at what is loaded, do not boot
  #[arg(long, default_value_t=false)]
  probe : bool,
}

fn main() {
  init_env_logger();
  let args = Args::parse();

  let (chassis, firmware) = match &args.config {
    Some(config) => match open_configured(config) {
      Err(err) => {
        error!("Unable to open the crate! {}", err);
        std::process::exit(1);
      }
      Ok(opened) => opened,
    },
    None => match open_simulated(args.sim_modules) {
      Err(err) => {
        error!("Unable to open simulated modules! {}", err);
        std::process::exit(1);
      }
      Ok((chassis, firmware, _)) => (chassis, firmware),
    },
  };
  println!("=> Firmware set {}", firmware.release);

  let pattern = BootPattern::from_bits(args.pattern);
  let result  = if args.probe {
    println!("=> Probing {} modules", chassis.len());
    chassis.probe(&firmware)
  } else {
    println!("=> Booting {} modules with {}", chassis.len(), pattern);
    chassis.boot(pattern, &firmware)
  };
  match result {
    Err(err) => println!("{} {}", "=> Failed!".red().bold(), err),
    Ok(_)    => ()
  }

  for number in 0..chassis.len() {
    match chassis.module(number) {
      Err(err)   => error!("{}", err),
      Ok(module) => {
        let state = if module.online() { "online".green() } else { "offline".red() };
        println!("=> Module {} in slot {} is {}", number, module.slot, state);
        println!("{}", module);
      }
    }
  }
  println!("{}", chassis);
  chassis.close();
}

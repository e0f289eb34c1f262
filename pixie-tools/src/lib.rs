//! Shared pieces of the pixie debugging tools
//!
//! Logger setup and getting a chassis open, either on the
//! uio devices of a settings file or on simulated modules.

#[macro_use] extern crate log;
extern crate pixie_lib;

use std::io::Write;
use std::sync::Arc;

use colored::{ColoredString,
              Colorize};
use log::Level;

use pixie_lib::bus::{DeviceInfo,
                     HostBus};
use pixie_lib::firmware::{FirmwareSet,
                          Release};
use pixie_lib::settings::PixieSettings;
use pixie_lib::sim::{self,
                     SimulatedBus};
use pixie_lib::{Chassis,
                PixieError};

/// First slot used for simulated modules
pub const SIM_FIRST_SLOT : usize = 2;

pub fn color_log(level : &Level) -> ColoredString {
  match level {
    Level::Error    => String::from(" ERROR!").red(),
    Level::Warn     => String::from(" WARN  ").yellow(),
    Level::Info     => String::from(" Info  ").green(),
    Level::Debug    => String::from(" debug ").blue(),
    Level::Trace    => String::from(" trace ").cyan(),
  }
}

/// Set up the env logger with our format
///
/// Module path and line are part of every record.
pub fn init_env_logger() {
  env_logger::builder()
    .format(|buf, record| {
    writeln!( buf, "[{level}][{module_path}:{line}] {args}",
      level = color_log(&record.level()),
      module_path = record.module_path().unwrap_or("<unknown>"),
      line = record.line().unwrap_or(0),
      args = record.args()
      )
    }).init();
}

/// A chassis on simulated modules, one per slot from `SIM_FIRST_SLOT`
///
/// The simulated buses are returned as well so the caller can
/// feed their FIFOs.
pub fn open_simulated(num_modules : usize) -> Result<(Chassis, FirmwareSet, Vec<Arc<SimulatedBus>>), PixieError> {
  let chassis = Chassis::new(num_modules);
  let mut sims  = Vec::<Arc<SimulatedBus>>::new();
  let mut buses = Vec::<Box<dyn HostBus>>::new();
  for n in 0..num_modules {
    let info = DeviceInfo {
      slot   : SIM_FIRST_SLOT + n,
      serial : 1000 + n as u32,
      ..DeviceInfo::default()
    };
    let bus = Arc::new(SimulatedBus::new(info));
    sims.push(Arc::clone(&bus));
    buses.push(Box::new(bus));
  }
  chassis.open(buses)?;
  let firmware = sim::firmware_set(Release::new(3, 4, 1));
  info!("Opened {} simulated modules", num_modules);
  Ok((chassis, firmware, sims))
}

/// A chassis on the devices and firmware of a settings file
pub fn open_configured(config : &str) -> Result<(Chassis, FirmwareSet), PixieError> {
  let settings = match PixieSettings::from_toml(config) {
    Err(err) => {
      error!("Unable to read settings from {}! {}", config, err);
      return Err(PixieError::from(err));
    }
    Ok(s) => s,
  };
  let chassis  = Chassis::from_settings(&settings)?;
  chassis.open_mmap(&settings)?;
  let firmware = settings.firmware.load()?;
  Ok((chassis, firmware))
}

//! Settings for the driver
//!
//! The FIFO worker tuning, the firmware set to boot and the modules
//! of a crate can be kept in a toml file.

use std::fmt;
use std::fs::File;
use std::io::{Read,
              Write};

use crate::bus::DeviceInfo;
use crate::errors::{PixieError,
                    SettingsError};
use crate::firmware::{Firmware,
                      FirmwareSet,
                      Release};
use crate::registers::{MAX_DMA_BLOCK_SIZE,
                       PCI_BUS_DATARATE};

pub const DEFAULT_FIFO_BUFFERS           : usize = 100;
pub const DEFAULT_FIFO_RUN_WAIT_USECS    : usize = 5000;
pub const DEFAULT_FIFO_IDLE_WAIT_USECS   : usize = 150000;
pub const DEFAULT_FIFO_HOLD_USECS        : usize = 10000;
pub const DEFAULT_FIFO_DMA_TRIGGER_LEVEL : usize = 1024;
pub const MIN_FIFO_BUFFERS               : usize = 10;
pub const MAX_FIFO_BUFFERS               : usize = 10000000;
pub const MIN_FIFO_RUN_WAIT_USECS        : usize = 500;
pub const MAX_FIFO_RUN_WAIT_USECS        : usize = 200000;
pub const MIN_FIFO_IDLE_WAIT_USECS       : usize = 10000;
pub const MAX_FIFO_IDLE_WAIT_USECS       : usize = 1000000;
pub const MIN_FIFO_HOLD_USECS            : usize = 1000;
pub const MAX_FIFO_HOLD_USECS            : usize = 100000;
pub const MIN_FIFO_DMA_TRIGGER_LEVEL     : usize = 512;
pub const MAX_FIFO_DMA_TRIGGER_LEVEL     : usize = MAX_DMA_BLOCK_SIZE;
/// words per FIFO buffer
pub const FIFO_BUFFER_SIZE               : usize = 64 * 1024;

fn in_range(label : &str, value : usize, min : usize, max : usize) -> Result<(), SettingsError> {
  if value < min || value > max {
    error!("{} out of range: {} (valid {}..={})", label, value, min, max);
    return Err(SettingsError::OutOfRange);
  }
  Ok(())
}

/// Tuning of the FIFO worker
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FifoSettings {
  /// number of buffers in the pool
  pub buffers              : usize,
  /// wait between FIFO checks while a run is active, 0 makes the
  /// worker synchronous to the readers
  pub run_wait_usecs       : usize,
  /// longest wait when idle
  pub idle_wait_usecs      : usize,
  /// time data may sit in the FIFO below the DMA trigger level
  pub hold_usecs           : usize,
  pub dma_trigger_level    : usize,
  /// MB/s, 0 is no limit
  pub bandwidth_mb_per_sec : usize,
}

impl FifoSettings {
  pub fn new() -> Self {
    Self {
      buffers              : DEFAULT_FIFO_BUFFERS,
      run_wait_usecs       : DEFAULT_FIFO_RUN_WAIT_USECS,
      idle_wait_usecs      : DEFAULT_FIFO_IDLE_WAIT_USECS,
      hold_usecs           : DEFAULT_FIFO_HOLD_USECS,
      dma_trigger_level    : DEFAULT_FIFO_DMA_TRIGGER_LEVEL,
      bandwidth_mb_per_sec : 0,
    }
  }

  pub fn validate(&self) -> Result<(), SettingsError> {
    in_range("fifo buffers", self.buffers, MIN_FIFO_BUFFERS, MAX_FIFO_BUFFERS)?;
    if self.run_wait_usecs != 0 {
      in_range("fifo run wait", self.run_wait_usecs, MIN_FIFO_RUN_WAIT_USECS, MAX_FIFO_RUN_WAIT_USECS)?;
    }
    in_range("fifo idle wait", self.idle_wait_usecs, MIN_FIFO_IDLE_WAIT_USECS, MAX_FIFO_IDLE_WAIT_USECS)?;
    in_range("fifo hold", self.hold_usecs, MIN_FIFO_HOLD_USECS, MAX_FIFO_HOLD_USECS)?;
    in_range("fifo dma trigger level", self.dma_trigger_level,
             MIN_FIFO_DMA_TRIGGER_LEVEL, MAX_FIFO_DMA_TRIGGER_LEVEL)?;
    in_range("fifo bandwidth", self.bandwidth_mb_per_sec, 0, PCI_BUS_DATARATE)?;
    Ok(())
  }
}

impl Default for FifoSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for FifoSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp : String;
    match toml::to_string(self) {
      Err(err) => {
        error!("Deserialization error! {err}");
        disp = String::from("-- DESERIALIZATION ERROR! --");
      }
      Ok(_disp) => {
        disp = _disp;
      }
    }
    write!(f, "<FifoSettings :\n{}>", disp)
  }
}

/// Where the images of a firmware set are found
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct FirmwareSettings {
  /// e.g. "3.4.1", empty for user firmware
  pub release      : String,
  pub release_date : String,
  pub comms        : String,
  pub fippi        : String,
  pub dsp          : String,
  pub var          : String,
  /// recorded CRCs of a release, checked before booting
  pub comms_crc    : Option<u32>,
  pub fippi_crc    : Option<u32>,
  pub dsp_crc      : Option<u32>,
}

impl FirmwareSettings {
  pub fn new() -> Self {
    Self {
      release      : String::from(""),
      release_date : String::from(""),
      comms        : String::from("firmware/syspixie16.bin"),
      fippi        : String::from("firmware/fippixie16.bin"),
      dsp          : String::from("firmware/Pixie16DSP.ldr"),
      var          : String::from("firmware/Pixie16DSP.var"),
      comms_crc    : None,
      fippi_crc    : None,
      dsp_crc      : None,
    }
  }

  /// Read the images from disk
  pub fn load(&self) -> Result<FirmwareSet, PixieError> {
    let release = if self.release.is_empty() {
      Release::not_released()
    } else {
      Release::parse(&self.release)?
    };
    let mut set = FirmwareSet::new(release);
    set.release_date = self.release_date.clone();
    set.comms = Some(Firmware::from_file("sys", &self.comms, self.comms_crc)?);
    set.fippi = Some(Firmware::from_file("fippi", &self.fippi, self.fippi_crc)?);
    set.dsp   = Some(Firmware::from_file("dsp", &self.dsp, self.dsp_crc)?);
    set.var   = Some(Firmware::from_file("var", &self.var, None)?);
    info!("Loaded firmware set {}", set.release);
    Ok(set)
  }
}

impl Default for FirmwareSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// A module of the crate and the device it is reached through
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ModuleSettings {
  pub number       : usize,
  /// uio device, e.g. /dev/uio0
  pub device       : String,
  pub slot         : usize,
  pub serial       : u32,
  pub revision     : u32,
  pub num_channels : usize,
}

impl ModuleSettings {
  pub fn new() -> Self {
    let info = DeviceInfo::default();
    Self {
      number       : 0,
      device       : String::from("/dev/uio0"),
      slot         : info.slot,
      serial       : info.serial,
      revision     : info.revision,
      num_channels : info.num_channels,
    }
  }

  pub fn device_info(&self) -> DeviceInfo {
    DeviceInfo {
      slot         : self.slot,
      serial       : self.serial,
      revision     : self.revision,
      num_channels : self.num_channels,
      ..DeviceInfo::default()
    }
  }
}

impl Default for ModuleSettings {
  fn default() -> Self {
    Self::new()
  }
}

/// Everything needed to bring up a crate
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct PixieSettings {
  pub fifo     : FifoSettings,
  pub firmware : FirmwareSettings,
  pub modules  : Vec<ModuleSettings>,
}

impl PixieSettings {
  pub fn new() -> Self {
    Self {
      fifo     : FifoSettings::new(),
      firmware : FirmwareSettings::new(),
      modules  : vec![ModuleSettings::new()],
    }
  }

  /// Write the settings to a toml file, `.toml` is appended when
  /// missing. Returns the name of the file written.
  pub fn to_toml(&self, filename : &str) -> Result<String, SettingsError> {
    let mut filename = String::from(filename);
    if !filename.ends_with(".toml") {
      filename += ".toml";
    }
    let toml_string = toml::to_string_pretty(&self).map_err(|err| {
      error!("Unable to serialize settings! {}", err);
      SettingsError::TomlEncodingError
    })?;
    let mut file = File::create(&filename).map_err(|err| {
      error!("Unable to create {}! {}", filename, err);
      SettingsError::FileWriteError
    })?;
    file.write_all(toml_string.as_bytes()).map_err(|err| {
      error!("Unable to write to {}! {}", filename, err);
      SettingsError::FileWriteError
    })?;
    info!("Wrote settings to {}", filename);
    Ok(filename)
  }

  /// Read settings from a toml file, the FIFO tuning has to be in range
  pub fn from_toml(filename : &str) -> Result<PixieSettings, SettingsError> {
    let mut file = File::open(filename).map_err(|err| {
      error!("Unable to open {}! {}", filename, err);
      SettingsError::FileNotFound
    })?;
    let mut toml_string = String::new();
    file.read_to_string(&mut toml_string).map_err(|err| {
      error!("Unable to read {}! {}", filename, err);
      SettingsError::TomlDecodingError
    })?;
    let settings = toml::from_str::<PixieSettings>(&toml_string).map_err(|err| {
      error!("Can't interpret {} as settings! {}", filename, err);
      SettingsError::TomlDecodingError
    })?;
    settings.fifo.validate()?;
    Ok(settings)
  }
}

impl Default for PixieSettings {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for PixieSettings {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let disp : String;
    match toml::to_string(self) {
      Err(err) => {
        error!("Deserialization error! {err}");
        disp = String::from("-- DESERIALIZATION ERROR! --");
      }
      Ok(_disp) => {
        disp = _disp;
      }
    }
    write!(f, "<PixieSettings :\n{}>", disp)
  }
}

#[cfg(test)]
mod test_settings {
  use super::*;

  #[test]
  fn fifo_defaults_are_valid() {
    let fifo = FifoSettings::default();
    assert!(fifo.validate().is_ok());
    let mut sync = fifo;
    sync.run_wait_usecs = 0;
    assert!(sync.validate().is_ok());
    let mut bad = fifo;
    bad.run_wait_usecs = 499;
    assert_eq!(bad.validate(), Err(SettingsError::OutOfRange));
    let mut bad = fifo;
    bad.dma_trigger_level = 8193;
    assert!(bad.validate().is_err());
    let mut bad = fifo;
    bad.bandwidth_mb_per_sec = 101;
    assert!(bad.validate().is_err());
  }

  #[test]
  fn toml_round_trip_through_file() {
    let mut settings = PixieSettings::new();
    settings.fifo.buffers = 42;
    settings.firmware.release = String::from("3.4.1");
    let path = std::env::temp_dir().join("pixie-settings-test.toml");
    let filename = path.to_string_lossy().to_string();
    assert_eq!(settings.to_toml(&filename).unwrap(), filename);
    let read = PixieSettings::from_toml(&filename).unwrap();
    assert_eq!(read, settings);
    let _ = std::fs::remove_file(&path);
    assert_eq!(PixieSettings::from_toml("/does/not/exist.toml"), Err(SettingsError::FileNotFound));
  }

  #[test]
  fn failed_write_is_reported() {
    let settings = PixieSettings::new();
    assert_eq!(settings.to_toml("/does/not/exist/settings"), Err(SettingsError::FileWriteError));
  }

  #[test]
  fn out_of_range_file_is_rejected() {
    let mut settings = PixieSettings::new();
    settings.fifo.hold_usecs = 5;
    let path = std::env::temp_dir().join("pixie-settings-range-test.toml");
    let filename = settings.to_toml(&path.to_string_lossy()).unwrap();
    assert_eq!(PixieSettings::from_toml(&filename), Err(SettingsError::OutOfRange));
    let _ = std::fs::remove_file(&filename);
  }
}

//! The modules of a crate
//!
//! Modules are addressed by number, their position in the crate
//! list, or by the slot they sit in. Each module is behind its own
//! mutex so different modules can be driven from different threads.

use std::fmt;
use std::sync::{Arc,
                Mutex,
                MutexGuard};

use crate::backplane::Backplane;
use crate::bus::HostBus;
use crate::errors::{ErrorCode,
                    PixieError};
use crate::firmware::{BootPattern,
                      FirmwareSet};
use crate::memory::MmapBus;
use crate::module::Module;
use crate::settings::PixieSettings;

pub type ModuleHandle = Arc<Mutex<Module>>;

fn locked(module : &ModuleHandle) -> MutexGuard<'_, Module> {
  match module.lock() {
    Ok(g)         => g,
    Err(poisoned) => poisoned.into_inner(),
  }
}

pub struct Chassis {
  pub backplane : Arc<Backplane>,
  modules       : Vec<ModuleHandle>,
}

impl Chassis {
  pub fn new(num_modules : usize) -> Self {
    let backplane = Arc::new(Backplane::new());
    let modules = (0..num_modules)
      .map(|number| Arc::new(Mutex::new(Module::new(number, Arc::clone(&backplane)))))
      .collect();
    Self {
      backplane,
      modules,
    }
  }

  /// A chassis with the modules and FIFO tuning of the settings
  pub fn from_settings(settings : &PixieSettings) -> Result<Self, PixieError> {
    let chassis = Chassis::new(settings.modules.len());
    for handle in &chassis.modules {
      locked(handle).set_fifo(&settings.fifo)?;
    }
    Ok(chassis)
  }

  pub fn len(&self) -> usize {
    self.modules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty()
  }

  pub fn handle(&self, number : usize) -> Result<ModuleHandle, PixieError> {
    match self.modules.get(number) {
      None         => Err(PixieError::new(ErrorCode::ModuleNotFound,
                                          format!("module number out of range: {}", number))),
      Some(handle) => Ok(Arc::clone(handle)),
    }
  }

  /// Lock a module by number
  pub fn module(&self, number : usize) -> Result<MutexGuard<'_, Module>, PixieError> {
    match self.modules.get(number) {
      None         => Err(PixieError::new(ErrorCode::ModuleNotFound,
                                          format!("module number out of range: {}", number))),
      Some(handle) => Ok(locked(handle)),
    }
  }

  /// Lock the module in a slot
  pub fn module_by_slot(&self, slot : usize) -> Result<MutexGuard<'_, Module>, PixieError> {
    for handle in &self.modules {
      let module = locked(handle);
      if module.present() && module.slot == slot {
        return Ok(module);
      }
    }
    Err(PixieError::new(ErrorCode::ModuleNotFound, format!("module slot not found: {}", slot)))
  }

  /// Open the modules, one bus per module in number order
  pub fn open(&self, buses : Vec<Box<dyn HostBus>>) -> Result<(), PixieError> {
    if buses.len() != self.modules.len() {
      return Err(PixieError::new(ErrorCode::ConfigInvalid,
                                 format!("{} devices for {} modules", buses.len(), self.modules.len())));
    }
    let mut present = 0usize;
    for (handle, bus) in self.modules.iter().zip(buses) {
      let mut module = locked(handle);
      module.open(bus)?;
      present += 1;
    }
    self.backplane.init(present);
    info!("chassis: {} modules open", present);
    Ok(())
  }

  /// Open the modules through their uio devices
  pub fn open_mmap(&self, settings : &PixieSettings) -> Result<(), PixieError> {
    let buses = settings.modules
      .iter()
      .map(|m| Box::new(MmapBus::new(&m.device, m.device_info())) as Box<dyn HostBus>)
      .collect();
    self.open(buses)
  }

  pub fn probe(&self, firmware : &FirmwareSet) -> Result<(), PixieError> {
    for handle in &self.modules {
      locked(handle).probe(firmware)?;
    }
    Ok(())
  }

  pub fn boot(&self, pattern : BootPattern, firmware : &FirmwareSet) -> Result<(), PixieError> {
    for handle in &self.modules {
      locked(handle).boot(pattern, firmware)?;
    }
    Ok(())
  }

  /// Close all modules, a failure does not stop the others closing
  pub fn close(&self) {
    for handle in &self.modules {
      let mut module = locked(handle);
      match module.close() {
        Err(err) => error!("{}{}", module.label(), err),
        Ok(_)    => ()
      }
    }
  }

  pub fn online(&self) -> bool {
    self.modules.iter().all(|m| locked(m).online())
  }
}

impl fmt::Display for Chassis {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<Chassis:");
    repr += &(format!("\n  modules   : {}", self.modules.len()));
    for kind in [&self.backplane.run, &self.backplane.wired_or_triggers_pullup, &self.backplane.director] {
      match kind.holder() {
        None       => repr += &(format!("\n  {:<17} : --", kind.label)),
        Some(slot) => repr += &(format!("\n  {:<17} : slot {}", kind.label, slot)),
      }
    }
    repr += &(format!("\n  sync waits : {}>", self.backplane.sync_waits()));
    write!(f, "{}", repr)
  }
}

#[cfg(test)]
mod test_chassis {
  use super::*;
  use std::sync::Arc;

  use crate::bus::DeviceInfo;
  use crate::firmware::Release;
  use crate::sim::{self,
                   SimulatedBus};

  fn buses(slots : &[usize]) -> Vec<Box<dyn HostBus>> {
    slots
      .iter()
      .map(|slot| {
        let info = DeviceInfo { slot : *slot, ..DeviceInfo::default() };
        Box::new(Arc::new(SimulatedBus::new(info))) as Box<dyn HostBus>
      })
      .collect()
  }

  #[test]
  fn lookup_is_bounds_checked() {
    let chassis = Chassis::new(2);
    assert_eq!(chassis.len(), 2);
    assert!(chassis.module(1).is_ok());
    assert_eq!(chassis.module(2).err().map(|e| e.code), Some(ErrorCode::ModuleNotFound));
    assert!(chassis.handle(5).is_err());
  }

  #[test]
  fn open_and_boot_all() {
    let chassis = Chassis::new(2);
    chassis.open(buses(&[2, 3])).unwrap();
    assert_eq!(chassis.module_by_slot(3).unwrap().number, 1);
    assert!(chassis.module_by_slot(7).is_err());
    let set = sim::firmware_set(Release::new(3, 4, 1));
    chassis.boot(BootPattern::ALL, &set).unwrap();
    assert!(chassis.online());
    chassis.close();
    assert!(!chassis.module(0).unwrap().opened());
  }

  #[test]
  fn device_count_must_match() {
    let chassis = Chassis::new(2);
    assert!(chassis.open(buses(&[2])).is_err());
  }
}

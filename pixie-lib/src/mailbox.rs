//! The PLX mailbox
//!
//! The 8 mailbox words survive a host restart, so they hold what
//! the host needs to know about a module without booting it: the
//! identity, the resident firmware release and its CRC, and how
//! often the module has been opened.
//!
//! | slot | content                                           |
//! |------|---------------------------------------------------|
//! | 0    | flags: [3:0] version, [29:28] prerelease, [31:30] set type |
//! | 1    | `serial << 16 | revision << 8 | slot`             |
//! | 2    | `major << 16 | minor`                             |
//! | 3    | `patch << 16 | prerelease number`                |
//! | 4    | CRC32 of the loaded firmware                      |
//! | 7    | open count                                        |

use std::fmt;

use crate::bus::BusGuard;
use crate::errors::PixieError;
use crate::firmware::{PrereleaseKind,
                      Release,
                      SetType};

pub const MAILBOX_SLOTS : usize = 8;

pub const MB_FLAGS  : usize = 0;
pub const MB_CONFIG : usize = 1;
pub const MB_FW_1   : usize = 2;
pub const MB_FW_2   : usize = 3;
pub const MB_FW_3   : usize = 4;
pub const MB_OPENS  : usize = 7;

pub const REVISION_BASE : u32 = 0;
pub const REVISION_MASK : u32 = 0xf;
pub const RELEASE_BASE  : u32 = 28;
pub const RELEASE_MASK  : u32 = 0xf;
/// layout version written by this driver
pub const VERSION       : u32 = 1;

/// Host copy of the mailbox words
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Mailbox {
  pub words : [u32; MAILBOX_SLOTS],
}

impl Mailbox {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn read(&mut self, bus : &BusGuard) -> Result<(), PixieError> {
    for slot in 0..MAILBOX_SLOTS {
      self.words[slot] = bus.read_mailbox(slot)?;
    }
    Ok(())
  }

  fn write_slot(&self, bus : &BusGuard, slot : usize) -> Result<(), PixieError> {
    bus.write_mailbox(slot, self.words[slot])
  }

  /// A mailbox with cleared flags has not been set up since power on
  pub fn reset(&self) -> bool {
    self.words[MB_FLAGS] == 0
  }

  pub fn version(&self) -> u32 {
    (self.words[MB_FLAGS] >> REVISION_BASE) & REVISION_MASK
  }

  pub fn slot(&self) -> usize {
    (self.words[MB_CONFIG] & 0xff) as usize
  }

  pub fn serial_num(&self) -> u32 {
    self.words[MB_CONFIG] >> 16
  }

  pub fn revision(&self) -> u32 {
    (self.words[MB_CONFIG] >> 8) & 0xff
  }

  pub fn opens(&self) -> u32 {
    self.words[MB_OPENS]
  }

  pub fn firmware_release(&self) -> (Release, SetType) {
    let flags = self.words[MB_FLAGS];
    let fw_1  = self.words[MB_FW_1];
    let fw_2  = self.words[MB_FW_2];
    let prerelease_number = fw_2 & 0xffff;
    let release = Release {
      major             : (fw_1 >> 16) & 0xffff,
      minor             : fw_1 & 0xffff,
      patch             : (fw_2 >> 16) & 0xffff,
      prerelease_number : if prerelease_number != 0 { Some(prerelease_number) } else { None },
      prerelease_kind   : PrereleaseKind::from_bits(flags >> RELEASE_BASE),
    };
    (release, SetType::from_bits(flags >> (RELEASE_BASE + 2)))
  }

  pub fn firmware_crc(&self) -> u32 {
    self.words[MB_FW_3]
  }

  /// Is the requested release the one the module runs?
  pub fn firmware_resident(&self, release : &Release) -> bool {
    self.firmware_release().0 == *release
  }

  pub fn set_config(&mut self,
                    bus      : &BusGuard,
                    slot     : usize,
                    serial   : u32,
                    revision : u32) -> Result<(), PixieError> {
    self.words[MB_CONFIG] = (serial << 16) | ((revision & 0xff) << 8) | (slot as u32 & 0xff);
    let mut flags = self.words[MB_FLAGS] & !(REVISION_MASK << REVISION_BASE);
    flags |= (VERSION & REVISION_MASK) << REVISION_BASE;
    self.words[MB_FLAGS] = flags;
    self.write_slot(bus, MB_FLAGS)?;
    self.write_slot(bus, MB_CONFIG)?;
    Ok(())
  }

  pub fn set_firmware_release(&mut self,
                              bus      : &BusGuard,
                              release  : &Release,
                              set_type : SetType) -> Result<(), PixieError> {
    self.words[MB_FW_1] = (release.major << 16) | (release.minor & 0xffff);
    let prerelease_number = release.prerelease_number.unwrap_or(0);
    self.words[MB_FW_2] = (release.patch << 16) | (prerelease_number & 0xffff);
    let mut flags = self.words[MB_FLAGS] & !(RELEASE_MASK << RELEASE_BASE);
    flags |= ((set_type.bits() & 3) << (RELEASE_BASE + 2))
           | ((release.prerelease_kind.bits() & 3) << RELEASE_BASE);
    self.words[MB_FLAGS] = flags;
    self.write_slot(bus, MB_FLAGS)?;
    self.write_slot(bus, MB_FW_1)?;
    self.write_slot(bus, MB_FW_2)?;
    Ok(())
  }

  pub fn set_firmware_crc(&mut self, bus : &BusGuard, crc : u32) -> Result<(), PixieError> {
    self.words[MB_FW_3] = crc;
    self.write_slot(bus, MB_FW_3)
  }

  pub fn update_opens(&mut self, bus : &BusGuard) -> Result<u32, PixieError> {
    self.words[MB_OPENS] = self.words[MB_OPENS].wrapping_add(1);
    self.write_slot(bus, MB_OPENS)?;
    Ok(self.words[MB_OPENS])
  }
}

impl fmt::Display for Mailbox {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let (release, set_type) = self.firmware_release();
    let mut repr = String::from("<Mailbox:");
    repr += &(format!("\n  version  : {}", self.version()));
    repr += &(format!("\n  slot     : {}", self.slot()));
    repr += &(format!("\n  serial   : {}", self.serial_num()));
    repr += &(format!("\n  revision : {}", self.revision()));
    repr += &(format!("\n  firmware : {} ({})", release, set_type));
    repr += &(format!("\n  crc      : {:#010x}", self.firmware_crc()));
    repr += &(format!("\n  opens    : {}>", self.opens()));
    write!(f, "{}", repr)
  }
}

#[cfg(test)]
mod test_mailbox {
  use super::*;
  use crate::bus::Device;
  use crate::sim::SimulatedBus;
  use crate::bus::HostBus;

  fn device() -> (std::sync::Arc<SimulatedBus>, Device) {
    let sim = std::sync::Arc::new(SimulatedBus::new(Default::default()));
    let device = Device::new(Box::new(sim.clone()));
    (sim, device)
  }

  #[test]
  fn config_encoding() {
    let (sim, device) = device();
    let mut mb = Mailbox::new();
    assert!(mb.reset());
    mb.set_config(&device.lock(), 5, 1234, 15).unwrap();
    assert_eq!(mb.words[MB_CONFIG], (1234 << 16) | (15 << 8) | 5);
    assert_eq!(mb.slot(), 5);
    assert_eq!(mb.serial_num(), 1234);
    assert_eq!(mb.revision(), 15);
    assert_eq!(mb.version(), VERSION);
    assert!(!mb.reset());
    assert_eq!(sim.read_mailbox(MB_CONFIG).unwrap(), mb.words[MB_CONFIG]);
  }

  #[test]
  fn release_encoding() {
    let (sim, device) = device();
    let mut mb = Mailbox::new();
    let release = Release::parse("3.4.1-beta7").unwrap();
    mb.set_firmware_release(&device.lock(), &release, SetType::Release).unwrap();
    assert_eq!(mb.words[MB_FW_1], (3 << 16) | 4);
    assert_eq!(mb.words[MB_FW_2], (1 << 16) | 7);
    assert_eq!(mb.words[MB_FLAGS] >> 28, (3 << 2) | 2);
    assert!(mb.firmware_resident(&release));
    assert!(!mb.firmware_resident(&Release::new(3, 4, 1)));
    assert_eq!(mb.firmware_release().1, SetType::Release);
    // a new release replaces the old kind bits
    mb.set_firmware_release(&device.lock(), &Release::new(1, 0, 0), SetType::User).unwrap();
    assert_eq!(mb.words[MB_FLAGS] >> 28, 2 << 2);
    assert_eq!(sim.read_mailbox(MB_FLAGS).unwrap(), mb.words[MB_FLAGS]);
  }

  #[test]
  fn crc_and_opens() {
    let (sim, device) = device();
    let mut mb = Mailbox::new();
    mb.set_firmware_crc(&device.lock(), 0xdeadbeef).unwrap();
    assert_eq!(mb.firmware_crc(), 0xdeadbeef);
    assert_eq!(mb.update_opens(&device.lock()).unwrap(), 1);
    assert_eq!(mb.update_opens(&device.lock()).unwrap(), 2);
    assert_eq!(sim.read_mailbox(MB_OPENS).unwrap(), 2);
  }
}

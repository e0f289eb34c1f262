//! Memory mapped access to a module
//!
//! The PCI BARs of a module are exported by the uio driver.
//!
//! /dev/uioN map 0 - PLX 9054 registers, the mailbox lives at 0x40
//! /dev/uioN map 1 - local space, the module registers (see `registers.rs`)
//!
//! The uio driver exposes map `i` at the mmap offset `i * pagesize`.

extern crate memmap;

use std::error::Error;
use std::fs::File;
use std::fmt;
use std::sync::Mutex;

use memmap::{MmapMut,
             MmapOptions};

use crate::bus::{DeviceInfo,
                 HostBus};
use crate::registers::{FIFO_MEM_DMA,
                       MAX_DMA_BLOCK_SIZE};

/// The size of a 32bit unsigned int in byte
/// (all words in registers are u32)
pub const SIZEOF_U32 : usize = 4;

/// Offset of the mailbox in the PLX register map
pub const PLX_MAILBOX_OFFSET : usize = 0x40;
pub const PLX_MAP_SIZE       : usize = 0x100;
/// Local space, registers plus the memory windows
pub const LOCAL_MAP_SIZE     : usize = 0x01000000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BusError {
  /// the device is claimed by another owner
  InUse,
  /// the device has not been opened
  NotOpen,
  MMapFail,
  DmaFailure,
  OutOfRange,
  Unknown,
}

impl fmt::Display for BusError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype = match self {
      BusError::InUse      => "InUse",
      BusError::NotOpen    => "NotOpen",
      BusError::MMapFail   => "MMapFail",
      BusError::DmaFailure => "DmaFailure",
      BusError::OutOfRange => "OutOfRange",
      BusError::Unknown    => "Unknown",
    };
    write!(f, "<BusError: {}>", etype)
  }
}

impl Error for BusError {
}

/// Map one uio region with read/write access
pub fn map_physical_mem_write(addr_space : &str,
                              map        : usize,
                              len        : usize)
  -> Result<MmapMut, Box<dyn Error>> {
  let page = 4096u64;
  let m = unsafe {
    MmapOptions::new()
      .offset(map as u64 * page)
      .len(len)
      .map_mut(&File::options()
        .read(true)
        .write(true)
        .open(addr_space)?)?
    };
  Ok(m)
}

struct Regions {
  plx   : MmapMut,
  local : MmapMut,
}

impl Regions {
  fn word_ptr(region : &MmapMut, offset : usize) -> Result<*mut u32, BusError> {
    if offset % SIZEOF_U32 != 0 || offset + SIZEOF_U32 > region.len() {
      return Err(BusError::OutOfRange);
    }
    // the mapping is page aligned and the offset word aligned
    Ok(unsafe { region.as_ptr().add(offset) as *mut u32 })
  }
}

/// A module reached through its uio device
pub struct MmapBus {
  addr_space : String,
  info       : DeviceInfo,
  regions    : Mutex<Option<Regions>>,
}

impl MmapBus {
  /// The identity is read from the module EEPROM by the
  /// platform layer and handed in here.
  pub fn new(addr_space : &str, info : DeviceInfo) -> Self {
    Self {
      addr_space : String::from(addr_space),
      info,
      regions    : Mutex::new(None),
    }
  }

  fn with_regions<T, F>(&self, func : F) -> Result<T, BusError>
    where F : FnOnce(&Regions) -> Result<T, BusError> {
    let guard = match self.regions.lock() {
      Ok(g)         => g,
      Err(poisoned) => poisoned.into_inner(),
    };
    match guard.as_ref() {
      None          => Err(BusError::NotOpen),
      Some(regions) => func(regions),
    }
  }
}

impl HostBus for MmapBus {
  fn open(&self) -> Result<DeviceInfo, BusError> {
    let mut guard = match self.regions.lock() {
      Ok(g)         => g,
      Err(poisoned) => poisoned.into_inner(),
    };
    if guard.is_some() {
      return Err(BusError::InUse);
    }
    let plx = match map_physical_mem_write(&self.addr_space, 0, PLX_MAP_SIZE) {
      Ok(m) => m,
      Err(err) => {
        error!("Failed to mmap PLX region of {}! {}", self.addr_space, err);
        return Err(BusError::MMapFail);
      }
    };
    let local = match map_physical_mem_write(&self.addr_space, 1, LOCAL_MAP_SIZE) {
      Ok(m) => m,
      Err(err) => {
        error!("Failed to mmap local space of {}! {}", self.addr_space, err);
        return Err(BusError::MMapFail);
      }
    };
    *guard = Some(Regions { plx, local });
    debug!("Mapped {}", self.addr_space);
    Ok(self.info)
  }

  fn close(&self) -> Result<(), BusError> {
    let mut guard = match self.regions.lock() {
      Ok(g)         => g,
      Err(poisoned) => poisoned.into_inner(),
    };
    *guard = None;
    Ok(())
  }

  fn read_word(&self, addr : u32) -> Result<u32, BusError> {
    self.with_regions(|r| {
      let p = Regions::word_ptr(&r.local, addr as usize)?;
      Ok(unsafe { std::ptr::read_volatile(p) })
    })
  }

  fn write_word(&self, addr : u32, value : u32) -> Result<(), BusError> {
    trace!("Attempting to write {value:#x} at addr {addr:#x}");
    self.with_regions(|r| {
      let p = Regions::word_ptr(&r.local, addr as usize)?;
      unsafe { std::ptr::write_volatile(p, value); }
      Ok(())
    })
  }

  /// Programmed IO block read. The FIFO window is a single port
  /// so its address does not advance.
  fn dma_read(&self, addr : u32, buf : &mut [u32]) -> Result<(), BusError> {
    if buf.len() > MAX_DMA_BLOCK_SIZE * 16 {
      return Err(BusError::DmaFailure);
    }
    self.with_regions(|r| {
      for (i, word) in buf.iter_mut().enumerate() {
        let offset = if addr == FIFO_MEM_DMA {
          addr as usize
        } else {
          addr as usize + i * SIZEOF_U32
        };
        let p = Regions::word_ptr(&r.local, offset)?;
        *word = unsafe { std::ptr::read_volatile(p) };
      }
      Ok(())
    })
  }

  fn dma_write(&self, addr : u32, buf : &[u32]) -> Result<(), BusError> {
    self.with_regions(|r| {
      for (i, word) in buf.iter().enumerate() {
        let p = Regions::word_ptr(&r.local, addr as usize + i * SIZEOF_U32)?;
        unsafe { std::ptr::write_volatile(p, *word); }
      }
      Ok(())
    })
  }

  fn read_mailbox(&self, slot : usize) -> Result<u32, BusError> {
    self.with_regions(|r| {
      let p = Regions::word_ptr(&r.plx, PLX_MAILBOX_OFFSET + slot * SIZEOF_U32)?;
      Ok(unsafe { std::ptr::read_volatile(p) })
    })
  }

  fn write_mailbox(&self, slot : usize, value : u32) -> Result<(), BusError> {
    self.with_regions(|r| {
      let p = Regions::word_ptr(&r.plx, PLX_MAILBOX_OFFSET + slot * SIZEOF_U32)?;
      unsafe { std::ptr::write_volatile(p, value); }
      Ok(())
    })
  }
}

//! The transport a module is reached over
//!
//! A [`HostBus`] can read and write a word at a register address,
//! move a block of words and access the 8 mailbox slots. Everything
//! above it only talks to the hardware through a [`Device`], which
//! adds the bus lock so multi-step register sequences are not
//! interleaved by the FIFO worker.

use std::sync::{Arc,
                Mutex,
                MutexGuard};

use crate::errors::PixieError;
use crate::memory::BusError;

/// Identity of the board behind a bus, as found by the
/// platform layer when the device is opened
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
  pub slot         : usize,
  pub serial       : u32,
  pub revision     : u32,
  pub major        : u32,
  pub minor        : u32,
  pub num_channels : usize,
}

impl Default for DeviceInfo {
  fn default() -> Self {
    Self {
      slot         : 2,
      serial       : 0,
      revision     : crate::registers::REV_F,
      major        : 0,
      minor        : 0,
      num_channels : 16,
    }
  }
}

pub trait HostBus : Send + Sync {
  /// Claim the device and return its identity
  fn open(&self) -> Result<DeviceInfo, BusError>;
  fn close(&self) -> Result<(), BusError>;
  fn read_word(&self, addr : u32) -> Result<u32, BusError>;
  fn write_word(&self, addr : u32, value : u32) -> Result<(), BusError>;
  fn dma_read(&self, addr : u32, buf : &mut [u32]) -> Result<(), BusError>;
  fn dma_write(&self, addr : u32, buf : &[u32]) -> Result<(), BusError>;
  fn read_mailbox(&self, slot : usize) -> Result<u32, BusError>;
  fn write_mailbox(&self, slot : usize, value : u32) -> Result<(), BusError>;
}

impl<T : HostBus + ?Sized> HostBus for Arc<T> {
  fn open(&self) -> Result<DeviceInfo, BusError> {
    (**self).open()
  }

  fn close(&self) -> Result<(), BusError> {
    (**self).close()
  }

  fn read_word(&self, addr : u32) -> Result<u32, BusError> {
    (**self).read_word(addr)
  }

  fn write_word(&self, addr : u32, value : u32) -> Result<(), BusError> {
    (**self).write_word(addr, value)
  }

  fn dma_read(&self, addr : u32, buf : &mut [u32]) -> Result<(), BusError> {
    (**self).dma_read(addr, buf)
  }

  fn dma_write(&self, addr : u32, buf : &[u32]) -> Result<(), BusError> {
    (**self).dma_write(addr, buf)
  }

  fn read_mailbox(&self, slot : usize) -> Result<u32, BusError> {
    (**self).read_mailbox(slot)
  }

  fn write_mailbox(&self, slot : usize, value : u32) -> Result<(), BusError> {
    (**self).write_mailbox(slot, value)
  }
}

/// A bus plus the lock which serializes register sequences
pub struct Device {
  bus  : Box<dyn HostBus>,
  lock : Mutex<()>,
}

impl Device {
  pub fn new(bus : Box<dyn HostBus>) -> Self {
    Self {
      bus,
      lock : Mutex::new(()),
    }
  }

  pub fn open(&self) -> Result<DeviceInfo, PixieError> {
    Ok(self.bus.open()?)
  }

  pub fn close(&self) -> Result<(), PixieError> {
    Ok(self.bus.close()?)
  }

  /// Hold the bus for a sequence of register accesses
  pub fn lock(&self) -> BusGuard<'_> {
    let guard = match self.lock.lock() {
      Ok(g)         => g,
      Err(poisoned) => poisoned.into_inner(),
    };
    BusGuard {
      bus    : self.bus.as_ref(),
      _guard : guard,
    }
  }
}

/// Bus access while the bus lock is held
pub struct BusGuard<'a> {
  bus    : &'a dyn HostBus,
  _guard : MutexGuard<'a, ()>,
}

impl<'a> BusGuard<'a> {
  pub fn read_word(&self, addr : u32) -> Result<u32, PixieError> {
    Ok(self.bus.read_word(addr)?)
  }

  pub fn write_word(&self, addr : u32, value : u32) -> Result<(), PixieError> {
    Ok(self.bus.write_word(addr, value)?)
  }

  pub fn dma_read(&self, addr : u32, buf : &mut [u32]) -> Result<(), PixieError> {
    Ok(self.bus.dma_read(addr, buf)?)
  }

  pub fn dma_write(&self, addr : u32, buf : &[u32]) -> Result<(), PixieError> {
    Ok(self.bus.dma_write(addr, buf)?)
  }

  pub fn read_mailbox(&self, slot : usize) -> Result<u32, PixieError> {
    Ok(self.bus.read_mailbox(slot)?)
  }

  pub fn write_mailbox(&self, slot : usize, value : u32) -> Result<(), PixieError> {
    Ok(self.bus.write_mailbox(slot, value)?)
  }
}

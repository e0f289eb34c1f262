//! Convenience functions to read/write the various control
//! registers and the memories behind them
//!
//! For the mapping of registers/addresses see `registers.rs`.
//! Sequences of register accesses hold the bus lock for the whole
//! sequence.

use std::thread;
use std::time::Duration;

use crate::bus::{BusGuard,
                 Device};
use crate::errors::{ErrorCode,
                    PixieError};
use crate::registers::*;

/// Polls of the FIFO level while waiting for a DMA block
pub const FIFO_READ_POLLS : usize = 1000;

pub fn read_csr(dev : &Device) -> Result<u32, PixieError> {
  dev.lock().read_word(CSR)
}

pub fn write_csr(dev : &Device, value : u32) -> Result<(), PixieError> {
  trace!("CSR <- {value:#x}");
  dev.lock().write_word(CSR, value)
}

/// Set bits in the CSR, the read-modify-write is atomic
pub fn set_csr(dev : &Device, mask : u32) -> Result<(), PixieError> {
  let bus = dev.lock();
  let csr = bus.read_word(CSR)?;
  bus.write_word(CSR, csr | mask)
}

pub fn clear_csr(dev : &Device, mask : u32) -> Result<(), PixieError> {
  let bus = dev.lock();
  let csr = bus.read_word(CSR)?;
  bus.write_word(CSR, csr & !mask)
}

/// Is a run or control task active on the DSP?
pub fn run_active(dev : &Device) -> Result<bool, PixieError> {
  let csr = read_csr(dev)?;
  Ok(test_bit(CSR_RUNENA, csr) || test_bit(CSR_RUNACTIVE, csr))
}

/// Set the DSP memory address, the data register auto increments
fn dsp_address(bus : &BusGuard, addr : u32) -> Result<(), PixieError> {
  bus.write_word(EXT_MEM_TEST, addr)
}

pub fn dsp_read(dev : &Device, addr : u32) -> Result<u32, PixieError> {
  let bus = dev.lock();
  dsp_address(&bus, addr)?;
  let value = bus.read_word(WRT_DSP_MMA)?;
  trace!("dsp[{addr:#x}] -> {value:#x}");
  Ok(value)
}

pub fn dsp_write(dev : &Device, addr : u32, value : u32) -> Result<(), PixieError> {
  trace!("dsp[{addr:#x}] <- {value:#x}");
  let bus = dev.lock();
  dsp_address(&bus, addr)?;
  bus.write_word(WRT_DSP_MMA, value)
}

pub fn dsp_read_block(dev : &Device, addr : u32, values : &mut [u32]) -> Result<(), PixieError> {
  let bus = dev.lock();
  dsp_address(&bus, addr)?;
  for value in values.iter_mut() {
    *value = bus.read_word(WRT_DSP_MMA)?;
  }
  Ok(())
}

pub fn dsp_write_block(dev : &Device, addr : u32, values : &[u32]) -> Result<(), PixieError> {
  let bus = dev.lock();
  dsp_address(&bus, addr)?;
  for value in values {
    bus.write_word(WRT_DSP_MMA, *value)?;
  }
  Ok(())
}

/// Number of words waiting in the external FIFO
pub fn fifo_level(dev : &Device) -> Result<usize, PixieError> {
  Ok(dev.lock().read_word(RD_WRT_FIFO_WML)? as usize)
}

/// Move `values.len()` words out of the external FIFO
///
/// The words are first staged for the DMA window, the FIFO has to
/// report them before the block is read.
pub fn fifo_read(dev : &Device, values : &mut [u32]) -> Result<(), PixieError> {
  if values.is_empty() {
    return Ok(());
  }
  let length = values.len();
  let bus = dev.lock();
  bus.write_word(SET_EXT_FIFO, length as u32)?;
  let mut ready = false;
  for _ in 0..FIFO_READ_POLLS {
    if bus.read_word(RD_WRT_FIFO_WML)? as usize >= length {
      ready = true;
      break;
    }
  }
  if !ready {
    return Err(PixieError::new(ErrorCode::DeviceFifoFailure,
                               format!("fifo: {} words not ready for DMA", length)));
  }
  bus.dma_read(FIFO_MEM_DMA, values)
}

fn mca_address(channel : usize) -> u32 {
  MCA_MEM_DATA + (channel * LARGE_HISTOGRAM_LENGTH * 4) as u32
}

/// Zero the histogram memory of the channels
pub fn mca_clear(dev : &Device, num_channels : usize) -> Result<(), PixieError> {
  debug!("Clearing MCA memory for {} channels", num_channels);
  let zeros = vec![0u32; LARGE_HISTOGRAM_LENGTH];
  let bus = dev.lock();
  for channel in 0..num_channels {
    bus.dma_write(mca_address(channel), &zeros)?;
  }
  Ok(())
}

pub fn mca_read(dev : &Device, channel : usize, values : &mut [u32]) -> Result<(), PixieError> {
  if values.len() > LARGE_HISTOGRAM_LENGTH {
    return Err(PixieError::new(ErrorCode::InvalidValue,
                               format!("histogram length {} larger than {}",
                                       values.len(), LARGE_HISTOGRAM_LENGTH)));
  }
  dev.lock().dma_read(mca_address(channel), values)
}

/// Write the CPLD control register from the host shadow
pub fn write_ctrlcs(dev : &Device, value : u32) -> Result<(), PixieError> {
  trace!("CFG_CTRLCS <- {value:#x}");
  dev.lock().write_word(CFG_CTRLCS, value)
}

pub fn cpld_version(dev : &Device) -> Result<u32, PixieError> {
  dev.lock().read_word(CFG_RDVER)
}

/// Reset the FIFO word counter before a run
pub fn fifo_reset_count(dev : &Device) -> Result<(), PixieError> {
  dev.lock().write_word(WRT_RESET_RFCNT, 1)
}

/// Poll `cond` each millisecond for up to `msecs`
pub fn wait_for<F>(msecs : usize, mut cond : F) -> Result<bool, PixieError>
  where F : FnMut() -> Result<bool, PixieError> {
  let one_milli = Duration::from_millis(1);
  for _ in 0..msecs {
    if cond()? {
      return Ok(true);
    }
    thread::sleep(one_milli);
  }
  cond()
}

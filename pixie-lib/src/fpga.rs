//! Loading the FPGAs and booting the DSP
//!
//! The FPGAs are programmed through the CPLD. An FPGA is cleared by
//! pulling its PROGB line low, readied by raising it again and then
//! fed the image one word at a time through CFG_DATACS. The CPLD
//! status reports the INIT line once the FPGA is ready and the DONE
//! line once it configured.

use std::thread;
use std::time::Duration;

use crate::bus::Device;
use crate::errors::{ErrorCode,
                    PixieError};
use crate::firmware::Firmware;
use crate::registers::*;

/// Attempts before a load is given up
pub const LOAD_RETRIES    : usize = 10;
/// Milliseconds to wait for INIT or DONE per attempt
pub const LOAD_TIMEOUT_MS : usize = 25;
/// Polls of the DSP init-done bit, 1ms apart
pub const DSP_BOOT_POLLS  : usize = 1000;

/// Masks applied to the CPLD status to form the control value
#[derive(Debug, Copy, Clone)]
pub struct Controls {
  pub clear : u32,
  pub set   : u32,
  /// status bits which are all set once the step completed
  pub done  : u32,
}

/// The sequences for one FPGA (or group of FPGAs loaded together)
#[derive(Debug, Copy, Clone)]
pub struct FpgaControl {
  pub name       : &'static str,
  pub clear_ctrl : Controls,
  pub load_ctrl  : Controls,
}

const CTRL_MASK : u32 = 0xffff;

const FIPPI_SEL : u32 = (1 << CPLDCSR_SEL_FIPPI_0)
                      | (1 << CPLDCSR_SEL_FIPPI_1)
                      | (1 << CPLDCSR_SEL_FIPPI_2)
                      | (1 << CPLDCSR_SEL_FIPPI_3);

const FIPPI_PROGB : u32 = (1 << CPLDCSR_PROGB_FIPPI_0)
                        | (1 << CPLDCSR_PROGB_FIPPI_1)
                        | (1 << CPLDCSR_PROGB_FIPPI_2)
                        | (1 << CPLDCSR_PROGB_FIPPI_3);

/// System (communications) FPGA
pub const SYS : FpgaControl = FpgaControl {
  name       : "sys",
  clear_ctrl : Controls {
    clear : CTRL_MASK & !(1 << CPLDCSR_PROGB_SYS) & !FIPPI_SEL,
    set   : 1 << CPLDCSR_SEL_SYS,
    done  : RDCS_SYS_INIT,
  },
  load_ctrl  : Controls {
    clear : CTRL_MASK & !FIPPI_SEL,
    set   : (1 << CPLDCSR_SEL_SYS) | (1 << CPLDCSR_PROGB_SYS),
    done  : RDCS_SYS_DONE,
  },
};

/// The signal processing FPGAs, loaded as one
pub const FIPPI : FpgaControl = FpgaControl {
  name       : "fippi",
  clear_ctrl : Controls {
    clear : CTRL_MASK & !FIPPI_PROGB & !(1 << CPLDCSR_SEL_SYS),
    set   : FIPPI_SEL,
    done  : RDCS_FIPPI_INIT,
  },
  load_ctrl  : Controls {
    clear : CTRL_MASK & !(1 << CPLDCSR_SEL_SYS),
    set   : FIPPI_SEL | FIPPI_PROGB,
    done  : RDCS_FIPPI_DONE,
  },
};

fn wait_usecs(usecs : u64) {
  thread::sleep(Duration::from_micros(usecs));
}

impl FpgaControl {
  pub fn done(&self, dev : &Device) -> Result<bool, PixieError> {
    let rdcs = dev.lock().read_word(CFG_RDCS)?;
    Ok((rdcs & self.load_ctrl.done) == self.load_ctrl.done)
  }

  fn failure(&self, what : &str) -> PixieError {
    PixieError::new(ErrorCode::DeviceLoadFailure, format!("fpga-{} {}", self.name, what))
  }

  /// Program the FPGA with the image, retrying with an increasing
  /// bus backoff
  pub fn load(&self, dev : &Device, image : &Firmware, slot : usize) -> Result<(), PixieError> {
    info!("fpga-{} [slot {}] load: length={}", self.name, slot, image.image.len());
    if image.image.is_empty() {
      return Err(self.failure("no image loaded"));
    }
    let words       = image.words();
    let mut retries = LOAD_RETRIES;
    let mut backoff = 0usize;
    loop {
      // hold the bus for the whole sequence
      let bus = dev.lock();
      let write = |reg : u32, value : u32, backoff : usize| -> Result<(), PixieError> {
        bus.write_word(reg, value)?;
        for _ in 0..backoff {
          bus.read_word(CFG_RDCS)?;
        }
        Ok(())
      };

      let data = (bus.read_word(CFG_RDCS)? & self.clear_ctrl.clear) | self.clear_ctrl.set;
      write(CFG_CTRLCS, data, backoff)?;
      wait_usecs(100);
      let data = (bus.read_word(CFG_RDCS)? & self.load_ctrl.clear) | self.load_ctrl.set;
      write(CFG_CTRLCS, data, backoff)?;

      let mut cleared = false;
      for _ in 0..LOAD_TIMEOUT_MS {
        if (bus.read_word(CFG_RDCS)? & self.clear_ctrl.done) == self.clear_ctrl.done {
          cleared = true;
          break;
        }
        wait_usecs(1000);
      }
      if !cleared {
        retries -= 1;
        if retries == 0 {
          return Err(self.failure("clear failure"));
        }
        backoff += 2;
        debug!("fpga-{} [slot {}] retry: backoff={}", self.name, slot, backoff);
        continue;
      }

      debug!("fpga-{} [slot {}] programming", self.name, slot);
      for word in &words {
        write(CFG_DATACS, *word, backoff)?;
      }

      let mut programmed = false;
      for _ in 0..LOAD_TIMEOUT_MS {
        let rdcs = bus.read_word(CFG_RDCS)?;
        if (rdcs & self.load_ctrl.done) == self.load_ctrl.done {
          programmed = true;
          break;
        }
        wait_usecs(1000);
      }
      if programmed {
        break;
      }
      retries -= 1;
      if retries == 0 {
        return Err(self.failure("programming failure"));
      }
      backoff += 2;
      debug!("fpga-{} [slot {}] retry: backoff={}", self.name, slot, backoff);
    }
    debug!("fpga-{} [slot {}] done", self.name, slot);
    Ok(())
  }
}

/// Is the DSP running its program?
pub fn dsp_done(dev : &Device) -> Result<bool, PixieError> {
  Ok(test_bit(CSR_DSPINITDONE, dev.lock().read_word(CSR)?))
}

/// Reset the DSP, download the program and let it start
pub fn dsp_boot(dev : &Device, image : &Firmware, slot : usize) -> Result<(), PixieError> {
  info!("dsp [slot {}] load: length={}", slot, image.image.len());
  if image.image.is_empty() {
    return Err(PixieError::new(ErrorCode::DeviceLoadFailure, "dsp: no image loaded"));
  }
  let words = image.words();
  {
    let bus = dev.lock();
    let csr = bus.read_word(CSR)?;
    bus.write_word(CSR, csr | (1 << CSR_DSPRESET))?;
    wait_usecs(100);
    let csr = (csr & !(1 << CSR_DSPRESET)) | (1 << CSR_DSPDOWNLOAD);
    bus.write_word(CSR, csr)?;
    bus.write_word(EXT_MEM_TEST, 0)?;
    for word in &words {
      bus.write_word(WRT_DSP_MMA, *word)?;
    }
    bus.write_word(CSR, csr & !(1 << CSR_DSPDOWNLOAD))?;
  }
  for _ in 0..DSP_BOOT_POLLS {
    if dsp_done(dev)? {
      debug!("dsp [slot {}] running", slot);
      return Ok(());
    }
    wait_usecs(1000);
  }
  Err(PixieError::new(ErrorCode::DeviceLoadFailure, "dsp: boot failure: no init done"))
}

//! Board specific behaviour
//!
//! Up to revision G the DSP drives the offset DACs and captures the
//! ADC traces. Revision H moved the analog front end onto daughter
//! boards which the host programs through the FIPPI window.
//! A fixture is selected once when a module is opened.

use crate::bus::Device;
use crate::control::{dsp_read_block,
                     dsp_write};
use crate::errors::{ErrorCode,
                    PixieError};
use crate::registers::*;

/// What the DSP does on its own and what the host has to do
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RunConfig {
  pub dsp_sets_dacs         : bool,
  pub adc_trace_per_channel : bool,
  pub dsp_ramp_offsetdacs   : bool,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      dsp_sets_dacs         : true,
      adc_trace_per_channel : false,
      dsp_ramp_offsetdacs   : true,
    }
  }
}

pub trait ModuleFixture : Send {
  fn label(&self) -> &'static str;
  fn run_config(&self) -> RunConfig;
  /// Set a channel's offset DAC from the host
  fn set_dac(&mut self, dev : &Device, channel : usize, value : u32) -> Result<(), PixieError>;
  /// Capture the ADC traces when each channel is read separately
  fn acquire_adc(&mut self, dev : &Device, num_channels : usize) -> Result<(), PixieError>;
  fn read_adc(&self,
              dev          : &Device,
              channel      : usize,
              num_channels : usize,
              trace        : &mut [u16]) -> Result<(), PixieError>;
  /// Restore fixture state after the FPGAs have been re-synced
  fn sync_hw(&mut self, dev : &Device) -> Result<(), PixieError>;
}

fn trace_length(num_channels : usize) -> usize {
  std::cmp::min(MAX_ADC_TRACE_LENGTH, IO_BUFFER_LENGTH / std::cmp::max(num_channels, 1))
}

/// Boards up to revision G, the DSP handles the analog side
pub struct Mainboard {
  revision : u32,
}

impl ModuleFixture for Mainboard {
  fn label(&self) -> &'static str {
    "mainboard"
  }

  fn run_config(&self) -> RunConfig {
    RunConfig::default()
  }

  fn set_dac(&mut self, _dev : &Device, _channel : usize, _value : u32) -> Result<(), PixieError> {
    Err(PixieError::new(ErrorCode::ModuleInvalidOperation,
                        format!("mainboard rev {}: DACs are set by the DSP", revision_label(self.revision))))
  }

  fn acquire_adc(&mut self, _dev : &Device, _num_channels : usize) -> Result<(), PixieError> {
    Ok(())
  }

  /// The DSP leaves the traces of all channels in the IO buffer
  fn read_adc(&self,
              dev          : &Device,
              channel      : usize,
              num_channels : usize,
              trace        : &mut [u16]) -> Result<(), PixieError> {
    let length = std::cmp::min(trace.len(), trace_length(num_channels));
    let mut words = vec![0u32; length];
    let addr = IO_BUFFER_ADDR + (channel * trace_length(num_channels)) as u32;
    dsp_read_block(dev, addr, &mut words)?;
    for (sample, word) in trace.iter_mut().zip(words.iter()) {
      *sample = (*word & 0xffff) as u16;
    }
    Ok(())
  }

  fn sync_hw(&mut self, _dev : &Device) -> Result<(), PixieError> {
    Ok(())
  }
}

/// Revision H analog front end daughter boards
pub struct AfeDaughterBoard {
  dacs   : Vec<Option<u32>>,
  traces : Vec<Vec<u16>>,
}

impl AfeDaughterBoard {
  pub fn new() -> Self {
    Self {
      dacs   : vec![None; MAX_CHANNELS],
      traces : vec![Vec::new(); MAX_CHANNELS],
    }
  }
}

impl Default for AfeDaughterBoard {
  fn default() -> Self {
    Self::new()
  }
}

impl ModuleFixture for AfeDaughterBoard {
  fn label(&self) -> &'static str {
    "afe-dboard"
  }

  fn run_config(&self) -> RunConfig {
    RunConfig {
      dsp_sets_dacs         : false,
      adc_trace_per_channel : true,
      dsp_ramp_offsetdacs   : false,
    }
  }

  fn set_dac(&mut self, dev : &Device, channel : usize, value : u32) -> Result<(), PixieError> {
    if channel >= MAX_CHANNELS {
      return Err(PixieError::new(ErrorCode::ChannelNumberInvalid,
                                 format!("afe-dboard: invalid channel: {}", channel)));
    }
    trace!("afe-dboard: dac: channel={} value={}", channel, value);
    dsp_write(dev, FIPPI_DAC + channel as u32, value)?;
    self.dacs[channel] = Some(value);
    Ok(())
  }

  /// Select each channel's ADC in turn and capture its trace
  fn acquire_adc(&mut self, dev : &Device, num_channels : usize) -> Result<(), PixieError> {
    let length = trace_length(1);
    let mut words = vec![0u32; length];
    for channel in 0..std::cmp::min(num_channels, MAX_CHANNELS) {
      dsp_write(dev, ADCCTRL, channel as u32)?;
      dsp_read_block(dev, IO_BUFFER_ADDR, &mut words)?;
      self.traces[channel] = words.iter().map(|w| (*w & 0xffff) as u16).collect();
    }
    Ok(())
  }

  fn read_adc(&self,
              _dev          : &Device,
              channel       : usize,
              _num_channels : usize,
              trace         : &mut [u16]) -> Result<(), PixieError> {
    let captured = match self.traces.get(channel) {
      Some(t) if !t.is_empty() => t,
      _ => {
        return Err(PixieError::new(ErrorCode::ModuleInvalidOperation,
                                   format!("afe-dboard: no ADC trace captured for channel {}", channel)));
      }
    };
    let length = std::cmp::min(trace.len(), captured.len());
    trace[..length].copy_from_slice(&captured[..length]);
    Ok(())
  }

  /// The DACs lose their value when the FIPPI is re-programmed
  fn sync_hw(&mut self, dev : &Device) -> Result<(), PixieError> {
    for (channel, dac) in self.dacs.iter().enumerate() {
      if let Some(value) = dac {
        dsp_write(dev, FIPPI_DAC + channel as u32, *value)?;
      }
    }
    Ok(())
  }
}

/// The fixture for a board revision
pub fn make(revision : u32) -> Box<dyn ModuleFixture> {
  if revision == REV_H {
    Box::new(AfeDaughterBoard::new())
  } else {
    Box::new(Mainboard { revision })
  }
}

#[cfg(test)]
mod test_fixture {
  use super::*;

  #[test]
  fn selected_by_revision() {
    assert_eq!(make(REV_F).label(), "mainboard");
    assert!(make(REV_F).run_config().dsp_sets_dacs);
    let afe = make(REV_H);
    assert_eq!(afe.label(), "afe-dboard");
    let config = afe.run_config();
    assert!(!config.dsp_sets_dacs);
    assert!(config.adc_trace_per_channel);
    assert!(!config.dsp_ramp_offsetdacs);
  }
}

//! A simulated module
//!
//! [`SimulatedBus`] answers the register, DSP memory, FIFO and
//! mailbox accesses of a module well enough to boot firmware, run
//! tasks and stream list mode data without a crate. The integration
//! tests and the `--sim` option of the tools use it.
//!
//! The model is simple:
//!
//! * an FPGA is cleared by selecting it with its program line low
//!   and is done once it has been sent data after the clear
//! * the DSP starts when its download ends with both FPGAs done
//! * a control task ends after a number of CSR reads, a run lasts
//!   until the run enable bit is cleared

use std::collections::{HashMap,
                       VecDeque};
use std::sync::{Mutex,
                MutexGuard};

use crate::bus::{DeviceInfo,
                 HostBus};
use crate::firmware::{Firmware,
                      FirmwareSet,
                      Release};
use crate::mailbox::MAILBOX_SLOTS;
use crate::memory::BusError;
use crate::param::{ChannelVar,
                   Descriptors,
                   ModuleVar};
use crate::registers::*;
use crate::run::ControlTask;

/// Where the simulated DSP keeps its module variables
pub const SIM_MODULE_VAR_BASE  : u32 = 0x0004a000;
pub const SIM_CHANNEL_VAR_BASE : u32 = 0x0004a400;
/// Words pushed into the FIFO by the `fill_ext_fifo` control task
pub const TEST_FIFO_WORDS      : usize = 16384;
/// CSR reads before a control task ends
pub const DEFAULT_TASK_POLLS   : usize = 3;

const SYS_SEL     : u32 = 1 << CPLDCSR_SEL_SYS;
const SYS_PROGB   : u32 = 1 << CPLDCSR_PROGB_SYS;
const FIPPI_SEL   : u32 = (1 << CPLDCSR_SEL_FIPPI_0)
                        | (1 << CPLDCSR_SEL_FIPPI_1)
                        | (1 << CPLDCSR_SEL_FIPPI_2)
                        | (1 << CPLDCSR_SEL_FIPPI_3);
const FIPPI_PROGB : u32 = (1 << CPLDCSR_PROGB_FIPPI_0)
                        | (1 << CPLDCSR_PROGB_FIPPI_1)
                        | (1 << CPLDCSR_PROGB_FIPPI_2)
                        | (1 << CPLDCSR_PROGB_FIPPI_3);
/// CSR bits driven by the module, not the host
const CSR_STATUS  : u32 = (1 << CSR_RUNACTIVE) | (1 << CSR_DSPINITDONE);

/// The DSP variable file of the simulated DSP program
pub fn default_var_file() -> String {
  let mut text = String::new();
  let mut address = SIM_MODULE_VAR_BASE;
  for desc in ModuleVar::default_descriptors() {
    text += &(format!("{:#x} {}\n", address, desc.var));
    address += desc.size as u32;
  }
  let mut address = SIM_CHANNEL_VAR_BASE;
  for desc in ChannelVar::default_descriptors() {
    text += &(format!("{:#x} {}\n", address, desc.var));
    address += (desc.size * MAX_CHANNELS) as u32;
  }
  text
}

fn image(seed : u8, length : usize) -> Vec<u8> {
  (0..length).map(|i| (i as u8).wrapping_mul(seed).wrapping_add(seed)).collect()
}

/// A firmware set which boots on the simulated module. A released
/// set records the CRC of each image.
pub fn firmware_set(release : Release) -> FirmwareSet {
  let make = |name : &str, seed : u8, length : usize| {
    if release.released() {
      Firmware::released(name, image(seed, length))
    } else {
      Firmware::new(name, image(seed, length))
    }
  };
  let mut set = FirmwareSet::new(release);
  set.comms = Some(make("sys", 3, 4096));
  set.fippi = Some(make("fippi", 5, 8192));
  set.dsp   = Some(make("dsp", 7, 2048));
  set.var   = Some(Firmware::new("var", default_var_file().into_bytes()));
  set
}

#[derive(Debug, Default, Copy, Clone)]
struct FpgaSim {
  cleared : bool,
  ready   : bool,
  done    : bool,
}

impl FpgaSim {
  /// Returns true when the FPGA has been cleared
  fn control(&mut self, selected : bool, progb : bool) -> bool {
    if !selected {
      return false;
    }
    if !progb {
      *self = FpgaSim { cleared : true, ..FpgaSim::default() };
      return true;
    }
    if self.cleared {
      self.cleared = false;
      self.ready   = true;
    }
    false
  }

  fn data(&mut self) {
    if self.ready {
      self.done = true;
    }
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SimTask {
  Run,
  Control(Option<usize>),
}

struct SimState {
  info            : DeviceInfo,
  claimed         : bool,
  mailbox         : [u32; MAILBOX_SLOTS],
  ctrlcs          : u32,
  sys             : FpgaSim,
  fippi           : FpgaSim,
  csr             : u32,
  dsp_running     : bool,
  downloading     : bool,
  dsp_words       : usize,
  dsp_addr        : u32,
  dsp_mem         : HashMap<u32, u32>,
  fifo            : VecDeque<u32>,
  fifo_next       : u32,
  mca             : Vec<u32>,
  task            : Option<SimTask>,
  task_polls      : Option<usize>,
  run_task_addr   : u32,
  ctrl_task_addr  : u32,
  regs            : HashMap<u32, u32>,
  transfers       : usize,
  fifo_transfers  : usize,
  max_transfer    : usize,
  level_reads     : usize,
  fail_dsp_addr   : Option<u32>,
}

impl SimState {
  fn write_ctrlcs(&mut self, value : u32) {
    self.ctrlcs = value & 0xffff;
    let sys_cleared = self.sys.control(value & SYS_SEL != 0, value & SYS_PROGB != 0);
    self.fippi.control(value & FIPPI_SEL != 0, value & FIPPI_PROGB == FIPPI_PROGB);
    if sys_cleared {
      self.dsp_running = false;
      self.task        = None;
    }
  }

  fn rdcs(&self) -> u32 {
    let mut value = self.ctrlcs;
    if self.sys.ready {
      value |= RDCS_SYS_INIT;
    }
    if self.sys.done {
      value |= RDCS_SYS_DONE;
    }
    if self.fippi.ready {
      value |= RDCS_FIPPI_INIT;
    }
    if self.fippi.done {
      value |= RDCS_FIPPI_DONE;
    }
    value
  }

  fn write_csr(&mut self, value : u32) {
    let old = self.csr;
    self.csr = value & !CSR_STATUS;
    if test_bit(CSR_DSPRESET, value) {
      self.dsp_running = false;
      self.downloading = false;
      self.task        = None;
      return;
    }
    let download = test_bit(CSR_DSPDOWNLOAD, value);
    if download && !test_bit(CSR_DSPDOWNLOAD, old) {
      self.downloading = true;
      self.dsp_words   = 0;
    }
    if !download && self.downloading {
      self.downloading = false;
      self.dsp_running = self.dsp_words > 0 && self.sys.done && self.fippi.done;
    }
    let runena = test_bit(CSR_RUNENA, value);
    if runena && !test_bit(CSR_RUNENA, old) && self.dsp_running {
      self.start_task();
    }
    if !runena {
      self.task = None;
    }
  }

  fn read_csr(&mut self) -> u32 {
    let finished = match &mut self.task {
      Some(SimTask::Control(Some(left))) => {
        if *left == 0 {
          true
        } else {
          *left -= 1;
          false
        }
      }
      _ => false,
    };
    if finished {
      self.task = None;
      self.csr &= !(1 << CSR_RUNENA);
    }
    let mut value = self.csr;
    if self.task.is_some() {
      value |= 1 << CSR_RUNACTIVE;
    }
    if self.dsp_running {
      value |= 1 << CSR_DSPINITDONE;
    }
    value
  }

  fn start_task(&mut self) {
    let run_task = self.dsp_mem.get(&self.run_task_addr).copied().unwrap_or(0);
    if run_task != 0 {
      self.task = Some(SimTask::Run);
      return;
    }
    let code = self.dsp_mem.get(&self.ctrl_task_addr).copied().unwrap_or(0);
    match ControlTask::from_code(code) {
      ControlTask::FillExtFifo => {
        for _ in 0..TEST_FIFO_WORDS {
          let word = self.fifo_next;
          self.fifo_next = self.fifo_next.wrapping_add(1);
          self.push_fifo(word);
        }
      }
      ControlTask::GetTraces => {
        for i in 0..IO_BUFFER_LENGTH {
          self.dsp_mem.insert(IO_BUFFER_ADDR + i as u32, (i as u32) & 0xffff);
        }
      }
      _ => ()
    }
    self.task = Some(SimTask::Control(self.task_polls));
  }

  fn push_fifo(&mut self, word : u32) {
    if self.fifo.len() < FIFO_SIZE_WORDS {
      self.fifo.push_back(word);
    }
  }

  fn mca_index(&mut self, addr : u32, length : usize) -> Result<usize, BusError> {
    if addr < MCA_MEM_DATA || (addr - MCA_MEM_DATA) % 4 != 0 {
      return Err(BusError::OutOfRange);
    }
    let index = ((addr - MCA_MEM_DATA) / 4) as usize;
    let total = MAX_CHANNELS * LARGE_HISTOGRAM_LENGTH;
    if index + length > total {
      return Err(BusError::OutOfRange);
    }
    if self.mca.is_empty() {
      self.mca = vec![0; total];
    }
    Ok(index)
  }
}

/// A module which only exists in memory
pub struct SimulatedBus {
  state : Mutex<SimState>,
}

impl SimulatedBus {
  pub fn new(info : DeviceInfo) -> Self {
    let descs = Descriptors::load(&default_var_file()).unwrap_or_default();
    Self {
      state : Mutex::new(SimState {
        info,
        claimed        : false,
        mailbox        : [0; MAILBOX_SLOTS],
        ctrlcs         : CFG_CTRLCS_DEFAULT,
        sys            : FpgaSim::default(),
        fippi          : FpgaSim::default(),
        csr            : 0,
        dsp_running    : false,
        downloading    : false,
        dsp_words      : 0,
        dsp_addr       : 0,
        dsp_mem        : HashMap::new(),
        fifo           : VecDeque::new(),
        fifo_next      : 0,
        mca            : Vec::new(),
        task           : None,
        task_polls     : Some(DEFAULT_TASK_POLLS),
        run_task_addr  : descs.module_desc(ModuleVar::RunTask).address,
        ctrl_task_addr : descs.module_desc(ModuleVar::ControlTask).address,
        regs           : HashMap::new(),
        transfers      : 0,
        fifo_transfers : 0,
        max_transfer   : 0,
        level_reads    : 0,
        fail_dsp_addr  : None,
      }),
    }
  }

  fn state(&self) -> MutexGuard<'_, SimState> {
    match self.state.lock() {
      Ok(g)         => g,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// CSR reads before a control task ends, `None` never ends it
  pub fn set_control_task_polls(&self, polls : Option<usize>) {
    self.state().task_polls = polls;
  }

  /// Fail every DSP memory write to `addr`, `None` heals the bus
  pub fn fail_dsp_writes(&self, addr : Option<u32>) {
    self.state().fail_dsp_addr = addr;
  }

  /// Data arriving from the channels
  pub fn fill_fifo(&self, words : &[u32]) {
    let mut state = self.state();
    for word in words {
      state.push_fifo(*word);
    }
  }

  pub fn fifo_len(&self) -> usize {
    self.state().fifo.len()
  }

  /// Bus accesses of any kind since creation
  pub fn transfers(&self) -> usize {
    self.state().transfers
  }

  /// Blocks moved out of the FIFO
  pub fn fifo_transfers(&self) -> usize {
    self.state().fifo_transfers
  }

  /// The largest block moved out of the FIFO
  pub fn max_transfer(&self) -> usize {
    self.state().max_transfer
  }

  pub fn level_reads(&self) -> usize {
    self.state().level_reads
  }

  pub fn mailbox(&self) -> [u32; MAILBOX_SLOTS] {
    self.state().mailbox
  }

  /// A word of DSP memory
  pub fn dsp_value(&self, addr : u32) -> u32 {
    self.state().dsp_mem.get(&addr).copied().unwrap_or(0)
  }

  pub fn dsp_running(&self) -> bool {
    self.state().dsp_running
  }

  pub fn task_active(&self) -> bool {
    self.state().task.is_some()
  }

  /// Fill a channel's histogram as the DSP would during a run
  pub fn write_mca(&self, channel : usize, values : &[u32]) -> Result<(), BusError> {
    let mut state = self.state();
    let addr  = MCA_MEM_DATA + (channel * LARGE_HISTOGRAM_LENGTH * 4) as u32;
    let index = state.mca_index(addr, values.len())?;
    state.mca[index..index + values.len()].copy_from_slice(values);
    Ok(())
  }
}

impl HostBus for SimulatedBus {
  fn open(&self) -> Result<DeviceInfo, BusError> {
    let mut state = self.state();
    if state.claimed {
      return Err(BusError::InUse);
    }
    state.claimed = true;
    Ok(state.info)
  }

  fn close(&self) -> Result<(), BusError> {
    self.state().claimed = false;
    Ok(())
  }

  fn read_word(&self, addr : u32) -> Result<u32, BusError> {
    let mut state = self.state();
    state.transfers += 1;
    let value = match addr {
      CFG_RDCS        => state.rdcs(),
      CFG_CTRLCS      => state.ctrlcs,
      CFG_RDVER       => 0x0100,
      CSR             => state.read_csr(),
      EXT_MEM_TEST    => state.dsp_addr,
      WRT_DSP_MMA     => {
        let value = state.dsp_mem.get(&state.dsp_addr).copied().unwrap_or(0);
        state.dsp_addr = state.dsp_addr.wrapping_add(1);
        value
      }
      RD_WRT_FIFO_WML => {
        state.level_reads += 1;
        state.fifo.len() as u32
      }
      _ => state.regs.get(&addr).copied().unwrap_or(0),
    };
    Ok(value)
  }

  fn write_word(&self, addr : u32, value : u32) -> Result<(), BusError> {
    let mut state = self.state();
    state.transfers += 1;
    match addr {
      CFG_CTRLCS   => state.write_ctrlcs(value),
      CFG_DATACS   => {
        if state.ctrlcs & SYS_SEL != 0 {
          state.sys.data();
        }
        if state.ctrlcs & FIPPI_SEL != 0 {
          state.fippi.data();
        }
      }
      CSR          => state.write_csr(value),
      EXT_MEM_TEST => state.dsp_addr = value,
      WRT_DSP_MMA  => {
        if !state.downloading && state.fail_dsp_addr == Some(state.dsp_addr) {
          return Err(BusError::Unknown);
        }
        if state.downloading {
          state.dsp_words += 1;
        } else {
          let dsp_addr = state.dsp_addr;
          state.dsp_mem.insert(dsp_addr, value);
        }
        state.dsp_addr = state.dsp_addr.wrapping_add(1);
      }
      SET_EXT_FIFO => {
        state.fifo_transfers += 1;
        state.max_transfer = std::cmp::max(state.max_transfer, value as usize);
      }
      _ => {
        state.regs.insert(addr, value);
      }
    }
    Ok(())
  }

  fn dma_read(&self, addr : u32, buf : &mut [u32]) -> Result<(), BusError> {
    let mut state = self.state();
    state.transfers += 1;
    if addr == FIFO_MEM_DMA {
      if state.fifo.len() < buf.len() {
        return Err(BusError::DmaFailure);
      }
      for word in buf.iter_mut() {
        *word = state.fifo.pop_front().unwrap_or(0);
      }
      return Ok(());
    }
    let index = state.mca_index(addr, buf.len())?;
    buf.copy_from_slice(&state.mca[index..index + buf.len()]);
    Ok(())
  }

  fn dma_write(&self, addr : u32, buf : &[u32]) -> Result<(), BusError> {
    let mut state = self.state();
    state.transfers += 1;
    let index = state.mca_index(addr, buf.len())?;
    state.mca[index..index + buf.len()].copy_from_slice(buf);
    Ok(())
  }

  fn read_mailbox(&self, slot : usize) -> Result<u32, BusError> {
    let mut state = self.state();
    state.transfers += 1;
    match state.mailbox.get(slot) {
      None        => Err(BusError::OutOfRange),
      Some(value) => Ok(*value),
    }
  }

  fn write_mailbox(&self, slot : usize, value : u32) -> Result<(), BusError> {
    let mut state = self.state();
    state.transfers += 1;
    match state.mailbox.get_mut(slot) {
      None       => Err(BusError::OutOfRange),
      Some(word) => {
        *word = value;
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod test_sim {
  use super::*;
  use crate::bus::Device;
  use crate::fpga;

  #[test]
  fn var_file_loads() {
    let descs = Descriptors::load(&default_var_file()).unwrap();
    assert_eq!(descs.module_desc(ModuleVar::ModNum).address, SIM_MODULE_VAR_BASE);
    assert_eq!(descs.channel_desc(ChannelVar::ChanCSRa).address, SIM_CHANNEL_VAR_BASE);
    assert_eq!(descs.channel_desc(ChannelVar::ChanCSRb).address,
               SIM_CHANNEL_VAR_BASE + MAX_CHANNELS as u32);
  }

  #[test]
  fn fpgas_and_dsp_boot() {
    let dev = Device::new(Box::new(SimulatedBus::new(DeviceInfo::default())));
    let set = firmware_set(Release::new(3, 4, 1));
    assert!(!fpga::SYS.done(&dev).unwrap());
    fpga::SYS.load(&dev, set.comms.as_ref().unwrap(), 2).unwrap();
    assert!(fpga::SYS.done(&dev).unwrap());
    assert!(!fpga::FIPPI.done(&dev).unwrap());
    fpga::FIPPI.load(&dev, set.fippi.as_ref().unwrap(), 2).unwrap();
    assert!(fpga::FIPPI.done(&dev).unwrap());
    assert!(fpga::SYS.done(&dev).unwrap());
    fpga::dsp_boot(&dev, set.dsp.as_ref().unwrap(), 2).unwrap();
    assert!(fpga::dsp_done(&dev).unwrap());
  }

  #[test]
  fn dsp_needs_fpgas() {
    let dev = Device::new(Box::new(SimulatedBus::new(DeviceInfo::default())));
    let set = firmware_set(Release::not_released());
    assert!(fpga::dsp_boot(&dev, set.dsp.as_ref().unwrap(), 2).is_err());
  }

  #[test]
  fn bus_is_claimed_once() {
    let sim = SimulatedBus::new(DeviceInfo::default());
    assert!(sim.open().is_ok());
    assert_eq!(sim.open(), Err(BusError::InUse));
    sim.close().unwrap();
    assert!(sim.open().is_ok());
  }
}

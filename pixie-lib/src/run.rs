//! Run and control tasks
//!
//! A task is handed to the DSP through the `RunTask`, `ControlTask`
//! and `Resume` variables and started by setting the run enable bit
//! of the CSR. A control task ends on its own, the DSP drops the
//! active bits when it is done. A run lasts until the host clears
//! the run enable bit.

use std::fmt;
use std::thread;
use std::time::{Duration,
                Instant};

use crate::control;
use crate::errors::{ErrorCode,
                    PixieError};
use crate::module::Module;
use crate::param::{ChannelVar,
                   ModuleVar};
use crate::registers::*;

/// Default wait for a control task to end
pub const CONTROL_WAIT_MSECS : usize = 10000;
/// Polls of the run active bit when ending a task, 1ms apart
pub const END_WAIT_MSECS     : usize = 1000;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunMode {
  Resume,
  NewRun,
}

impl RunMode {
  pub fn code(&self) -> u32 {
    match self {
      RunMode::Resume => 0,
      RunMode::NewRun => 1,
    }
  }
}

impl fmt::Display for RunMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      RunMode::Resume => "resume",
      RunMode::NewRun => "new_run",
    };
    write!(f, "{}", repr)
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunTask {
  Nop,
  ListMode,
  Histogram,
  /// host side only, the run enable bit has been cleared and the
  /// DSP is finishing
  RunStopping,
}

impl RunTask {
  /// Value of the `RunTask` DSP variable
  pub fn code(&self) -> u32 {
    match self {
      RunTask::Nop         => 0,
      RunTask::ListMode    => 0x101,
      RunTask::Histogram   => 0x301,
      RunTask::RunStopping => 0xffff,
    }
  }

  pub fn from_code(code : u32) -> Self {
    match code {
      0x101  => RunTask::ListMode,
      0x301  => RunTask::Histogram,
      0xffff => RunTask::RunStopping,
      _      => RunTask::Nop,
    }
  }
}

impl fmt::Display for RunTask {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      RunTask::Nop         => "nop",
      RunTask::ListMode    => "list_mode",
      RunTask::Histogram   => "histogram",
      RunTask::RunStopping => "run_stopping",
    };
    write!(f, "{}", repr)
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlTask {
  SetDacs,
  EnableInput,
  RampOffsetDacs,
  GetTraces,
  ProgramFippi,
  GetBaselines,
  AdjustOffsets,
  TauFinder,
  FillExtFifo,
  ResetAdc,
  Nop,
}

impl ControlTask {
  /// Value of the `ControlTask` DSP variable
  pub fn code(&self) -> u32 {
    match self {
      ControlTask::SetDacs        => 0,
      ControlTask::EnableInput    => 1,
      ControlTask::RampOffsetDacs => 3,
      ControlTask::GetTraces      => 4,
      ControlTask::ProgramFippi   => 5,
      ControlTask::GetBaselines   => 6,
      ControlTask::AdjustOffsets  => 7,
      ControlTask::TauFinder      => 8,
      ControlTask::FillExtFifo    => 11,
      ControlTask::ResetAdc       => 23,
      ControlTask::Nop            => 100,
    }
  }

  pub fn from_code(code : u32) -> Self {
    match code {
      0  => ControlTask::SetDacs,
      1  => ControlTask::EnableInput,
      3  => ControlTask::RampOffsetDacs,
      4  => ControlTask::GetTraces,
      5  => ControlTask::ProgramFippi,
      6  => ControlTask::GetBaselines,
      7  => ControlTask::AdjustOffsets,
      8  => ControlTask::TauFinder,
      11 => ControlTask::FillExtFifo,
      23 => ControlTask::ResetAdc,
      _  => ControlTask::Nop,
    }
  }
}

impl fmt::Display for ControlTask {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      ControlTask::SetDacs        => "set_dacs",
      ControlTask::EnableInput    => "enable_input",
      ControlTask::RampOffsetDacs => "ramp_offsetdacs",
      ControlTask::GetTraces      => "get_traces",
      ControlTask::ProgramFippi   => "program_fippi",
      ControlTask::GetBaselines   => "get_baselines",
      ControlTask::AdjustOffsets  => "adjust_offsets",
      ControlTask::TauFinder      => "tau_finder",
      ControlTask::FillExtFifo    => "fill_ext_fifo",
      ControlTask::ResetAdc       => "reset_adc",
      ControlTask::Nop            => "nop",
    };
    write!(f, "{}", repr)
  }
}

/// Is a run or control task active on the DSP?
pub fn active(module : &Module) -> Result<bool, PixieError> {
  let dev = module.device()?;
  control::run_active(&dev)
}

/// Hand a task to the DSP. Any active task is ended first.
pub fn start(module       : &mut Module,
             mode         : RunMode,
             run_task     : RunTask,
             control_task : ControlTask) -> Result<(), PixieError> {
  debug!("{}run: start: run-mode={} run-task={} control-task={}",
         module.label(), mode, run_task, control_task);
  end(module)?;
  let dev = module.device()?;
  if mode == RunMode::NewRun && run_task != RunTask::Nop {
    control::mca_clear(&dev, module.num_channels)?;
    module.set_run_task(run_task);
  } else {
    module.control_task = control_task;
  }
  module.write_var(ModuleVar::RunTask, run_task.code(), 0, true)?;
  module.write_var(ModuleVar::ControlTask, control_task.code(), 0, true)?;
  module.write_var(ModuleVar::Resume, mode.code(), 0, true)?;
  control::set_csr(&dev, 1 << CSR_RUNENA)
}

/// Stop the active task
///
/// The run enable bit is cleared until the DSP reports the task has
/// ended. The run tasks are `nop` afterwards, also on failure.
pub fn end(module : &mut Module) -> Result<(), PixieError> {
  let dev = module.device()?;
  if control::run_active(&dev)? {
    debug!("{}run: ending", module.label());
    if module.backplane().run.is_leader(module.slot) && module.backplane().sync_waits() > 0 {
      info!("{}run: leader ending synchronized run of {} modules",
            module.label(), module.backplane().sync_waits());
    }
    module.set_run_task(RunTask::RunStopping);
    let started = Instant::now();
    let mut msecs = 0usize;
    while msecs < END_WAIT_MSECS {
      control::clear_csr(&dev, 1 << CSR_RUNENA)?;
      msecs += 1;
      if !control::run_active(&dev)? {
        debug!("{}run: ended, duration={:?}", module.label(), started.elapsed());
        break;
      }
      thread::sleep(Duration::from_millis(1));
    }
    if msecs >= END_WAIT_MSECS {
      module.set_run_task(RunTask::Nop);
      module.control_task = ControlTask::Nop;
      error!("{}run: failed to end task; module reboot required", module.label());
      return Err(PixieError::new(ErrorCode::ModuleTaskTimeout,
                                 "failed to end active run task; module reboot required"));
    }
  }
  module.set_run_task(RunTask::Nop);
  module.control_task = ControlTask::Nop;
  Ok(())
}

/// The host sets the offset DACs of each channel from `OffsetDAC`
fn set_dacs_from_host(module : &mut Module) -> Result<(), PixieError> {
  for channel in 0..module.num_channels {
    let offset = module.read_channel_var(ChannelVar::OffsetDAC, channel, 0, false)?;
    module.fixture_set_dac(channel, offset)?;
  }
  Ok(())
}

/// Work the host does in place of, or before, the DSP. False when
/// the DSP has nothing left to do.
fn prerun(module : &mut Module, task : ControlTask) -> Result<bool, PixieError> {
  let config = module.run_config();
  match task {
    ControlTask::SetDacs if !config.dsp_sets_dacs => {
      set_dacs_from_host(module)?;
      return Ok(false);
    }
    ControlTask::GetTraces if config.adc_trace_per_channel => {
      module.fixture_acquire_adc()?;
      module.control_task = ControlTask::GetTraces;
      return Ok(false);
    }
    ControlTask::RampOffsetDacs if !config.dsp_ramp_offsetdacs => {
      return Err(PixieError::new(ErrorCode::ModuleInvalidOperation,
                                 format!("{}: not supported", task)));
    }
    _ => ()
  }
  Ok(true)
}

fn postrun(module : &mut Module, task : ControlTask) -> Result<(), PixieError> {
  if task == ControlTask::AdjustOffsets && !module.run_config().dsp_sets_dacs {
    set_dacs_from_host(module)?;
  }
  Ok(())
}

fn run_on_dsp(module : &mut Module, task : ControlTask, wait_msecs : usize) -> Result<(), PixieError> {
  debug!("{}run on dsp: control={} wait={}", module.label(), task, wait_msecs);
  start(module, RunMode::NewRun, RunTask::Nop, task)?;
  let dev = module.device()?;
  let finished = control::wait_for(wait_msecs, || Ok(!control::run_active(&dev)?))?;
  if !finished {
    module.set_run_task(RunTask::Nop);
    module.control_task = ControlTask::Nop;
    return Err(PixieError::new(ErrorCode::ModuleTaskTimeout,
                               format!("control task failed to end: {}", task.code())));
  }
  Ok(())
}

/// Run a control task and wait up to `wait_msecs` for it to end
pub fn control(module : &mut Module, task : ControlTask, wait_msecs : usize) -> Result<(), PixieError> {
  debug!("{}run: control={} wait={}", module.label(), task, wait_msecs);
  let started = Instant::now();
  if prerun(module, task)? {
    run_on_dsp(module, task, wait_msecs)?;
  }
  postrun(module, task)?;
  debug!("{}control: control={} duration={:?}", module.label(), task, started.elapsed());
  Ok(())
}

/// Start a histogram or list mode run
pub fn run(module : &mut Module, mode : RunMode, run_task : RunTask) -> Result<(), PixieError> {
  debug!("{}run: mode={} run={}", module.label(), mode, run_task);
  if run_task == RunTask::RunStopping {
    return Err(PixieError::new(ErrorCode::ModuleInvalidOperation,
                               format!("invalid run type: {}", run_task)));
  }
  start(module, mode, run_task, ControlTask::Nop)
}

#[cfg(test)]
mod test_run {
  use super::*;

  #[test]
  fn task_codes() {
    for task in [RunTask::Nop, RunTask::ListMode, RunTask::Histogram, RunTask::RunStopping] {
      assert_eq!(RunTask::from_code(task.code()), task);
    }
    assert_eq!(RunTask::ListMode.code(), 0x101);
    assert_eq!(ControlTask::ProgramFippi.code(), 5);
    assert_eq!(ControlTask::from_code(23), ControlTask::ResetAdc);
    assert_eq!(ControlTask::from_code(99), ControlTask::Nop);
    assert_eq!(RunMode::NewRun.code(), 1);
    assert_eq!(ControlTask::FillExtFifo.to_string(), "fill_ext_fifo");
  }
}

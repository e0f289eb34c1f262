//! A Pixie-16 module
//!
//! The module binds a device, boots or probes its firmware, caches
//! the DSP variables, runs tasks and owns the FIFO worker which
//! streams list mode data. Everything is driven through `&mut self`,
//! a crate keeps its modules behind a mutex (see `chassis.rs`). The
//! worker only shares the [`StreamShared`] state and never the
//! module itself.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::backplane::Backplane;
use crate::bus::{Device,
                 HostBus};
use crate::control;
use crate::errors::{ErrorCode,
                    PixieError};
use crate::firmware::{BootPattern,
                      FirmwareSet,
                      SetType,
                      Stage,
                      CRC32};
use crate::fixture::{self,
                     ModuleFixture,
                     RunConfig};
use crate::fpga;
use crate::mailbox::Mailbox;
use crate::param::{self,
                   ChannelVar,
                   ChannelVariable,
                   Descriptors,
                   ModuleVar,
                   ModuleVariable,
                   NamedVar,
                   SyncMode,
                   VarDescriptor,
                   AccessMode};
use crate::registers::*;
use crate::run::{self,
                 ControlTask,
                 RunMode,
                 RunTask,
                 CONTROL_WAIT_MSECS};
use crate::settings::{FifoSettings,
                      FIFO_BUFFER_SIZE,
                      MAX_FIFO_BUFFERS,
                      MAX_FIFO_DMA_TRIGGER_LEVEL,
                      MAX_FIFO_HOLD_USECS,
                      MAX_FIFO_IDLE_WAIT_USECS,
                      MAX_FIFO_RUN_WAIT_USECS,
                      MIN_FIFO_BUFFERS,
                      MIN_FIFO_DMA_TRIGGER_LEVEL,
                      MIN_FIFO_HOLD_USECS,
                      MIN_FIFO_IDLE_WAIT_USECS,
                      MIN_FIFO_RUN_WAIT_USECS};
use crate::stats::RunStats;
use crate::threads::{FifoWorker,
                     StreamShared};

/// How long a reader waits for the worker to answer
pub const WORKER_REQUEST_TIMEOUT : Duration = Duration::from_millis(250);

/// Self tests of the data path
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TestMode {
  Off,
  /// the DSP fills the external FIFO with a test pattern
  LmFifo,
}

impl fmt::Display for TestMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      TestMode::Off    => "off",
      TestMode::LmFifo => "lm_fifo",
    };
    write!(f, "{}", repr)
  }
}

fn range_factor(range : u32) -> u32 {
  1u32.checked_shl(range).unwrap_or(1)
}

pub struct Module {
  pub number       : usize,
  pub slot         : usize,
  pub serial       : u32,
  pub revision     : u32,
  pub major        : u32,
  pub minor        : u32,
  pub num_channels : usize,
  /// mailbox open count when the module was opened
  pub open_count   : u32,
  pub comms_fpga   : bool,
  pub fippi_fpga   : bool,
  pub dsp_online   : bool,
  pub control_task : ControlTask,
  opened           : bool,
  forced_offline   : bool,
  test_mode        : TestMode,
  fifo             : FifoSettings,
  cfg_ctrlcs       : u32,
  device           : Option<Arc<Device>>,
  mailbox          : Mailbox,
  descriptors      : Option<Descriptors>,
  module_vars      : Vec<ModuleVariable>,
  channel_vars     : Vec<Vec<ChannelVariable>>,
  fixture          : Box<dyn ModuleFixture>,
  backplane        : Arc<Backplane>,
  stream           : Arc<StreamShared>,
  worker           : Option<FifoWorker>,
}

impl Module {
  pub fn new(number : usize, backplane : Arc<Backplane>) -> Self {
    let fifo = FifoSettings::default();
    Self {
      number,
      slot           : 0,
      serial         : 0,
      revision       : 0,
      major          : 0,
      minor          : 0,
      num_channels   : 0,
      open_count     : 0,
      comms_fpga     : false,
      fippi_fpga     : false,
      dsp_online     : false,
      control_task   : ControlTask::Nop,
      opened         : false,
      forced_offline : false,
      test_mode      : TestMode::Off,
      fifo,
      cfg_ctrlcs     : CFG_CTRLCS_DEFAULT,
      device         : None,
      mailbox        : Mailbox::new(),
      descriptors    : None,
      module_vars    : Vec::new(),
      channel_vars   : Vec::new(),
      fixture        : fixture::make(REV_F),
      backplane,
      stream         : Arc::new(StreamShared::new(&fifo)),
      worker         : None,
    }
  }

  /// Prefix for log messages
  pub fn label(&self) -> String {
    format!("module: num={},slot={}: ", self.number, self.slot)
  }

  pub fn present(&self) -> bool {
    self.device.is_some()
  }

  pub fn opened(&self) -> bool {
    self.opened
  }

  pub fn online(&self) -> bool {
    self.stream.online.load(Ordering::SeqCst) && !self.forced_offline
  }

  pub fn forced_offline(&self) -> bool {
    self.forced_offline
  }

  pub fn run_task(&self) -> RunTask {
    self.stream.run_task()
  }

  pub(crate) fn set_run_task(&mut self, task : RunTask) {
    self.stream.set_run_task(task);
  }

  pub fn test_mode(&self) -> TestMode {
    self.test_mode
  }

  pub fn run_config(&self) -> RunConfig {
    self.fixture.run_config()
  }

  pub fn backplane(&self) -> &Backplane {
    &self.backplane
  }

  pub fn mailbox(&self) -> &Mailbox {
    &self.mailbox
  }

  pub fn fifo(&self) -> FifoSettings {
    self.fifo
  }

  pub fn stats(&self) -> RunStats {
    self.stream.stats.snapshot()
  }

  pub fn fifo_worker_running(&self) -> bool {
    match &self.worker {
      None         => false,
      Some(worker) => worker.running(),
    }
  }

  /// The bound device
  pub fn device(&self) -> Result<Arc<Device>, PixieError> {
    match &self.device {
      None      => Err(PixieError::new(ErrorCode::ModuleOffline, "module not open")),
      Some(dev) => Ok(Arc::clone(dev)),
    }
  }

  fn set_online(&self, online : bool) {
    self.stream.online.store(online, Ordering::SeqCst);
  }

  fn online_check(&self) -> Result<(), PixieError> {
    if self.forced_offline {
      return Err(PixieError::new(ErrorCode::ModuleOffline, "module is forced offline"));
    }
    if !self.online() {
      return Err(PixieError::new(ErrorCode::ModuleOffline, "module is not online"));
    }
    Ok(())
  }

  fn channel_check(&self, channel : usize) -> Result<(), PixieError> {
    if channel >= self.num_channels {
      return Err(PixieError::new(ErrorCode::ChannelNumberInvalid,
                                 format!("invalid channel number: {}", channel)));
    }
    Ok(())
  }

  /// Bind the module to a device and read its identity
  pub fn open(&mut self, bus : Box<dyn HostBus>) -> Result<(), PixieError> {
    info!("module: open: number={}", self.number);
    if self.opened {
      return Err(PixieError::new(ErrorCode::ModuleAlreadyOpen, "module already open"));
    }
    let dev  = Arc::new(Device::new(bus));
    let info = match dev.open() {
      Err(err) if err.code == ErrorCode::ModuleAlreadyOpen => {
        return Err(PixieError::new(ErrorCode::ModuleAlreadyOpen, "module in use by another process"));
      }
      Err(err) => {
        return Err(PixieError::new(ErrorCode::ModuleInitializeFailure,
                                   format!("device open: {}", err.what)));
      }
      Ok(info) => info,
    };
    if info.num_channels == 0 || info.num_channels > MAX_CHANNELS {
      release_device(&dev);
      return Err(PixieError::new(ErrorCode::ModuleInfoFailure,
                                 format!("invalid number of channels: {}", info.num_channels)));
    }
    if info.slot > MAX_SLOTS {
      release_device(&dev);
      return Err(PixieError::new(ErrorCode::ModuleInfoFailure,
                                 format!("invalid slot: {}", info.slot)));
    }
    let mailbox = {
      let bus = dev.lock();
      self.mailbox.read(&bus)
    };
    if let Err(err) = mailbox {
      release_device(&dev);
      return Err(err);
    }
    if self.mailbox.reset() {
      info!("module: num={}: mailbox reset since power on", self.number);
    }
    self.slot         = info.slot;
    self.serial       = info.serial;
    self.revision     = info.revision;
    self.major        = info.major;
    self.minor        = info.minor;
    self.num_channels = info.num_channels;
    self.open_count   = self.mailbox.opens();
    if self.open_count > 0 {
      debug!("{}opened {} times before", self.label(), self.open_count);
    }
    {
      let bus = dev.lock();
      self.mailbox.update_opens(&bus)?;
      self.mailbox.set_config(&bus, self.slot, self.serial, self.revision)?;
    }
    self.opened     = true;
    self.device     = Some(dev);
    self.cfg_ctrlcs = CFG_CTRLCS_DEFAULT;
    self.module_vars.clear();
    self.channel_vars.clear();
    self.fixture = fixture::make(self.revision);
    info!("{}revision={} serial={} channels={} fixture={}",
          self.label(), revision_label(self.revision), self.serial,
          self.num_channels, self.fixture.label());
    self.start_fifo_services()?;
    let (release, set_type) = self.mailbox.firmware_release();
    info!("{}resident release: {} type: {}", self.label(), release, set_type);
    Ok(())
  }

  /// Stop everything and release the device
  pub fn close(&mut self) -> Result<(), PixieError> {
    if !self.opened {
      return Ok(());
    }
    info!("{}close", self.label());
    if self.online() {
      match self.run_active() {
        Ok(true) => {
          match self.run_end() {
            Err(err) => error!("{}close: {}", self.label(), err),
            Ok(_)    => ()
          }
        }
        Ok(false) => (),
        Err(err)  => error!("{}close: {}", self.label(), err),
      }
    }
    self.force_offline();
    self.stop_fifo_services();
    let result = match self.device.take() {
      None      => Ok(()),
      Some(dev) => dev.close().map_err(|err| {
        PixieError::new(ErrorCode::ModuleCloseFailure, format!("close: {}", err.what))
      }),
    };
    self.comms_fpga     = false;
    self.fippi_fpga     = false;
    self.dsp_online     = false;
    self.set_online(false);
    self.forced_offline = false;
    self.opened         = false;
    result
  }

  /// Bring a loaded module online without booting it
  pub fn force_online(&mut self) {
    info!("{}set online", self.label());
    if self.opened && !self.online() {
      match self.try_force_online() {
        Err(err) => error!("{}force online: {}", self.label(), err),
        Ok(_)    => ()
      }
    }
  }

  fn try_force_online(&mut self) -> Result<(), PixieError> {
    let dev = self.device()?;
    self.comms_fpga = fpga::SYS.done(&dev)?;
    if !self.comms_fpga {
      error!("{}force online: module needs booting", self.label());
      return Ok(());
    }
    self.fippi_fpga = fpga::FIPPI.done(&dev)?;
    self.dsp_online = fpga::dsp_done(&dev)?;
    if !(self.fippi_fpga && self.dsp_online) {
      error!("{}force online: module needs booting", self.label());
      return Ok(());
    }
    if self.descriptors.is_none() {
      return Err(PixieError::new(ErrorCode::ModuleOffline,
                                 "no variable descriptors, probe or boot the module first"));
    }
    if self.module_vars.is_empty() {
      self.init_values()?;
    }
    self.forced_offline = false;
    self.start_fifo_services()?;
    self.set_online(true);
    Ok(())
  }

  /// Take the module offline, it stays opened
  pub fn force_offline(&mut self) {
    info!("{}set offline", self.label());
    if self.opened && !self.forced_offline {
      if self.online() {
        match self.run_end() {
          Err(err) => error!("{}force offline: {}", self.label(), err),
          Ok(_)    => ()
        }
      }
      self.stop_fifo_services();
      self.forced_offline = true;
      self.backplane.offline(self.slot);
    }
  }

  fn firmware_change_log(&self, firmware : &FirmwareSet) {
    let (resident, _) = self.mailbox.firmware_release();
    if resident.released() && resident != firmware.release {
      warn!("{}firmware: change from {} to {}", self.label(), resident, firmware.release);
    }
  }

  /// The variable file is read once, it belongs to the DSP program
  fn load_vars(&mut self, firmware : &FirmwareSet) -> Result<(), PixieError> {
    if self.descriptors.is_some() {
      return Ok(());
    }
    let var = match &firmware.var {
      None => {
        return Err(PixieError::new(ErrorCode::ModuleInvalidFirmware,
                                   format!("firmware set {} has no DSP variable file", firmware.release)));
      }
      Some(var) => var,
    };
    let text = String::from_utf8_lossy(&var.image);
    self.descriptors = Some(Descriptors::load(&text)?);
    debug!("{}loaded DSP variables from {}", self.label(), var.name);
    Ok(())
  }

  /// Fresh values from the descriptors, any dirty state is lost
  fn init_values(&mut self) -> Result<(), PixieError> {
    if self.num_channels == 0 {
      return Err(PixieError::new(ErrorCode::InternalFailure, "number of channels is 0"));
    }
    let descs = match &self.descriptors {
      None => {
        return Err(PixieError::new(ErrorCode::InternalFailure, "no module or channel variable descriptors"));
      }
      Some(descs) => descs,
    };
    self.module_vars  = param::module_variables(descs);
    self.channel_vars = (0..self.num_channels).map(|_| param::channel_variables(descs)).collect();
    Ok(())
  }

  /// Check which stages are loaded and if they are the firmware set
  ///
  /// A CRC mismatch leaves the module offline, it is not an error.
  pub fn probe(&mut self, firmware : &FirmwareSet) -> Result<(), PixieError> {
    if !self.opened {
      return Err(PixieError::new(ErrorCode::ModuleOffline, "module not open"));
    }
    self.set_online(false);
    self.comms_fpga = false;
    self.fippi_fpga = false;
    self.dsp_online = false;
    self.firmware_change_log(firmware);
    self.load_vars(firmware)?;
    self.module_vars.clear();
    self.channel_vars.clear();
    let dev = self.device()?;
    if self.mailbox.firmware_resident(&firmware.release) {
      self.comms_fpga = fpga::SYS.done(&dev)?;
      if self.comms_fpga {
        self.fippi_fpga = fpga::FIPPI.done(&dev)?;
        self.dsp_online = fpga::dsp_done(&dev)?;
      }
    }
    info!("{}probe: sys={} fippi={} dsp={} release={}",
          self.label(), self.comms_fpga, self.fippi_fpga, self.dsp_online, firmware.release);
    if self.fippi_fpga {
      self.init_values()?;
    }
    let mut crc_match = true;
    if firmware.set_type() == SetType::Release {
      let mut digest = CRC32.digest();
      let loaded = [(self.comms_fpga, Stage::Comms),
                    (self.fippi_fpga, Stage::Fippi),
                    (self.dsp_online, Stage::Dsp)];
      for (is_loaded, stage) in loaded {
        if is_loaded {
          let fw = firmware.image(stage)?;
          digest.update(&fw.image);
          crc_match = fw.valid() && crc_match;
        }
      }
      let crc = digest.finalize();
      let mailbox_crc = self.mailbox.firmware_crc();
      if mailbox_crc != crc {
        warn!("{}firmware: firmware crcs do not match. mailbox-crc={:#x}", self.label(), mailbox_crc);
      } else if !crc_match {
        warn!("{}firmware: provided firmware crc and calculated crc do not match. mailbox-crc={:#x}",
              self.label(), mailbox_crc);
      } else {
        info!("{}firmware: firmware crcs match. mailbox-crc={:#x}", self.label(), mailbox_crc);
      }
      crc_match = mailbox_crc == crc && crc_match;
    }
    let online = self.comms_fpga && self.fippi_fpga && self.dsp_online && crc_match;
    if online {
      self.start_fifo_services()?;
    }
    self.set_online(online);
    Ok(())
  }

  /// Load the stages of a firmware set
  ///
  /// Loading comms or fippi always loads the DSP, and loading comms
  /// loads fippi unless it is already running. Stages load in the
  /// order comms, fippi, DSP.
  pub fn boot(&mut self, pattern : BootPattern, firmware : &FirmwareSet) -> Result<(), PixieError> {
    if !self.opened {
      return Err(PixieError::new(ErrorCode::ModuleOffline, "module not open"));
    }
    if self.forced_offline {
      warn!("{}module is forced offline, no boot performed", self.label());
      return Ok(());
    }
    if pattern.empty() {
      return Err(PixieError::new(ErrorCode::InvalidValue, "boot: no stages selected"));
    }
    if self.online() {
      warn!("{}booting online module", self.label());
    }
    self.set_online(false);
    self.firmware_change_log(firmware);

    let mut stages = pattern;
    if stages.comms || stages.fippi {
      debug!("{}dsp load forced", self.label());
      stages.dsp = true;
      if stages.comms && !self.fippi_fpga {
        debug!("{}fippi load forced", self.label());
        stages.fippi = true;
      }
    }

    if !self.mailbox.firmware_resident(&firmware.release) && !stages.all() {
      return Err(PixieError::new(ErrorCode::ModuleInitializeFailure,
                                 "partial boot: firmware does not match resident firmware"));
    }
    let comms_after = stages.comms || self.comms_fpga;
    let fippi_after = stages.fippi || self.fippi_fpga;
    if stages.fippi && !comms_after {
      return Err(PixieError::new(ErrorCode::ModuleInitializeFailure, "fippi boot needs comms booted"));
    }
    if stages.dsp && !(comms_after && fippi_after) {
      return Err(PixieError::new(ErrorCode::ModuleInitializeFailure, "dsp needs comms and fippi booted"));
    }
    if firmware.set_type() == SetType::Release {
      firmware.validate(&stages)?;
    }

    self.stop_fifo_services();
    self.load_vars(firmware)?;
    let dev = self.device()?;
    let mut digest = CRC32.digest();

    if stages.comms {
      if self.comms_fpga {
        info!("{}comms already loaded", self.label());
      }
      let fw = firmware.image(Stage::Comms)?;
      self.comms_fpga = false;
      self.dsp_online = false;
      digest.update(&fw.image);
      fpga::SYS.load(&dev, fw, self.slot)?;
      self.comms_fpga = fpga::SYS.done(&dev)?;
    }

    if stages.fippi {
      if self.fippi_fpga {
        info!("{}fippi already loaded", self.label());
      }
      if !self.comms_fpga {
        return Err(PixieError::new(ErrorCode::ModuleInitializeFailure, "fippi boot needs comms booted"));
      }
      let fw = firmware.image(Stage::Fippi)?;
      self.fippi_fpga = false;
      digest.update(&fw.image);
      fpga::FIPPI.load(&dev, fw, self.slot)?;
      self.fippi_fpga = fpga::FIPPI.done(&dev)?;
    }

    if stages.dsp {
      if self.dsp_online {
        info!("{}dsp already running", self.label());
      }
      if !self.comms_fpga || !self.fippi_fpga {
        return Err(PixieError::new(ErrorCode::ModuleInitializeFailure, "dsp needs comms and fippi booted"));
      }
      let fw = firmware.image(Stage::Dsp)?;
      self.dsp_online = false;
      digest.update(&fw.image);
      fpga::dsp_boot(&dev, fw, self.slot)?;
      self.dsp_online = fpga::dsp_done(&dev)?;
    }

    // a partial load can not account for the stages already resident
    let crc = if stages.all() { digest.finalize() } else { 0 };
    {
      let bus = dev.lock();
      self.mailbox.set_firmware_release(&bus, &firmware.release, firmware.set_type())?;
      self.mailbox.set_firmware_crc(&bus, crc)?;
    }

    if self.fippi_fpga {
      self.init_values()?;
    }
    self.start_fifo_services()?;

    info!("{}boot: sys-fpga={} fippi-fpga={} dsp={}",
          self.label(), self.comms_fpga, self.fippi_fpga, self.dsp_online);

    let online = self.comms_fpga && self.fippi_fpga && self.dsp_online;
    self.set_online(online);
    if online {
      run::control(self, ControlTask::ProgramFippi, CONTROL_WAIT_MSECS)?;
      self.fixture.sync_hw(&dev)?;
      let slot = self.slot as u32;
      self.write_var(ModuleVar::SlotID, slot, 0, true)?;
    }
    Ok(())
  }

  fn start_fifo_services(&mut self) -> Result<(), PixieError> {
    let dev = self.device()?;
    if !fpga::SYS.done(&dev)? || !fpga::FIPPI.done(&dev)? {
      return Ok(());
    }
    if self.stream.pool.valid() {
      return Ok(());
    }
    self.stream.pool.create(self.fifo.buffers, FIFO_BUFFER_SIZE)?;
    self.stream.set_fifo(&self.fifo);
    self.worker = Some(FifoWorker::spawn(self.label(), Arc::clone(&dev), Arc::clone(&self.stream))?);
    run::end(self)
  }

  fn stop_fifo_services(&mut self) {
    if let Some(mut worker) = self.worker.take() {
      worker.stop();
    }
    self.stream.queue.flush();
    if self.stream.pool.valid() {
      match self.stream.pool.destroy() {
        Err(err) => error!("{}fifo: {}", self.label(), err),
        Ok(_)    => ()
      }
    }
  }

  fn module_desc(&self, var : ModuleVar) -> Result<VarDescriptor<ModuleVar>, PixieError> {
    match self.module_vars.get(var.index()) {
      None           => Err(PixieError::new(ErrorCode::ModuleInvalidVar,
                                            format!("invalid module variable: {}", var))),
      Some(variable) => Ok(variable.desc),
    }
  }

  fn channel_desc(&self, var : ChannelVar, channel : usize) -> Result<VarDescriptor<ChannelVar>, PixieError> {
    match self.channel_vars.get(channel).and_then(|vars| vars.get(var.index())) {
      None           => Err(PixieError::new(ErrorCode::ChannelInvalidVar,
                                            format!("invalid channel variable: {}", var))),
      Some(variable) => Ok(variable.desc),
    }
  }

  /// Read a module variable, from the hardware when `io` is set
  pub fn read_var(&mut self, var : ModuleVar, offset : usize, io : bool) -> Result<u32, PixieError> {
    self.online_check()?;
    let desc = self.module_desc(var)?;
    debug!("{}read_var: module var={} offset={}", self.label(), var, offset);
    if !desc.enabled {
      return Err(PixieError::new(ErrorCode::ModuleParamDisabled,
                                 format!("module variable disabled: {}", var)));
    }
    if !desc.mode.readable() {
      return Err(PixieError::new(ErrorCode::ModuleParamWriteonly,
                                 format!("module variable not readable: {}", var)));
    }
    if offset >= desc.size {
      return Err(PixieError::new(ErrorCode::ModuleInvalidParam,
                                 format!("invalid module variable offset: {}", var)));
    }
    let cached = if io && self.present() {
      let dev   = self.device()?;
      let value = control::dsp_read(&dev, desc.address + offset as u32)?;
      let entry = &mut self.module_vars[var.index()].values[offset];
      entry.value = value;
      entry.dirty = false;
      value
    } else {
      self.module_vars[var.index()].values[offset].value
    };
    debug!("{}read_var: module var={} value[{}]={} ({:#x})", self.label(), var, offset, cached, cached);
    Ok(cached)
  }

  pub fn read_channel_var(&mut self,
                          var     : ChannelVar,
                          channel : usize,
                          offset  : usize,
                          io      : bool) -> Result<u32, PixieError> {
    self.online_check()?;
    self.channel_check(channel)?;
    let desc = self.channel_desc(var, channel)?;
    debug!("{}read_var: channel var={} channel={} offset={} io={}",
           self.label(), var, channel, offset, io);
    if !desc.enabled {
      return Err(PixieError::new(ErrorCode::ChannelParamDisabled,
                                 format!("channel variable disabled: {}", var)));
    }
    if !desc.mode.readable() {
      return Err(PixieError::new(ErrorCode::ChannelParamWriteonly,
                                 format!("channel variable not readable: {}", var)));
    }
    if offset >= desc.size {
      return Err(PixieError::new(ErrorCode::ChannelInvalidParam,
                                 format!("invalid channel variable offset: {}", var)));
    }
    let cached = if io && self.present() {
      let dev   = self.device()?;
      let value = control::dsp_read(&dev, channel_address(&desc, channel, offset))?;
      let entry = &mut self.channel_vars[channel][var.index()].values[offset];
      entry.value = value;
      entry.dirty = false;
      value
    } else {
      self.channel_vars[channel][var.index()].values[offset].value
    };
    Ok(cached)
  }

  /// Write a module variable, to the hardware when `io` is set
  pub fn write_var(&mut self, var : ModuleVar, value : u32, offset : usize, io : bool) -> Result<(), PixieError> {
    self.online_check()?;
    let desc = self.module_desc(var)?;
    debug!("{}write_var: module var={} value[{}]={} ({:#x})", self.label(), var, offset, value, value);
    if !desc.enabled {
      return Err(PixieError::new(ErrorCode::ModuleParamDisabled,
                                 format!("module variable disabled: {}", var)));
    }
    if !desc.mode.writable() {
      return Err(PixieError::new(ErrorCode::ModuleParamReadonly,
                                 format!("module variable not writeable: {}", var)));
    }
    if offset >= desc.size {
      return Err(PixieError::new(ErrorCode::ModuleInvalidParam,
                                 format!("invalid module variable offset: {}", var)));
    }
    let index = var.index();
    if desc.mode == AccessMode::WriteOnce && self.module_vars[index].values[offset].written_once {
      return Err(PixieError::new(ErrorCode::ModuleParamWriteonce,
                                 format!("module variable not writeable, already written: {}", var)));
    }
    // the single write is used up even when the bus transfer fails
    {
      let entry = &mut self.module_vars[index].values[offset];
      entry.written_once = true;
      entry.value        = value;
      entry.dirty        = true;
    }
    if io && self.present() {
      let dev = self.device()?;
      control::dsp_write(&dev, desc.address + offset as u32, value)?;
      self.module_vars[index].values[offset].dirty = false;
    }
    if var == ModuleVar::SynchWait {
      self.backplane.sync_wait(self.slot, value)?;
    }
    Ok(())
  }

  pub fn write_channel_var(&mut self,
                           var     : ChannelVar,
                           value   : u32,
                           channel : usize,
                           offset  : usize,
                           io      : bool) -> Result<(), PixieError> {
    self.online_check()?;
    self.channel_check(channel)?;
    let desc = self.channel_desc(var, channel)?;
    debug!("{}write_var: channel var={} channel={} value[{}]={} ({:#x})",
           self.label(), var, channel, offset, value, value);
    if !desc.enabled {
      return Err(PixieError::new(ErrorCode::ChannelParamDisabled,
                                 format!("channel variable disabled: {}", var)));
    }
    if !desc.mode.writable() {
      return Err(PixieError::new(ErrorCode::ChannelParamReadonly,
                                 format!("channel variable not writeable: {}", var)));
    }
    if offset >= desc.size {
      return Err(PixieError::new(ErrorCode::ChannelInvalidParam,
                                 format!("invalid channel variable offset: {}", var)));
    }
    let index = var.index();
    if desc.mode == AccessMode::WriteOnce && self.channel_vars[channel][index].values[offset].written_once {
      return Err(PixieError::new(ErrorCode::ChannelParamWriteonce,
                                 format!("channel variable not writeable, already written: {}", var)));
    }
    // the single write is used up even when the bus transfer fails
    {
      let entry = &mut self.channel_vars[channel][index].values[offset];
      entry.written_once = true;
      entry.value        = value;
      entry.dirty        = true;
    }
    if io && self.present() {
      let dev = self.device()?;
      control::dsp_write(&dev, channel_address(&desc, channel, offset), value)?;
      self.channel_vars[channel][index].values[offset].dirty = false;
    }
    Ok(())
  }

  /// Read a variable by name, module variables are searched first
  pub fn read_named(&mut self,
                    name    : &str,
                    channel : usize,
                    offset  : usize,
                    io      : bool) -> Result<u32, PixieError> {
    info!("{}read: var={} channel={} offset={} io={}", self.label(), name, channel, offset, io);
    self.online_check()?;
    match NamedVar::lookup(name) {
      Some(NamedVar::Module(var))  => self.read_var(var, offset, io),
      Some(NamedVar::Channel(var)) => self.read_channel_var(var, channel, offset, io),
      None => Err(PixieError::new(ErrorCode::ModuleInvalidVar, format!("invalid variable: {}", name))),
    }
  }

  pub fn write_named(&mut self,
                     name    : &str,
                     value   : u32,
                     channel : usize,
                     offset  : usize,
                     io      : bool) -> Result<(), PixieError> {
    info!("{}write: var={} channel={} value[{}]={} ({:#x})", self.label(), name, channel, offset, value, value);
    self.online_check()?;
    match NamedVar::lookup(name) {
      Some(NamedVar::Module(var))  => self.write_var(var, value, offset, io),
      Some(NamedVar::Channel(var)) => self.write_channel_var(var, value, channel, offset, io),
      None => Err(PixieError::new(ErrorCode::ModuleInvalidVar, format!("invalid variable: {}", name))),
    }
  }

  /// Bring the cache and the DSP memory in line
  ///
  /// Only enabled variables which are not read-only take part. No
  /// value is dirty afterwards.
  pub fn sync_vars(&mut self, mode : SyncMode) -> Result<(), PixieError> {
    self.online_check()?;
    info!("{}sync variables: mode: {:?}", self.label(), mode);
    let dev = self.device()?;
    for var in self.module_vars.iter_mut() {
      let desc = var.desc;
      if !desc.enabled || desc.mode == AccessMode::ReadOnly {
        continue;
      }
      for (offset, value) in var.values.iter_mut().enumerate() {
        let addr = desc.address + offset as u32;
        match mode {
          SyncMode::ToHardware => {
            if value.dirty {
              control::dsp_write(&dev, addr, value.value)?;
            }
          }
          SyncMode::FromHardware => {
            value.value = control::dsp_read(&dev, addr)?;
          }
        }
        value.dirty = false;
      }
    }
    for (channel, vars) in self.channel_vars.iter_mut().enumerate() {
      for var in vars.iter_mut() {
        let desc = var.desc;
        if !desc.enabled || desc.mode == AccessMode::ReadOnly {
          continue;
        }
        for (offset, value) in var.values.iter_mut().enumerate() {
          let addr = channel_address(&desc, channel, offset);
          match mode {
            SyncMode::ToHardware => {
              if value.dirty {
                control::dsp_write(&dev, addr, value.value)?;
              }
            }
            SyncMode::FromHardware => {
              value.value = control::dsp_read(&dev, addr)?;
            }
          }
          value.dirty = false;
        }
      }
    }
    Ok(())
  }

  /// Is anything in the cache waiting to be written?
  pub fn dirty(&self) -> bool {
    self.module_vars.iter().any(|v| v.dirty())
      || self.channel_vars.iter().any(|vars| vars.iter().any(|v| v.dirty()))
  }

  /// Push the hardware only state to the module
  pub fn sync_hw(&mut self, program_fippi : bool, program_dacs : bool) -> Result<(), PixieError> {
    self.online_check()?;
    info!("{}sync hardware: program_fippi={} program_dacs={}", self.label(), program_fippi, program_dacs);
    if program_fippi {
      run::control(self, ControlTask::ProgramFippi, CONTROL_WAIT_MSECS)?;
    }
    if program_dacs {
      self.set_dacs()?;
    }
    let csrb = self.read_var(ModuleVar::ModCSRB, 0, false)?;
    self.backplane_csrb(csrb)?;
    self.sync_csrb()?;
    if self.revision == REV_F {
      run::control(self, ControlTask::ResetAdc, CONTROL_WAIT_MSECS)?;
    }
    let dev = self.device()?;
    self.fixture.sync_hw(&dev)
  }

  /// Write `ModCSRB` and take or give up the backplane roles it
  /// selects
  pub fn module_csrb(&mut self, value : u32, offset : usize, io : bool) -> Result<(), PixieError> {
    self.backplane_csrb(value)?;
    self.write_var(ModuleVar::ModCSRB, value, offset, io)?;
    if io && self.present() {
      run::control(self, ControlTask::ProgramFippi, CONTROL_WAIT_MSECS)?;
      self.sync_csrb()?;
    }
    Ok(())
  }

  fn backplane_csrb(&self, csrb : u32) -> Result<(), PixieError> {
    let roles = [(MODCSRB_CPLDPULLUP,    &self.backplane.wired_or_triggers_pullup, "wired-or trigger pullups"),
                 (MODCSRB_CHASSISMASTER, &self.backplane.run,                      "run"),
                 (MODCSRB_DIRMOD,        &self.backplane.director,                 "director")];
    for (bit, role, label) in roles {
      if test_bit(bit, csrb) {
        if !role.request(self.slot) {
          let holder = role.holder().map(|s| s.to_string()).unwrap_or_default();
          return Err(PixieError::new(ErrorCode::ModuleInvalidParam,
                                     format!("{} leader role already taken: slot: {}", label, holder)));
        }
      } else {
        role.release(self.slot);
      }
    }
    Ok(())
  }

  /// Drive the backplane pull-ups this module is responsible for
  pub fn sync_csrb(&mut self) -> Result<(), PixieError> {
    let dev = self.device()?;
    if self.backplane.wired_or_triggers_pullup.is_leader(self.slot) {
      self.cfg_ctrlcs |= 1 << CPLDCSR_PULLUP;
    } else {
      self.cfg_ctrlcs &= !(1 << CPLDCSR_PULLUP);
    }
    if self.revision == REV_B || self.revision == REV_C {
      self.cfg_ctrlcs |= 1 << CPLDCSR_BPCONNECT;
    }
    control::write_ctrlcs(&dev, self.cfg_ctrlcs)?;
    if self.backplane.run.is_leader(self.slot) {
      control::set_csr(&dev, 1 << CSR_PULLUP_CTRL)
    } else {
      control::clear_csr(&dev, 1 << CSR_PULLUP_CTRL)
    }
  }

  /// Clamped to the hardware range
  pub fn fast_filter_range(&mut self, value : u32, offset : usize, io : bool) -> Result<(), PixieError> {
    let mut value = value;
    if value > FASTFILTERRANGE_MAX {
      value = FASTFILTERRANGE_MAX;
      warn!("{}setting FAST_FILTER_RANGE to max: {}", self.label(), FASTFILTERRANGE_MAX);
    }
    if value < FASTFILTERRANGE_MIN {
      value = FASTFILTERRANGE_MIN;
      warn!("{}setting FAST_FILTER_RANGE to min: {}", self.label(), FASTFILTERRANGE_MIN);
    }
    self.write_var(ModuleVar::FastFilterRange, value, offset, io)?;
    if io && self.present() {
      self.update_fifos()?;
      run::control(self, ControlTask::ProgramFippi, CONTROL_WAIT_MSECS)?;
    }
    Ok(())
  }

  pub fn slow_filter_range(&mut self, value : u32, offset : usize, io : bool) -> Result<(), PixieError> {
    if value < SLOWFILTERRANGE_MIN {
      return Err(PixieError::new(ErrorCode::ModuleInvalidParam,
                                 format!("slow filter value below min: {}", value)));
    }
    if value > SLOWFILTERRANGE_MAX {
      return Err(PixieError::new(ErrorCode::ModuleInvalidParam,
                                 format!("slow filter value above max: {}", value)));
    }
    self.write_var(ModuleVar::SlowFilterRange, value, offset, io)?;
    if io && self.present() {
      self.update_fifos()?;
      run::control(self, ControlTask::ProgramFippi, CONTROL_WAIT_MSECS)?;
    }
    Ok(())
  }

  fn update_fifos(&mut self) -> Result<(), PixieError> {
    let ffr = range_factor(self.read_var(ModuleVar::FastFilterRange, 0, false)?);
    for channel in 0..self.num_channels {
      let paf_length    = self.read_channel_var(ChannelVar::PAFlength, channel, 0, false)?;
      let trigger_delay = self.read_channel_var(ChannelVar::TriggerDelay, channel, 0, false)?;
      self.update_fifo(channel, paf_length.saturating_sub(trigger_delay / ffr))?;
    }
    Ok(())
  }

  /// Recalculate the trigger delay and PAF length of a channel. The
  /// PAF length has to stay below the FIFO length.
  fn update_fifo(&mut self, channel : usize, trace_delay : u32) -> Result<(), PixieError> {
    debug!("{}channel {}: fifo update: trace-delay={}", self.label(), channel, trace_delay);
    let sfr         = range_factor(self.read_var(ModuleVar::SlowFilterRange, 0, false)?);
    let ffr         = range_factor(self.read_var(ModuleVar::FastFilterRange, 0, false)?);
    let fifo_length = self.read_var(ModuleVar::FIFOLength, 0, false)?;
    let peak_sep    = self.read_channel_var(ChannelVar::PeakSep, channel, 0, false)?;
    let mut trigger_delay = peak_sep.saturating_sub(1).saturating_mul(sfr);
    let mut paf_length    = trigger_delay / ffr + trigger_delay;
    if paf_length > fifo_length {
      paf_length    = fifo_length.saturating_sub(1);
      trigger_delay = paf_length.saturating_sub(trace_delay).saturating_mul(ffr);
    }
    self.write_channel_var(ChannelVar::TriggerDelay, trigger_delay, channel, 0, true)?;
    self.write_channel_var(ChannelVar::PAFlength, paf_length, channel, 0, true)
  }

  pub(crate) fn fixture_set_dac(&mut self, channel : usize, value : u32) -> Result<(), PixieError> {
    let dev = self.device()?;
    self.fixture.set_dac(&dev, channel, value)
  }

  pub(crate) fn fixture_acquire_adc(&mut self) -> Result<(), PixieError> {
    let dev = self.device()?;
    self.fixture.acquire_adc(&dev, self.num_channels)
  }

  /// A run or control task is active, false when offline
  pub fn run_active(&self) -> Result<bool, PixieError> {
    if !self.online() {
      return Ok(false);
    }
    run::active(self)
  }

  fn sync_worker_run(&self, forced : bool) {
    if forced || self.stream.synchronous() {
      if let Some(worker) = &self.worker {
        if !worker.request(WORKER_REQUEST_TIMEOUT) {
          debug!("{}fifo: worker request timed out", self.label());
        }
      }
    }
  }

  pub fn start_histograms(&mut self, mode : RunMode) -> Result<(), PixieError> {
    info!("{}start-histograms: mode={}", self.label(), mode);
    self.online_check()?;
    if self.run_active()? {
      return Err(PixieError::new(ErrorCode::ModuleInvalidOperation, "module already running a task"));
    }
    if self.test_mode != TestMode::Off {
      return Err(PixieError::new(ErrorCode::ModuleTestInvalid, "test running; cannot start a run task"));
    }
    self.backplane.sync_wait_valid()?;
    self.stream.stats.start();
    run::run(self, mode, RunTask::Histogram)
  }

  pub fn start_listmode(&mut self, mode : RunMode) -> Result<(), PixieError> {
    info!("{}start-list-mode: mode={}", self.label(), mode);
    self.online_check()?;
    if self.run_task() != RunTask::Nop || self.run_active()? {
      return Err(PixieError::new(ErrorCode::ModuleInvalidOperation, "module already running a task"));
    }
    if self.test_mode != TestMode::Off {
      return Err(PixieError::new(ErrorCode::ModuleTestInvalid, "test running; cannot start a run task"));
    }
    self.backplane.sync_wait_valid()?;
    self.stream.stats.start();
    self.stream.queue.flush();
    self.stream.paused.store(false, Ordering::SeqCst);
    let result = run::run(self, mode, RunTask::ListMode);
    if result.is_err() {
      self.stream.paused.store(true, Ordering::SeqCst);
    }
    result
  }

  /// End the run, the data still in the FIFO is moved to the queue
  pub fn run_end(&mut self) -> Result<(), PixieError> {
    self.online_check()?;
    info!("{}run_end: attempting to stop run", self.label());
    let running = self.run_task() != RunTask::Nop;
    if !running {
      warn!("{}run-end: no run active", self.label());
    }
    let result = run::end(self);
    self.sync_worker_run(true);
    self.stream.paused.store(true, Ordering::SeqCst);
    self.stream.stats.stop();
    if running {
      info!("{}run: {}", self.label(), self.stream.stats.snapshot());
    }
    result
  }

  pub fn acquire_baselines(&mut self) -> Result<(), PixieError> {
    info!("{}acquire-baselines", self.label());
    self.online_check()?;
    run::control(self, ControlTask::GetBaselines, CONTROL_WAIT_MSECS)
  }

  pub fn adjust_offsets(&mut self) -> Result<(), PixieError> {
    info!("{}adjust-offsets", self.label());
    self.online_check()?;
    run::control(self, ControlTask::AdjustOffsets, CONTROL_WAIT_MSECS)
  }

  pub fn tau_finder(&mut self) -> Result<(), PixieError> {
    info!("{}tau-finder", self.label());
    self.online_check()?;
    run::control(self, ControlTask::TauFinder, CONTROL_WAIT_MSECS)
  }

  pub fn get_traces(&mut self) -> Result<(), PixieError> {
    info!("{}get-traces", self.label());
    self.online_check()?;
    run::control(self, ControlTask::GetTraces, CONTROL_WAIT_MSECS)
  }

  pub fn set_dacs(&mut self) -> Result<(), PixieError> {
    info!("{}set-dacs", self.label());
    self.online_check()?;
    run::control(self, ControlTask::SetDacs, CONTROL_WAIT_MSECS)
  }

  /// Read the ADC trace of a channel, `run` captures new traces first
  pub fn read_adc(&mut self, channel : usize, trace : &mut [u16], run : bool) -> Result<(), PixieError> {
    debug!("{}read-adc: channel={} size={} run={}", self.label(), channel, trace.len(), run);
    self.online_check()?;
    self.channel_check(channel)?;
    if run {
      self.get_traces()?;
    }
    if self.control_task != ControlTask::GetTraces {
      return Err(PixieError::new(ErrorCode::ModuleInvalidOperation, "control task not `get_traces`"));
    }
    let dev = self.device()?;
    self.fixture.read_adc(&dev, channel, self.num_channels, trace)
  }

  pub fn read_histogram(&mut self, channel : usize, values : &mut [u32]) -> Result<(), PixieError> {
    info!("{}read-histogram: channel={} length={}", self.label(), channel, values.len());
    self.online_check()?;
    self.channel_check(channel)?;
    let dev = self.device()?;
    control::mca_read(&dev, channel, values)
  }

  /// Words waiting to be read
  pub fn read_list_mode_level(&self) -> Result<usize, PixieError> {
    self.online_check()?;
    if !self.fifo_worker_running() {
      debug!("{}read-list-mode-level: FIFO worker not running", self.label());
    }
    let mut size = self.stream.queue.size();
    if self.stream.synchronous() {
      let dev = self.device()?;
      size += control::fifo_level(&dev)?;
    }
    Ok(size)
  }

  /// Move queued list mode words into `values`, returns the number
  /// of words moved
  pub fn read_list_mode(&mut self, values : &mut [u32]) -> Result<usize, PixieError> {
    debug!("{}read-list-mode: length={} fifo-size={}", self.label(), values.len(), self.stream.queue.size());
    self.online_check()?;
    if !self.fifo_worker_running() {
      warn!("{}read-list-mode: FIFO worker not running", self.label());
    }
    self.sync_worker_run(false);
    if self.stream.queue.empty() {
      return Ok(0);
    }
    let out = self.stream.queue.copy(values);
    self.stream.stats.out.fetch_add(out, Ordering::SeqCst);
    Ok(out)
  }

  pub fn start_test(&mut self, mode : TestMode) -> Result<(), PixieError> {
    info!("{}start-test: mode={}", self.label(), mode);
    self.online_check()?;
    if self.test_mode != TestMode::Off {
      return Err(PixieError::new(ErrorCode::ModuleTestInvalid, "test already running"));
    }
    if self.run_task() != RunTask::Nop {
      return Err(PixieError::new(ErrorCode::ModuleTestInvalid,
                                 "module run task active; cannot start a test"));
    }
    match mode {
      TestMode::LmFifo => {
        self.test_mode = mode;
        self.stream.test_active.store(true, Ordering::SeqCst);
        self.stream.stats.start();
        self.stream.queue.flush();
        if let Err(err) = run::start(self, RunMode::NewRun, RunTask::Nop, ControlTask::FillExtFifo) {
          self.test_mode = TestMode::Off;
          self.stream.test_active.store(false, Ordering::SeqCst);
          return Err(err);
        }
        self.stream.paused.store(false, Ordering::SeqCst);
        Ok(())
      }
      TestMode::Off => Err(PixieError::new(ErrorCode::InvalidValue, "invalid start test mode")),
    }
  }

  pub fn end_test(&mut self) -> Result<(), PixieError> {
    info!("{}end-test: mode={}", self.label(), self.test_mode);
    self.stream.paused.store(true, Ordering::SeqCst);
    self.test_mode = TestMode::Off;
    self.stream.test_active.store(false, Ordering::SeqCst);
    let result = if self.run_active()? { run::end(self) } else { Ok(()) };
    self.stream.stats.stop();
    info!("{}test: {}", self.label(), self.stream.stats.snapshot());
    result
  }

  pub fn set_fifo_buffers(&mut self, buffers : usize) -> Result<(), PixieError> {
    if !(MIN_FIFO_BUFFERS..=MAX_FIFO_BUFFERS).contains(&buffers) {
      return Err(PixieError::new(ErrorCode::ModuleInvalidVar, "fifo: buffer value out of range"));
    }
    debug!("{}fifo: buffers={}", self.label(), buffers);
    self.fifo.buffers = buffers;
    Ok(())
  }

  pub fn set_fifo_run_wait(&mut self, run_wait : usize) -> Result<(), PixieError> {
    if (run_wait != 0 && run_wait < MIN_FIFO_RUN_WAIT_USECS) || run_wait > MAX_FIFO_RUN_WAIT_USECS {
      return Err(PixieError::new(ErrorCode::ModuleInvalidVar, "fifo: run wait value out of range"));
    }
    debug!("{}fifo: run-wait={}", self.label(), run_wait);
    if run_wait == 0 {
      warn!("{}fifo: setting run-wait to zero is not recommended, it may result in data loss", self.label());
    }
    self.fifo.run_wait_usecs = run_wait;
    self.stream.set_fifo(&self.fifo);
    Ok(())
  }

  pub fn set_fifo_idle_wait(&mut self, idle_wait : usize) -> Result<(), PixieError> {
    if !(MIN_FIFO_IDLE_WAIT_USECS..=MAX_FIFO_IDLE_WAIT_USECS).contains(&idle_wait) {
      return Err(PixieError::new(ErrorCode::ModuleInvalidVar, "fifo: idle wait value out of range"));
    }
    debug!("{}fifo: idle-wait={}", self.label(), idle_wait);
    self.fifo.idle_wait_usecs = idle_wait;
    self.stream.set_fifo(&self.fifo);
    Ok(())
  }

  pub fn set_fifo_hold(&mut self, hold : usize) -> Result<(), PixieError> {
    if !(MIN_FIFO_HOLD_USECS..=MAX_FIFO_HOLD_USECS).contains(&hold) {
      return Err(PixieError::new(ErrorCode::ModuleInvalidVar, "fifo: hold value out of range"));
    }
    debug!("{}fifo: hold={}", self.label(), hold);
    self.fifo.hold_usecs = hold;
    self.stream.set_fifo(&self.fifo);
    Ok(())
  }

  pub fn set_fifo_dma_trigger_level(&mut self, level : usize) -> Result<(), PixieError> {
    if !(MIN_FIFO_DMA_TRIGGER_LEVEL..=MAX_FIFO_DMA_TRIGGER_LEVEL).contains(&level) {
      return Err(PixieError::new(ErrorCode::ModuleInvalidVar, "fifo: dma trigger level value out of range"));
    }
    debug!("{}fifo: dma-trigger-level={}", self.label(), level);
    self.fifo.dma_trigger_level = level;
    self.stream.set_fifo(&self.fifo);
    Ok(())
  }

  pub fn set_fifo_bandwidth(&mut self, bandwidth : usize) -> Result<(), PixieError> {
    if bandwidth > PCI_BUS_DATARATE {
      return Err(PixieError::new(ErrorCode::ModuleInvalidVar, "fifo: bandwidth value out of range"));
    }
    debug!("{}fifo: bandwidth={}", self.label(), bandwidth);
    self.fifo.bandwidth_mb_per_sec = bandwidth;
    self.stream.set_fifo(&self.fifo);
    Ok(())
  }

  /// Apply all of the FIFO tuning, the buffer count takes effect
  /// the next time the FIFO services start
  pub fn set_fifo(&mut self, settings : &FifoSettings) -> Result<(), PixieError> {
    settings.validate()?;
    if settings.run_wait_usecs == 0 {
      warn!("{}fifo: setting run-wait to zero is not recommended, it may result in data loss", self.label());
    }
    self.fifo = *settings;
    self.stream.set_fifo(&self.fifo);
    Ok(())
  }
}

/// Give up a device which failed to open
fn release_device(dev : &Device) {
  match dev.close() {
    Err(err) => error!("module: open: device close failed! {}", err),
    Ok(_)    => ()
  }
}

fn channel_address(desc : &VarDescriptor<ChannelVar>, channel : usize, offset : usize) -> u32 {
  desc.address + (channel * desc.size + offset) as u32
}

impl Drop for Module {
  fn drop(&mut self) {
    match self.close() {
      Err(err) => error!("{}close on drop: {}", self.label(), err),
      Ok(_)    => ()
    }
  }
}

impl fmt::Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = String::from("<Module:");
    repr += &(format!("\n  number       : {}", self.number));
    if !self.present() {
      repr += "\n  not-present>";
      return write!(f, "{}", repr);
    }
    repr += &(format!("\n  slot         : {}", self.slot));
    repr += &(format!("\n  serial       : {}", self.serial));
    repr += &(format!("\n  revision     : {} ({}.{})", revision_label(self.revision), self.major, self.minor));
    repr += &(format!("\n  channels     : {}", self.num_channels));
    repr += &(format!("\n  opens        : {}", self.open_count));
    repr += &(format!("\n  fixture      : {}", self.fixture.label()));
    repr += &(format!("\n  online       : {} (forced offline {})", self.online(), self.forced_offline));
    repr += &(format!("\n  fpga         : sys={} fippi={} dsp={}", self.comms_fpga, self.fippi_fpga, self.dsp_online));
    repr += &(format!("\n  tasks        : run={} control={} test={}", self.run_task(), self.control_task, self.test_mode));
    repr += &(format!("\n  fifo         : {} {}", self.stream.pool, self.stream.queue));
    let stats = self.stream.stats.snapshot();
    if let Some(started) = stats.started_at {
      repr += &(format!("\n  run started  : {}", started.format("%Y-%m-%dT%H:%M:%S")));
    }
    repr += &(format!("\n  stats        : {}>", stats));
    write!(f, "{}", repr)
  }
}

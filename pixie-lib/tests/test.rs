use std::sync::Arc;
use std::time::{Duration,
                Instant};

use pixie_lib::backplane::Backplane;
use pixie_lib::bus::{DeviceInfo,
                     HostBus};
use pixie_lib::errors::ErrorCode;
use pixie_lib::firmware::{BootPattern,
                          Firmware,
                          FirmwareSet,
                          Release};
use pixie_lib::module::{Module,
                        TestMode};
use pixie_lib::param::{ChannelVar,
                       Descriptors,
                       ModuleVar,
                       SyncMode};
use pixie_lib::registers::*;
use pixie_lib::run::{self,
                     ControlTask,
                     RunMode,
                     RunTask};
use pixie_lib::settings::{PixieSettings,
                          FIFO_BUFFER_SIZE};
use pixie_lib::sim::{self,
                     SimulatedBus,
                     TEST_FIFO_WORDS};

fn info(slot : usize) -> DeviceInfo {
  DeviceInfo {
    slot,
    serial : 1000 + slot as u32,
    ..DeviceInfo::default()
  }
}

fn release() -> FirmwareSet {
  sim::firmware_set(Release::new(3, 4, 1))
}

fn user() -> FirmwareSet {
  sim::firmware_set(Release::not_released())
}

/// An opened module on its own backplane
fn open_module(number : usize, backplane : &Arc<Backplane>, slot : usize) -> (Module, Arc<SimulatedBus>) {
  let _ = env_logger::builder().is_test(true).try_init();
  let sim = Arc::new(SimulatedBus::new(info(slot)));
  let mut module = Module::new(number, Arc::clone(backplane));
  module.open(Box::new(Arc::clone(&sim))).unwrap();
  (module, sim)
}

fn booted_module() -> (Module, Arc<SimulatedBus>) {
  let backplane = Arc::new(Backplane::new());
  backplane.init(1);
  let (mut module, sim) = open_module(0, &backplane, 2);
  module.boot(BootPattern::ALL, &release()).unwrap();
  (module, sim)
}

fn read_words(module : &mut Module, expected : usize, timeout : Duration) -> Vec<u32> {
  let started = Instant::now();
  let mut data = Vec::<u32>::new();
  let mut buf  = vec![0u32; 4096];
  while data.len() < expected && started.elapsed() < timeout {
    let n = module.read_list_mode(&mut buf).unwrap();
    data.extend_from_slice(&buf[..n]);
    if n == 0 {
      std::thread::sleep(Duration::from_millis(2));
    }
  }
  data
}

fn var_address(var : ModuleVar) -> u32 {
  Descriptors::load(&sim::default_var_file()).unwrap().module_desc(var).address
}

#[test]
fn open_reads_identity() {
  let backplane = Arc::new(Backplane::new());
  let (mut module, sim) = open_module(0, &backplane, 5);
  assert!(module.opened());
  assert!(!module.online());
  assert_eq!(module.slot, 5);
  assert_eq!(module.serial, 1005);
  assert_eq!(module.num_channels, 16);
  assert_eq!(module.open_count, 0);
  let err = module.open(Box::new(Arc::clone(&sim))).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleAlreadyOpen);
  module.close().unwrap();
  module.open(Box::new(Arc::clone(&sim))).unwrap();
  assert_eq!(module.open_count, 1);
  println!("{}", module);
}

#[test]
fn boot_all_brings_module_online() {
  let (mut module, sim) = booted_module();
  assert!(module.online());
  assert!(module.comms_fpga && module.fippi_fpga && module.dsp_online);
  let set = release();
  assert_eq!(module.mailbox().firmware_crc(), set.crc().unwrap());
  assert_eq!(sim.mailbox()[4], set.crc().unwrap());
  assert!(module.mailbox().firmware_resident(&set.release));
  assert_eq!(sim.dsp_value(var_address(ModuleVar::SlotID)), 2);
  // probing the same set finds the module online
  module.probe(&set).unwrap();
  assert!(module.online());
}

#[test]
fn probe_of_blank_module_is_offline() {
  let backplane = Arc::new(Backplane::new());
  let (mut module, _sim) = open_module(0, &backplane, 2);
  module.probe(&release()).unwrap();
  assert!(!module.online());
  assert!(!module.comms_fpga);
}

#[test]
fn probe_with_other_images_is_offline() {
  let (mut module, _sim) = booted_module();
  let mut other = release();
  let mut image = other.comms.as_ref().unwrap().image.clone();
  image[0] ^= 0xff;
  other.comms = Some(Firmware::released("sys", image));
  module.probe(&other).unwrap();
  assert!(module.comms_fpga && module.fippi_fpga && module.dsp_online);
  assert!(!module.online());
}

#[test]
fn comms_alone_loads_all_stages() {
  let backplane = Arc::new(Backplane::new());
  let (mut module, _sim) = open_module(0, &backplane, 2);
  let pattern = BootPattern { comms : true, fippi : false, dsp : false };
  module.boot(pattern, &user()).unwrap();
  assert!(module.comms_fpga && module.fippi_fpga && module.dsp_online);
  assert!(module.online());
  // a partial load clears the CRC
  let dsp = BootPattern { comms : false, fippi : false, dsp : true };
  module.boot(dsp, &user()).unwrap();
  assert!(module.online());
  assert_eq!(module.mailbox().firmware_crc(), 0);
}

#[test]
fn dsp_alone_on_blank_module_fails() {
  let backplane = Arc::new(Backplane::new());
  let (mut module, sim) = open_module(0, &backplane, 2);
  let mailbox = sim.mailbox();
  let dsp = BootPattern { comms : false, fippi : false, dsp : true };
  let err = module.boot(dsp, &user()).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInitializeFailure);
  let err = module.boot(dsp, &release()).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInitializeFailure);
  assert_eq!(sim.mailbox(), mailbox);
  assert!(!module.online());
  assert!(module.boot(BootPattern::default(), &user()).is_err());
}

#[test]
fn release_with_bad_crc_is_not_booted() {
  let backplane = Arc::new(Backplane::new());
  let (mut module, _sim) = open_module(0, &backplane, 2);
  let mut set = release();
  if let Some(fippi) = set.fippi.as_mut() {
    fippi.crc = Some(0x1234);
  }
  let err = module.boot(BootPattern::ALL, &set).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidFirmware);
  assert!(!module.comms_fpga);
}

#[test]
fn offline_module_rejects_variable_access() {
  let backplane = Arc::new(Backplane::new());
  let (mut module, _sim) = open_module(0, &backplane, 2);
  let err = module.write_named("ChanCSRa", 4, 0, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleOffline);
  assert!(module.read_var(ModuleVar::ModNum, 0, false).is_err());
}

#[test]
fn write_once_is_enforced_without_bus_traffic() {
  let (mut module, sim) = booted_module();
  // boot wrote the slot
  let before = sim.transfers();
  let err = module.write_var(ModuleVar::SlotID, 9, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleParamWriteonce);
  assert_eq!(sim.transfers(), before);
  assert_eq!(sim.dsp_value(var_address(ModuleVar::SlotID)), 2);
}

#[test]
fn failed_slot_write_still_uses_the_single_write() {
  let backplane = Arc::new(Backplane::new());
  backplane.init(1);
  let (mut module, sim) = open_module(0, &backplane, 2);
  let slot_addr = var_address(ModuleVar::SlotID);
  sim.fail_dsp_writes(Some(slot_addr));
  let err = module.boot(BootPattern::ALL, &release()).unwrap_err();
  assert_eq!(err.code, ErrorCode::DeviceHwFailure);
  assert!(module.online());
  sim.fail_dsp_writes(None);
  let err = module.write_var(ModuleVar::SlotID, 2, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleParamWriteonce);
  assert_eq!(sim.dsp_value(slot_addr), 0);
  // a new boot starts from fresh values
  module.boot(BootPattern::ALL, &release()).unwrap();
  assert_eq!(sim.dsp_value(slot_addr), 2);
}

#[test]
fn rejected_device_is_released() {
  let backplane = Arc::new(Backplane::new());
  let sim = Arc::new(SimulatedBus::new(info(MAX_SLOTS + 1)));
  let mut module = Module::new(0, Arc::clone(&backplane));
  let err = module.open(Box::new(Arc::clone(&sim))).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInfoFailure);
  assert!(sim.open().is_ok());
}

#[test]
fn access_modes_and_ranges() {
  let (mut module, _sim) = booted_module();
  let err = module.read_var(ModuleVar::Resume, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleParamWriteonly);
  let err = module.write_var(ModuleVar::RealTimeA, 1, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleParamReadonly);
  let err = module.write_var(ModuleVar::ModCSRA, 1, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleParamDisabled);
  let err = module.write_var(ModuleVar::ModCSRB, 1, 1, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidParam);
  let err = module.write_channel_var(ChannelVar::ChanCSRa, 1, 0, 1, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ChannelInvalidParam);
  let err = module.write_channel_var(ChannelVar::ChanCSRa, 1, 16, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ChannelNumberInvalid);
  assert!(module.read_channel_var(ChannelVar::GSLTtime, 0, 0, true).is_ok());
  let err = module.write_named("NoSuchVar", 1, 0, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidVar);
  // the last word of a multi word variable
  module.write_var(ModuleVar::HostIO, 7, 15, true).unwrap();
  assert_eq!(module.read_var(ModuleVar::HostIO, 15, true).unwrap(), 7);
}

#[test]
fn named_access_reaches_hardware() {
  let (mut module, sim) = booted_module();
  module.write_named("ChanCSRa", 4, 3, 0, true).unwrap();
  assert_eq!(module.read_named("ChanCSRa", 3, 0, true).unwrap(), 4);
  let descs = Descriptors::load(&sim::default_var_file()).unwrap();
  let addr = descs.channel_desc(ChannelVar::ChanCSRa).address + 3;
  assert_eq!(sim.dsp_value(addr), 4);
}

#[test]
fn sync_vars_leaves_nothing_dirty() {
  let (mut module, sim) = booted_module();
  module.write_var(ModuleVar::CrateID, 3, 0, false).unwrap();
  module.write_channel_var(ChannelVar::FastThresh, 250, 1, 0, false).unwrap();
  assert!(module.dirty());
  assert_eq!(sim.dsp_value(var_address(ModuleVar::CrateID)), 0);
  module.sync_vars(SyncMode::ToHardware).unwrap();
  assert!(!module.dirty());
  assert_eq!(sim.dsp_value(var_address(ModuleVar::CrateID)), 3);
  module.sync_vars(SyncMode::FromHardware).unwrap();
  assert!(!module.dirty());
  assert_eq!(module.read_channel_var(ChannelVar::FastThresh, 1, 0, false).unwrap(), 250);
}

#[test]
fn clean_list_mode_run() {
  let (mut module, sim) = booted_module();
  module.start_listmode(RunMode::NewRun).unwrap();
  assert_eq!(module.run_task(), RunTask::ListMode);
  assert!(module.run_active().unwrap());
  let words : Vec<u32> = (0..50000).collect();
  sim.fill_fifo(&words);
  let data = read_words(&mut module, words.len(), Duration::from_secs(5));
  assert_eq!(data, words);
  module.run_end().unwrap();
  assert_eq!(module.run_task(), RunTask::Nop);
  let stats = module.stats();
  assert_eq!(stats.in_, stats.out);
  assert_eq!(stats.out, words.len());
  assert_eq!(stats.dropped, 0);
  assert_eq!(stats.overflows, 0);
}

#[test]
fn fifo_reads_never_exceed_a_buffer() {
  let (mut module, sim) = booted_module();
  module.start_listmode(RunMode::NewRun).unwrap();
  let words : Vec<u32> = (0..100000).collect();
  sim.fill_fifo(&words);
  let data = read_words(&mut module, words.len(), Duration::from_secs(5));
  assert_eq!(data.len(), words.len());
  assert!(sim.max_transfer() <= FIFO_BUFFER_SIZE);
  assert!(sim.fifo_transfers() >= 2);
  module.run_end().unwrap();
}

#[test]
fn synchronous_worker_drains_once_per_read() {
  let backplane = Arc::new(Backplane::new());
  backplane.init(1);
  let sim = Arc::new(SimulatedBus::new(info(2)));
  let mut module = Module::new(0, backplane);
  module.set_fifo_run_wait(0).unwrap();
  module.open(Box::new(Arc::clone(&sim))).unwrap();
  module.boot(BootPattern::ALL, &release()).unwrap();
  module.start_listmode(RunMode::NewRun).unwrap();
  sim.fill_fifo(&[1, 2, 3, 4, 5]);
  assert_eq!(module.read_list_mode_level().unwrap(), 5);
  let before = sim.fifo_transfers();
  let mut buf = vec![0u32; 16];
  assert_eq!(module.read_list_mode(&mut buf).unwrap(), 5);
  assert_eq!(&buf[..5], &[1, 2, 3, 4, 5]);
  assert_eq!(sim.fifo_transfers(), before + 1);
  assert_eq!(module.read_list_mode(&mut buf).unwrap(), 0);
  assert_eq!(sim.fifo_transfers(), before + 1);
  module.run_end().unwrap();
}

#[test]
fn run_end_is_idempotent() {
  let (mut module, _sim) = booted_module();
  module.start_histograms(RunMode::NewRun).unwrap();
  assert_eq!(module.run_task(), RunTask::Histogram);
  let err = module.start_histograms(RunMode::NewRun).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidOperation);
  module.run_end().unwrap();
  assert!(!module.run_active().unwrap());
  module.run_end().unwrap();
  assert_eq!(module.run_task(), RunTask::Nop);
}

#[test]
fn histogram_readout() {
  let (mut module, sim) = booted_module();
  module.start_histograms(RunMode::NewRun).unwrap();
  sim.write_mca(2, &[5, 6, 7, 8]).unwrap();
  module.run_end().unwrap();
  let mut values = vec![0u32; 4];
  module.read_histogram(2, &mut values).unwrap();
  assert_eq!(values, vec![5, 6, 7, 8]);
  let mut too_long = vec![0u32; LARGE_HISTOGRAM_LENGTH + 1];
  assert!(module.read_histogram(2, &mut too_long).is_err());
}

#[test]
fn control_task_timeout() {
  let (mut module, sim) = booted_module();
  sim.set_control_task_polls(None);
  let err = run::control(&mut module, ControlTask::GetBaselines, 20).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleTaskTimeout);
  assert_eq!(module.control_task, ControlTask::Nop);
  sim.set_control_task_polls(Some(2));
  module.acquire_baselines().unwrap();
  module.adjust_offsets().unwrap();
  module.tau_finder().unwrap();
  module.set_dacs().unwrap();
}

#[test]
fn adc_traces_need_get_traces() {
  let (mut module, _sim) = booted_module();
  let mut trace = vec![0u16; 16];
  let err = module.read_adc(1, &mut trace, false).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidOperation);
  module.read_adc(1, &mut trace, true).unwrap();
  // 16 channels share the IO buffer
  assert_eq!(trace[0], 4096);
  assert_eq!(trace[3], 4099);
  module.read_adc(1, &mut trace, false).unwrap();
}

#[test]
fn run_leader_is_exclusive() {
  let backplane = Arc::new(Backplane::new());
  backplane.init(2);
  let (mut a, _sim_a) = open_module(0, &backplane, 2);
  let (mut b, _sim_b) = open_module(1, &backplane, 3);
  a.boot(BootPattern::ALL, &release()).unwrap();
  b.boot(BootPattern::ALL, &release()).unwrap();
  let leader = 1 << MODCSRB_CHASSISMASTER;
  a.module_csrb(leader, 0, true).unwrap();
  assert!(backplane.run.is_leader(2));
  let err = b.module_csrb(leader, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidParam);
  a.module_csrb(0, 0, true).unwrap();
  assert!(!backplane.run.has_leader());
  b.module_csrb(leader, 0, true).unwrap();
  assert!(backplane.run.is_leader(3));
  // going offline gives the role up
  b.force_offline();
  assert!(!backplane.run.has_leader());
}

#[test]
fn sync_wait_needs_every_module() {
  let backplane = Arc::new(Backplane::new());
  backplane.init(2);
  let (mut a, _sim_a) = open_module(0, &backplane, 2);
  let (mut b, _sim_b) = open_module(1, &backplane, 3);
  a.boot(BootPattern::ALL, &release()).unwrap();
  b.boot(BootPattern::ALL, &release()).unwrap();
  a.write_var(ModuleVar::SynchWait, 1, 0, true).unwrap();
  let err = a.start_histograms(RunMode::NewRun).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidOperation);
  b.write_var(ModuleVar::SynchWait, 1, 0, true).unwrap();
  // all waiting but no run leader
  assert!(a.start_histograms(RunMode::NewRun).is_err());
  a.module_csrb(1 << MODCSRB_CHASSISMASTER, 0, true).unwrap();
  a.start_histograms(RunMode::NewRun).unwrap();
  a.run_end().unwrap();
}

#[test]
fn forced_offline_and_back() {
  let (mut module, _sim) = booted_module();
  module.force_offline();
  assert!(module.forced_offline());
  assert!(!module.online());
  let err = module.read_var(ModuleVar::ModNum, 0, false).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleOffline);
  // a forced offline module is not booted
  module.boot(BootPattern::ALL, &release()).unwrap();
  assert!(!module.online());
  module.force_online();
  assert!(module.online());
  assert!(module.fifo_worker_running());
  module.read_var(ModuleVar::ModNum, 0, true).unwrap();
}

#[test]
fn lm_fifo_test_moves_test_pattern() {
  let (mut module, _sim) = booted_module();
  module.start_test(TestMode::LmFifo).unwrap();
  assert_eq!(module.start_test(TestMode::LmFifo).unwrap_err().code, ErrorCode::ModuleTestInvalid);
  assert!(module.start_listmode(RunMode::NewRun).is_err());
  let data = read_words(&mut module, TEST_FIFO_WORDS, Duration::from_secs(5));
  assert_eq!(data.len(), TEST_FIFO_WORDS);
  assert_eq!(data[10], 10);
  module.end_test().unwrap();
  assert_eq!(module.test_mode(), TestMode::Off);
  let stats = module.stats();
  assert_eq!(stats.in_, TEST_FIFO_WORDS);
  assert_eq!(stats.out, TEST_FIFO_WORDS);
}

#[test]
fn filter_ranges() {
  let (mut module, _sim) = booted_module();
  let err = module.slow_filter_range(SLOWFILTERRANGE_MIN - 1, 0, true).unwrap_err();
  assert_eq!(err.code, ErrorCode::ModuleInvalidParam);
  assert!(module.slow_filter_range(SLOWFILTERRANGE_MAX + 1, 0, true).is_err());
  module.write_channel_var(ChannelVar::PeakSep, 10, 0, 0, true).unwrap();
  module.slow_filter_range(3, 0, true).unwrap();
  assert_eq!(module.read_var(ModuleVar::SlowFilterRange, 0, false).unwrap(), 3);
  // clamped, not rejected
  module.fast_filter_range(9, 0, true).unwrap();
  assert_eq!(module.read_var(ModuleVar::FastFilterRange, 0, false).unwrap(), FASTFILTERRANGE_MAX);
}

#[test]
fn fifo_tuning_ranges() {
  let (mut module, _sim) = booted_module();
  assert_eq!(module.set_fifo_buffers(1).unwrap_err().code, ErrorCode::ModuleInvalidVar);
  assert!(module.set_fifo_run_wait(100).is_err());
  module.set_fifo_run_wait(0).unwrap();
  module.set_fifo_run_wait(2000).unwrap();
  assert!(module.set_fifo_idle_wait(10).is_err());
  assert!(module.set_fifo_hold(10).is_err());
  assert!(module.set_fifo_dma_trigger_level(10).is_err());
  assert!(module.set_fifo_bandwidth(PCI_BUS_DATARATE + 1).is_err());
  module.set_fifo_bandwidth(50).unwrap();
  assert_eq!(module.fifo().run_wait_usecs, 2000);
}

#[test]
fn close_ends_run_and_releases_device() {
  let (mut module, sim) = booted_module();
  module.start_listmode(RunMode::NewRun).unwrap();
  module.close().unwrap();
  assert!(!module.opened());
  assert!(!sim.task_active());
  // the bus can be claimed again
  let backplane = Arc::new(Backplane::new());
  let mut other = Module::new(1, backplane);
  other.open(Box::new(Arc::clone(&sim))).unwrap();
  other.probe(&release()).unwrap();
  assert!(other.online());
}

#[test]
fn write_config_file() {
  let settings = PixieSettings::new();
  println!("{}", settings);
  let path = std::env::temp_dir().join("pixie-config-test.toml");
  let filename = settings.to_toml(&path.to_string_lossy()).unwrap();
  let read = PixieSettings::from_toml(&filename).unwrap();
  assert_eq!(read, settings);
  std::fs::remove_file(&filename).unwrap();
}

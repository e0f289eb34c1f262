//! Errors raised by the module driver
//!
//! Every failure carries an [`ErrorCode`] and a message. The code
//! decides the [`ErrorKind`], which tells the caller if the
//! operation can be retried without rebooting the module.

use std::error::Error;
use std::fmt;

use crate::memory::BusError;

/// Classification of a failure
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
  /// rejected before any bus traffic, safe to retry
  Precondition,
  /// boot, CRC, DMA and timeout failures
  Hardware,
  /// a resource could not be obtained
  Resource,
  /// an invariant has been violated
  Internal,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      ErrorKind::Precondition => "precondition",
      ErrorKind::Hardware     => "hardware",
      ErrorKind::Resource     => "resource",
      ErrorKind::Internal     => "internal",
    };
    write!(f, "{}", repr)
  }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
  ModuleOffline,
  ModuleAlreadyOpen,
  ModuleNotFound,
  ChannelNumberInvalid,
  ModuleInvalidVar,
  ChannelInvalidVar,
  ModuleParamDisabled,
  ModuleParamReadonly,
  ModuleParamWriteonly,
  ModuleParamWriteonce,
  ChannelParamDisabled,
  ChannelParamReadonly,
  ChannelParamWriteonly,
  ChannelParamWriteonce,
  ChannelInvalidParam,
  ModuleInvalidParam,
  ModuleInvalidOperation,
  ModuleTestInvalid,
  ModuleTaskTimeout,
  ModuleInitializeFailure,
  ModuleInvalidFirmware,
  ModuleInfoFailure,
  ModuleCloseFailure,
  DeviceLoadFailure,
  DeviceDmaFailure,
  DeviceFifoFailure,
  DeviceHwFailure,
  ConfigInvalid,
  FileReadFailure,
  InvalidValue,
  ResourceUnavailable,
  InternalFailure,
}

impl ErrorCode {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ErrorCode::ModuleTaskTimeout
      | ErrorCode::ModuleInitializeFailure
      | ErrorCode::ModuleInvalidFirmware
      | ErrorCode::ModuleInfoFailure
      | ErrorCode::ModuleCloseFailure
      | ErrorCode::DeviceLoadFailure
      | ErrorCode::DeviceDmaFailure
      | ErrorCode::DeviceFifoFailure
      | ErrorCode::DeviceHwFailure     => ErrorKind::Hardware,
      ErrorCode::ResourceUnavailable   => ErrorKind::Resource,
      ErrorCode::InternalFailure       => ErrorKind::Internal,
      _                                => ErrorKind::Precondition,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      ErrorCode::ModuleOffline           => "module_offline",
      ErrorCode::ModuleAlreadyOpen       => "module_already_open",
      ErrorCode::ModuleNotFound          => "module_not_found",
      ErrorCode::ChannelNumberInvalid    => "channel_number_invalid",
      ErrorCode::ModuleInvalidVar        => "module_invalid_var",
      ErrorCode::ChannelInvalidVar       => "channel_invalid_var",
      ErrorCode::ModuleParamDisabled     => "module_param_disabled",
      ErrorCode::ModuleParamReadonly     => "module_param_readonly",
      ErrorCode::ModuleParamWriteonly    => "module_param_writeonly",
      ErrorCode::ModuleParamWriteonce    => "module_param_writeonce",
      ErrorCode::ChannelParamDisabled    => "channel_param_disabled",
      ErrorCode::ChannelParamReadonly    => "channel_param_readonly",
      ErrorCode::ChannelParamWriteonly   => "channel_param_writeonly",
      ErrorCode::ChannelParamWriteonce   => "channel_param_writeonce",
      ErrorCode::ChannelInvalidParam     => "channel_invalid_param",
      ErrorCode::ModuleInvalidParam      => "module_invalid_param",
      ErrorCode::ModuleInvalidOperation  => "module_invalid_operation",
      ErrorCode::ModuleTestInvalid       => "module_test_invalid",
      ErrorCode::ModuleTaskTimeout       => "module_task_timeout",
      ErrorCode::ModuleInitializeFailure => "module_initialize_failure",
      ErrorCode::ModuleInvalidFirmware   => "module_invalid_firmware",
      ErrorCode::ModuleInfoFailure       => "module_info_failure",
      ErrorCode::ModuleCloseFailure      => "module_close_failure",
      ErrorCode::DeviceLoadFailure       => "device_load_failure",
      ErrorCode::DeviceDmaFailure        => "device_dma_failure",
      ErrorCode::DeviceFifoFailure       => "device_fifo_failure",
      ErrorCode::DeviceHwFailure         => "device_hw_failure",
      ErrorCode::ConfigInvalid           => "config_invalid",
      ErrorCode::FileReadFailure         => "file_read_failure",
      ErrorCode::InvalidValue            => "invalid_value",
      ErrorCode::ResourceUnavailable     => "resource_unavailable",
      ErrorCode::InternalFailure         => "internal_failure",
    }
  }
}

impl fmt::Display for ErrorCode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.label())
  }
}

/// The error type of every fallible driver operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixieError {
  pub code : ErrorCode,
  pub what : String,
}

impl PixieError {
  pub fn new(code : ErrorCode, what : impl Into<String>) -> Self {
    Self {
      code,
      what : what.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    self.code.kind()
  }

  /// Can the operation be tried again without a reboot?
  ///
  /// Precondition failures did not touch the hardware and a task
  /// timeout leaves the run tasks reset, so both are safe.
  pub fn is_retryable(&self) -> bool {
    match self.kind() {
      ErrorKind::Precondition | ErrorKind::Resource => true,
      ErrorKind::Hardware => self.code == ErrorCode::ModuleTaskTimeout,
      ErrorKind::Internal => false,
    }
  }
}

impl fmt::Display for PixieError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<PixieError ({}): {}>", self.code, self.what)
  }
}

impl Error for PixieError {
}

impl From<BusError> for PixieError {
  fn from(err : BusError) -> Self {
    let code = match err {
      BusError::InUse         => ErrorCode::ModuleAlreadyOpen,
      BusError::NotOpen       => ErrorCode::ModuleOffline,
      BusError::DmaFailure    => ErrorCode::DeviceDmaFailure,
      BusError::OutOfRange    => ErrorCode::InternalFailure,
      BusError::MMapFail
      | BusError::Unknown     => ErrorCode::DeviceHwFailure,
    };
    PixieError::new(code, format!("bus: {}", err))
  }
}

/// Configuration files which can not be read or parsed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SettingsError {
  FileNotFound,
  FileWriteError,
  TomlDecodingError,
  TomlEncodingError,
  OutOfRange,
}

impl fmt::Display for SettingsError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let etype = match self {
      SettingsError::FileNotFound      => "FileNotFound",
      SettingsError::FileWriteError    => "FileWriteError",
      SettingsError::TomlDecodingError => "TomlDecodingError",
      SettingsError::TomlEncodingError => "TomlEncodingError",
      SettingsError::OutOfRange        => "OutOfRange",
    };
    write!(f, "<SettingsError: {}>", etype)
  }
}

impl Error for SettingsError {
}

impl From<SettingsError> for PixieError {
  fn from(err : SettingsError) -> Self {
    let code = match err {
      SettingsError::FileNotFound   => ErrorCode::FileReadFailure,
      SettingsError::FileWriteError => ErrorCode::FileReadFailure,
      _                             => ErrorCode::ConfigInvalid,
    };
    PixieError::new(code, format!("settings: {}", err))
  }
}

#[cfg(test)]
mod test_errors {
  use super::*;

  #[test]
  fn retryable_kinds() {
    let offline = PixieError::new(ErrorCode::ModuleOffline, "x");
    assert_eq!(offline.kind(), ErrorKind::Precondition);
    assert!(offline.is_retryable());
    let timeout = PixieError::new(ErrorCode::ModuleTaskTimeout, "x");
    assert_eq!(timeout.kind(), ErrorKind::Hardware);
    assert!(timeout.is_retryable());
    let crc = PixieError::new(ErrorCode::ModuleInvalidFirmware, "x");
    assert!(!crc.is_retryable());
    let internal = PixieError::new(ErrorCode::InternalFailure, "x");
    assert!(!internal.is_retryable());
  }

  #[test]
  fn bus_error_conversion() {
    let err = PixieError::from(BusError::InUse);
    assert_eq!(err.code, ErrorCode::ModuleAlreadyOpen);
    let err = PixieError::from(BusError::DmaFailure);
    assert_eq!(err.code, ErrorCode::DeviceDmaFailure);
  }
}

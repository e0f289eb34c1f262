//! DSP variables
//!
//! The DSP program exports its variables at addresses listed in
//! the variable file of a firmware set. Module variables exist once
//! per module, channel variables once per channel. Channel copies of
//! a variable sit one after the other from its base address.
//!
//! The host keeps a cache of every variable. A write which does not
//! reach the hardware marks the cached value dirty.

use std::fmt;

use crate::errors::{ErrorCode,
                    PixieError};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
  ReadOnly,
  WriteOnly,
  ReadWrite,
  /// can be written a single time after a boot
  WriteOnce,
}

impl AccessMode {
  pub fn readable(&self) -> bool {
    *self != AccessMode::WriteOnly
  }

  pub fn writable(&self) -> bool {
    *self != AccessMode::ReadOnly
  }
}

impl fmt::Display for AccessMode {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      AccessMode::ReadOnly  => "ro",
      AccessMode::WriteOnly => "wr",
      AccessMode::ReadWrite => "rw",
      AccessMode::WriteOnce => "w1",
    };
    write!(f, "{}", repr)
  }
}

/// Where a variable lives and how it can be used
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VarDescriptor<V> {
  pub var     : V,
  pub address : u32,
  /// number of words
  pub size    : usize,
  pub mode    : AccessMode,
  pub enabled : bool,
}

macro_rules! var_table {
  ($(#[$meta:meta])* $vis:vis enum $name:ident {
    $($var:ident => ($enabled:expr, $mode:ident, $size:expr)),* $(,)?
  }) => {
    $(#[$meta])*
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    $vis enum $name {
      $($var),*
    }

    impl $name {
      pub const ALL : &'static [$name] = &[$($name::$var),*];

      pub fn name(&self) -> &'static str {
        match self {
          $($name::$var => stringify!($var)),*
        }
      }

      pub fn index(&self) -> usize {
        *self as usize
      }

      pub fn from_name(name : &str) -> Option<Self> {
        match name {
          $(stringify!($var) => Some($name::$var),)*
          _ => None
        }
      }

      /// Descriptors before a variable file assigns the addresses
      pub fn default_descriptors() -> Vec<VarDescriptor<$name>> {
        vec![$(VarDescriptor {
          var     : $name::$var,
          address : 0,
          size    : $size,
          mode    : AccessMode::$mode,
          enabled : $enabled,
        }),*]
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
      }
    }
  }
}

var_table! {
  /// Variables which exist once per module
  pub enum ModuleVar {
    ModNum               => (true,  ReadWrite,  1),
    ModCSRA              => (false, ReadOnly,   1),
    ModCSRB              => (true,  ReadWrite,  1),
    ModFormat            => (false, ReadWrite,  1),
    RunTask              => (true,  ReadWrite,  1),
    ControlTask          => (true,  ReadWrite,  1),
    MaxEvents            => (false, ReadWrite,  1),
    CoincPattern         => (false, ReadWrite,  1),
    CoincWait            => (false, ReadWrite,  1),
    SynchWait            => (true,  ReadWrite,  1),
    InSynch              => (true,  ReadWrite,  1),
    Resume               => (true,  WriteOnly,  1),
    SlowFilterRange      => (true,  ReadWrite,  1),
    FastFilterRange      => (true,  ReadWrite,  1),
    ChanNum              => (true,  ReadWrite,  1),
    HostIO               => (true,  ReadWrite, 16),
    UserIn               => (true,  ReadWrite, 16),
    FastTrigBackplaneEna => (true,  ReadWrite,  1),
    CrateID              => (true,  ReadWrite,  1),
    SlotID               => (true,  WriteOnce,  1),
    ModID                => (false, ReadWrite,  1),
    TrigConfig           => (true,  ReadWrite,  4),
    HRTP                 => (true,  ReadWrite,  1),
    U00                  => (false, ReadWrite,  1),
    RealTimeA            => (true,  ReadOnly,   1),
    RealTimeB            => (true,  ReadOnly,   1),
    RunTimeA             => (true,  ReadOnly,   1),
    RunTimeB             => (true,  ReadOnly,   1),
    SynchDone            => (true,  ReadOnly,   1),
    UserOut              => (true,  ReadOnly,  16),
    HardwareID           => (true,  ReadOnly,   1),
    HardVariant          => (true,  ReadOnly,   1),
    FIFOLength           => (true,  ReadOnly,   1),
    DSPrelease           => (true,  ReadOnly,   1),
    DSPbuild             => (true,  ReadOnly,   1),
    NumEventsA           => (false, ReadOnly,   1),
    NumEventsB           => (false, ReadOnly,   1),
    BufHeadLen           => (false, ReadOnly,   1),
    EventHeadLen         => (false, ReadOnly,   1),
    ChanHeadLen          => (false, ReadOnly,   1),
    LOutBuffer           => (false, ReadOnly,   1),
    FippiID              => (false, ReadOnly,   1),
    FippiVariant         => (false, ReadOnly,   1),
    DSPVariant           => (false, ReadOnly,   1),
  }
}

var_table! {
  /// Variables which exist once per channel
  pub enum ChannelVar {
    ChanCSRa          => (true,  ReadWrite, 1),
    ChanCSRb          => (false, ReadWrite, 1),
    GainDAC           => (false, ReadWrite, 1),
    OffsetDAC         => (true,  ReadWrite, 1),
    DigGain           => (false, ReadWrite, 1),
    SlowLength        => (true,  ReadWrite, 1),
    SlowGap           => (true,  ReadWrite, 1),
    FastLength        => (true,  ReadWrite, 1),
    FastGap           => (true,  ReadWrite, 1),
    PeakSample        => (true,  ReadWrite, 1),
    PeakSep           => (true,  ReadWrite, 1),
    CFDThresh         => (true,  ReadWrite, 1),
    FastThresh        => (true,  ReadWrite, 1),
    ThreshWidth       => (false, ReadWrite, 1),
    PAFlength         => (true,  ReadWrite, 1),
    TriggerDelay      => (true,  ReadWrite, 1),
    ResetDelay        => (false, ReadWrite, 1),
    ChanTrigStretch   => (true,  ReadWrite, 1),
    TraceLength       => (true,  ReadWrite, 1),
    Xwait             => (true,  ReadWrite, 1),
    TrigOutLen        => (false, ReadWrite, 1),
    EnergyLow         => (true,  ReadWrite, 1),
    Log2Ebin          => (true,  ReadWrite, 1),
    MultiplicityMaskL => (true,  ReadWrite, 1),
    MultiplicityMaskH => (true,  ReadWrite, 1),
    PSAoffset         => (false, ReadWrite, 1),
    PSAlength         => (false, ReadWrite, 1),
    Integrator        => (false, ReadWrite, 1),
    BLcut             => (true,  ReadWrite, 1),
    BaselinePercent   => (true,  ReadWrite, 1),
    FtrigoutDelay     => (true,  ReadWrite, 1),
    Log2Bweight       => (true,  ReadWrite, 1),
    PreampTau         => (true,  ReadWrite, 1),
    FastTrigBackLen   => (true,  ReadWrite, 1),
    CFDDelay          => (true,  ReadWrite, 1),
    CFDScale          => (true,  ReadWrite, 1),
    ExtTrigStretch    => (true,  ReadWrite, 1),
    VetoStretch       => (true,  ReadWrite, 1),
    ExternDelayLen    => (true,  ReadWrite, 1),
    QDCLen0           => (true,  ReadWrite, 1),
    QDCLen1           => (true,  ReadWrite, 1),
    QDCLen2           => (true,  ReadWrite, 1),
    QDCLen3           => (true,  ReadWrite, 1),
    QDCLen4           => (true,  ReadWrite, 1),
    QDCLen5           => (true,  ReadWrite, 1),
    QDCLen6           => (true,  ReadWrite, 1),
    QDCLen7           => (true,  ReadWrite, 1),
    GSLTtime          => (true,  ReadOnly,  1),
    DSPerror          => (true,  ReadOnly,  1),
    AOutBuffer        => (true,  ReadOnly,  1),
    AECorr            => (true,  ReadOnly,  1),
    LECorr            => (true,  ReadOnly,  1),
    U20               => (true,  ReadOnly,  1),
    LiveTimeA         => (true,  ReadOnly,  1),
    LiveTimeB         => (true,  ReadOnly,  1),
    FastPeaksA        => (true,  ReadOnly,  1),
    FastPeaksB        => (true,  ReadOnly,  1),
    OverflowA         => (true,  ReadOnly,  1),
    OverflowB         => (true,  ReadOnly,  1),
    InSpecA           => (true,  ReadOnly,  1),
    InSpecB           => (true,  ReadOnly,  1),
    UnderflowA        => (true,  ReadOnly,  1),
    UnderflowB        => (true,  ReadOnly,  1),
    ChanEventsA       => (true,  ReadOnly,  1),
    ChanEventsB       => (true,  ReadOnly,  1),
    AutoTau           => (true,  ReadOnly,  1),
    U30               => (false, ReadOnly,  1),
  }
}

/// A variable addressed by its name
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NamedVar {
  Module(ModuleVar),
  Channel(ChannelVar),
}

impl NamedVar {
  /// Module variables are searched first
  pub fn lookup(name : &str) -> Option<Self> {
    if let Some(var) = ModuleVar::from_name(name) {
      return Some(NamedVar::Module(var));
    }
    ChannelVar::from_name(name).map(NamedVar::Channel)
  }
}

/// The descriptor tables of a firmware set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptors {
  pub module  : Vec<VarDescriptor<ModuleVar>>,
  pub channel : Vec<VarDescriptor<ChannelVar>>,
}

impl Default for Descriptors {
  fn default() -> Self {
    Self {
      module  : ModuleVar::default_descriptors(),
      channel : ChannelVar::default_descriptors(),
    }
  }
}

impl Descriptors {
  /// Assign the addresses from the text of a DSP variable file
  ///
  /// Each line holds a hex address and a variable name. Blank lines
  /// are ignored, any name not in the tables is an error.
  pub fn load(text : &str) -> Result<Self, PixieError> {
    let mut descs = Descriptors::default();
    for (lineno, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let mut fields = line.split_whitespace();
      let (addr, name) = match (fields.next(), fields.next()) {
        (Some(a), Some(n)) => (a, n),
        _ => {
          return Err(PixieError::new(ErrorCode::FileReadFailure,
                                     format!("DSP variable file: line {}: invalid: {}", lineno + 1, line)));
        }
      };
      let addr = addr.trim_start_matches("0x").trim_start_matches("0X");
      let address = match u32::from_str_radix(addr, 16) {
        Ok(a) => a,
        Err(err) => {
          return Err(PixieError::new(ErrorCode::FileReadFailure,
                                     format!("DSP variable file: line {}: {}: {}", lineno + 1, addr, err)));
        }
      };
      match NamedVar::lookup(name) {
        Some(NamedVar::Module(var))  => descs.module[var.index()].address  = address,
        Some(NamedVar::Channel(var)) => descs.channel[var.index()].address = address,
        None => {
          return Err(PixieError::new(ErrorCode::FileReadFailure,
                                     format!("DSP variable not found: {}", name)));
        }
      }
    }
    Ok(descs)
  }

  pub fn module_desc(&self, var : ModuleVar) -> &VarDescriptor<ModuleVar> {
    &self.module[var.index()]
  }

  pub fn channel_desc(&self, var : ChannelVar) -> &VarDescriptor<ChannelVar> {
    &self.channel[var.index()]
  }
}

/// One cached word of a variable
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct VarValue {
  pub value        : u32,
  pub dirty        : bool,
  pub written_once : bool,
}

/// The cached values of a variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable<V> {
  pub desc   : VarDescriptor<V>,
  pub values : Vec<VarValue>,
}

impl<V : Copy> Variable<V> {
  pub fn new(desc : &VarDescriptor<V>) -> Self {
    Self {
      desc   : *desc,
      values : vec![VarValue::default(); desc.size],
    }
  }

  pub fn dirty(&self) -> bool {
    self.values.iter().any(|v| v.dirty)
  }
}

pub type ModuleVariable  = Variable<ModuleVar>;
pub type ChannelVariable = Variable<ChannelVar>;

/// Build a fresh value table from the descriptors
pub fn module_variables(descs : &Descriptors) -> Vec<ModuleVariable> {
  descs.module.iter().map(Variable::new).collect()
}

pub fn channel_variables(descs : &Descriptors) -> Vec<ChannelVariable> {
  descs.channel.iter().map(Variable::new).collect()
}

/// Direction of a cache synchronization
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncMode {
  ToHardware,
  FromHardware,
}

#[cfg(test)]
mod test_param {
  use super::*;

  #[test]
  fn tables_match_names() {
    for (k, var) in ModuleVar::ALL.iter().enumerate() {
      assert_eq!(var.index(), k);
      assert_eq!(ModuleVar::from_name(var.name()), Some(*var));
    }
    assert_eq!(ChannelVar::from_name("ChanCSRa"), Some(ChannelVar::ChanCSRa));
    assert_eq!(ModuleVar::default_descriptors()[ModuleVar::HostIO.index()].size, 16);
    assert_eq!(ModuleVar::default_descriptors()[ModuleVar::SlotID.index()].mode,
               AccessMode::WriteOnce);
  }

  #[test]
  fn named_lookup() {
    assert_eq!(NamedVar::lookup("SlowFilterRange"), Some(NamedVar::Module(ModuleVar::SlowFilterRange)));
    assert_eq!(NamedVar::lookup("PeakSep"), Some(NamedVar::Channel(ChannelVar::PeakSep)));
    assert_eq!(NamedVar::lookup("NoSuchVar"), None);
  }

  #[test]
  fn load_var_file() {
    let text = "0x4a000 ModNum\n\n4a34f ChanCSRa\n";
    let descs = Descriptors::load(text).unwrap();
    assert_eq!(descs.module_desc(ModuleVar::ModNum).address, 0x4a000);
    assert_eq!(descs.channel_desc(ChannelVar::ChanCSRa).address, 0x4a34f);
    let err = Descriptors::load("4a000 Bogus").unwrap_err();
    assert_eq!(err.what, "DSP variable not found: Bogus");
    assert!(Descriptors::load("zz ModNum").is_err());
  }

  #[test]
  fn fresh_values_are_clean() {
    let descs = Descriptors::default();
    let mods = module_variables(&descs);
    assert_eq!(mods.len(), ModuleVar::ALL.len());
    assert_eq!(mods[ModuleVar::HostIO.index()].values.len(), 16);
    assert!(mods.iter().all(|v| !v.dirty()));
  }
}

//! Firmware images and firmware sets
//!
//! A module is booted from a [`FirmwareSet`], which holds the
//! image for each of the three stages plus the DSP variable file.
//! A set tagged with a release records the CRC of every image so
//! images can be checked before anything touches the hardware.

use std::fmt;
use std::fs::File;
use std::io::Read;

use crate::errors::{ErrorCode,
                    PixieError};

/// CRC used for images and for the checksum kept in the mailbox
pub const CRC32 : crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PrereleaseKind {
  None,
  Alpha,
  Beta,
  Rc,
}

impl PrereleaseKind {
  pub fn from_bits(bits : u32) -> Self {
    match bits & 3 {
      1 => PrereleaseKind::Alpha,
      2 => PrereleaseKind::Beta,
      3 => PrereleaseKind::Rc,
      _ => PrereleaseKind::None,
    }
  }

  pub fn bits(&self) -> u32 {
    match self {
      PrereleaseKind::None  => 0,
      PrereleaseKind::Alpha => 1,
      PrereleaseKind::Beta  => 2,
      PrereleaseKind::Rc    => 3,
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      PrereleaseKind::None  => "",
      PrereleaseKind::Alpha => "alpha",
      PrereleaseKind::Beta  => "beta",
      PrereleaseKind::Rc    => "rc",
    }
  }
}

/// A semantic firmware release, e.g. `3.4.1-rc2`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Release {
  pub major             : u32,
  pub minor             : u32,
  pub patch             : u32,
  pub prerelease_number : Option<u32>,
  pub prerelease_kind   : PrereleaseKind,
}

impl Default for PrereleaseKind {
  fn default() -> Self {
    PrereleaseKind::None
  }
}

impl Release {
  pub fn new(major : u32, minor : u32, patch : u32) -> Self {
    Self {
      major,
      minor,
      patch,
      prerelease_number : None,
      prerelease_kind   : PrereleaseKind::None,
    }
  }

  /// Firmware which never had a release, user builds
  pub fn not_released() -> Self {
    Self::default()
  }

  pub fn released(&self) -> bool {
    *self != Self::not_released()
  }

  pub fn parse(text : &str) -> Result<Self, PixieError> {
    let bad = || PixieError::new(ErrorCode::InvalidValue,
                                 format!("invalid firmware release: {}", text));
    let (version, pre) = match text.trim().split_once('-') {
      Some((v, p)) => (v, Some(p)),
      None         => (text.trim(), None),
    };
    let fields : Vec<&str> = version.split('.').collect();
    if fields.len() != 3 {
      return Err(bad());
    }
    let mut numbers = [0u32; 3];
    for (k, field) in fields.iter().enumerate() {
      numbers[k] = field.parse::<u32>().map_err(|_| bad())?;
    }
    let mut release = Release::new(numbers[0], numbers[1], numbers[2]);
    if let Some(pre) = pre {
      let digits = pre.find(|c : char| c.is_ascii_digit()).unwrap_or(pre.len());
      release.prerelease_kind = match &pre[..digits] {
        "alpha" => PrereleaseKind::Alpha,
        "beta"  => PrereleaseKind::Beta,
        "rc"    => PrereleaseKind::Rc,
        _       => return Err(bad()),
      };
      if digits < pre.len() {
        release.prerelease_number = Some(pre[digits..].parse::<u32>().map_err(|_| bad())?);
      }
    }
    Ok(release)
  }
}

impl fmt::Display for Release {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
    if self.prerelease_kind != PrereleaseKind::None {
      write!(f, "-{}", self.prerelease_kind.label())?;
      if let Some(number) = self.prerelease_number {
        write!(f, "{}", number)?;
      }
    }
    Ok(())
  }
}

/// The class of a firmware set
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SetType {
  Undefined,
  /// not all stages are present
  Partial,
  /// complete, without a release
  User,
  /// complete and released
  Release,
}

impl SetType {
  pub fn from_bits(bits : u32) -> Self {
    match bits & 3 {
      1 => SetType::Partial,
      2 => SetType::User,
      3 => SetType::Release,
      _ => SetType::Undefined,
    }
  }

  pub fn bits(&self) -> u32 {
    match self {
      SetType::Undefined => 0,
      SetType::Partial   => 1,
      SetType::User      => 2,
      SetType::Release   => 3,
    }
  }
}

impl fmt::Display for SetType {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      SetType::Undefined => "undefined",
      SetType::Partial   => "partial",
      SetType::User      => "user",
      SetType::Release   => "release",
    };
    write!(f, "{}", repr)
  }
}

/// The loadable parts of a module
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Stage {
  /// system (communications) FPGA
  Comms,
  /// signal processing FPGA
  Fippi,
  Dsp,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let repr = match self {
      Stage::Comms => "comms",
      Stage::Fippi => "fippi",
      Stage::Dsp   => "dsp",
    };
    write!(f, "{}", repr)
  }
}

/// Which stages a boot loads
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct BootPattern {
  pub comms : bool,
  pub fippi : bool,
  pub dsp   : bool,
}

impl BootPattern {
  pub const ALL : BootPattern = BootPattern { comms : true, fippi : true, dsp : true };

  /// bit 0 comms, bit 1 fippi, bit 2 dsp
  pub fn from_bits(bits : u32) -> Self {
    Self {
      comms : bits & 1 != 0,
      fippi : bits & 2 != 0,
      dsp   : bits & 4 != 0,
    }
  }

  pub fn from_stages(stages : &[Stage]) -> Self {
    let mut pattern = Self::default();
    for stage in stages {
      match stage {
        Stage::Comms => pattern.comms = true,
        Stage::Fippi => pattern.fippi = true,
        Stage::Dsp   => pattern.dsp   = true,
      }
    }
    pattern
  }

  pub fn bits(&self) -> u32 {
    (self.comms as u32) | (self.fippi as u32) << 1 | (self.dsp as u32) << 2
  }

  pub fn empty(&self) -> bool {
    !(self.comms || self.fippi || self.dsp)
  }

  pub fn all(&self) -> bool {
    self.comms && self.fippi && self.dsp
  }
}

impl fmt::Display for BootPattern {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "<BootPattern: comms={} fippi={} dsp={}>", self.comms, self.fippi, self.dsp)
  }
}

/// One firmware image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firmware {
  pub name  : String,
  pub image : Vec<u8>,
  /// CRC recorded for a released image
  pub crc   : Option<u32>,
}

impl Firmware {
  pub fn new(name : &str, image : Vec<u8>) -> Self {
    Self {
      name  : String::from(name),
      image,
      crc   : None,
    }
  }

  /// Create a firmware and record the CRC of its image
  pub fn released(name : &str, image : Vec<u8>) -> Self {
    let crc = CRC32.checksum(&image);
    Self {
      name  : String::from(name),
      image,
      crc   : Some(crc),
    }
  }

  pub fn from_file(name : &str, filename : &str, crc : Option<u32>) -> Result<Self, PixieError> {
    let mut image = Vec::<u8>::new();
    match File::open(filename) {
      Err(err) => {
        return Err(PixieError::new(ErrorCode::FileReadFailure,
                                   format!("firmware: {}: {}", filename, err)));
      }
      Ok(mut file) => {
        match file.read_to_end(&mut image) {
          Err(err) => {
            return Err(PixieError::new(ErrorCode::FileReadFailure,
                                       format!("firmware: {}: {}", filename, err)));
          }
          Ok(size) => debug!("Read {} bytes from {}", size, filename)
        }
      }
    }
    Ok(Self {
      name  : String::from(name),
      image,
      crc,
    })
  }

  pub fn checksum(&self) -> u32 {
    CRC32.checksum(&self.image)
  }

  /// Does the image match its recorded CRC?
  pub fn valid(&self) -> bool {
    match self.crc {
      None      => false,
      Some(crc) => crc == self.checksum(),
    }
  }

  /// The image as bus words, little endian, the tail padded with 0
  pub fn words(&self) -> Vec<u32> {
    self.image
      .chunks(4)
      .map(|chunk| {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        u32::from_le_bytes(bytes)
      })
      .collect()
  }
}

/// The firmware a module is booted with
#[derive(Debug, Clone, Default)]
pub struct FirmwareSet {
  pub release      : Release,
  pub release_date : String,
  pub comms        : Option<Firmware>,
  pub fippi        : Option<Firmware>,
  pub dsp          : Option<Firmware>,
  /// DSP variable file, `<hex address> <name>` per line
  pub var          : Option<Firmware>,
}

impl FirmwareSet {
  pub fn new(release : Release) -> Self {
    Self {
      release,
      ..Default::default()
    }
  }

  pub fn get(&self, stage : Stage) -> Option<&Firmware> {
    match stage {
      Stage::Comms => self.comms.as_ref(),
      Stage::Fippi => self.fippi.as_ref(),
      Stage::Dsp   => self.dsp.as_ref(),
    }
  }

  pub fn set_type(&self) -> SetType {
    let have = [self.comms.is_some(), self.fippi.is_some(), self.dsp.is_some(), self.var.is_some()];
    if !have.iter().any(|x| *x) {
      SetType::Undefined
    } else if !have.iter().all(|x| *x) {
      SetType::Partial
    } else if self.release.released() {
      SetType::Release
    } else {
      SetType::User
    }
  }

  /// The image for a stage, an error if the set does not have it
  pub fn image(&self, stage : Stage) -> Result<&Firmware, PixieError> {
    match self.get(stage) {
      Some(fw) => Ok(fw),
      None => Err(PixieError::new(ErrorCode::ModuleInvalidFirmware,
                                  format!("firmware set {} has no {} image", self.release, stage))),
    }
  }

  /// CRC over the stage images in load order
  pub fn crc(&self) -> Result<u32, PixieError> {
    let mut digest = CRC32.digest();
    for stage in [Stage::Comms, Stage::Fippi, Stage::Dsp] {
      digest.update(&self.image(stage)?.image);
    }
    Ok(digest.finalize())
  }

  /// Check the recorded CRC of the images for the stages
  pub fn validate(&self, pattern : &BootPattern) -> Result<(), PixieError> {
    let stages = [(pattern.comms, Stage::Comms),
                  (pattern.fippi, Stage::Fippi),
                  (pattern.dsp,   Stage::Dsp)];
    for (wanted, stage) in stages {
      if wanted && !self.image(stage)?.valid() {
        return Err(PixieError::new(ErrorCode::ModuleInvalidFirmware,
                                   "Firmware CRCs do not match"));
      }
    }
    Ok(())
  }
}

impl fmt::Display for FirmwareSet {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let mut repr = format!("<FirmwareSet: {} ({})", self.release, self.set_type());
    for (label, fw) in [("comms", &self.comms), ("fippi", &self.fippi),
                        ("dsp", &self.dsp), ("var", &self.var)] {
      match fw {
        None     => repr += &(format!("\n  {:<5} : --", label)),
        Some(fw) => repr += &(format!("\n  {:<5} : {} ({} bytes, crc {:#010x})",
                                      label, fw.name, fw.image.len(), fw.checksum())),
      }
    }
    write!(f, "{}>", repr)
  }
}

#[cfg(test)]
mod test_firmware {
  use super::*;

  #[test]
  fn release_parse_and_format() {
    let release = Release::parse("3.4.1-rc2").unwrap();
    assert_eq!(release.major, 3);
    assert_eq!(release.minor, 4);
    assert_eq!(release.patch, 1);
    assert_eq!(release.prerelease_kind, PrereleaseKind::Rc);
    assert_eq!(release.prerelease_number, Some(2));
    assert_eq!(release.to_string(), "3.4.1-rc2");
    assert_eq!(Release::parse("1.0.0").unwrap().to_string(), "1.0.0");
    assert!(Release::parse("1.0").is_err());
    assert!(Release::parse("1.0.0-gamma1").is_err());
    assert!(!Release::not_released().released());
  }

  #[test]
  fn image_words_are_little_endian() {
    let fw = Firmware::new("t", vec![1, 2, 3, 4, 5]);
    assert_eq!(fw.words(), vec![0x04030201, 0x00000005]);
  }

  #[test]
  fn boot_pattern_bits() {
    let pattern = BootPattern::from_bits(0b101);
    assert!(pattern.comms && !pattern.fippi && pattern.dsp);
    assert_eq!(pattern.bits(), 0b101);
    assert!(BootPattern::from_bits(0).empty());
    assert!(BootPattern::from_stages(&[Stage::Dsp, Stage::Fippi, Stage::Comms]).all());
  }

  #[test]
  fn set_type_and_validation() {
    let mut set = FirmwareSet::new(Release::new(1, 2, 3));
    assert_eq!(set.set_type(), SetType::Undefined);
    set.comms = Some(Firmware::released("sys", vec![1; 16]));
    assert_eq!(set.set_type(), SetType::Partial);
    set.fippi = Some(Firmware::released("fippi", vec![2; 16]));
    set.dsp   = Some(Firmware::released("dsp", vec![3; 16]));
    set.var   = Some(Firmware::new("var", vec![]));
    assert_eq!(set.set_type(), SetType::Release);
    assert!(set.validate(&BootPattern::ALL).is_ok());
    set.dsp.as_mut().unwrap().image[0] = 0xff;
    let err = set.validate(&BootPattern::ALL).unwrap_err();
    assert_eq!(err.what, "Firmware CRCs do not match");
    set.release = Release::not_released();
    assert_eq!(set.set_type(), SetType::User);
  }
}

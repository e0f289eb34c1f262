//! Roles shared by the modules of a crate
//!
//! The modules of a crate are wired together by the backplane. A
//! few signals need exactly one module to drive them:
//!
//! * wired-or triggers pull-up
//! * run (synchronous start/stop) leader
//! * director (clock and trigger distribution)
//!
//! A role is held by at most one slot. Modules in synch wait mode
//! are counted so a synchronized run is only started when every
//! module is waiting and a run leader exists.

use std::fmt;
use std::sync::atomic::{AtomicUsize,
                        Ordering};
use std::sync::{Mutex,
                MutexGuard};

use crate::errors::{ErrorCode,
                    PixieError};
use crate::registers::MAX_SLOTS;

const RELEASED : usize = usize::MAX;

/// A role exclusively held by one slot
#[derive(Debug)]
pub struct Role {
  pub label : &'static str,
  leader    : AtomicUsize,
}

impl Role {
  pub fn new(label : &'static str) -> Self {
    Self {
      label,
      leader : AtomicUsize::new(RELEASED),
    }
  }

  /// Take the role. Asking again from the holder succeeds.
  pub fn request(&self, slot : usize) -> bool {
    match self.leader.compare_exchange(RELEASED, slot, Ordering::SeqCst, Ordering::SeqCst) {
      Ok(_) => {
        info!("backplane: {}: leader: slot={}", self.label, slot);
        true
      }
      Err(holder) => holder == slot,
    }
  }

  /// Give the role up, only the holder can
  pub fn release(&self, slot : usize) -> bool {
    let released = self.leader
      .compare_exchange(slot, RELEASED, Ordering::SeqCst, Ordering::SeqCst)
      .is_ok();
    if released {
      info!("backplane: {}: released: slot={}", self.label, slot);
    }
    released
  }

  pub fn holder(&self) -> Option<usize> {
    match self.leader.load(Ordering::SeqCst) {
      RELEASED => None,
      slot     => Some(slot),
    }
  }

  pub fn has_leader(&self) -> bool {
    self.holder().is_some()
  }

  pub fn is_leader(&self, slot : usize) -> bool {
    self.holder() == Some(slot)
  }

  /// Someone else holds the role
  pub fn not_leader(&self, slot : usize) -> bool {
    self.has_leader() && !self.is_leader(slot)
  }
}

#[derive(Debug)]
pub struct Backplane {
  pub wired_or_triggers_pullup : Role,
  pub run                      : Role,
  pub director                 : Role,
  num_slots_present            : AtomicUsize,
  sync_waits                   : AtomicUsize,
  sync_waiters                 : Mutex<Vec<bool>>,
}

impl Default for Backplane {
  fn default() -> Self {
    Self::new()
  }
}

impl Backplane {
  pub fn new() -> Self {
    Self {
      wired_or_triggers_pullup : Role::new("wired-or-triggers"),
      run                      : Role::new("run"),
      director                 : Role::new("director"),
      num_slots_present        : AtomicUsize::new(0),
      sync_waits               : AtomicUsize::new(0),
      sync_waiters             : Mutex::new(vec![false; MAX_SLOTS + 1]),
    }
  }

  fn waiters(&self) -> MutexGuard<'_, Vec<bool>> {
    match self.sync_waiters.lock() {
      Ok(g)         => g,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// Reset the synch wait accounting for the number of modules
  /// in the crate
  pub fn init(&self, num_present : usize) {
    let mut waiters = self.waiters();
    waiters.iter_mut().for_each(|w| *w = false);
    self.sync_waits.store(0, Ordering::SeqCst);
    self.num_slots_present.store(num_present, Ordering::SeqCst);
  }

  /// Record the `SynchWait` value of the module in a slot
  pub fn sync_wait(&self, slot : usize, synch_wait : u32) -> Result<(), PixieError> {
    let active = synch_wait == 1;
    let mut waiters = self.waiters();
    if slot >= waiters.len() {
      return Err(PixieError::new(ErrorCode::InternalFailure,
                                 format!("backplane: invalid slot: {}", slot)));
    }
    if waiters[slot] == active {
      return Ok(());
    }
    if active {
      self.sync_waits.fetch_add(1, Ordering::SeqCst);
    } else if self.sync_waits.load(Ordering::SeqCst) > 0 {
      // a module never waiting writing 0 must not underflow
      self.sync_waits.fetch_sub(1, Ordering::SeqCst);
    }
    waiters[slot] = active;
    let waits = self.sync_waits.load(Ordering::SeqCst);
    if waits > self.num_slots_present.load(Ordering::SeqCst) {
      return Err(PixieError::new(ErrorCode::InternalFailure,
                                 format!("slot: {}: invalid backplane sync_wait value: {}", slot, waits)));
    }
    Ok(())
  }

  /// Can a run be started? Either no module waits or all do and
  /// there is a run leader.
  pub fn sync_wait_valid(&self) -> Result<(), PixieError> {
    let waits   = self.sync_waits.load(Ordering::SeqCst);
    let present = self.num_slots_present.load(Ordering::SeqCst);
    if waits != 0 && waits != present {
      return Err(PixieError::new(ErrorCode::ModuleInvalidOperation,
                                 format!("sync wait mode enabled and not all slots in the sync wait state: {} of {} waiting",
                                         waits, present)));
    }
    if waits != 0 && !self.run.has_leader() {
      return Err(PixieError::new(ErrorCode::ModuleInvalidOperation,
                                 "sync wait mode enabled but no run leader slot is assigned"));
    }
    Ok(())
  }

  pub fn sync_waits(&self) -> usize {
    self.sync_waits.load(Ordering::SeqCst)
  }

  pub fn sync_waiting(&self, slot : usize) -> bool {
    self.waiters().get(slot).copied().unwrap_or(false)
  }

  /// A module going offline stops waiting and gives up its roles
  pub fn offline(&self, slot : usize) {
    {
      let mut waiters = self.waiters();
      if slot < waiters.len() {
        if waiters[slot] && self.sync_waits.load(Ordering::SeqCst) > 0 {
          self.sync_waits.fetch_sub(1, Ordering::SeqCst);
        }
        waiters[slot] = false;
      }
    }
    self.wired_or_triggers_pullup.release(slot);
    self.run.release(slot);
    self.director.release(slot);
  }
}

impl fmt::Display for Backplane {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let holder = |role : &Role| match role.holder() {
      None       => String::from("--"),
      Some(slot) => slot.to_string(),
    };
    let mut repr = String::from("<Backplane:");
    repr += &(format!("\n  pullup     : {}", holder(&self.wired_or_triggers_pullup)));
    repr += &(format!("\n  run        : {}", holder(&self.run)));
    repr += &(format!("\n  director   : {}", holder(&self.director)));
    repr += &(format!("\n  sync waits : {} of {}>",
                      self.sync_waits(), self.num_slots_present.load(Ordering::SeqCst)));
    write!(f, "{}", repr)
  }
}

#[cfg(test)]
mod test_backplane {
  use super::*;

  #[test]
  fn role_is_exclusive() {
    let role = Role::new("run");
    assert!(!role.has_leader());
    assert!(role.request(2));
    assert!(role.request(2));
    assert!(!role.request(3));
    assert!(role.not_leader(3));
    assert!(!role.release(3));
    assert!(role.release(2));
    assert!(role.request(3));
    assert_eq!(role.holder(), Some(3));
  }

  #[test]
  fn sync_wait_accounting() {
    let bp = Backplane::new();
    bp.init(2);
    assert!(bp.sync_wait_valid().is_ok());
    bp.sync_wait(2, 1).unwrap();
    assert!(bp.sync_wait_valid().is_err());
    bp.sync_wait(3, 1).unwrap();
    // all waiting but nobody leads
    let err = bp.sync_wait_valid().unwrap_err();
    assert_eq!(err.code, ErrorCode::ModuleInvalidOperation);
    assert!(bp.run.request(2));
    assert!(bp.sync_wait_valid().is_ok());
    bp.sync_wait(4, 0).unwrap();
    assert_eq!(bp.sync_waits(), 2);
    bp.offline(2);
    assert_eq!(bp.sync_waits(), 1);
    assert!(!bp.run.has_leader());
  }

  #[test]
  fn zero_without_waiting_does_not_underflow() {
    let bp = Backplane::new();
    bp.init(1);
    bp.sync_wait(5, 0).unwrap();
    assert_eq!(bp.sync_waits(), 0);
  }
}

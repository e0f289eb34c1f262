//! Host side control of Pixie-16 digitizer modules
//!
//! * `module`   - open, boot, variables, runs and list mode reads
//! * `chassis`  - the modules of a crate and their shared backplane
//! * `threads`  - the FIFO worker moving list mode data to the host
//! * `sim`      - a module in memory, for tests and dry runs

pub mod registers;
pub mod memory;
pub mod bus;
pub mod errors;
pub mod control;
pub mod fpga;
pub mod firmware;
pub mod mailbox;
pub mod param;
pub mod fixture;
pub mod backplane;
pub mod buffer;
pub mod stats;
pub mod run;
pub mod threads;
pub mod module;
pub mod chassis;
pub mod settings;
pub mod sim;

extern crate crossbeam_channel;

#[macro_use] extern crate log;

pub use errors::{ErrorCode,
                 PixieError};
pub use module::Module;
pub use chassis::Chassis;

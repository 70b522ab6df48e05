//! # Touch-panel factory command engine
//!
//! Factory diagnostics for MMS134S-class capacitive touch controllers. A
//! technician writes a short text command to the `cmd` attribute, the
//! engine runs it against the controller and the outcome is read back from
//! `cmd_status` and `cmd_result`.
//!
//! ## Features
//!
//! - **Test-mode state machine**: enter/exit handshake with guaranteed exit
//!   and interrupt restore, even when acquisition fails
//! - **Node acquisition**: per-node CM delta, CM abs and raw intensity reads
//!   assembled into a [`NodeMatrix`]
//! - **Single in-flight command**: status, result text and busy flag behind
//!   one lock
//! - **Bounded buffers**: fixed-size command line and result text
//! - **Hardware seam**: `embedded-hal` 1.0 adapters plus a simulated panel
//!
//! ## Quick Start
//!
//! ```rust
//! use tspfac::config::FactoryConfig;
//! use tspfac::sim::{MemoryFirmware, SimFlasher, SimPanel};
//! use tspfac::FactoryEngine;
//!
//! let panel = SimPanel::with_nodes(4, 3, 2).unwrap();
//! let device = panel.bring_up(&FactoryConfig::default()).unwrap();
//! let mut engine = FactoryEngine::new(
//!     device,
//!     Box::new(MemoryFirmware::default()),
//!     Box::new(SimFlasher::new(&panel)),
//! );
//!
//! engine.store_cmd("get_x_num").unwrap();
//! assert_eq!(engine.show_status(), "OK\n");
//! assert_eq!(engine.show_result(), "get_x_num:4");
//! ```
//!
//! ## Architecture
//!
//! - [`bus`] - register bus, ready line and interrupt seams
//! - [`test_mode`] - test-mode session and interrupt suspension guards
//! - [`acquire`] - per-node data acquisition
//! - [`registry`] - command table and command-line parsing
//! - [`run_state`] - status and result of the in-flight command
//! - [`executor`] - command handlers
//! - [`attr`] - `cmd` / `cmd_status` / `cmd_result` surface
//! - [`sim`] - simulated panel

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod acquire;
pub mod attr;
pub mod bus;
pub mod config;
pub mod device;
pub mod error;
pub mod executor;
pub mod firmware;
pub mod geometry;
pub mod registry;
pub mod regs;
pub mod run_state;
pub mod sim;
pub mod test_mode;

pub use acquire::{DataFamily, NodeMatrix};
pub use device::FactoryDevice;
pub use error::{DeviceError, DeviceResult};
pub use executor::FactoryEngine;
pub use run_state::{CmdStatus, RunState};

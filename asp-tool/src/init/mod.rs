// SPDX-License-Identifier: MIT

//! The Init Interpreter (spec §4.2): `.rc` grammar parsing (`parser`) and
//! the staged boot event loop that mutates the VFS and Property Store
//! (`boot`).

pub mod boot;
pub mod parser;

pub use boot::{Boot, Fstab, FstabEntry};
pub use parser::{ActionStmt, Command, RcFile, ServiceStmt, Trigger};

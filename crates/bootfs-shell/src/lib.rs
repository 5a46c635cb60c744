//! Command surface for the bootfs filesystem dispatch core.
//!
//! [`Shell`] owns a [`bootfs_kernel::Fs`] context, simulated RAM and an
//! environment, and runs U-Boot style commands (`load`, `ls`, `save`, ...)
//! against them.

pub mod cmd;
pub mod env;
pub mod shell;

pub use cmd::{COMMANDS, Command};
pub use env::Env;
pub use shell::{CmdRet, Shell};

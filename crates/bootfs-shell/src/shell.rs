//! Command interpreter.

use std::io::{BufRead, Write};

use bootfs_kernel::config::{BootfsConfig, ConfigError};
use bootfs_kernel::{Fs, Lmb, SysMem};
use tracing::debug;

use crate::cmd;
use crate::env::Env;

/// Outcome of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdRet {
    Success,
    Failure,
    /// Bad arguments; the usage line has been printed.
    Usage,
}

impl CmdRet {
    pub fn is_success(self) -> bool {
        self == CmdRet::Success
    }
}

/// Everything the commands operate on.
pub struct Shell {
    pub(crate) fs: Fs,
    pub(crate) mem: SysMem,
    pub(crate) lmb: Lmb,
    pub(crate) env: Env,
    pub(crate) load_addr: u64,
    pub(crate) out: Box<dyn Write>,
}

impl Shell {
    /// Assemble a shell from parts.
    pub fn new(fs: Fs, mem: SysMem, lmb: Lmb, load_addr: u64, out: Box<dyn Write>) -> Self {
        Self {
            fs,
            mem,
            lmb,
            env: Env::new(),
            load_addr,
            out,
        }
    }

    /// Build the filesystem, devices and memory described by `config`.
    pub fn from_config(config: &BootfsConfig, out: Box<dyn Write>) -> Result<Self, ConfigError> {
        let table = config.build_table()?;
        let registry = config.build_registry()?;
        debug!(backends = ?table.names(), "filesystem table ready");
        Ok(Self::new(
            Fs::new(table, registry),
            config.build_memory(),
            config.build_lmb(),
            config.memory.load_addr,
            out,
        ))
    }

    pub fn fs(&mut self) -> &mut Fs {
        &mut self.fs
    }

    pub fn mem(&mut self) -> &mut SysMem {
        &mut self.mem
    }

    pub fn lmb(&mut self) -> &mut Lmb {
        &mut self.lmb
    }

    pub fn env(&mut self) -> &mut Env {
        &mut self.env
    }

    /// Run one already-split command.
    pub fn run_argv(&mut self, argv: &[&str]) -> CmdRet {
        let Some(&name) = argv.first() else {
            return CmdRet::Success;
        };
        let Some(command) = cmd::find(name) else {
            let _ = writeln!(self.out, "Unknown command '{name}' - try 'help'");
            return CmdRet::Failure;
        };

        debug!(command = name, args = argv.len() - 1, "running");
        let ret = (command.run)(self, argv);
        if ret == CmdRet::Usage {
            let _ = writeln!(self.out, "Usage:\n{} {}", command.name, command.usage);
        }
        ret
    }

    /// Run a command line.
    ///
    /// `;` separates commands, `#` starts a comment and `$name` /
    /// `${name}` expand environment variables. Returns the status of the
    /// last command run.
    pub fn run_line(&mut self, line: &str) -> CmdRet {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };

        let mut ret = CmdRet::Success;
        for stmt in line.split(';') {
            let words: Vec<String> = stmt
                .split_whitespace()
                .map(|w| self.env.expand(w))
                .collect();
            if words.is_empty() {
                continue;
            }
            let argv: Vec<&str> = words.iter().map(String::as_str).collect();
            ret = self.run_argv(&argv);
        }
        ret
    }

    /// Run every line of `input`, returning how many lines failed.
    ///
    /// With `prompt` set, `=> ` is printed before each line is read.
    pub fn run_script(&mut self, input: impl BufRead, prompt: bool) -> std::io::Result<usize> {
        let mut failures = 0;
        let mut lines = input.lines();
        loop {
            if prompt {
                write!(self.out, "=> ")?;
                self.out.flush()?;
            }
            let Some(line) = lines.next() else {
                break;
            };
            if !self.run_line(&line?).is_success() {
                failures += 1;
            }
        }
        if prompt {
            writeln!(self.out)?;
        }
        self.out.flush()?;
        Ok(failures)
    }
}

//! Commands.
//!
//! The filesystem commands take the same leading arguments,
//! `<interface> [<dev[:part]>]`, bind them, and run one filesystem
//! operation. Numbers (addresses, byte counts, offsets) are hexadecimal.

use std::io::Write;
use std::time::Instant;

use bootfs_kernel::{AddressSpace, FsError, FsType};
use tracing::error;

use crate::env::parse_hex;
use crate::shell::{CmdRet, Shell};

/// Command handler.
pub type CmdFn = fn(&mut Shell, &[&str]) -> CmdRet;

/// One entry of the command table.
pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub run: CmdFn,
}

macro_rules! say {
    ($sh:expr, $($arg:tt)*) => {{
        let _ = writeln!($sh.out, $($arg)*);
    }};
}

/// All commands, in `help` order.
pub static COMMANDS: &[Command] = &[
    Command {
        name: "fstype",
        usage: "<interface> <dev>:<part> [<varname>]",
        help: "Look up a filesystem type",
        run: |sh, argv| do_fstype(sh, argv),
    },
    Command {
        name: "fstypes",
        usage: "",
        help: "List supported filesystem types",
        run: |sh, _| do_fstypes(sh),
    },
    Command {
        name: "fsuuid",
        usage: "<interface> <dev>:<part> [<varname>]",
        help: "Look up a filesystem UUID",
        run: |sh, argv| do_fsuuid(sh, argv, FsType::Any),
    },
    Command {
        name: "help",
        usage: "[command]",
        help: "Print command description/usage",
        run: do_help,
    },
    Command {
        name: "ln",
        usage: "<interface> <dev[:part]> target linkname",
        help: "Create a symbolic link",
        run: |sh, argv| do_ln(sh, argv, FsType::Any),
    },
    Command {
        name: "load",
        usage: "<interface> [<dev[:part]> [<addr> [<filename> [bytes [pos]]]]]",
        help: "Load binary file from a filesystem",
        run: |sh, argv| do_load(sh, argv, FsType::Any),
    },
    Command {
        name: "ls",
        usage: "<interface> [<dev[:part]> [directory]]",
        help: "List files in a directory (default /)",
        run: |sh, argv| do_ls(sh, argv, FsType::Any),
    },
    Command {
        name: "md.b",
        usage: "<addr> [count]",
        help: "Memory display (bytes)",
        run: do_md,
    },
    Command {
        name: "mkdir",
        usage: "<interface> <dev[:part]> <directory>",
        help: "Create a directory",
        run: |sh, argv| do_mkdir(sh, argv, FsType::Any),
    },
    Command {
        name: "mv",
        usage: "<interface> <dev[:part]> <old_path> <new_path>",
        help: "Rename/move a file or directory",
        run: |sh, argv| do_mv(sh, argv, FsType::Any),
    },
    Command {
        name: "mw.b",
        usage: "<addr> <value> [count]",
        help: "Memory write (fill, bytes)",
        run: do_mw,
    },
    Command {
        name: "printenv",
        usage: "[name ...]",
        help: "Print environment variables",
        run: do_printenv,
    },
    Command {
        name: "rm",
        usage: "<interface> <dev[:part]> <filename>",
        help: "Delete a file",
        run: |sh, argv| do_rm(sh, argv, FsType::Any),
    },
    Command {
        name: "save",
        usage: "<interface> <dev[:part]> <addr> <filename> bytes [pos]",
        help: "Save a file to a filesystem",
        run: |sh, argv| do_save(sh, argv, FsType::Any),
    },
    Command {
        name: "setenv",
        usage: "name [value ...]",
        help: "Set or delete an environment variable",
        run: do_setenv,
    },
    Command {
        name: "size",
        usage: "<interface> <dev[:part]> <filename>",
        help: "Determine a file's size",
        run: |sh, argv| do_size(sh, argv, FsType::Any),
    },
];

/// Look up a command by name.
pub fn find(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name == name)
}

/// Human-readable size, e.g. `1.5 MiB`.
pub fn format_size(size: u64) -> String {
    const UNITS: [(u32, &str); 6] = [
        (60, "EiB"),
        (50, "PiB"),
        (40, "TiB"),
        (30, "GiB"),
        (20, "MiB"),
        (10, "KiB"),
    ];
    for (shift, unit) in UNITS {
        let whole = size >> shift;
        if whole == 0 {
            continue;
        }
        let rem = size - (whole << shift);
        // One decimal, rounded to nearest
        let mut whole = whole;
        let mut tenth = ((rem as u128 * 10 + (1u128 << (shift - 1))) >> shift) as u64;
        if tenth >= 10 {
            whole += 1;
            tenth -= 10;
        }
        return if tenth > 0 {
            format!("{whole}.{tenth} {unit}")
        } else {
            format!("{whole} {unit}")
        };
    }
    format!("{size} Bytes")
}

fn transfer_summary(bytes: u64, started: Instant, verb: &str) -> String {
    let ms = started.elapsed().as_millis() as u64;
    let mut line = format!("{bytes} bytes {verb} in {ms} ms");
    if ms > 0 {
        line.push_str(&format!(" ({}/s)", format_size(bytes / ms * 1000)));
    }
    line
}

fn report(sh: &mut Shell, e: &FsError) {
    // Probing already logged this one
    if !matches!(e, FsError::Unrecognized) {
        say!(sh, "** {e} **");
    }
}

/// Bind `<interface> [<dev[:part]>]`, printing the failure if any.
fn bind(sh: &mut Shell, ifname: &str, dev_part: Option<&str>, fstype: FsType) -> bool {
    match sh.fs.set_blk_dev(ifname, dev_part, fstype) {
        Ok(()) => true,
        Err(e) => {
            report(sh, &e);
            false
        }
    }
}

fn finish(sh: &mut Shell, ret: Result<(), FsError>) -> CmdRet {
    match ret {
        Ok(()) => CmdRet::Success,
        Err(e) => {
            report(sh, &e);
            CmdRet::Failure
        }
    }
}

// ============================================================================
// Filesystem commands
// ============================================================================

/// `load <if> [<dev[:part]> [<addr> [<filename> [bytes [pos]]]]]`
pub fn do_load(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() < 2 || argv.len() > 7 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], argv.get(2).copied(), fstype) {
        return CmdRet::Failure;
    }

    let addr = match argv.get(3) {
        Some(s) => match parse_hex(s) {
            Some(a) => a,
            None => {
                sh.fs.close();
                return CmdRet::Usage;
            }
        },
        None => sh.env.get_hex("loadaddr").unwrap_or(sh.load_addr),
    };

    let filename = match argv.get(4) {
        Some(f) => f.to_string(),
        None => match sh.env.get("bootfile") {
            Some(f) => f.to_string(),
            None => {
                sh.fs.close();
                say!(sh, "** No boot file defined **");
                return CmdRet::Failure;
            }
        },
    };

    let Some(bytes) = argv.get(5).map_or(Some(0), |s| parse_hex(s)) else {
        sh.fs.close();
        return CmdRet::Usage;
    };
    let Some(pos) = argv.get(6).map_or(Some(0), |s| parse_hex(s)) else {
        sh.fs.close();
        return CmdRet::Usage;
    };

    let started = Instant::now();
    let len_read = match sh
        .fs
        .read_checked(&filename, &mut sh.mem, &sh.lmb, addr, pos, bytes)
    {
        Ok(n) => n,
        Err(e) => {
            error!(filename, "Failed to load: {e}");
            say!(sh, "Failed to load '{filename}'");
            return CmdRet::Failure;
        }
    };

    say!(sh, "{}", transfer_summary(len_read, started, "read"));
    sh.env.set_hex("fileaddr", addr);
    sh.env.set_hex("filesize", len_read);
    CmdRet::Success
}

/// `save <if> <dev[:part]> <addr> <filename> bytes [pos]`
pub fn do_save(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() < 6 || argv.len() > 7 {
        return CmdRet::Usage;
    }
    let (Some(addr), Some(bytes)) = (parse_hex(argv[3]), parse_hex(argv[5])) else {
        return CmdRet::Usage;
    };
    let Some(pos) = argv.get(6).map_or(Some(0), |s| parse_hex(s)) else {
        return CmdRet::Usage;
    };
    if !bind(sh, argv[1], Some(argv[2]), fstype) {
        return CmdRet::Failure;
    }

    let started = Instant::now();
    match sh.fs.write(argv[4], &sh.mem, addr, pos, bytes) {
        Ok(written) => {
            say!(sh, "{}", transfer_summary(written, started, "written"));
            CmdRet::Success
        }
        Err(e) => {
            report(sh, &e);
            CmdRet::Failure
        }
    }
}

/// `ls <if> [<dev[:part]> [directory]]`
pub fn do_ls(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() < 2 || argv.len() > 4 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], argv.get(2).copied(), fstype) {
        return CmdRet::Failure;
    }
    let dir = argv.get(3).copied().unwrap_or("/");
    let ret = sh.fs.ls(dir, &mut sh.out);
    finish(sh, ret)
}

/// `size <if> <dev[:part]> <filename>`; sets `filesize`.
pub fn do_size(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() != 4 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], Some(argv[2]), fstype) {
        return CmdRet::Failure;
    }
    match sh.fs.size(argv[3]) {
        Ok(size) => {
            sh.env.set_hex("filesize", size);
            CmdRet::Success
        }
        Err(e) => finish(sh, Err(e)),
    }
}

/// `fstype <if> <dev:part> [varname]`
pub fn do_fstype(sh: &mut Shell, argv: &[&str]) -> CmdRet {
    if argv.len() < 3 || argv.len() > 4 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], Some(argv[2]), FsType::Any) {
        return CmdRet::Failure;
    }
    let name = sh.fs.get_type_name().to_string();
    sh.fs.close();
    match argv.get(3) {
        Some(var) => sh.env.set(*var, name),
        None => say!(sh, "{name}"),
    }
    CmdRet::Success
}

/// `fstypes`
pub fn do_fstypes(sh: &mut Shell) -> CmdRet {
    let names = sh.fs.table().names();
    let mut line = String::from("Supported filesystems");
    for (i, name) in names.iter().enumerate() {
        line.push(if i == 0 { ':' } else { ',' });
        line.push(' ');
        line.push_str(name);
    }
    say!(sh, "{line}");
    CmdRet::Success
}

/// `fsuuid <if> <dev:part> [varname]`
pub fn do_fsuuid(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() < 3 || argv.len() > 4 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], Some(argv[2]), fstype) {
        return CmdRet::Failure;
    }
    match sh.fs.uuid() {
        Ok(uuid) => {
            match argv.get(3) {
                Some(var) => sh.env.set(*var, uuid),
                None => say!(sh, "{uuid}"),
            }
            CmdRet::Success
        }
        Err(e) => finish(sh, Err(e)),
    }
}

/// `ln <if> <dev[:part]> target linkname`
pub fn do_ln(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() != 5 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], Some(argv[2]), fstype) {
        return CmdRet::Failure;
    }
    let ret = sh.fs.ln(argv[4], argv[3]);
    finish(sh, ret)
}

/// `mv <if> <dev[:part]> <old_path> <new_path>`
pub fn do_mv(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() != 5 {
        return CmdRet::Usage;
    }
    let ret = sh.fs.mv(argv[1], Some(argv[2]), fstype, argv[3], argv[4]);
    finish(sh, ret)
}

/// `mkdir <if> <dev[:part]> <directory>`
pub fn do_mkdir(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() != 4 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], Some(argv[2]), fstype) {
        return CmdRet::Failure;
    }
    if let Err(e) = sh.fs.mkdir(argv[3]) {
        say!(sh, "** Unable to make a directory \"{}\": {e} **", argv[3]);
        return CmdRet::Failure;
    }
    CmdRet::Success
}

/// `rm <if> <dev[:part]> <filename>`
pub fn do_rm(sh: &mut Shell, argv: &[&str], fstype: FsType) -> CmdRet {
    if argv.len() != 4 {
        return CmdRet::Usage;
    }
    if !bind(sh, argv[1], Some(argv[2]), fstype) {
        return CmdRet::Failure;
    }
    let ret = sh.fs.unlink(argv[3]);
    finish(sh, ret)
}

// ============================================================================
// Environment and memory
// ============================================================================

fn do_setenv(sh: &mut Shell, argv: &[&str]) -> CmdRet {
    match argv {
        [_] => CmdRet::Usage,
        [_, name] => {
            sh.env.unset(name);
            CmdRet::Success
        }
        [_, name, value @ ..] => {
            sh.env.set(*name, value.join(" "));
            CmdRet::Success
        }
        [] => CmdRet::Usage,
    }
}

fn do_printenv(sh: &mut Shell, argv: &[&str]) -> CmdRet {
    if argv.len() == 1 {
        let lines: Vec<String> = sh.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        for line in &lines {
            say!(sh, "{line}");
        }
        return CmdRet::Success;
    }

    let mut ret = CmdRet::Success;
    for name in &argv[1..] {
        match sh.env.get(name).map(str::to_string) {
            Some(value) => say!(sh, "{name}={value}"),
            None => {
                say!(sh, "## Error: \"{name}\" not defined");
                ret = CmdRet::Failure;
            }
        }
    }
    ret
}

fn do_md(sh: &mut Shell, argv: &[&str]) -> CmdRet {
    if argv.len() < 2 || argv.len() > 3 {
        return CmdRet::Usage;
    }
    let (Some(addr), Some(count)) = (
        parse_hex(argv[1]),
        argv.get(2).map_or(Some(0x40), |s| parse_hex(s)),
    ) else {
        return CmdRet::Usage;
    };

    let data = match sh.mem.map_ro(addr, count) {
        Ok(data) => data,
        Err(e) => {
            say!(sh, "** {e} **");
            return CmdRet::Failure;
        }
    };
    for (i, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        let _ = writeln!(
            sh.out,
            "{:08x}: {:<47}    {ascii}",
            addr + i as u64 * 16,
            hex.join(" ")
        );
    }
    CmdRet::Success
}

fn do_mw(sh: &mut Shell, argv: &[&str]) -> CmdRet {
    if argv.len() < 3 || argv.len() > 4 {
        return CmdRet::Usage;
    }
    let (Some(addr), Some(value), Some(count)) = (
        parse_hex(argv[1]),
        parse_hex(argv[2]),
        argv.get(3).map_or(Some(1), |s| parse_hex(s)),
    ) else {
        return CmdRet::Usage;
    };
    match sh.mem.map(addr, count) {
        Ok(buf) => {
            buf.fill(value as u8);
            CmdRet::Success
        }
        Err(e) => {
            say!(sh, "** {e} **");
            CmdRet::Failure
        }
    }
}

fn do_help(sh: &mut Shell, argv: &[&str]) -> CmdRet {
    if argv.len() == 1 {
        for c in COMMANDS {
            say!(sh, "{:<10} - {}", c.name, c.help);
        }
        return CmdRet::Success;
    }

    let mut ret = CmdRet::Success;
    for name in &argv[1..] {
        match find(name) {
            Some(c) => say!(sh, "{} - {}\n\nUsage:\n{} {}", c.name, c.help, c.name, c.usage),
            None => {
                say!(sh, "Unknown command '{name}' - try 'help' without arguments for list of all known commands");
                ret = CmdRet::Failure;
            }
        }
    }
    ret
}

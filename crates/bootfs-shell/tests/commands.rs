//! End-to-end command tests: a cpio archive on a partitioned RAM disk and
//! a host directory, driven through the shell.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

use bootfs_kernel::blk::dos::DosEntry;
use bootfs_kernel::testing::{CpioBuilder, dos_disk};
use bootfs_kernel::vfs::backends::{CpioDriver, HostFs};
use bootfs_kernel::{AddressSpace, BlockDev, DeviceRegistry, Fs, FsTable, Lmb, MemDisk, SysMem};
use bootfs_shell::{CmdRet, Shell};
use tempfile::TempDir;

const RAM: u64 = 0x4000_0000;

// ============================================================================
// Shared test setup
// ============================================================================

#[derive(Clone, Default)]
struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.borrow_mut())).unwrap()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct Setup {
    shell: Shell,
    out: Capture,
    host: TempDir,
}

fn setup_with(lmb: Lmb) -> Setup {
    let host = TempDir::new().unwrap();
    std::fs::write(host.path().join("Image"), b"hello").unwrap();

    let archive = CpioBuilder::new()
        .dir("boot")
        .file("boot/Image", &[0x5a; 42])
        .file("README", b"cpio")
        .build();
    let image = dos_disk(128, &[(DosEntry::new(0x83, 8, 100).bootable(), &archive[..])]);
    let disk: BlockDev = Arc::new(MemDisk::from_bytes("mmc0", 512, image));

    let mut registry = DeviceRegistry::new();
    registry.add_device("mmc", disk);
    registry.add_virtual("hostfs");

    let table = FsTable::new()
        .with(CpioDriver)
        .unwrap()
        .with(HostFs::new(host.path()))
        .unwrap();

    let out = Capture::default();
    let shell = Shell::new(
        Fs::new(table, registry),
        SysMem::new(RAM, 0x10_0000),
        lmb,
        RAM,
        Box::new(out.clone()),
    );
    Setup { shell, out, host }
}

fn setup() -> Setup {
    let mut lmb = Lmb::new();
    lmb.add_memory(RAM, 0x10_0000);
    setup_with(lmb)
}

// ============================================================================
// load / save
// ============================================================================

#[test]
fn test_load_from_host() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("load hostfs - 40000100 /Image"), CmdRet::Success);
    assert!(s.out.take().starts_with("5 bytes read in "));
    assert_eq!(s.shell.env().get("fileaddr"), Some("40000100"));
    assert_eq!(s.shell.env().get("filesize"), Some("5"));
    assert_eq!(s.shell.mem().map_ro(0x4000_0100, 5).unwrap(), b"hello");
}

#[test]
fn test_load_partial_from_cpio() {
    let mut s = setup();
    assert_eq!(
        s.shell.run_line("load mmc 0:1 40000000 /boot/Image 10 28"),
        CmdRet::Success
    );
    // 0x28 = 40: only two bytes remain
    assert_eq!(s.shell.env().get("filesize"), Some("2"));
}

#[test]
fn test_load_defaults_from_env() {
    let mut s = setup();
    s.shell.run_line("setenv loadaddr 40002000; setenv bootfile Image");
    assert_eq!(s.shell.run_line("load hostfs"), CmdRet::Success);
    assert_eq!(s.shell.mem().map_ro(0x4000_2000, 5).unwrap(), b"hello");
    assert_eq!(s.shell.env().get("fileaddr"), Some("40002000"));
}

#[test]
fn test_load_without_bootfile() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("load hostfs -"), CmdRet::Failure);
    assert_eq!(s.out.take(), "** No boot file defined **\n");
}

#[test]
fn test_load_refuses_reserved_memory() {
    let mut lmb = Lmb::new();
    lmb.add_memory(RAM, 0x10_0000);
    lmb.reserve(RAM, 0x1000);
    let mut s = setup_with(lmb);

    assert_eq!(s.shell.run_line("load hostfs - 40000000 Image"), CmdRet::Failure);
    assert_eq!(s.out.take(), "Failed to load 'Image'\n");
    assert!(s.shell.env().get("filesize").is_none());

    assert_eq!(s.shell.run_line("load hostfs - 40001000 Image"), CmdRet::Success);
}

#[test]
fn test_save_to_host() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("mw.b 40000000 41 4"), CmdRet::Success);
    assert_eq!(
        s.shell.run_line("save hostfs - 40000000 /out.bin 4"),
        CmdRet::Success
    );
    assert!(s.out.take().starts_with("4 bytes written in "));
    assert_eq!(std::fs::read(s.host.path().join("out.bin")).unwrap(), b"AAAA");
}

#[test]
fn test_save_to_cpio_fails() {
    let mut s = setup();
    assert_eq!(
        s.shell.run_line("save mmc 0:1 40000000 /new 4"),
        CmdRet::Failure
    );
}

// ============================================================================
// Listing and queries
// ============================================================================

#[test]
fn test_ls_cpio_generic() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("ls mmc 0:1"), CmdRet::Success);
    assert_eq!(
        s.out.take(),
        "        4   README\n            boot/\n\n1 file(s), 1 dir(s)\n\n"
    );
}

#[test]
fn test_ls_host_native() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("ls hostfs"), CmdRet::Success);
    assert_eq!(s.out.take(), "             5 Image\n");
}

#[test]
fn test_ls_missing_dir() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("ls mmc 0:1 /nope"), CmdRet::Failure);
}

#[test]
fn test_size_sets_filesize() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("size mmc 0:1 /boot/Image"), CmdRet::Success);
    assert_eq!(s.shell.env().get("filesize"), Some("2a"));
}

#[test]
fn test_fstype_and_fstypes() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("fstype mmc 0:1"), CmdRet::Success);
    assert_eq!(s.out.take(), "cpio\n");

    assert_eq!(s.shell.run_line("fstype hostfs - kind"), CmdRet::Success);
    assert_eq!(s.shell.env().get("kind"), Some("sandbox"));

    assert_eq!(s.shell.run_line("fstypes"), CmdRet::Success);
    assert_eq!(s.out.take(), "Supported filesystems: cpio, sandbox\n");
}

#[test]
fn test_fsuuid() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("fsuuid hostfs - id"), CmdRet::Success);
    assert_eq!(s.shell.env().get("id").map(str::len), Some(36));

    // cpio has no uuid slot
    assert_eq!(s.shell.run_line("fsuuid mmc 0:1"), CmdRet::Failure);
}

#[test]
fn test_whole_disk_is_not_cpio() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("fstype mmc 0:0"), CmdRet::Failure);
}

// ============================================================================
// Namespace commands
// ============================================================================

#[test]
fn test_mkdir_mv_rm() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("mkdir hostfs - /boot"), CmdRet::Success);
    assert_eq!(s.shell.run_line("mv hostfs - /Image /boot"), CmdRet::Success);
    assert!(s.host.path().join("boot/Image").exists());

    assert_eq!(s.shell.run_line("mv hostfs - /boot/Image /kernel"), CmdRet::Success);
    assert!(s.host.path().join("kernel").exists());

    assert_eq!(s.shell.run_line("rm hostfs - /kernel"), CmdRet::Success);
    assert!(!s.host.path().join("kernel").exists());
    assert_eq!(s.shell.run_line("rm hostfs - /kernel"), CmdRet::Failure);
}

#[cfg(unix)]
#[test]
fn test_ln() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("ln hostfs - Image /vmlinuz"), CmdRet::Success);
    let target = std::fs::read_link(s.host.path().join("vmlinuz")).unwrap();
    assert_eq!(target.to_str(), Some("Image"));
}

// ============================================================================
// Interpreter
// ============================================================================

#[test]
fn test_usage_and_unknown_commands() {
    let mut s = setup();
    assert_eq!(s.shell.run_line("size hostfs"), CmdRet::Usage);
    assert_eq!(
        s.out.take(),
        "Usage:\nsize <interface> <dev[:part]> <filename>\n"
    );

    assert_eq!(s.shell.run_line("fatload mmc 0"), CmdRet::Failure);
    assert_eq!(s.out.take(), "Unknown command 'fatload' - try 'help'\n");
}

#[test]
fn test_md_dump() {
    let mut s = setup();
    s.shell.mem().map(RAM, 4).unwrap().copy_from_slice(b"boot");
    assert_eq!(s.shell.run_line("md.b 40000000 4"), CmdRet::Success);
    assert_eq!(
        s.out.take(),
        format!("40000000: {:<47}    boot\n", "62 6f 6f 74")
    );
}

#[test]
fn test_script_counts_failures() {
    let mut s = setup();
    let script = "# comment\nsetenv f Image\nsize hostfs - $f\nsize hostfs - missing\n\nbogus\n";
    let failures = s.shell.run_script(script.as_bytes(), false).unwrap();
    assert_eq!(failures, 2);
    assert_eq!(s.shell.env().get("filesize"), Some("5"));
}

//! Dispatch-layer behaviour against the in-memory backend.

use std::sync::Arc;

use super::*;
use crate::blk::dos::DosEntry;
use crate::blk::{BlockDev, DeviceRegistry, MemDisk};
use crate::lmb::Lmb;
use crate::sysmem::{AddressSpace, SysMem};
use crate::testing::{MemFsDriver, dos_disk};

const MEM_BASE: u64 = 0x1000;

fn disk() -> BlockDev {
    let image = dos_disk(
        64,
        &[
            (DosEntry::new(0x0c, 8, 16), &b"FAT"[..]),
            (DosEntry::new(0x83, 24, 16).bootable(), &b"EXT"[..]),
        ],
    );
    Arc::new(MemDisk::from_bytes("mmc0", 512, image))
}

struct Rig {
    fs: Fs,
    fat: MemFsDriver,
    ext: MemFsDriver,
    mem: SysMem,
}

fn rig_with(fat: MemFsDriver, ext: MemFsDriver) -> Rig {
    let table = FsTable::new()
        .with(fat.clone())
        .unwrap()
        .with(ext.clone())
        .unwrap();
    let mut registry = DeviceRegistry::new();
    registry.add_device("mmc", disk());
    registry.add_virtual("hostfs");
    Rig {
        fs: Fs::new(table, registry),
        fat,
        ext,
        mem: SysMem::new(MEM_BASE, 0x1000),
    }
}

fn rig() -> Rig {
    let payload: Vec<u8> = (0..42u8).collect();
    rig_with(
        MemFsDriver::new(FsType::Fat, "fat")
            .with_magic(b"FAT")
            .with_file("/a.bin", &payload)
            .with_dir("/sub"),
        MemFsDriver::new(FsType::Ext4, "ext4")
            .with_magic(b"EXT")
            .with_file("/boot/Image", b"kernel")
            .with_uuid("1234-abcd"),
    )
}

// ============================================================================
// Binding
// ============================================================================

#[test]
fn test_unbound_session_uses_stubs() {
    let mut fs = Fs::new(FsTable::new(), DeviceRegistry::new());
    assert_eq!(fs.get_type(), FsType::Any);
    assert_eq!(fs.get_type_name(), "unsupported");
    assert!(matches!(fs.size("/x"), Err(FsError::Unsupported)));
    assert!(!fs.exists("/x"));
    fs.close();
    fs.close();
    assert_eq!(fs.get_type(), FsType::Any);
}

#[test]
fn test_bind_reports_type_and_name() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert_eq!(r.fs.get_type(), FsType::Ext4);
    assert_eq!(r.fs.get_type_name(), "ext4");
    assert_eq!(r.fs.part_no(), 2);

    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert_eq!(r.fs.get_type_name(), "fat");
}

#[test]
fn test_requested_type_filters_backends() {
    let mut r = rig();
    assert!(matches!(
        r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Ext4),
        Err(FsError::Unrecognized)
    ));
    assert_eq!(r.fat.probe_count(), 0);
    assert_eq!(r.ext.probe_count(), 1);
    assert_eq!(r.fs.get_type(), FsType::Any);
}

#[test]
fn test_first_registered_backend_wins() {
    let mut r = rig_with(
        MemFsDriver::new(FsType::Fat, "fat"),
        MemFsDriver::new(FsType::Ext4, "ext4"),
    );
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert_eq!(r.fs.get_type(), FsType::Fat);
    assert_eq!(r.ext.probe_count(), 0);
}

#[test]
fn test_first_of_two_wildcard_backends_wins() {
    let mut r = rig_with(
        MemFsDriver::new(FsType::Any, "first"),
        MemFsDriver::new(FsType::Any, "second"),
    );
    for _ in 0..3 {
        r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
        assert_eq!(r.fs.get_type_name(), "first");
        r.fs.close();
    }
    assert_eq!(r.fat.probe_count(), 3);
    assert_eq!(r.ext.probe_count(), 0);
}

#[test]
fn test_detected_type_rebinds_same_backend() {
    let mut r = rig();
    for part in ["0:1", "0:2"] {
        r.fs.set_blk_dev("mmc", Some(part), FsType::Any).unwrap();
        let name = r.fs.get_type_name().to_string();
        let tag: FsType = name.parse().unwrap();
        r.fs.close();

        r.fs.set_blk_dev("mmc", Some(part), tag).unwrap();
        assert_eq!(r.fs.get_type_name(), name);
        assert_eq!(r.fs.get_type(), tag);
    }
}

#[test]
fn test_wildcard_backend_answers_typed_request() {
    let any = MemFsDriver::new(FsType::Any, "catchall");
    let table = FsTable::new().with(any.clone()).unwrap();
    let mut registry = DeviceRegistry::new();
    registry.add_device("mmc", disk());
    let mut fs = Fs::new(table, registry);

    fs.set_blk_dev("mmc", Some("0"), FsType::Btrfs).unwrap();
    assert_eq!(fs.get_type_name(), "catchall");
    assert_eq!(any.probe_count(), 1);
}

#[test]
fn test_deviceless_interface_needs_null_dev_backend() {
    let mut r = rig();
    assert!(matches!(
        r.fs.set_blk_dev("hostfs", None, FsType::Any),
        Err(FsError::Unrecognized)
    ));
    assert_eq!(r.fat.probe_count(), 0);

    let host = MemFsDriver::new(FsType::Sandbox, "sandbox").null_dev();
    let mut registry = DeviceRegistry::new();
    registry.add_virtual("hostfs");
    let mut fs = Fs::new(FsTable::new().with(host).unwrap(), registry);
    fs.set_blk_dev("hostfs", Some("-"), FsType::Any).unwrap();
    assert_eq!(fs.get_type(), FsType::Sandbox);
}

#[test]
fn test_resolve_failure_propagates() {
    let mut r = rig();
    assert!(matches!(
        r.fs.set_blk_dev("usb", Some("0"), FsType::Any),
        Err(FsError::NoDevice(_))
    ));
    assert!(matches!(
        r.fs.set_blk_dev("mmc", Some("0:7"), FsType::Any),
        Err(FsError::BadPartition(_))
    ));
}

#[test]
fn test_operation_closes_session() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert_eq!(r.fs.size("/a.bin").unwrap(), 42);
    assert_eq!(r.fat.close_count(), 1);
    assert_eq!(r.fs.get_type(), FsType::Any);

    // Not re-bound: the sentinel answers
    assert!(matches!(r.fs.size("/a.bin"), Err(FsError::Unsupported)));
    assert_eq!(r.fat.close_count(), 1);
}

#[test]
fn test_rebind_closes_previous_mount() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert_eq!(r.fat.close_count(), 1);
    assert!(r.fs.exists("/boot/Image"));
}

// ============================================================================
// Read / write
// ============================================================================

#[test]
fn test_read_rest_of_file() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    let n = r.fs.read("/a.bin", &mut r.mem, MEM_BASE, 10, 0).unwrap();
    assert_eq!(n, 32);
    let loaded = r.mem.map_ro(MEM_BASE, 32).unwrap();
    assert_eq!(loaded[0], 10);
    assert_eq!(loaded[31], 41);
}

#[test]
fn test_read_len_beyond_end_is_short() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert_eq!(r.fs.read("/a.bin", &mut r.mem, MEM_BASE, 40, 100).unwrap(), 2);
}

#[test]
fn test_read_near_end_of_ram_maps_only_what_is_read() {
    let mut r = rig();
    let ram_end = MEM_BASE + 0x1000;
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert_eq!(
        r.fs.read("/boot/Image", &mut r.mem, ram_end - 6, 0, 0x100).unwrap(),
        6
    );
    assert_eq!(r.mem.map_ro(ram_end - 6, 6).unwrap(), b"kernel");

    let mut lmb = Lmb::new();
    lmb.add_memory(MEM_BASE, 0x1000);
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert_eq!(
        r.fs.read_checked("/boot/Image", &mut r.mem, &lmb, ram_end - 4, 2, 0x100).unwrap(),
        4
    );

    // Bytes that really are past the end still fail
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert!(matches!(
        r.fs.read("/boot/Image", &mut r.mem, ram_end - 3, 0, 0),
        Err(FsError::BadAddress { .. })
    ));
}

#[test]
fn test_read_at_eof_skips_reserved_check() {
    let mut r = rig();
    let mut lmb = Lmb::new();
    lmb.add_memory(MEM_BASE, 0x1000);
    lmb.reserve(MEM_BASE, 0x1000);

    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    let n = r
        .fs
        .read_checked("/a.bin", &mut r.mem, &lmb, MEM_BASE, 42, 0)
        .unwrap();
    assert_eq!(n, 0);
}

#[test]
fn test_read_into_reserved_memory_refused() {
    let mut r = rig();
    let mut lmb = Lmb::new();
    lmb.add_memory(MEM_BASE, 0x1000);
    lmb.reserve(MEM_BASE + 0x10, 0x10);

    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert!(matches!(
        r.fs.read_checked("/a.bin", &mut r.mem, &lmb, MEM_BASE, 0, 0),
        Err(FsError::ReservedMemory)
    ));
    assert!(r.mem.map_ro(MEM_BASE, 42).unwrap().iter().all(|&b| b == 0));

    // Only the bytes actually read are checked
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert_eq!(
        r.fs.read_checked("/a.bin", &mut r.mem, &lmb, MEM_BASE, 0, 0x10).unwrap(),
        0x10
    );
}

#[test]
fn test_read_to_unmapped_address() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert!(matches!(
        r.fs.read("/a.bin", &mut r.mem, 0x10, 0, 0),
        Err(FsError::BadAddress { .. })
    ));
    assert_eq!(r.fs.get_type(), FsType::Any);
}

#[test]
fn test_write_from_memory() {
    let mut r = rig();
    r.mem.map(MEM_BASE, 4).unwrap().copy_from_slice(b"boot");
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert_eq!(r.fs.write("/new.txt", &r.mem, MEM_BASE, 0, 4).unwrap(), 4);
    assert_eq!(r.fat.file("/new.txt").unwrap(), b"boot");
}

#[test]
fn test_write_failure_is_generic() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert!(matches!(
        r.fs.write("/missing/dir/f", &r.mem, MEM_BASE, 0, 4),
        Err(FsError::Failed(_))
    ));
}

#[test]
fn test_read_alloc() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert_eq!(r.fs.read_alloc("/boot/Image", 6).unwrap(), b"kernel");

    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert!(matches!(
        r.fs.read_alloc("/boot/Image", 7),
        Err(FsError::ShortRead { wanted: 7, got: 6 })
    ));
}

#[test]
fn test_load_alloc() {
    let mut r = rig();
    assert_eq!(
        r.fs.load_alloc("mmc", Some("0:2"), "/boot/Image", 0).unwrap(),
        b"kernel"
    );
    assert!(matches!(
        r.fs.load_alloc("mmc", Some("0:2"), "/boot/Image", 6),
        Err(FsError::TooBig { size: 6, limit: 6 })
    ));
    assert!(matches!(
        r.fs.load_alloc("mmc", Some("0:2"), "/nope", 0),
        Err(FsError::NotFound(_))
    ));
    assert!(matches!(
        r.fs.load_alloc("usb", Some("0"), "/boot/Image", 0),
        Err(FsError::NoMedium(_))
    ));
}

// ============================================================================
// Directories
// ============================================================================

#[test]
fn test_dir_stream_survives_rebind() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    let mut dirs = r.fs.opendir("/").unwrap();
    assert_eq!(dirs.part_no(), 1);

    // Something else binds in between
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert!(r.fs.exists("/boot"));

    let first = r.fs.readdir(&mut dirs).unwrap().unwrap();
    assert_eq!(first, FsDirent::file("a.bin", 42));
    let second = r.fs.readdir(&mut dirs).unwrap().unwrap();
    assert_eq!(second, FsDirent::directory("sub"));
    assert!(r.fs.readdir(&mut dirs).unwrap().is_none());
    r.fs.closedir(dirs);
    assert_eq!(r.fs.get_type(), FsType::Any);
}

#[test]
fn test_opendir_failure_records_errno() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert!(matches!(r.fs.opendir("/nope"), Err(FsError::NotFound(_))));
    assert_eq!(r.fs.errno(), 2);
}

#[test]
fn test_ls_generic_format() {
    let payload = [0u8; 42];
    let mut r = rig_with(
        MemFsDriver::new(FsType::Fat, "fat")
            .with_magic(b"FAT")
            .generic_listing()
            .with_file("/a.bin", &payload)
            .with_dir("/sub")
            .with_symlink("/link", "a.bin"),
        MemFsDriver::new(FsType::Ext4, "ext4").generic_listing(),
    );

    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    let mut out = Vec::new();
    r.fs.ls("/", &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "       42   a.bin\n    <SYM>   link\n            sub/\n\n2 file(s), 1 dir(s)\n\n"
    );
}

#[test]
fn test_ls_generic_empty_dir() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    let mut out = Vec::new();
    r.fs.ls_generic("/sub", &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "\n0 file(s), 0 dir(s)\n\n");
}

#[test]
fn test_ls_native() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    let mut out = Vec::new();
    r.fs.ls("/", &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "f 42 a.bin\nd 0 sub\n");
    assert_eq!(r.fs.get_type(), FsType::Any);
}

// ============================================================================
// Namespace operations
// ============================================================================

#[test]
fn test_mkdir_unlink_ln() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    r.fs.mkdir("/etc").unwrap();
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    r.fs.ln("/etc/link", "/a.bin").unwrap();
    assert!(r.fat.contains("/etc/link"));

    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert!(matches!(r.fs.ln("/etc/link", "/a.bin"), Err(FsError::Failed(_))));

    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    r.fs.unlink("/etc/link").unwrap();
    assert!(!r.fat.contains("/etc/link"));
}

#[test]
fn test_uuid() {
    let mut r = rig();
    r.fs.set_blk_dev("mmc", Some("0:2"), FsType::Any).unwrap();
    assert_eq!(r.fs.uuid().unwrap(), "1234-abcd");
    r.fs.set_blk_dev("mmc", Some("0:1"), FsType::Any).unwrap();
    assert!(matches!(r.fs.uuid(), Err(FsError::Unsupported)));
}

#[test]
fn test_mv_into_directory() {
    let mut r = rig_with(
        MemFsDriver::new(FsType::Fat, "fat")
            .with_file("/a/b/src.txt", b"x")
            .with_dir("/dir"),
        MemFsDriver::new(FsType::Ext4, "ext4"),
    );
    r.fs
        .mv("mmc", Some("0:1"), FsType::Any, "/a/b/src.txt", "/dir")
        .unwrap();
    assert!(r.fat.contains("/dir/src.txt"));
    assert!(!r.fat.contains("/a/b/src.txt"));

    r.fs
        .mv("mmc", Some("0:1"), FsType::Any, "/dir/src.txt", "/a/")
        .unwrap();
    assert!(r.fat.contains("/a/src.txt"));
}

#[test]
fn test_mv_rename() {
    let mut r = rig_with(
        MemFsDriver::new(FsType::Fat, "fat").with_file("/a/b/src.txt", b"x"),
        MemFsDriver::new(FsType::Ext4, "ext4"),
    );
    r.fs
        .mv("mmc", Some("0:1"), FsType::Any, "a/b/src.txt", "dst.txt")
        .unwrap();
    assert_eq!(r.fat.file("/dst.txt").unwrap(), b"x");

    assert!(matches!(
        r.fs.mv("mmc", Some("0:1"), FsType::Any, "/nope", "/x"),
        Err(FsError::Failed(_))
    ));
}

use fatfs::FormatVolumeOptions;
use seedcard_core::boot::{CONFIG_TXT_NAME, FIRSTBOOT_NAME, UART_STANZA};
use seedcard_core::flash::{self, FlashConfig, SettleOutcome};
use seedcard_core::mbr::SECTOR_SIZE;
use seedcard_core::patch::RC_LOCAL_ANCHOR;
use seedcard_core::{
    Board, BootWriter, BoundedDiskWindow, DiskImage, MissingHookPolicy, PartitionEntry,
    PartitionTable, ProgressUpdate, Target,
};
use seedcard_error::{SeedError, ValidationError};
use seedcard_hal::{DevicePath, FakeHal, HalError, Operation, VolumeHandle, VolumeOps};
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tempfile::TempDir;

const MIB: u64 = 1024 * 1024;
const IMAGE_SIZE: u64 = 64 * MIB;
const BOOT_START: u32 = 2048;
const BOOT_SECTORS: u32 = 16384;
const ROOT_START: u32 = BOOT_START + BOOT_SECTORS;
const ANCHOR_OFFSET: u64 = 5 * MIB;

struct Fixture {
    dir: TempDir,
    image: PathBuf,
    setup: PathBuf,
}

/// A 64 MiB two-partition image: 8 MiB FAT boot, Debian-style root with the
/// stock rc.local header somewhere inside.
fn fixture(with_anchor: bool) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("raspbian-lite.img");
    let setup = dir.path().join("setup.sh");
    fs::write(&setup, b"#!/bin/bash\necho configuring\n").unwrap();

    let root_sectors = (IMAGE_SIZE / SECTOR_SIZE) as u32 - ROOT_START;
    let table = PartitionTable::new(
        0x5eed_ca7d,
        [
            PartitionEntry::new(0x0c, BOOT_START, BOOT_SECTORS).bootable(),
            PartitionEntry::new(0x83, ROOT_START, root_sectors),
            PartitionEntry::default(),
            PartitionEntry::default(),
        ],
    );

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&image)
        .unwrap();
    file.set_len(IMAGE_SIZE).unwrap();
    file.write_all(&table.to_sector()).unwrap();

    let boot_offset = u64::from(BOOT_START) * SECTOR_SIZE;
    let boot_len = u64::from(BOOT_SECTORS) * SECTOR_SIZE;
    {
        let mut window = BoundedDiskWindow::new(&mut file, boot_offset, boot_len);
        fatfs::format_volume(&mut window, FormatVolumeOptions::new()).unwrap();
        window.seek(SeekFrom::Start(0)).unwrap();
        let boot = BootWriter::open(window).unwrap();
        boot.write_file(CONFIG_TXT_NAME, b"dtparam=audio=on\n").unwrap();
        boot.close().unwrap();
    }

    if with_anchor {
        let root_offset = u64::from(ROOT_START) * SECTOR_SIZE;
        file.seek(SeekFrom::Start(root_offset + ANCHOR_OFFSET)).unwrap();
        file.write_all(RC_LOCAL_ANCHOR.as_bytes()).unwrap();
        file.write_all(b"\nexit 0\n").unwrap();
    }
    file.sync_all().unwrap();

    Fixture { dir, image, setup }
}

fn pi() -> Target {
    Target::resolve(None, Some(Board::RaspberryPi)).unwrap()
}

fn config(fx: &Fixture, device: Option<&str>) -> FlashConfig {
    let mut cfg = FlashConfig::new(&fx.image, pi(), &fx.setup);
    cfg.device = device.map(|d| DevicePath::parse(d).unwrap());
    cfg.time_zone = "America/Toronto".into();
    cfg.confirmed = true;
    cfg.keep_working_copy = true;
    cfg.settings.settle.timeout_ms = 200;
    cfg.settings.settle.interval_ms = 10;
    cfg
}

fn linux_hal() -> FakeHal {
    let hal = FakeHal::new();
    hal.set_disk_number("/dev/sdz", 2080);
    hal
}

fn opened_device(hal: &FakeHal) -> bool {
    hal.has_operation(|op| matches!(op, Operation::OpenDevice { .. }))
}

#[test]
fn flashed_device_matches_patched_working_copy() {
    let fx = fixture(true);
    let hal = linux_hal();
    let (tx, rx) = mpsc::sync_channel(256);
    let mut cfg = config(&fx, Some("/dev/sdz"));
    cfg.settings.chunk_size = MIB as usize;
    cfg.force_uart = true;
    cfg.progress_tx = Some(tx);

    let report = flash::run(&hal, &cfg).unwrap();
    drop(cfg);

    let written = hal.device_bytes(Path::new("/dev/sdz"));
    let working = fs::read(&report.working_copy).unwrap();
    assert_eq!(written.len() as u64, IMAGE_SIZE);
    assert!(written == working, "device bytes differ from working copy");
    assert_eq!(report.bytes_written, Some(IMAGE_SIZE));
    assert!(report.settle.unwrap().is_ready());
    assert!(report.manual_command.is_none());
    assert_eq!(report.ssh_command, "ssh -o StrictHostKeyChecking=no pi@raspberrypi");

    // root hook landed where the anchor was
    let patch = report.root_patch.unwrap();
    assert_eq!(patch.offset, ANCHOR_OFFSET);
    let at = (u64::from(ROOT_START) * SECTOR_SIZE + ANCHOR_OFFSET) as usize;
    assert!(working[at..].starts_with(b"#!/bin/sh -e\nL=/var/log/firstboot.log;"));

    // boot files are readable from the flashed copy
    let mut copy = DiskImage::open(&report.working_copy).unwrap();
    let boot = BootWriter::open(copy.partition_window(1).unwrap()).unwrap();
    assert_eq!(
        boot.read_file(FIRSTBOOT_NAME).unwrap(),
        b"#!/bin/bash\necho configuring\n"
    );
    let config_txt = String::from_utf8(boot.read_file(CONFIG_TXT_NAME).unwrap()).unwrap();
    assert!(config_txt.ends_with(UART_STANZA));
    boot.close().unwrap();

    // source image untouched
    let source = fs::read(&fx.image).unwrap();
    assert!(source[at..].starts_with(RC_LOCAL_ANCHOR.as_bytes()));

    let updates: Vec<ProgressUpdate> = rx.try_iter().collect();
    assert!(updates.contains(&ProgressUpdate::Write {
        written: IMAGE_SIZE,
        total: IMAGE_SIZE
    }));
    assert_eq!(updates.last(), Some(&ProgressUpdate::Complete));
}

#[test]
fn undersized_device_fails_with_short_write_at_capacity() {
    let fx = fixture(true);
    let hal = linux_hal();
    hal.set_device_capacity("/dev/sdz", 32 * MIB);
    hal.add_volume("/dev/sdz1", 2080, 1);

    let err = flash::run(&hal, &config(&fx, Some("/dev/sdz"))).unwrap_err();
    match err {
        SeedError::ShortWrite {
            device,
            offset,
            requested,
            written,
        } => {
            assert_eq!(device, PathBuf::from("/dev/sdz"));
            assert_eq!(offset, 32 * MIB);
            assert_eq!(requested, 64 * 1024);
            assert_eq!(written, 0);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!hal.is_locked("/dev/sdz1"));
    assert!(!hal.has_operation(|op| matches!(op, Operation::Rescan { .. })));
}

#[test]
fn linux_partitions_are_closed_before_the_partition_table_is_reread() {
    let fx = fixture(true);
    let hal = linux_hal();
    hal.release_volumes_after_dismount();
    hal.reject_rescan_while_locked();
    hal.add_volume("/dev/sdz1", 2080, 1);
    hal.add_volume("/dev/sdz2", 2080, 2);

    let mut cfg = config(&fx, Some("/dev/sdz"));
    cfg.mount_boot = true;
    let report = flash::run(&hal, &cfg).unwrap();
    assert_eq!(report.bytes_written, Some(IMAGE_SIZE));
    assert!(report.settle.unwrap().is_ready());
    assert_eq!(report.boot_mount, Some(PathBuf::from("/media/fake/sdz1")));

    let ops = hal.operations();
    let rescan = ops
        .iter()
        .position(|op| matches!(op, Operation::Rescan { .. }))
        .unwrap();
    for id in ["/dev/sdz1", "/dev/sdz2"] {
        let dismounted = ops
            .iter()
            .position(|op| matches!(op, Operation::DismountVolume { id: v } if v == id))
            .unwrap();
        let closed = ops
            .iter()
            .position(|op| matches!(op, Operation::CloseVolume { id: v } if v == id))
            .unwrap();
        assert!(dismounted < closed && closed < rescan);
    }
}

#[test]
fn volume_locks_held_through_rescan_fail_on_a_busy_kernel() {
    let fx = fixture(true);
    let hal = linux_hal();
    hal.reject_rescan_while_locked();
    hal.add_volume("/dev/sdz1", 2080, 1);

    let err = flash::run(&hal, &config(&fx, Some("/dev/sdz"))).unwrap_err();
    assert!(matches!(err, SeedError::Hal(HalError::DiskBusy)), "{err:?}");
    assert!(!hal.is_locked("/dev/sdz1"));
}

#[test]
fn windows_volumes_are_locked_during_write_and_released_after() {
    let fx = fixture(true);
    let hal = FakeHal::new();
    hal.add_volume(r"\\?\Volume{5eedca7d-0001}", 3, 1);
    hal.add_volume(r"\\?\Volume{5eedca7d-0002}", 3, 2);
    hal.add_volume(r"\\?\Volume{00000000-0001}", 0, 1);

    let report = flash::run(&hal, &config(&fx, Some(r"\\.\PHYSICALDRIVE3"))).unwrap();
    assert!(report.flashed());

    let ops = hal.operations();
    let first_write = ops
        .iter()
        .position(|op| matches!(op, Operation::OpenDevice { .. }))
        .unwrap();
    for id in [r"\\?\Volume{5eedca7d-0001}", r"\\?\Volume{5eedca7d-0002}"] {
        let locked = ops
            .iter()
            .position(|op| matches!(op, Operation::LockVolume { id: v } if v == id))
            .unwrap();
        let dismounted = ops
            .iter()
            .position(|op| matches!(op, Operation::DismountVolume { id: v } if v == id))
            .unwrap();
        let closed = ops
            .iter()
            .position(|op| matches!(op, Operation::CloseVolume { id: v } if v == id))
            .unwrap();
        assert!(locked < dismounted && dismounted < first_write && first_write < closed);
        assert!(!hal.is_locked(id));
    }
    assert!(!hal.has_operation(
        |op| matches!(op, Operation::LockVolume { id } if id.contains("00000000"))
    ));

    let device = DevicePath::parse(r"\\.\PHYSICALDRIVE3").unwrap();
    for volume in hal.volumes_for_disk(&device, None).unwrap() {
        let mut handle = hal.open_volume(&volume).unwrap();
        handle.lock().unwrap();
    }
    assert_eq!(
        hal.device_bytes(Path::new(r"\\.\PHYSICALDRIVE3")).len() as u64,
        IMAGE_SIZE
    );
}

#[test]
fn partitions_that_never_appear_do_not_fail_the_flash() {
    let fx = fixture(true);
    let hal = linux_hal();
    hal.never_settle();
    let mut cfg = config(&fx, Some("/dev/sdz"));
    cfg.settings.settle.timeout_ms = 50;

    let report = flash::run(&hal, &cfg).unwrap();
    assert!(matches!(report.settle, Some(SettleOutcome::TimedOut { .. })));
    assert_eq!(report.bytes_written, Some(IMAGE_SIZE));
}

#[test]
fn image_without_boot_signature_never_reaches_the_device() {
    let fx = fixture(true);
    let mut file = OpenOptions::new().write(true).open(&fx.image).unwrap();
    file.seek(SeekFrom::Start(510)).unwrap();
    file.write_all(&[0, 0]).unwrap();
    drop(file);

    let hal = linux_hal();
    let err = flash::run(&hal, &config(&fx, Some("/dev/sdz"))).unwrap_err();
    assert!(matches!(
        err,
        SeedError::Validation(ValidationError::MissingSignature { found: [0, 0] })
    ));
    assert!(!opened_device(&hal));
    assert!(!fx.dir.path().join("raspbian-lite-mod.img").exists());
}

#[test]
fn flashing_without_confirmation_is_refused() {
    let fx = fixture(true);
    let hal = linux_hal();
    let mut cfg = config(&fx, Some("/dev/sdz"));
    cfg.confirmed = false;
    assert!(matches!(
        flash::run(&hal, &cfg),
        Err(SeedError::MissingYesIKnow)
    ));
    assert!(hal.operations().is_empty());

    cfg.dry_run = true;
    let report = flash::run(&hal, &cfg).unwrap();
    assert!(!report.flashed());
    assert!(!opened_device(&hal));
}

#[test]
fn missing_anchor_fails_unless_boot_only() {
    let fx = fixture(false);
    let hal = linux_hal();
    let mut cfg = config(&fx, Some("/dev/sdz"));
    assert!(matches!(
        flash::run(&hal, &cfg),
        Err(SeedError::PatchNotFound { .. })
    ));
    assert!(!opened_device(&hal));

    cfg.settings.root_hook.on_missing = MissingHookPolicy::BootOnly;
    cfg.email = Some("ops@example.com".into());
    let report = flash::run(&hal, &cfg).unwrap();
    assert!(report.root_patch.is_none());
    assert_eq!(
        report.manual_command.as_deref(),
        Some("/boot/firstboot.sh -t America/Toronto -e ops@example.com")
    );
    assert!(report.flashed());
}

#[test]
fn patched_image_cannot_be_patched_twice() {
    let fx = fixture(true);
    let hal = FakeHal::new();
    let report = flash::run(&hal, &config(&fx, None)).unwrap();
    assert!(report.root_patch.is_some());
    assert!(hal.operations().is_empty());

    let mut again = config(&fx, None);
    again.image = report.working_copy.clone();
    again.working_copy = Some(fx.dir.path().join("twice.img"));
    assert!(matches!(
        flash::run(&hal, &again),
        Err(SeedError::PatchNotFound { .. })
    ));
}

#[test]
fn working_copy_is_removed_after_flash_unless_kept() {
    let fx = fixture(true);
    let hal = linux_hal();
    let mut cfg = config(&fx, Some("/dev/sdz"));
    cfg.keep_working_copy = false;
    cfg.mount_boot = true;

    let report = flash::run(&hal, &cfg).unwrap();
    assert!(!report.working_copy_kept);
    assert!(!report.working_copy.exists());
    assert_eq!(report.boot_mount, Some(PathBuf::from("/media/fake/sdz1")));
    assert!(hal.has_operation(|op| matches!(op, Operation::Mount { partition: 1, .. })));
    assert!(!hal.has_operation(|op| matches!(op, Operation::Unmount { .. })));
}

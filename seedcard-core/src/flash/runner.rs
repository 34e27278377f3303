use super::config::{FlashConfig, FlashContext};
use super::settle::{SettleOutcome, SettleWaiter};
use super::writer::DeviceWriter;
use crate::boot::BootWriter;
use crate::image::{self, DiskImage};
use crate::patch::{PatchTarget, RcLocalAnchorPatcher, StartupHookPatcher};
use crate::progress::{Phase, ProgressUpdate};
use crate::settings::MissingHookPolicy;
use log::{info, warn};
use seedcard_error::{SeedError, SeedResult};
use seedcard_hal::{DeviceOps, DevicePath, MountGuard, MountOps, VolumeGuard, VolumeOps};
use std::fs;
use std::path::PathBuf;

pub const BOOT_PARTITION: usize = 1;
pub const ROOT_PARTITION: usize = 2;

/// What a run did, for the caller to print.
#[derive(Debug, Clone)]
pub struct FlashReport {
    pub working_copy: PathBuf,
    /// False once the working copy has been removed after a flash.
    pub working_copy_kept: bool,
    pub root_patch: Option<PatchTarget>,
    /// Set when the root hook is missing and must be run by hand.
    pub manual_command: Option<String>,
    pub device: Option<DevicePath>,
    pub bytes_written: Option<u64>,
    pub settle: Option<SettleOutcome>,
    pub boot_mount: Option<PathBuf>,
    pub ssh_command: String,
}

impl FlashReport {
    pub fn flashed(&self) -> bool {
        self.bytes_written.is_some()
    }
}

/// Stages, patches and (when a device is configured) flashes one image.
pub fn run<H>(hal: &H, cfg: &FlashConfig) -> SeedResult<FlashReport>
where
    H: VolumeOps + DeviceOps + MountOps + ?Sized,
{
    let ctx = FlashContext::new(cfg.progress_tx.clone());
    let result = run_inner(hal, cfg, &ctx);
    match &result {
        Ok(_) => ctx.send_progress(ProgressUpdate::Complete),
        Err(err) => ctx.send_progress(ProgressUpdate::Error(err.to_string())),
    }
    result
}

fn run_inner<H>(hal: &H, cfg: &FlashConfig, ctx: &FlashContext) -> SeedResult<FlashReport>
where
    H: VolumeOps + DeviceOps + MountOps + ?Sized,
{
    ctx.start_phase(Phase::Validate);
    cfg.validate()?;
    let table = image::inspect(&cfg.image)?;
    let destructive = cfg.device.is_some() && !cfg.dry_run;
    if destructive && !cfg.confirmed {
        return Err(SeedError::MissingYesIKnow);
    }
    info!("🎯 Target {}", cfg.target);
    log::debug!("partitions: {:?}", table.entries());
    ctx.complete_phase(Phase::Validate);

    ctx.start_phase(Phase::Stage);
    let working_copy = cfg.working_copy_path();
    let mut image = DiskImage::stage(&cfg.image, &working_copy)?;
    ctx.complete_phase(Phase::Stage);

    ctx.start_phase(Phase::PatchRoot);
    let args = cfg.first_boot_args();
    let patcher = RcLocalAnchorPatcher::new(&args)?;
    let mut manual_command = None;
    let root_patch = {
        let mut root = image.partition_window(ROOT_PARTITION)?;
        match patcher.patch(&mut root) {
            Ok(target) => Some(target),
            Err(SeedError::PatchNotFound { scanned })
                if cfg.settings.root_hook.on_missing == MissingHookPolicy::BootOnly =>
            {
                warn!(
                    "no /etc/rc.local anchor in {} bytes of the root partition; first boot must be started by hand",
                    scanned
                );
                manual_command = Some(args.manual_command());
                None
            }
            Err(err) => return Err(err),
        }
    };
    ctx.complete_phase(Phase::PatchRoot);

    ctx.start_phase(Phase::WriteBoot);
    let payload = cfg.boot_payload()?;
    let boot = BootWriter::open(image.partition_window(BOOT_PARTITION)?)?;
    boot.install(&payload)?;
    boot.close()?;
    image.sync()?;
    ctx.complete_phase(Phase::WriteBoot);

    let mut report = FlashReport {
        working_copy: working_copy.clone(),
        working_copy_kept: true,
        root_patch,
        manual_command,
        device: cfg.device.clone(),
        bytes_written: None,
        settle: None,
        boot_mount: None,
        ssh_command: cfg.ssh_command(),
    };

    let device = match &cfg.device {
        Some(device) => device,
        None => {
            ctx.status(&format!("📄 Patched image ready at {}", working_copy.display()));
            return Ok(report);
        }
    };
    if cfg.dry_run {
        ctx.status(&format!(
            "DRY RUN: would write {} ({} bytes) to {}",
            working_copy.display(),
            image.size(),
            device
        ));
        return Ok(report);
    }

    ctx.start_phase(Phase::LockVolumes);
    let guard = VolumeGuard::acquire(hal, device)?;
    ctx.complete_phase(Phase::LockVolumes);

    ctx.start_phase(Phase::Flash);
    let total = image.size();
    let written = {
        let mut dev = hal.open_device(device)?;
        DeviceWriter::new(cfg.settings.chunk_size).flash(
            image.reader()?,
            total,
            dev.as_mut(),
            |written, total| ctx.send_progress(ProgressUpdate::Write { written, total }),
        )?
    };
    // New volumes only appear once the old handles are gone.
    guard.release();
    ctx.complete_phase(Phase::Flash);
    report.bytes_written = Some(written);

    ctx.start_phase(Phase::Settle);
    let settle = SettleWaiter::from_settings(&cfg.settings.settle).wait_for_partition(
        hal,
        device,
        BOOT_PARTITION as u32,
    );
    report.settle = Some(settle);
    ctx.complete_phase(Phase::Settle);

    if cfg.mount_boot {
        ctx.start_phase(Phase::MountBoot);
        let mount = MountGuard::mount(hal, device, BOOT_PARTITION as u32)?;
        let path = mount.release();
        ctx.status(&format!("📂 Boot partition mounted at {}", path.display()));
        report.boot_mount = Some(path);
        ctx.complete_phase(Phase::MountBoot);
    }

    drop(image);
    if !cfg.keep_working_copy {
        match fs::remove_file(&working_copy) {
            Ok(()) => report.working_copy_kept = false,
            Err(err) => warn!("could not remove {}: {}", working_copy.display(), err),
        }
    }
    Ok(report)
}

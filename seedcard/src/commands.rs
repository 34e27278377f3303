//! Subcommand implementations.

use crate::cli::{Cli, Command, FlashArgs, ImageArgs};
use anyhow::{bail, Context, Result};
use log::info;
use seedcard_core::flash::{self, FlashConfig, FlashReport, WifiConfig};
use seedcard_core::patch::FIRSTBOOT_LOG;
use seedcard_core::{host, FlashSettings, ProgressUpdate, SettleOutcome, Target};
use seedcard_hal::{DevicePath, DiskSummary, HalError, PlatformHal};
use std::io::Write;
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

pub fn dispatch(cli: &Cli) -> Result<()> {
    let settings = load_settings(cli.config.as_deref())?;
    match &cli.command {
        Command::Flash(args) => run_flash(args, settings),
        Command::Patch(args) => run_patch(args, settings),
        Command::List => run_list(),
    }
}

pub fn load_settings(path: Option<&Path>) -> Result<FlashSettings> {
    match path {
        Some(path) => FlashSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(FlashSettings::default()),
    }
}

/// Turns image arguments into a pipeline config, filling host defaults.
pub fn build_config(args: &ImageArgs, mut settings: FlashSettings) -> Result<FlashConfig> {
    let target = Target::resolve(args.manufacturer, args.board)?;
    if let Some(policy) = args.on_missing_hook {
        settings.root_hook.on_missing = policy.into();
    }

    let mut cfg = FlashConfig::new(&args.image, target, &args.setup_script);
    cfg.working_copy = args.output.clone();
    cfg.ssh_key = if args.no_ssh_key {
        None
    } else {
        args.ssh_key.clone().or_else(host::find_public_key)
    };
    cfg.time_zone = args.time.clone().unwrap_or_else(host::time_location);
    cfg.email = args.email.clone();
    cfg.wifi = match (&args.wifi_ssid, &args.wifi_pass) {
        (Some(ssid), Some(pass)) => Some(WifiConfig {
            country: args.wifi_country.clone().unwrap_or_default(),
            ssid: ssid.clone(),
            pass: pass.clone(),
        }),
        (None, None) => None,
        _ => bail!("use both --wifi-ssid and --wifi-pass"),
    };
    cfg.five_inch = args.five_inch;
    cfg.force_uart = args.force_uart;
    cfg.post_script = args.post.clone();
    cfg.settings = settings;
    Ok(cfg)
}

/// Applies flash-only overrides on top of the settings file.
pub fn apply_overrides(args: &FlashArgs, settings: &mut FlashSettings) -> Result<()> {
    if let Some(size) = args.chunk_size {
        settings.chunk_size = size;
    }
    if let Some(ms) = args.settle_timeout_ms {
        settings.settle.timeout_ms = ms;
    }
    if let Some(ms) = args.settle_interval_ms {
        settings.settle.interval_ms = ms;
    }
    settings.validate()?;
    Ok(())
}

fn run_patch(args: &ImageArgs, settings: FlashSettings) -> Result<()> {
    let cfg = build_config(args, settings)?;
    info!("📝 Patching a copy of {}", cfg.image.display());
    // Nothing here touches a device.
    let report = flash::run(&seedcard_hal::FakeHal::new(), &cfg).context("Patch failed")?;
    print!("{}", render_report(&report));
    Ok(())
}

fn run_flash(args: &FlashArgs, mut settings: FlashSettings) -> Result<()> {
    apply_overrides(args, &mut settings)?;
    let hal = seedcard_hal::native_hal()?;
    let device = match &args.device {
        Some(device) => device.clone(),
        None => only_removable_disk(hal.as_ref())?,
    };

    let mut cfg = build_config(&args.image, settings)?;
    cfg.device = Some(DevicePath::parse(&device)?);
    cfg.dry_run = args.dry_run;
    cfg.confirmed = args.yes_i_know;
    cfg.mount_boot = args.mount_boot;
    cfg.keep_working_copy = args.keep_image;

    if cfg.wifi.is_none() {
        println!("Wifi will not be configured!");
    }
    if !cfg.dry_run {
        println!("Warning! This will blow up everything in {}\n", device);
    }

    let (tx, rx) = mpsc::sync_channel(64);
    cfg.progress_tx = Some(tx);
    let printer = spawn_progress_printer(rx);
    let result = flash::run(hal.as_ref(), &cfg);
    drop(cfg);
    let _ = printer.join();

    let report = result.context("Flash failed")?;
    print!("{}", render_report(&report));
    Ok(())
}

fn run_list() -> Result<()> {
    let hal = seedcard_hal::native_hal()?;
    let disks = hal
        .removable_disks()
        .context("Failed to list removable disks")?;
    if disks.is_empty() {
        println!("No removable disks found. Insert an SD card first.");
    }
    for disk in &disks {
        println!("{}", describe_disk(disk));
    }
    Ok(())
}

fn only_removable_disk(hal: &dyn PlatformHal) -> Result<String> {
    let disks = match hal.removable_disks() {
        Ok(disks) => disks,
        Err(HalError::Unsupported(_)) => bail!("--device is required on this platform"),
        Err(err) => return Err(err).context("Failed to list removable disks"),
    };
    match disks.as_slice() {
        [only] => {
            info!("🎯 Using the only removable disk {}", describe_disk(only));
            Ok(only.path.to_string_lossy().to_string())
        }
        [] => bail!("--device is required; be sure to insert an SD card first"),
        many => {
            let names: Vec<_> = many.iter().map(|d| d.path.display().to_string()).collect();
            bail!("--device is required; one of {}", names.join(", "))
        }
    }
}

pub fn describe_disk(disk: &DiskSummary) -> String {
    let gib = disk.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    match &disk.model {
        Some(model) => format!("{}  {:.1} GiB  {}", disk.path.display(), gib, model),
        None => format!("{}  {:.1} GiB", disk.path.display(), gib),
    }
}

fn spawn_progress_printer(rx: Receiver<ProgressUpdate>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut last = -1i64;
        for update in rx {
            if let Some(percent) = update.percent() {
                let whole = percent as i64;
                if whole != last {
                    last = whole;
                    eprint!("\r💾 {:3}%", whole);
                    let _ = std::io::stderr().flush();
                    if whole >= 100 {
                        eprintln!();
                    }
                }
            }
        }
    })
}

/// What the user sees once a run finishes.
pub fn render_report(report: &FlashReport) -> String {
    let mut out = String::new();
    if let Some(cmd) = &report.manual_command {
        out += "Couldn't modify the image to set up automatically on boot.\n";
        out += "You will have to ssh in and run:\n";
        out += &format!("  {}\n", cmd);
    }

    if !report.flashed() {
        out += &format!("\nPatched image: {}\n", report.working_copy.display());
        return out;
    }

    if let Some(SettleOutcome::TimedOut { waited }) = &report.settle {
        out += &format!(
            "\nThe new partitions did not show up within {:.1}s; re-insert the card before use.\n",
            waited.as_secs_f64()
        );
    }
    if let Some(mount) = &report.boot_mount {
        out += &format!("\nBoot partition mounted at {}\n", mount.display());
    } else {
        out += "\nYou can now remove the SD card safely and boot your micro computer\n";
    }
    out += "Connect with:\n";
    out += &format!("  {}\n\n", report.ssh_command);
    out += "You can follow the update process by either:\n";
    out += "- connecting a monitor\n";
    out += "- connecting to the serial port\n";
    out += "- ssh'ing into the device and running:\n";
    out += &format!("    tail -f {}\n", FIRSTBOOT_LOG);
    out
}

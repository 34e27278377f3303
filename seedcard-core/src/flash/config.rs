use crate::boards::Target;
use crate::boot::{wpa_supplicant_conf, BootPayload};
use crate::patch::FirstBootArgs;
use crate::progress::{Phase, ProgressUpdate};
use crate::settings::FlashSettings;
use log::info;
use seedcard_error::{SeedError, SeedResult, ValidationError};
use seedcard_hal::DevicePath;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::SyncSender;

/// Wi-Fi network handed to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiConfig {
    pub country: String,
    pub ssid: String,
    /// Passphrase, or a 64 character hex PSK.
    pub pass: String,
}

/// Everything needed to stage, patch and optionally flash one image.
#[derive(Debug, Clone)]
pub struct FlashConfig {
    pub image: PathBuf,
    /// Defaults to `<stem>-mod.<ext>` next to `image`.
    pub working_copy: Option<PathBuf>,
    /// `None` stops after the working copy is patched.
    pub device: Option<DevicePath>,
    pub target: Target,
    /// Copied to `/boot/firstboot.sh`.
    pub setup_script: PathBuf,
    pub ssh_key: Option<PathBuf>,
    pub wifi: Option<WifiConfig>,
    pub email: Option<String>,
    pub time_zone: String,
    pub five_inch: bool,
    pub force_uart: bool,
    pub post_script: Option<PathBuf>,
    /// Remount the boot partition of the device once it settles.
    pub mount_boot: bool,
    /// Keep the working copy after a successful flash.
    pub keep_working_copy: bool,
    pub dry_run: bool,
    /// The `--yes-i-know` latch.
    pub confirmed: bool,
    pub settings: FlashSettings,
    pub progress_tx: Option<SyncSender<ProgressUpdate>>,
}

impl FlashConfig {
    pub fn new(image: impl Into<PathBuf>, target: Target, setup_script: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            working_copy: None,
            device: None,
            target,
            setup_script: setup_script.into(),
            ssh_key: None,
            wifi: None,
            email: None,
            time_zone: "Etc/UTC".to_string(),
            five_inch: false,
            force_uart: false,
            post_script: None,
            mount_boot: false,
            keep_working_copy: false,
            dry_run: false,
            confirmed: false,
            settings: FlashSettings::default(),
            progress_tx: None,
        }
    }

    pub fn validate(&self) -> SeedResult<()> {
        require_file("image", &self.image)?;
        require_file("setup script", &self.setup_script)?;
        if let Some(key) = &self.ssh_key {
            require_file("ssh key", key)?;
        }
        if let Some(post) = &self.post_script {
            require_file("post script", post)?;
            if post.file_name().is_none() {
                return Err(invalid(format!("post script {} has no file name", post.display())));
            }
        }
        if let Some(wifi) = &self.wifi {
            if wifi.ssid.is_empty() != wifi.pass.is_empty() {
                return Err(invalid("use both --wifi-ssid and --wifi-pass".into()));
            }
            if self.target.distro.auto_loads_wpa_supplicant() && wifi.country.is_empty() {
                return Err(invalid("--wifi-country is required with --wifi-ssid".into()));
            }
        }
        if !self.target.distro.is_raspbian() {
            if self.five_inch {
                return Err(invalid("--five-inch only makes sense with raspbian".into()));
            }
            if self.force_uart {
                return Err(invalid("--force-uart only makes sense with raspbian".into()));
            }
        }
        self.settings.validate()?;
        Ok(())
    }

    pub fn working_copy_path(&self) -> PathBuf {
        self.working_copy
            .clone()
            .unwrap_or_else(|| crate::image::working_copy_path(&self.image))
    }

    pub fn post_script_name(&self) -> Option<String> {
        self.post_script
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    }

    pub fn first_boot_args(&self) -> FirstBootArgs {
        let mut args = FirstBootArgs {
            time_zone: self.time_zone.clone(),
            email: self.email.clone().filter(|e| !e.is_empty()),
            five_inch: self.five_inch,
            ssh_key: self.ssh_key.is_some(),
            post_script: self.post_script_name(),
            ..Default::default()
        };
        if !self.target.distro.auto_loads_wpa_supplicant() {
            if let Some(wifi) = &self.wifi {
                args.wifi_country = Some(wifi.country.clone()).filter(|c| !c.is_empty());
                args.wifi_ssid = Some(wifi.ssid.clone()).filter(|s| !s.is_empty());
                args.wifi_pass = Some(wifi.pass.clone()).filter(|p| !p.is_empty());
            }
        }
        args
    }

    /// Reads every file destined for the boot partition.
    pub fn boot_payload(&self) -> SeedResult<BootPayload> {
        let firstboot = fs::read(&self.setup_script)?;
        let authorized_keys = match &self.ssh_key {
            Some(key) => Some(fs::read(key)?),
            None => None,
        };
        let post_script = match (&self.post_script, self.post_script_name()) {
            (Some(path), Some(name)) => Some((name, fs::read(path)?)),
            _ => None,
        };
        let wpa_supplicant = self
            .wifi
            .as_ref()
            .filter(|w| self.target.distro.auto_loads_wpa_supplicant() && !w.ssid.is_empty())
            .map(|w| wpa_supplicant_conf(&w.country, &w.ssid, &w.pass));
        Ok(BootPayload {
            firstboot,
            authorized_keys,
            post_script,
            wpa_supplicant,
            force_uart: self.force_uart,
        })
    }

    pub fn ssh_command(&self) -> String {
        format!(
            "ssh -o StrictHostKeyChecking=no {}@{}",
            self.target.default_user(),
            self.target.default_hostname()
        )
    }
}

fn invalid(msg: String) -> SeedError {
    ValidationError::Option(msg).into()
}

fn require_file(what: &str, path: &Path) -> SeedResult<()> {
    if !path.is_file() {
        return Err(invalid(format!("{} not found: {}", what, path.display())));
    }
    Ok(())
}

/// Per-run state shared by the pipeline steps.
pub struct FlashContext {
    pub progress_tx: Option<SyncSender<ProgressUpdate>>,
}

impl FlashContext {
    pub fn new(progress_tx: Option<SyncSender<ProgressUpdate>>) -> Self {
        Self { progress_tx }
    }

    pub(super) fn send_progress(&self, update: ProgressUpdate) {
        if let Some(ref tx) = self.progress_tx {
            let _ = tx.send(update);
        }
    }

    pub(super) fn start_phase(&self, phase: Phase) {
        info!("📍 Starting phase: {}", phase.name());
        self.send_progress(ProgressUpdate::PhaseStarted(phase));
    }

    pub(super) fn complete_phase(&self, phase: Phase) {
        info!("✅ Completed phase: {}", phase.name());
        self.send_progress(ProgressUpdate::PhaseCompleted(phase));
    }

    pub(super) fn status(&self, msg: &str) {
        info!("{}", msg);
        self.send_progress(ProgressUpdate::Status(msg.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::{Board, Manufacturer};

    fn config(dir: &Path, target: Target) -> FlashConfig {
        let image = dir.join("os.img");
        let setup = dir.join("setup.sh");
        fs::write(&image, b"img").unwrap();
        fs::write(&setup, b"#!/bin/sh\n").unwrap();
        FlashConfig::new(image, target, setup)
    }

    fn chip() -> Target {
        Target::resolve(None, Some(Board::Chip)).unwrap()
    }

    fn pi() -> Target {
        Target::resolve(Some(Manufacturer::RaspberryPi), None).unwrap()
    }

    #[test]
    fn raspbian_only_flags_are_rejected_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), chip());
        cfg.force_uart = true;
        assert!(cfg.validate().is_err());
        cfg.force_uart = false;
        cfg.five_inch = true;
        assert!(cfg.validate().is_err());

        let mut cfg = config(dir.path(), pi());
        cfg.five_inch = true;
        cfg.force_uart = true;
        cfg.validate().unwrap();
    }

    #[test]
    fn wifi_needs_ssid_and_pass_together() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), chip());
        cfg.wifi = Some(WifiConfig {
            country: "CA".into(),
            ssid: "net".into(),
            pass: String::new(),
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn wifi_goes_to_args_for_chip_and_to_file_for_pi() {
        let dir = tempfile::tempdir().unwrap();
        let wifi = WifiConfig {
            country: "CA".into(),
            ssid: "net".into(),
            pass: "hunter22".into(),
        };

        let mut cfg = config(dir.path(), chip());
        cfg.wifi = Some(wifi.clone());
        assert!(cfg.first_boot_args().render().contains(" -wc CA -ws net -wp hunter22"));
        assert!(cfg.boot_payload().unwrap().wpa_supplicant.is_none());

        let mut cfg = config(dir.path(), pi());
        cfg.wifi = Some(wifi);
        assert!(!cfg.first_boot_args().render().contains("-ws"));
        let conf = cfg.boot_payload().unwrap().wpa_supplicant.unwrap();
        assert!(conf.starts_with("country=CA\n"));
    }

    #[test]
    fn post_script_is_referenced_by_base_name() {
        let dir = tempfile::tempdir().unwrap();
        let post = dir.path().join("post-install.sh");
        fs::write(&post, b"true\n").unwrap();
        let mut cfg = config(dir.path(), pi());
        cfg.post_script = Some(post);
        assert!(cfg.first_boot_args().render().ends_with(" -- /boot/post-install.sh"));
        let payload = cfg.boot_payload().unwrap();
        assert_eq!(payload.post_script.unwrap().0, "post-install.sh");
    }

    #[test]
    fn ssh_command_uses_board_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), Target::resolve(Some(Manufacturer::HardKernel), None).unwrap());
        assert_eq!(cfg.ssh_command(), "ssh -o StrictHostKeyChecking=no odroid@odroid");
    }
}

//! CLI argument parsing for seedcard.

use clap::{Args, Parser, Subcommand, ValueEnum};
use seedcard_core::{Board, Manufacturer, MissingHookPolicy};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "seedcard")]
#[command(version)]
#[command(about = "🌱 seedcard - self-configuring SD cards for micro-computers")]
#[command(long_about = "🌱 seedcard - self-configuring SD cards for micro-computers\n\n\
    Makes a working copy of an OS image, injects a first-boot hook into its root\n\
    partition and setup files into its boot partition, then writes it to an SD card.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TOML settings file (chunk size, settle timing, root hook policy)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 💾 Patch an image and write it to an SD card
    Flash(FlashArgs),

    /// 📝 Patch a working copy of an image without flashing it
    Patch(ImageArgs),

    /// 🔍 List removable disks
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnMissingHook {
    /// Abort before anything is written
    Fail,
    /// Write the boot files anyway and print the command to run by hand
    BootOnly,
}

impl From<OnMissingHook> for MissingHookPolicy {
    fn from(value: OnMissingHook) -> Self {
        match value {
            OnMissingHook::Fail => MissingHookPolicy::Fail,
            OnMissingHook::BootOnly => MissingHookPolicy::BootOnly,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// OS image to start from (left untouched)
    #[arg(long)]
    pub image: PathBuf,

    /// Where to write the patched copy [default: <image>-mod.<ext>]
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Board manufacturer: hardkernel, ntc, raspberrypi
    #[arg(long)]
    pub manufacturer: Option<Manufacturer>,

    /// Board: odroidc1, chip, chippro, pocketchip, raspberrypi
    #[arg(long)]
    pub board: Option<Board>,

    /// First-boot script copied to /boot/firstboot.sh
    #[arg(long, default_value = "setup.sh")]
    pub setup_script: PathBuf,

    /// SSH public key to authorize [default: first key found in ~/.ssh]
    #[arg(long, conflicts_with = "no_ssh_key")]
    pub ssh_key: Option<PathBuf>,

    /// Do not install any SSH key
    #[arg(long)]
    pub no_ssh_key: bool,

    /// Email address to forward root@localhost to
    #[arg(long)]
    pub email: Option<String>,

    /// Time zone for the device [default: the host's]
    #[arg(long)]
    pub time: Option<String>,

    /// Wi-Fi country code; affects usable bands
    #[arg(long)]
    pub wifi_country: Option<String>,

    /// Wi-Fi SSID
    #[arg(long, requires = "wifi_pass")]
    pub wifi_ssid: Option<String>,

    /// Wi-Fi passphrase, or a 64 character hex PSK
    #[arg(long, requires = "wifi_ssid")]
    pub wifi_pass: Option<String>,

    /// Enable support for the 5" 800x480 display (Raspbian only)
    #[arg(long)]
    pub five_inch: bool,

    /// Enable the console on the UART (Raspbian only)
    #[arg(long)]
    pub force_uart: bool,

    /// Script to run once setup is done, copied to /boot
    #[arg(long)]
    pub post: Option<PathBuf>,

    /// What to do when the root partition has no /etc/rc.local to hook
    #[arg(long, value_enum)]
    pub on_missing_hook: Option<OnMissingHook>,
}

#[derive(Args, Debug, Clone)]
pub struct FlashArgs {
    #[command(flatten)]
    pub image: ImageArgs,

    /// Target disk (e.g. /dev/sdb, /dev/mmcblk0, /dev/disk4, \\.\PHYSICALDRIVE2)
    /// [default: the only removable disk]
    #[arg(long)]
    pub device: Option<String>,

    /// Confirm destructive operation (required unless --dry-run)
    #[arg(long)]
    pub yes_i_know: bool,

    /// Stage and patch, but never open the device
    #[arg(long)]
    pub dry_run: bool,

    /// Mount the boot partition again once the card settles
    #[arg(long)]
    pub mount_boot: bool,

    /// Keep the patched working copy after flashing
    #[arg(long)]
    pub keep_image: bool,

    /// Bytes per device write (multiple of 4096, 64 KiB to 4 MiB)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// How long to wait for the new partitions, in milliseconds
    #[arg(long)]
    pub settle_timeout_ms: Option<u64>,

    /// Partition poll interval, in milliseconds
    #[arg(long)]
    pub settle_interval_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flash_args_parse() {
        let cli = Cli::parse_from([
            "seedcard",
            "-v",
            "flash",
            "--image",
            "os.img",
            "--board",
            "pocketchip",
            "--device",
            "/dev/sdb",
            "--yes-i-know",
            "--settle-timeout-ms",
            "3000",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Command::Flash(args) => {
                assert_eq!(args.image.board, Some(Board::PocketChip));
                assert_eq!(args.device.as_deref(), Some("/dev/sdb"));
                assert!(args.yes_i_know);
                assert_eq!(args.settle_timeout_ms, Some(3000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wifi_ssid_requires_pass() {
        let res = Cli::try_parse_from([
            "seedcard",
            "patch",
            "--image",
            "os.img",
            "--board",
            "chip",
            "--wifi-ssid",
            "home",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn unknown_board_is_rejected() {
        let res = Cli::try_parse_from(["seedcard", "patch", "--image", "os.img", "--board", "nope"]);
        assert!(res.is_err());
    }
}

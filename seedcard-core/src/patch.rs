//! Root filesystem startup hook injection without a filesystem driver.
//!
//! Debian-derived images up to Debian 9 / Ubuntu 16.04 ship an
//! `/etc/rc.local` that is almost entirely comments. Its first data block is
//! found by scanning the raw root partition for the stock boilerplate and is
//! overwritten in place with a short script that runs `/boot/firstboot.sh`
//! once. Newer images no longer carry the file.

use crate::window::BoundedDiskWindow;
use seedcard_error::{SeedError, SeedResult};
use std::io::{Read, Seek, Write};

/// Filesystem block granularity the anchor is aligned to.
pub const ANCHOR_BLOCK: usize = 512;

/// Leading bytes of the stock Debian `/etc/rc.local`.
pub const RC_LOCAL_ANCHOR: &str = "#!/bin/sh -e\n#\n# rc.local\n#\n\
# This script is executed at the end of each multiuser runlevel.\n\
# Make sure that the script will \"exit 0\" on success or any other\n\
# value on error.\n#\n\
# In order to enable or disable this script just change the execution\n\
# bits.\n#\n\
# By default this script does nothing.\n";

/// Size of an untouched Debian `/etc/rc.local`: the header plus `exit 0`.
pub const STOCK_RC_LOCAL_LEN: usize = RC_LOCAL_ANCHOR.len() + "exit 0\n".len();

pub const FIRSTBOOT_LOG: &str = "/var/log/firstboot.log";
pub const FIRSTBOOT_SCRIPT: &str = "/boot/firstboot.sh";

const SCAN_CHUNK: usize = 64 * 1024;

/// Where a hook goes and what it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    /// Byte offset of the matched block inside the root partition.
    pub offset: u64,
    pub original: Vec<u8>,
    pub replacement: Vec<u8>,
}

/// Installs a run-once startup hook into a raw root partition.
pub trait StartupHookPatcher {
    /// Find the block to overwrite. Reads only.
    fn locate<T: Read + Write + Seek>(
        &self,
        root: &mut BoundedDiskWindow<T>,
    ) -> SeedResult<PatchTarget>;

    fn apply<T: Read + Write + Seek>(
        &self,
        root: &mut BoundedDiskWindow<T>,
        target: &PatchTarget,
    ) -> SeedResult<()> {
        root.write_at(target.offset, &target.replacement)
    }

    fn patch<T: Read + Write + Seek>(
        &self,
        root: &mut BoundedDiskWindow<T>,
    ) -> SeedResult<PatchTarget> {
        let target = self.locate(root)?;
        self.apply(root, &target)?;
        Ok(target)
    }
}

/// Arguments passed to `/boot/firstboot.sh` on the device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirstBootArgs {
    pub time_zone: String,
    pub email: Option<String>,
    pub five_inch: bool,
    /// An `authorized_keys` file is placed next to the script.
    pub ssh_key: bool,
    /// Only set for distros that do not pick up `wpa_supplicant.conf` from `/boot`.
    pub wifi_country: Option<String>,
    pub wifi_ssid: Option<String>,
    pub wifi_pass: Option<String>,
    /// Base name of the post-setup script copied to `/boot`.
    pub post_script: Option<String>,
}

impl FirstBootArgs {
    /// Renders the argument list, each flag with a leading space.
    pub fn render(&self) -> String {
        let mut args = format!(" -t {}", shell_quote(&self.time_zone));
        if let Some(email) = &self.email {
            args += &format!(" -e {}", shell_quote(email));
        }
        if self.five_inch {
            args += " -5";
        }
        if self.ssh_key {
            args += " -sk /boot/authorized_keys";
        }
        if let Some(country) = &self.wifi_country {
            args += &format!(" -wc {}", shell_quote(country));
        }
        if let Some(ssid) = &self.wifi_ssid {
            args += &format!(" -ws {}", shell_quote(ssid));
        }
        if let Some(pass) = &self.wifi_pass {
            args += &format!(" -wp {}", shell_quote(pass));
        }
        if let Some(post) = &self.post_script {
            args += &format!(" -- /boot/{}", shell_quote(post));
        }
        args
    }

    /// What a user has to run by hand when the hook could not be injected.
    pub fn manual_command(&self) -> String {
        format!("{}{}", FIRSTBOOT_SCRIPT, self.render())
    }
}

/// Single-quotes `value` unless it is made only of shell-safe characters.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

/// Overwrites the stock `/etc/rc.local` header.
#[derive(Debug, Clone)]
pub struct RcLocalAnchorPatcher {
    script: String,
}

impl RcLocalAnchorPatcher {
    pub fn new(args: &FirstBootArgs) -> SeedResult<Self> {
        // The trailing '#' comments out whatever is left of the old block.
        let script = format!(
            "#!/bin/sh -e\nL={};if [ ! -f $L ];then {}{} 2>&1|tee $L;fi\n#",
            FIRSTBOOT_LOG,
            FIRSTBOOT_SCRIPT,
            args.render()
        );
        if script.len() > ANCHOR_BLOCK {
            return Err(SeedError::PatchTooLarge {
                len: script.len(),
                block: ANCHOR_BLOCK,
            });
        }
        let patcher = Self { script };
        if !patcher.fits_stock_rc_local() {
            log::warn!(
                "first-boot hook is {} bytes but a stock rc.local is only {}; \
                 the shell will stop reading at the old file size",
                patcher.script.len(),
                STOCK_RC_LOCAL_LEN
            );
        }
        Ok(patcher)
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    /// Whether the hook ends inside an unmodified rc.local.
    ///
    /// The block is rewritten in place and the inode keeps its old size, so
    /// anything past [`STOCK_RC_LOCAL_LEN`] is invisible to the shell when
    /// the image ships the stock file.
    pub fn fits_stock_rc_local(&self) -> bool {
        self.script.len() <= STOCK_RC_LOCAL_LEN
    }
}

impl StartupHookPatcher for RcLocalAnchorPatcher {
    fn locate<T: Read + Write + Seek>(
        &self,
        root: &mut BoundedDiskWindow<T>,
    ) -> SeedResult<PatchTarget> {
        let anchor = RC_LOCAL_ANCHOR.as_bytes();
        let total = root.len();
        let mut buf = vec![0u8; SCAN_CHUNK];
        let mut chunk_start = 0u64;

        while chunk_start < total {
            let n = (total - chunk_start).min(SCAN_CHUNK as u64) as usize;
            root.read_at(chunk_start, &mut buf[..n])?;
            for block_start in (0..n).step_by(ANCHOR_BLOCK) {
                let block_end = (block_start + ANCHOR_BLOCK).min(n);
                let block = &buf[block_start..block_end];
                if block.starts_with(anchor) && block.len() < self.script.len() {
                    log::debug!(
                        "anchor at root offset {} has only {} bytes left in the partition",
                        chunk_start + block_start as u64,
                        block.len()
                    );
                    continue;
                }
                if block.starts_with(anchor) {
                    let offset = chunk_start + block_start as u64;
                    log::info!("🔎 Found /etc/rc.local at root offset {}", offset);
                    let mut replacement = block.to_vec();
                    replacement[..self.script.len()].copy_from_slice(self.script.as_bytes());
                    return Ok(PatchTarget {
                        offset,
                        original: block.to_vec(),
                        replacement,
                    });
                }
            }
            chunk_start += n as u64;
        }

        Err(SeedError::PatchNotFound { scanned: total })
    }
}

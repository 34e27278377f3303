//! File injection into the FAT boot partition of a working image.

use crate::window::BoundedDiskWindow;
use fatfs::{FileSystem, FsOptions};
use seedcard_error::{SeedError, SeedResult};
use std::io::{self, Read, Seek, SeekFrom, Write};

pub const FIRSTBOOT_NAME: &str = "firstboot.sh";
pub const AUTHORIZED_KEYS_NAME: &str = "authorized_keys";
pub const WPA_SUPPLICANT_NAME: &str = "wpa_supplicant.conf";
pub const CONFIG_TXT_NAME: &str = "config.txt";

/// Appended to `config.txt` to get a serial console on the Pi 3, whose
/// Bluetooth otherwise claims the full UART.
pub const UART_STANZA: &str = "\n\n# Enable console on UART on RPi3\n[pi3]\nenable_uart=1\n[all]\n";

/// Renders a `wpa_supplicant.conf` for a single WPA-PSK network.
///
/// A 64 character hex `pass` is a precomputed PSK and is written bare;
/// anything else is a passphrase and gets quoted.
pub fn wpa_supplicant_conf(country: &str, ssid: &str, pass: &str) -> String {
    let psk = if pass.len() == 64 && pass.chars().all(|c| c.is_ascii_hexdigit()) {
        pass.to_string()
    } else {
        format!("\"{}\"", pass)
    };
    format!(
        "country={}\nctrl_interface=DIR=/var/run/wpa_supplicant GROUP=netdev\nupdate_config=1\n\n\
         network={{\n\tssid=\"{}\"\n\tpsk={}\n\tkey_mgmt=WPA-PSK\n}}\n",
        country, ssid, psk
    )
}

/// Everything that goes onto the boot partition for one flash.
#[derive(Debug, Clone, Default)]
pub struct BootPayload {
    pub firstboot: Vec<u8>,
    pub authorized_keys: Option<Vec<u8>>,
    /// Base name and contents of the post-setup script.
    pub post_script: Option<(String, Vec<u8>)>,
    pub wpa_supplicant: Option<String>,
    pub force_uart: bool,
}

/// A FAT volume mounted on one partition window.
///
/// Files are created or truncated in place, so rewriting a name never leaves
/// a second directory entry behind. Call [`close`](Self::close) to flush the
/// FAT and directory metadata; dropping the writer flushes best-effort only.
pub struct BootWriter<T: Read + Write + Seek> {
    fs: FileSystem<BoundedDiskWindow<T>>,
}

impl<T: Read + Write + Seek> BootWriter<T> {
    pub fn open(window: BoundedDiskWindow<T>) -> SeedResult<Self> {
        let fs = FileSystem::new(window, FsOptions::new()).map_err(|source| SeedError::Fat {
            name: "boot partition".to_string(),
            source,
        })?;
        log::debug!("boot partition is {:?}", fs.fat_type());
        Ok(Self { fs })
    }

    /// Creates `name` in the root directory or replaces its contents.
    pub fn write_file(&self, name: &str, contents: &[u8]) -> SeedResult<()> {
        let root = self.fs.root_dir();
        let mut file = root.create_file(name).map_err(|e| fat_error(name, e))?;
        file.truncate().map_err(|e| fat_error(name, e))?;
        file.write_all(contents).map_err(|e| fat_error(name, e))?;
        file.flush().map_err(|e| fat_error(name, e))?;
        log::info!("📝 Wrote /boot/{} ({} bytes)", name, contents.len());
        Ok(())
    }

    /// Adds `contents` to the end of `name`, creating it if needed.
    pub fn append_file(&self, name: &str, contents: &[u8]) -> SeedResult<()> {
        let root = self.fs.root_dir();
        let mut file = root.create_file(name).map_err(|e| fat_error(name, e))?;
        file.seek(SeekFrom::End(0)).map_err(|e| fat_error(name, e))?;
        file.write_all(contents).map_err(|e| fat_error(name, e))?;
        file.flush().map_err(|e| fat_error(name, e))?;
        Ok(())
    }

    pub fn read_file(&self, name: &str) -> SeedResult<Vec<u8>> {
        let mut file = self
            .fs
            .root_dir()
            .open_file(name)
            .map_err(|e| fat_error(name, e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| fat_error(name, e))?;
        Ok(buf)
    }

    /// Names in the root directory.
    pub fn list(&self) -> SeedResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in self.fs.root_dir().iter() {
            let entry = entry.map_err(|e| fat_error("/", e))?;
            let name = entry.file_name();
            if name != "." && name != ".." {
                names.push(name);
            }
        }
        Ok(names)
    }

    pub fn append_uart(&self) -> SeedResult<()> {
        self.append_file(CONFIG_TXT_NAME, UART_STANZA.as_bytes())?;
        log::info!("📝 Enabled UART console in /boot/{}", CONFIG_TXT_NAME);
        Ok(())
    }

    pub fn install(&self, payload: &BootPayload) -> SeedResult<()> {
        self.write_file(FIRSTBOOT_NAME, &payload.firstboot)?;
        if let Some(keys) = &payload.authorized_keys {
            self.write_file(AUTHORIZED_KEYS_NAME, keys)?;
        }
        if let Some((name, contents)) = &payload.post_script {
            self.write_file(name, contents)?;
        }
        if let Some(conf) = &payload.wpa_supplicant {
            self.write_file(WPA_SUPPLICANT_NAME, conf.as_bytes())?;
        }
        if payload.force_uart {
            self.append_uart()?;
        }
        Ok(())
    }

    /// Flushes FAT metadata and releases the partition window.
    pub fn close(self) -> SeedResult<()> {
        self.fs.unmount().map_err(|e| fat_error("boot partition", e))
    }
}

fn fat_error(name: &str, source: io::Error) -> SeedError {
    let message = source.to_string().to_ascii_lowercase();
    if message.contains("no space") || source.kind() == io::ErrorKind::WriteZero {
        SeedError::OutOfSpace {
            name: name.to_string(),
        }
    } else if source.kind() == io::ErrorKind::AlreadyExists
        || message.contains("is a directory")
        || message.contains("short name")
    {
        SeedError::NameCollision {
            name: name.to_string(),
        }
    } else {
        SeedError::Fat {
            name: name.to_string(),
            source,
        }
    }
}

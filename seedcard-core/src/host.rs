//! Defaults taken from the machine doing the flashing.

use seedcard_hal::process::output_with_timeout;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const ZONEINFO_PREFIX: &str = "/usr/share/zoneinfo/";
const FALLBACK_TIME_ZONE: &str = "Etc/UTC";
const KEY_CANDIDATES: &[&str] = &[
    "authorized_keys",
    "id_ed25519.pub",
    "id_ecdsa.pub",
    "id_rsa.pub",
];

/// First public key found under `~/.ssh`.
pub fn find_public_key() -> Option<PathBuf> {
    dirs::home_dir().and_then(|home| find_public_key_in(&home))
}

pub fn find_public_key_in(home: &Path) -> Option<PathBuf> {
    KEY_CANDIDATES
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .find(|p| p.is_file())
}

/// The host's IANA time zone, `Etc/UTC` when it cannot be determined.
pub fn time_location() -> String {
    if let Some(zone) = fs::read_link("/etc/localtime")
        .ok()
        .and_then(|target| zone_from_localtime(&target))
    {
        return zone;
    }
    let mut cmd = Command::new("timedatectl");
    match output_with_timeout("timedatectl", &mut cmd, Duration::from_secs(5)) {
        Ok(output) if output.status.success() => {
            if let Some(zone) = zone_from_timedatectl(&String::from_utf8_lossy(&output.stdout)) {
                return zone;
            }
        }
        Ok(_) => {}
        Err(err) => log::debug!("timedatectl unavailable: {}", err),
    }
    FALLBACK_TIME_ZONE.to_string()
}

fn zone_from_localtime(target: &Path) -> Option<String> {
    target
        .to_str()?
        .strip_prefix(ZONEINFO_PREFIX)
        .filter(|z| !z.is_empty())
        .map(str::to_string)
}

fn zone_from_timedatectl(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("Time zone:")?;
        rest.split_whitespace().next().map(str::to_string)
    })
}

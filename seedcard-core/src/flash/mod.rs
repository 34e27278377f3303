//! The flash pipeline: stage, patch, lock, write, settle, remount.

pub mod config;
pub mod runner;
pub mod settle;
pub mod writer;

pub use config::{FlashConfig, FlashContext, WifiConfig};
pub use runner::{run, FlashReport, BOOT_PARTITION, ROOT_PARTITION};
pub use settle::{SettleOutcome, SettleWaiter};
pub use writer::DeviceWriter;

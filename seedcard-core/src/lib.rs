//! seedcard core: patch a micro-computer OS image so it configures itself on
//! first boot, then write it to an SD card.

pub mod boards;
pub mod boot;
pub mod flash;
pub mod host;
pub mod image;
pub mod mbr;
pub mod patch;
pub mod progress;
pub mod settings;
pub mod window;

pub use boards::{Board, Distro, Manufacturer, Target};
pub use boot::{BootPayload, BootWriter};
pub use flash::{FlashConfig, FlashReport, SettleOutcome, WifiConfig};
pub use image::DiskImage;
pub use mbr::{PartitionEntry, PartitionTable};
pub use patch::{FirstBootArgs, PatchTarget, RcLocalAnchorPatcher, StartupHookPatcher};
pub use progress::{Phase, ProgressUpdate};
pub use settings::{FlashSettings, MissingHookPolicy};
pub use window::BoundedDiskWindow;

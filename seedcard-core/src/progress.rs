//! Progress messages published while a flash runs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Stage,
    PatchRoot,
    WriteBoot,
    LockVolumes,
    Flash,
    Settle,
    MountBoot,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Validate => "Validating image",
            Phase::Stage => "Staging working copy",
            Phase::PatchRoot => "Patching root partition",
            Phase::WriteBoot => "Writing boot partition",
            Phase::LockVolumes => "Locking volumes",
            Phase::Flash => "Writing device",
            Phase::Settle => "Waiting for partitions",
            Phase::MountBoot => "Mounting boot partition",
        }
    }

    pub fn number(&self) -> usize {
        match self {
            Phase::Validate => 1,
            Phase::Stage => 2,
            Phase::PatchRoot => 3,
            Phase::WriteBoot => 4,
            Phase::LockVolumes => 5,
            Phase::Flash => 6,
            Phase::Settle => 7,
            Phase::MountBoot => 8,
        }
    }

    pub fn total() -> usize {
        8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    PhaseStarted(Phase),
    PhaseCompleted(Phase),
    /// Device write progress in bytes.
    Write { written: u64, total: u64 },
    Status(String),
    Complete,
    Error(String),
}

impl ProgressUpdate {
    /// Percentage for `Write` updates.
    pub fn percent(&self) -> Option<f64> {
        match self {
            ProgressUpdate::Write { total: 0, .. } => Some(100.0),
            ProgressUpdate::Write { written, total } => {
                Some(*written as f64 * 100.0 / *total as f64)
            }
            _ => None,
        }
    }
}

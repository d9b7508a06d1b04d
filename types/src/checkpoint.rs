use serde::{Deserialize, Serialize};

/// On-disk resume record for one task, stored as `<task_id>.ckpt`.
///
/// `checksum` is the SHA-1 hex digest of the canonical serialisation with
/// the checksum field blanked; the manager recomputes and compares it on
/// load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub task_id: String,
    pub config_hash: String,
    pub last_completed_frame: i64,
    pub total_frames: i64,
    pub output_path: String,
    pub output_file_size: u64,
    pub created_at: String,
    pub updated_at: String,
    pub version: u32,
    pub checksum: String,
}

impl CheckpointRecord {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn progress_percent(&self) -> f64 {
        if self.total_frames <= 0 {
            return 0.0;
        }
        (self.last_completed_frame + 1) as f64 / self.total_frames as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_handles_zero_totals() {
        let record = CheckpointRecord::default();
        assert_eq!(record.progress_percent(), 0.0);
    }

    #[test]
    fn progress_is_fraction_of_total() {
        let record = CheckpointRecord {
            last_completed_frame: 29,
            total_frames: 60,
            ..Default::default()
        };
        assert!((record.progress_percent() - 50.0).abs() < 1e-9);
    }
}

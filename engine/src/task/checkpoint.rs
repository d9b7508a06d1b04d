use crate::error::EngineError;
use sha1::{Digest, Sha1};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use visage_types::CheckpointRecord;

fn iso_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// SHA-1 over the record serialized with the checksum field blanked.
pub fn calculate_checksum(record: &CheckpointRecord) -> String {
    let mut blanked = record.clone();
    blanked.checksum = String::new();
    let serialized = serde_json::to_string(&blanked).unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Atomic, rate-limited persistence of per-task resume records under
/// `<dir>/<task_id>.ckpt`.
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
    last_save: Mutex<Option<Instant>>,
}

impl CheckpointManager {
    pub fn new(checkpoint_dir: impl AsRef<Path>) -> Result<Self, EngineError> {
        let checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        fs::create_dir_all(&checkpoint_dir)?;
        Ok(Self {
            checkpoint_dir,
            last_save: Mutex::new(None),
        })
    }

    pub fn checkpoint_path(&self, task_id: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{task_id}.ckpt"))
    }

    /// Persist unless a save happened within `min_interval`. Returns whether
    /// anything was written.
    pub fn save(
        &self,
        record: &CheckpointRecord,
        min_interval: Duration,
    ) -> Result<bool, EngineError> {
        let mut last_save = self
            .last_save
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = *last_save {
            if last.elapsed() < min_interval {
                return Ok(false);
            }
        }
        self.write_record(record)?;
        *last_save = Some(Instant::now());
        Ok(true)
    }

    pub fn force_save(&self, record: &CheckpointRecord) -> Result<(), EngineError> {
        let mut last_save = self
            .last_save
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.write_record(record)?;
        *last_save = Some(Instant::now());
        Ok(())
    }

    fn write_record(&self, record: &CheckpointRecord) -> Result<(), EngineError> {
        let mut prepared = record.clone();
        prepared.updated_at = iso_timestamp();
        if prepared.created_at.is_empty() {
            prepared.created_at = prepared.updated_at.clone();
        }
        prepared.version = CheckpointRecord::CURRENT_VERSION;
        prepared.checksum = calculate_checksum(&prepared);

        // Temp file + rename keeps a crash from truncating the live record.
        let temp = NamedTempFile::new_in(&self.checkpoint_dir)?;
        serde_json::to_writer_pretty(&temp, &prepared)?;
        temp.persist(self.checkpoint_path(&prepared.task_id))
            .map_err(|e| EngineError::OutputWriteFailed {
                path: self.checkpoint_path(&prepared.task_id),
                message: e.to_string(),
            })?;

        tracing::debug!(
            task_id = %prepared.task_id,
            frame = prepared.last_completed_frame,
            total = prepared.total_frames,
            "checkpoint saved"
        );
        Ok(())
    }

    /// A record only loads when it parses, its checksum verifies, and its
    /// config hash matches; anything else restarts the task from zero.
    pub fn load(&self, task_id: &str, config_hash: &str) -> Option<CheckpointRecord> {
        let path = self.checkpoint_path(task_id);
        let data = fs::read_to_string(&path).ok()?;
        let record: CheckpointRecord = match serde_json::from_str(&data) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(task_id, "invalid checkpoint format: {e}");
                return None;
            }
        };

        if record.checksum != calculate_checksum(&record) {
            tracing::error!(task_id, "checkpoint integrity check failed");
            return None;
        }
        if !config_hash.is_empty() && record.config_hash != config_hash {
            tracing::warn!(task_id, "checkpoint config hash differs, starting fresh");
            return None;
        }

        tracing::info!(
            task_id,
            resume_from = record.last_completed_frame + 1,
            total = record.total_frames,
            "checkpoint loaded"
        );
        Some(record)
    }

    pub fn exists(&self, task_id: &str) -> bool {
        self.checkpoint_path(task_id).exists()
    }

    pub fn cleanup(&self, task_id: &str) -> Result<(), EngineError> {
        let path = self.checkpoint_path(task_id);
        if path.exists() {
            fs::remove_file(&path)?;
            tracing::info!(task_id, "checkpoint cleaned up");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(task_id: &str, config_hash: &str) -> CheckpointRecord {
        CheckpointRecord {
            task_id: task_id.to_string(),
            config_hash: config_hash.to_string(),
            last_completed_frame: 30,
            total_frames: 60,
            output_path: "out/clip".to_string(),
            output_file_size: 12_345,
            ..Default::default()
        }
    }

    fn manager(dir: &Path) -> CheckpointManager {
        CheckpointManager::new(dir).unwrap()
    }

    #[test]
    fn save_then_load_round_trips_everything_but_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let original = record("resume_task", "abc123");
        manager.force_save(&original).unwrap();

        let loaded = manager.load("resume_task", "abc123").unwrap();
        assert_eq!(loaded.task_id, original.task_id);
        assert_eq!(loaded.config_hash, original.config_hash);
        assert_eq!(loaded.last_completed_frame, original.last_completed_frame);
        assert_eq!(loaded.total_frames, original.total_frames);
        assert_eq!(loaded.output_path, original.output_path);
        assert_eq!(loaded.output_file_size, original.output_file_size);
        assert!(!loaded.updated_at.is_empty());
        assert!(!loaded.checksum.is_empty());
    }

    #[test]
    fn tampered_records_fail_the_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.force_save(&record("tamper_task", "abc")).unwrap();

        let path = manager.checkpoint_path("tamper_task");
        let data = fs::read_to_string(&path).unwrap();
        let data = data.replace("\"last_completed_frame\": 30", "\"last_completed_frame\": 59");
        fs::write(&path, data).unwrap();

        assert!(manager.load("tamper_task", "abc").is_none());
    }

    #[test]
    fn config_hash_mismatch_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.force_save(&record("hash_task", "old_hash")).unwrap();
        assert!(manager.load("hash_task", "new_hash").is_none());
        assert!(manager.load("hash_task", "old_hash").is_some());
    }

    #[test]
    fn saves_are_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        let r = record("rated_task", "abc");
        assert!(manager.save(&r, Duration::from_secs(60)).unwrap());
        assert!(!manager.save(&r, Duration::from_secs(60)).unwrap());
        // Zero interval always writes.
        assert!(manager.save(&r, Duration::ZERO).unwrap());
    }

    #[test]
    fn cleanup_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        manager.force_save(&record("gone_task", "abc")).unwrap();
        assert!(manager.exists("gone_task"));
        manager.cleanup("gone_task").unwrap();
        assert!(!manager.exists("gone_task"));
    }
}

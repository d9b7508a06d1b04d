use super::{AudioPolicy, MediaBackend, MediaSink, MediaSource};
use crate::error::EngineError;
use crate::vision;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use visage_types::Frame;

const MANIFEST_NAME: &str = "manifest.json";

/// Directory-of-frames media backend: numbered PNG frames plus a JSON
/// manifest. Stands in for the external demuxer/muxer in tests and works as
/// a real interchange format for tooling that reads frame dumps.
#[derive(Debug, Clone, Default)]
pub struct ImageSequenceBackend;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    fps: f64,
    width: usize,
    height: usize,
    frame_count: u64,
    #[serde(default)]
    audio_policy: AudioPolicy,
    #[serde(default)]
    finalized: bool,
}

fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_NAME)
}

fn frame_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("frame_{index:06}.png"))
}

fn read_manifest(dir: &Path) -> Result<Manifest, EngineError> {
    let path = manifest_path(dir);
    let data = fs::read_to_string(&path).map_err(|e| EngineError::MediaOpenFailed {
        path: dir.to_path_buf(),
        message: format!("cannot read manifest: {e}"),
    })?;
    serde_json::from_str(&data).map_err(|e| EngineError::MediaOpenFailed {
        path: dir.to_path_buf(),
        message: format!("invalid manifest: {e}"),
    })
}

fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(manifest_path(dir), json).map_err(|e| EngineError::OutputWriteFailed {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })
}

pub struct ImageSequenceSource {
    dir: PathBuf,
    manifest: Manifest,
    next_index: u64,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, EngineError> {
        let manifest = read_manifest(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            next_index: 0,
        })
    }
}

impl MediaSource for ImageSequenceSource {
    fn frame_count(&self) -> u64 {
        self.manifest.frame_count
    }

    fn fps(&self) -> f64 {
        self.manifest.fps
    }

    fn dimensions(&self) -> (usize, usize) {
        (self.manifest.width, self.manifest.height)
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), EngineError> {
        if frame_index > self.manifest.frame_count {
            return Err(EngineError::MediaOpenFailed {
                path: self.dir.clone(),
                message: format!(
                    "seek to frame {frame_index} past the end ({})",
                    self.manifest.frame_count
                ),
            });
        }
        self.next_index = frame_index;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, EngineError> {
        if self.next_index >= self.manifest.frame_count {
            return Ok(None);
        }
        let path = frame_path(&self.dir, self.next_index);
        let frame = vision::read_image(&path)?;
        self.next_index += 1;
        Ok(Some(frame))
    }
}

pub struct ImageSequenceSink {
    dir: PathBuf,
    fps: f64,
    dimensions: (usize, usize),
    frames_written: u64,
}

impl ImageSequenceSink {
    pub fn create(dir: &Path, fps: f64, dimensions: (usize, usize)) -> Result<Self, EngineError> {
        fs::create_dir_all(dir).map_err(|e| EngineError::OutputWriteFailed {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            fps,
            dimensions,
            frames_written: 0,
        })
    }

    /// Reopen a partial sequence, counting the frames already on disk.
    pub fn resume(dir: &Path) -> Result<(Self, u64), EngineError> {
        let manifest = read_manifest(dir)?;
        if manifest.finalized {
            return Err(EngineError::MediaOpenFailed {
                path: dir.to_path_buf(),
                message: "sequence already finalized".to_string(),
            });
        }
        let mut written = 0;
        while frame_path(dir, written).exists() {
            written += 1;
        }
        let sink = Self {
            dir: dir.to_path_buf(),
            fps: manifest.fps,
            dimensions: (manifest.width, manifest.height),
            frames_written: written,
        };
        Ok((sink, written))
    }

    /// A checkpointable sink keeps its manifest on disk from the start.
    pub fn persist_progress(&self) -> Result<(), EngineError> {
        write_manifest(
            &self.dir,
            &Manifest {
                fps: self.fps,
                width: self.dimensions.0,
                height: self.dimensions.1,
                frame_count: self.frames_written,
                audio_policy: AudioPolicy::Skip,
                finalized: false,
            },
        )
    }
}

impl MediaSink for ImageSequenceSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), EngineError> {
        let path = frame_path(&self.dir, self.frames_written);
        vision::write_image(frame, &path)?;
        self.frames_written += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finalize(self: Box<Self>, audio: AudioPolicy) -> Result<(), EngineError> {
        // Frame dumps carry no audio track; the policy is recorded so a
        // downstream muxer knows whether to pull audio from the source.
        write_manifest(
            &self.dir,
            &Manifest {
                fps: self.fps,
                width: self.dimensions.0,
                height: self.dimensions.1,
                frame_count: self.frames_written,
                audio_policy: audio,
                finalized: true,
            },
        )
    }
}

impl MediaBackend for ImageSequenceBackend {
    fn probe(&self, path: &Path) -> bool {
        path.is_dir() && manifest_path(path).exists()
    }

    fn open_source(&self, path: &Path) -> Result<Box<dyn MediaSource>, EngineError> {
        Ok(Box::new(ImageSequenceSource::open(path)?))
    }

    fn create_sink(
        &self,
        path: &Path,
        fps: f64,
        dimensions: (usize, usize),
    ) -> Result<Box<dyn MediaSink>, EngineError> {
        let sink = ImageSequenceSink::create(path, fps, dimensions)?;
        sink.persist_progress()?;
        Ok(Box::new(sink))
    }

    fn resume_sink(&self, path: &Path) -> Result<(Box<dyn MediaSink>, u64), EngineError> {
        let (sink, written) = ImageSequenceSink::resume(path)?;
        Ok((Box::new(sink), written))
    }

    fn commit(&self, temp_path: &Path, final_path: &Path) -> Result<(), EngineError> {
        if final_path.exists() {
            fs::remove_dir_all(final_path).map_err(|e| EngineError::OutputWriteFailed {
                path: final_path.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        fs::rename(temp_path, final_path).map_err(|e| EngineError::OutputWriteFailed {
            path: final_path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    fn gradient(seed: u8) -> Frame {
        Array3::from_shape_fn((16, 16, 3), |(y, x, c)| {
            seed.wrapping_add((y * 5 + x * 3 + c) as u8)
        })
    }

    #[test]
    fn sink_then_source_round_trips_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip");

        let backend = ImageSequenceBackend;
        let mut sink = backend.create_sink(&path, 25.0, (16, 16)).unwrap();
        for seed in 0..3u8 {
            sink.write_frame(&gradient(seed)).unwrap();
        }
        assert_eq!(sink.frames_written(), 3);
        sink.finalize(AudioPolicy::Skip).unwrap();

        assert!(backend.probe(&path));
        let mut source = backend.open_source(&path).unwrap();
        assert_eq!(source.frame_count(), 3);
        assert_eq!(source.dimensions(), (16, 16));
        let first = source.read_frame().unwrap().unwrap();
        assert_eq!(first, gradient(0));
        source.seek(2).unwrap();
        assert_eq!(source.read_frame().unwrap().unwrap(), gradient(2));
        assert!(source.read_frame().unwrap().is_none());
    }

    #[test]
    fn resume_counts_existing_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial");

        let backend = ImageSequenceBackend;
        let mut sink = backend.create_sink(&path, 30.0, (16, 16)).unwrap();
        sink.write_frame(&gradient(1)).unwrap();
        sink.write_frame(&gradient(2)).unwrap();
        drop(sink); // interrupted before finalize

        let (mut resumed, written) = backend.resume_sink(&path).unwrap();
        assert_eq!(written, 2);
        resumed.write_frame(&gradient(3)).unwrap();
        resumed.finalize(AudioPolicy::Copy).unwrap();

        let source = backend.open_source(&path).unwrap();
        assert_eq!(source.frame_count(), 3);
    }

    #[test]
    fn commit_replaces_the_final_path() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("work");
        let done = dir.path().join("done");

        let backend = ImageSequenceBackend;
        let sink = backend.create_sink(&temp, 10.0, (16, 16)).unwrap();
        sink.finalize(AudioPolicy::Skip).unwrap();
        backend.commit(&temp, &done).unwrap();
        assert!(backend.probe(&done));
        assert!(!temp.exists());
    }
}

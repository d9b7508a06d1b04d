use crate::config::{self, AppConfig, TaskConfig};
use crate::context::{EngineBuilder, EngineContext};
use crate::error::EngineError;
use crate::media::{AudioPolicy, ImageSequenceBackend, MediaBackend, MediaSink, MediaSource};
use crate::processors::FrameProcessor;
use crate::task::TaskRunner;
use async_trait::async_trait;
use ndarray::Array3;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use visage_types::{Frame, FrameData};

const CLIP_FRAMES: u64 = 60;

fn test_context(dir: &Path) -> Arc<EngineContext> {
    let app_config = AppConfig {
        model_base_path: dir.join("models"),
        model_catalog_path: dir.join("missing_catalog.json"),
        checkpoint_dir: dir.join("checkpoints"),
        ..Default::default()
    };
    Arc::new(EngineBuilder::new(app_config).build().unwrap())
}

/// Every frame carries its sequence id in the pixels, so ordering survives
/// the trip through disk.
fn stamped_frame(sequence_id: u64) -> Frame {
    Array3::from_elem((24, 32, 3), (sequence_id % 251) as u8)
}

fn write_clip(dir: &Path) -> std::path::PathBuf {
    let clip_path = dir.join("clip");
    let backend = ImageSequenceBackend;
    let mut sink = backend.create_sink(&clip_path, 25.0, (32, 24)).unwrap();
    for sequence_id in 0..CLIP_FRAMES {
        sink.write_frame(&stamped_frame(sequence_id)).unwrap();
    }
    sink.finalize(AudioPolicy::Skip).unwrap();
    clip_path
}

fn video_task(dir: &Path, clip: &Path) -> TaskConfig {
    let source = dir.join("source.png");
    std::fs::File::create(&source).unwrap();
    let mut task = TaskConfig::example();
    task.task_info.id = "clip_task".to_string();
    task.io.source_paths = vec![source];
    task.io.target_paths = vec![clip.to_path_buf()];
    task.io.output.path = dir.join("out");
    task.resource.thread_count = 4;
    task.resource.max_queue_size = 8;
    task
}

/// Forwards frames untouched, recording which sequence ids it saw and
/// optionally firing a cancellation at a chosen frame.
struct Recorder {
    seen_min: AtomicU64,
    seen_count: AtomicU64,
    cancel_at: Option<u64>,
    token: CancellationToken,
}

impl Recorder {
    fn new(cancel_at: Option<u64>, token: CancellationToken) -> Self {
        Self {
            seen_min: AtomicU64::new(u64::MAX),
            seen_count: AtomicU64::new(0),
            cancel_at,
            token,
        }
    }
}

#[async_trait]
impl FrameProcessor for Recorder {
    fn name(&self) -> String {
        "recorder".to_string()
    }

    async fn process(&self, frame: FrameData) -> Result<FrameData, EngineError> {
        if !frame.is_end_of_stream {
            self.seen_min.fetch_min(frame.sequence_id, Ordering::SeqCst);
            self.seen_count.fetch_add(1, Ordering::SeqCst);
            if self.cancel_at == Some(frame.sequence_id) {
                self.token.cancel();
            }
        }
        Ok(frame)
    }
}

#[tokio::test]
async fn video_orchestration_writes_every_frame_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let context = test_context(dir.path());
    let clip = write_clip(dir.path());
    let task = video_task(dir.path(), &clip);

    let token = CancellationToken::new();
    let recorder = Arc::new(Recorder::new(None, token.clone()));
    let processors: Vec<Arc<dyn FrameProcessor>> = vec![Arc::clone(&recorder) as _];

    let runner = TaskRunner::new(Arc::clone(&context), token);
    let output = runner
        .process_video_target(&task, &clip, &processors, None, false, None)
        .await
        .unwrap();

    let backend = ImageSequenceBackend;
    let mut source = backend.open_source(&output).unwrap();
    assert_eq!(source.frame_count(), CLIP_FRAMES);
    assert_eq!(source.dimensions(), (32, 24));
    for sequence_id in 0..CLIP_FRAMES {
        let frame = source.read_frame().unwrap().unwrap();
        assert_eq!(frame, stamped_frame(sequence_id), "frame {sequence_id} out of order");
    }

    assert_eq!(recorder.seen_count.load(Ordering::SeqCst), CLIP_FRAMES);
    // Completion removes the resume record.
    assert!(!context.checkpoint_manager.exists("clip_task"));
    let summary = runner.metrics().summary();
    assert_eq!(summary.processed_frames, CLIP_FRAMES as i64);
    assert_eq!(summary.failed_frames, 0);
}

#[tokio::test]
async fn interrupted_video_resumes_from_its_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let context = test_context(dir.path());
    let clip = write_clip(dir.path());
    let task = video_task(dir.path(), &clip);
    let config_hash = config::config_hash(&task);

    // First run: a mid-stream signal interrupts processing.
    let token = CancellationToken::new();
    let recorder = Arc::new(Recorder::new(Some(30), token.clone()));
    let processors: Vec<Arc<dyn FrameProcessor>> = vec![Arc::clone(&recorder) as _];
    let runner = TaskRunner::new(Arc::clone(&context), token);
    let result = runner
        .process_video_target(&task, &clip, &processors, None, false, None)
        .await;
    assert!(matches!(result, Err(EngineError::TaskCancelled)));

    let resume_from = context
        .checkpoint_manager
        .load("clip_task", &config_hash)
        .map(|record| record.last_completed_frame as u64 + 1)
        .unwrap_or(0);
    assert!(resume_from < CLIP_FRAMES);

    // Second run resumes instead of starting over.
    let token = CancellationToken::new();
    let recorder = Arc::new(Recorder::new(None, token.clone()));
    let processors: Vec<Arc<dyn FrameProcessor>> = vec![Arc::clone(&recorder) as _];
    let runner = TaskRunner::new(Arc::clone(&context), token);
    let output = runner
        .process_video_target(&task, &clip, &processors, None, false, None)
        .await
        .unwrap();

    if resume_from > 0 {
        assert_eq!(recorder.seen_min.load(Ordering::SeqCst), resume_from);
    }

    // The resumed output is identical to an uninterrupted run.
    let backend = ImageSequenceBackend;
    let mut source = backend.open_source(&output).unwrap();
    assert_eq!(source.frame_count(), CLIP_FRAMES);
    for sequence_id in 0..CLIP_FRAMES {
        let frame = source.read_frame().unwrap().unwrap();
        assert_eq!(frame, stamped_frame(sequence_id));
    }
    assert!(!context.checkpoint_manager.exists("clip_task"));
}

/// Marks every frame as skipped the way a face stage does when no face is
/// found; pixels pass through untouched.
struct SkipAll;

#[async_trait]
impl FrameProcessor for SkipAll {
    fn name(&self) -> String {
        "skip_all".to_string()
    }

    async fn process(&self, mut frame: FrameData) -> Result<FrameData, EngineError> {
        if !frame.is_end_of_stream {
            frame.skipped = true;
        }
        Ok(frame)
    }
}

#[tokio::test]
async fn faceless_frames_pass_through_and_count_as_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let context = test_context(dir.path());
    let clip = write_clip(dir.path());
    let mut task = video_task(dir.path(), &clip);
    task.resource.max_frames = Some(5);

    let token = CancellationToken::new();
    let processors: Vec<Arc<dyn FrameProcessor>> = vec![Arc::new(SkipAll) as _];
    let runner = TaskRunner::new(Arc::clone(&context), token);
    let output = runner
        .process_video_target(&task, &clip, &processors, None, false, None)
        .await
        .unwrap();

    let backend = ImageSequenceBackend;
    let mut source = backend.open_source(&output).unwrap();
    assert_eq!(source.frame_count(), 5);
    // Pass-through means pixels survive byte for byte.
    assert_eq!(source.read_frame().unwrap().unwrap(), stamped_frame(0));

    let summary = runner.metrics().summary();
    assert_eq!(summary.skipped_frames, 5);
    assert_eq!(summary.failed_frames, 0);
}

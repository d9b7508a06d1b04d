use crate::config::{
    self, StepParams, TaskConfig,
};
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::face::detector::DetectorKind;
use crate::face::landmarker::LandmarkerKind;
use crate::face::selector::{SelectorMode, SelectorOptions};
use crate::face::{AnalyserConfig, AnalyserOptions, FaceAnalyser};
use crate::mask::{MaskKind, MaskOptions, MaskerHub};
use crate::media::{MediaSink, MediaSource};
use crate::pipeline::{Pipeline, PipelineConfig};
use crate::processors::{
    ExpressionRestorerAdapter, FaceEnhancerKind, FaceProcessorAdapter, FrameEnhancerAdapter,
    FrameEnhancerKind, FrameProcessor, ProcessorKind,
};
use crate::task::checkpoint::CheckpointManager;
use crate::task::metrics::MetricsCollector;
use crate::vision;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use visage_types::{CheckpointRecord, Embedding, FrameData};

const CHECKPOINT_MIN_INTERVAL: Duration = Duration::from_secs(2);
const PROGRESS_MIN_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub task_id: String,
    pub current_frame: u64,
    pub total_frames: u64,
    pub current_step: String,
}

pub type ProgressCallback = Arc<dyn Fn(TaskProgress) + Send + Sync>;

#[derive(Debug, Default)]
pub struct TaskReport {
    pub outputs: Vec<PathBuf>,
}

/// Exit codes surfaced by the binary.
pub fn exit_code(result: &Result<TaskReport, EngineError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(EngineError::TaskCancelled) => 130,
        Err(EngineError::ConfigInvalid { .. }) => 1,
        Err(_) => 2,
    }
}

fn detector_kind_for(model_name: &str) -> DetectorKind {
    let lowered = model_name.to_ascii_lowercase();
    if lowered.contains("yolo") {
        DetectorKind::Yolo
    } else if lowered.contains("scrfd") {
        DetectorKind::Scrfd
    } else {
        DetectorKind::Retina
    }
}

fn landmarker_kind_for(model_name: &str) -> LandmarkerKind {
    if model_name.to_ascii_lowercase().contains("peppa") {
        LandmarkerKind::PeppaWutz
    } else {
        LandmarkerKind::TwoDFan
    }
}

fn face_enhancer_kind_for(model_name: &str) -> FaceEnhancerKind {
    if model_name.to_ascii_lowercase().contains("codeformer") {
        FaceEnhancerKind::CodeFormer
    } else {
        FaceEnhancerKind::GfpGan
    }
}

fn frame_enhancer_kind_for(model_name: &str) -> FrameEnhancerKind {
    if model_name.to_ascii_lowercase().contains("hat") {
        FrameEnhancerKind::RealHatGan
    } else {
        FrameEnhancerKind::RealEsrgan
    }
}

/// Orchestrates one task end-to-end: validation, chain construction, source
/// identity, then every target through the pipeline.
pub struct TaskRunner {
    context: Arc<EngineContext>,
    cancellation_token: CancellationToken,
    metrics: Arc<MetricsCollector>,
}

impl TaskRunner {
    pub fn new(context: Arc<EngineContext>, cancellation_token: CancellationToken) -> Self {
        Self {
            context,
            cancellation_token,
            metrics: Arc::new(MetricsCollector::new("unassigned")),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.metrics)
    }

    #[tracing::instrument(skip_all, fields(task_id = %task.task_info.id))]
    pub async fn run(
        &mut self,
        mut task: TaskConfig,
        progress: Option<ProgressCallback>,
    ) -> Result<TaskReport, EngineError> {
        self.context.app_config.merge_into(&mut task);
        config::validate_or_error(&task)?;
        self.metrics = Arc::new(MetricsCollector::new(task.task_info.id.clone()));

        let analyser = self.build_analyser(&task)?;
        let masker_hub = self.build_masker_hub(&task)?;
        let source_embedding = self.build_source_embedding(&task, &analyser)?;
        let processors =
            self.build_chain(&task, &analyser, &masker_hub, source_embedding.as_ref())?;
        let needs_original = task
            .pipeline
            .iter()
            .any(|step| step.enabled && step.step == ProcessorKind::ExpressionRestorer.step_name());

        let mut report = TaskReport::default();
        let mut first_error: Option<EngineError> = None;

        for target in task.io.target_paths.clone() {
            if self.cancellation_token.is_cancelled() {
                self.export_metrics();
                return Err(EngineError::TaskCancelled);
            }
            let result = if vision::is_image_path(&target) {
                self.process_image_target(
                    &task,
                    &target,
                    &processors,
                    source_embedding.clone(),
                    needs_original,
                )
                .await
            } else if self.context.media_backend.probe(&target) {
                self.process_video_target(
                    &task,
                    &target,
                    &processors,
                    source_embedding.clone(),
                    needs_original,
                    progress.clone(),
                )
                .await
            } else {
                Err(EngineError::MediaOpenFailed {
                    path: target.clone(),
                    message: "not an image and no media backend recognised it".to_string(),
                })
            };

            match result {
                Ok(output) => report.outputs.push(output),
                Err(EngineError::TaskCancelled) => {
                    self.export_metrics();
                    return Err(EngineError::TaskCancelled);
                }
                Err(e) => {
                    // A failed media item does not abort the remaining ones.
                    tracing::error!(target = %target.display(), "target failed: {e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        self.export_metrics();
        match first_error {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    fn export_metrics(&self) {
        if let Some(path) = &self.context.app_config.metrics_path {
            if let Err(e) = self.metrics.export_json(path) {
                tracing::error!("metrics export failed: {e}");
            }
        }
    }

    fn build_analyser(&self, task: &TaskConfig) -> Result<Arc<FaceAnalyser>, EngineError> {
        let analysis = &task.face_analysis;
        let repository = &self.context.model_repository;

        let mut detectors = Vec::new();
        for model_name in &analysis.face_detector.models {
            detectors.push((detector_kind_for(model_name), repository.ensure(model_name)?));
        }
        let mut landmarkers = Vec::new();
        for model_name in &analysis.face_landmarker.models {
            landmarkers.push((
                landmarker_kind_for(model_name),
                repository.ensure(model_name)?,
            ));
        }
        let landmark_68_from_5 = analysis
            .face_landmarker
            .landmark_68_from_5_model
            .as_ref()
            .map(|name| repository.ensure(name))
            .transpose()?;
        let recognizer = analysis
            .face_recognizer
            .model
            .as_ref()
            .map(|name| repository.ensure(name))
            .transpose()?;
        let classifier = analysis
            .face_classifier
            .model
            .as_ref()
            .map(|name| repository.ensure(name))
            .transpose()?;

        let config = AnalyserConfig {
            detectors,
            landmarkers,
            landmark_68_from_5,
            recognizer,
            classifier,
            session_options: self.context.session_options.clone(),
            detector_score_threshold: analysis.face_detector.score_threshold,
            landmarker_score_threshold: analysis.face_landmarker.score_threshold,
        };
        Ok(Arc::new(FaceAnalyser::new(
            Arc::clone(&self.context.face_registry),
            Arc::clone(&self.context.face_store),
            config,
        )))
    }

    fn build_masker_hub(&self, task: &TaskConfig) -> Result<Arc<MaskerHub>, EngineError> {
        let masker = &task.face_analysis.face_masker;
        let occlusion = masker
            .occlusion_model
            .as_ref()
            .map(|name| -> Result<_, EngineError> {
                let path = self.context.model_repository.ensure(name)?;
                self.context
                    .face_registry
                    .occlusion_masker(&path, &self.context.session_options)
            })
            .transpose()?;
        let region = masker
            .region_model
            .as_ref()
            .map(|name| -> Result<_, EngineError> {
                let path = self.context.model_repository.ensure(name)?;
                self.context
                    .face_registry
                    .region_masker(&path, &self.context.session_options)
            })
            .transpose()?;
        Ok(Arc::new(MaskerHub::new(occlusion, region)))
    }

    /// Mean identity over every face in every source image.
    fn build_source_embedding(
        &self,
        task: &TaskConfig,
        analyser: &Arc<FaceAnalyser>,
    ) -> Result<Option<Embedding>, EngineError> {
        let needs_identity = task
            .pipeline
            .iter()
            .any(|step| step.enabled && step.step == ProcessorKind::FaceSwapper.step_name());
        if !needs_identity {
            return Ok(None);
        }

        let mut frames = Vec::new();
        for path in &task.io.source_paths {
            if vision::is_image_path(path) {
                frames.push(vision::read_image(path)?);
            }
        }
        let average = analyser.get_average_face_from_frames(&frames, &AnalyserOptions::default())?;
        match average {
            Some(face) if !face.embedding.is_empty() => Ok(Some(face.embedding)),
            _ => Err(EngineError::ProcessorFailed {
                name: "source_analysis".to_string(),
                message: "no usable face found in the source images".to_string(),
            }),
        }
    }

    fn selector_options(
        &self,
        task: &TaskConfig,
        params: &crate::config::FaceSwapperParams,
        analyser: &Arc<FaceAnalyser>,
    ) -> Result<SelectorOptions, EngineError> {
        let mut options = SelectorOptions {
            similarity_threshold: task.face_analysis.face_recognizer.similarity_threshold,
            ..Default::default()
        };
        options.mode = match params.face_selector_mode {
            crate::config::SelectorModeConfig::Many => SelectorMode::Many,
            crate::config::SelectorModeConfig::One => SelectorMode::One,
            crate::config::SelectorModeConfig::Reference => SelectorMode::Reference,
        };
        if options.mode == SelectorMode::Reference {
            let reference_path = params.reference_face_path.as_ref().ok_or_else(|| {
                EngineError::ConfigInvalid {
                    yaml_path: "pipeline.params.reference_face_path".to_string(),
                    expected: "a reference image".to_string(),
                    code: visage_types::ErrorCode::RequiredFieldMissing,
                }
            })?;
            let frame = vision::read_image(reference_path)?;
            let reference = analyser
                .get_one_face(&frame, 0, &AnalyserOptions::default())?
                .ok_or(EngineError::NoFaceDetected)?;
            options.reference_embedding = Some(reference.normed_embedding);
        }
        Ok(options)
    }

    fn build_chain(
        &self,
        task: &TaskConfig,
        analyser: &Arc<FaceAnalyser>,
        masker_hub: &Arc<MaskerHub>,
        source_embedding: Option<&Embedding>,
    ) -> Result<Vec<Arc<dyn FrameProcessor>>, EngineError> {
        let repository = &self.context.model_repository;
        let pool = &self.context.processor_pool;
        let options = &self.context.session_options;
        let masker_config = &task.face_analysis.face_masker;

        let mut mask_kinds: HashSet<MaskKind> = [MaskKind::Box].into_iter().collect();
        if masker_config.occlusion_model.is_some() {
            mask_kinds.insert(MaskKind::Occlusion);
        }
        if masker_config.region_model.is_some() {
            mask_kinds.insert(MaskKind::Region);
        }

        let mut chain: Vec<Arc<dyn FrameProcessor>> = Vec::new();
        for step in task.pipeline.iter().filter(|step| step.enabled) {
            match &step.params {
                StepParams::FaceSwapper(params) => {
                    if source_embedding.is_none() {
                        return Err(EngineError::ProcessorFailed {
                            name: step.step.clone(),
                            message: "face swap requires a source identity".to_string(),
                        });
                    }
                    let model_path = repository.ensure(&params.model)?;
                    let swapper = pool.in_swapper(&model_path, options)?;
                    let analyser_options = AnalyserOptions {
                        selector: self.selector_options(task, params, analyser)?,
                        ..Default::default()
                    };
                    let mask_options = MaskOptions {
                        kinds: mask_kinds.clone(),
                        box_blur: params.face_mask_blur,
                        box_padding: params.face_mask_padding,
                        ..Default::default()
                    };
                    chain.push(Arc::new(FaceProcessorAdapter::new(
                        swapper,
                        Arc::clone(analyser),
                        Arc::clone(masker_hub),
                        analyser_options,
                        mask_options,
                        100,
                    )));
                }
                StepParams::FaceEnhancer(params) => {
                    let model_path = repository.ensure(&params.model)?;
                    let kind = face_enhancer_kind_for(&params.model);
                    let enhancer = pool.face_enhancer(kind, &model_path, options)?;
                    chain.push(Arc::new(FaceProcessorAdapter::new(
                        enhancer,
                        Arc::clone(analyser),
                        Arc::clone(masker_hub),
                        AnalyserOptions::default(),
                        MaskOptions {
                            kinds: [MaskKind::Box].into_iter().collect(),
                            ..Default::default()
                        },
                        params.blend,
                    )));
                }
                StepParams::ExpressionRestorer(params) => {
                    let feature =
                        repository.ensure(&format!("{}_feature_extractor", params.model))?;
                    let motion =
                        repository.ensure(&format!("{}_motion_extractor", params.model))?;
                    let generator = repository.ensure(&format!("{}_generator", params.model))?;
                    let restorer = pool.live_portrait(&feature, &motion, &generator, options)?;
                    chain.push(Arc::new(ExpressionRestorerAdapter::new(
                        restorer,
                        Arc::clone(analyser),
                        Arc::clone(masker_hub),
                        AnalyserOptions::default(),
                        MaskOptions {
                            kinds: [MaskKind::Box].into_iter().collect(),
                            ..Default::default()
                        },
                        params.restore_factor,
                    )));
                }
                StepParams::FrameEnhancer(params) => {
                    let model_path = repository.ensure(&params.model)?;
                    let kind = frame_enhancer_kind_for(&params.model);
                    let enhancer =
                        pool.frame_enhancer(kind, &model_path, options, params.scale)?;
                    chain.push(Arc::new(FrameEnhancerAdapter::new(enhancer, params.blend)));
                }
            }
        }
        Ok(chain)
    }

    fn resolve_output_path(
        &self,
        task: &TaskConfig,
        target: &Path,
        extension: Option<&str>,
    ) -> Result<PathBuf, EngineError> {
        let output = &task.io.output;
        std::fs::create_dir_all(&output.path)?;

        let stem = target
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        let file_name = match extension {
            Some(ext) => format!("{}{stem}{}.{ext}", output.prefix, output.suffix),
            None => format!("{}{stem}{}", output.prefix, output.suffix),
        };
        let mut path = output.path.join(&file_name);

        if path.exists() {
            match output.conflict_policy {
                crate::config::ConflictPolicy::Error => {
                    return Err(EngineError::OutputWriteFailed {
                        path,
                        message: "output already exists and conflict policy is error".to_string(),
                    });
                }
                crate::config::ConflictPolicy::Overwrite => {}
                crate::config::ConflictPolicy::Rename => {
                    for counter in 1.. {
                        let candidate = match extension {
                            Some(ext) => output.path.join(format!(
                                "{}{stem}{}_{counter}.{ext}",
                                output.prefix, output.suffix
                            )),
                            None => output.path.join(format!(
                                "{}{stem}{}_{counter}",
                                output.prefix, output.suffix
                            )),
                        };
                        if !candidate.exists() {
                            path = candidate;
                            break;
                        }
                    }
                }
            }
        }
        Ok(path)
    }

    pub(crate) async fn process_image_target(
        &self,
        task: &TaskConfig,
        target: &Path,
        processors: &[Arc<dyn FrameProcessor>],
        source_embedding: Option<Embedding>,
        needs_original: bool,
    ) -> Result<PathBuf, EngineError> {
        let _timer = self.metrics.step_timer("image_target");
        let image = vision::read_image(target)?;

        let pipeline = Arc::new(Pipeline::new(
            PipelineConfig {
                worker_thread_count: task.resource.thread_count,
                max_queue_size: task.resource.max_queue_size,
            },
            processors.to_vec(),
        ));
        pipeline.start().await;

        let mut frame = FrameData::new(0, image.clone());
        if let Some(embedding) = source_embedding {
            frame.set_source_embedding(embedding);
        }
        if needs_original {
            frame.set_original_image(image);
        }
        pipeline.push_frame(frame).await;
        pipeline.push_frame(FrameData::end_of_stream(1)).await;

        self.metrics.set_total_frames(1);
        let mut output_frame = None;
        while let Some(frame) = pipeline.pop_frame().await {
            if frame.is_end_of_stream {
                break;
            }
            if frame.failed {
                self.metrics.record_frame_failed();
                pipeline.stop().await;
                return Err(EngineError::ProcessorFailed {
                    name: "pipeline".to_string(),
                    message: format!("frame {} failed", frame.sequence_id),
                });
            }
            if frame.skipped {
                self.metrics.record_frame_skipped();
            } else {
                self.metrics.record_frame_completed();
            }
            output_frame = frame.image;
        }
        pipeline.join().await;

        let output_frame = output_frame.ok_or_else(|| EngineError::ProcessorFailed {
            name: "pipeline".to_string(),
            message: "pipeline produced no output frame".to_string(),
        })?;
        let output_path =
            self.resolve_output_path(task, target, Some(task.io.output.image_format.as_str()))?;
        vision::write_image(&output_frame, &output_path)?;
        tracing::info!(path = %output_path.display(), "image target written");
        Ok(output_path)
    }

    pub(crate) async fn process_video_target(
        &self,
        task: &TaskConfig,
        target: &Path,
        processors: &[Arc<dyn FrameProcessor>],
        source_embedding: Option<Embedding>,
        needs_original: bool,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf, EngineError> {
        let _timer = self.metrics.step_timer("video_target");
        let backend = &self.context.media_backend;
        let checkpoints: &Arc<CheckpointManager> = &self.context.checkpoint_manager;

        let mut source = backend.open_source(target)?;
        let fps = source.fps();
        let dimensions = source.dimensions();
        let stride = task.resource.frame_stride.max(1);
        let mut total_frames = source.frame_count().div_ceil(stride);
        if let Some(max_frames) = task.resource.max_frames {
            total_frames = total_frames.min(max_frames);
        }
        self.metrics.set_total_frames(total_frames as i64);

        let output_path = self.resolve_output_path(task, target, None)?;
        let temp_path = output_path.with_extension("working");
        let config_hash = config::config_hash(task);
        let task_id = task.task_info.id.clone();

        // Resume only when a valid checkpoint matches this exact config.
        let resume_frame = checkpoints
            .load(&task_id, &config_hash)
            .filter(|_| temp_path.exists())
            .map(|record| (record.last_completed_frame + 1) as u64);
        let (mut sink, start_frame) = match resume_frame {
            Some(frame_index) => {
                let (sink, written) = backend.resume_sink(&temp_path)?;
                // The sink appends, so the frames already on disk are the
                // ground truth; a rate-limited checkpoint may lag behind.
                let start = written;
                tracing::info!(checkpoint_frame = frame_index, start, "resuming video target");
                (sink, start)
            }
            None => {
                if temp_path.exists() {
                    std::fs::remove_dir_all(&temp_path).ok();
                }
                (backend.create_sink(&temp_path, fps, dimensions)?, 0)
            }
        };

        let mut pipeline = Pipeline::new(
            PipelineConfig {
                worker_thread_count: task.resource.thread_count,
                max_queue_size: task.resource.max_queue_size,
            },
            processors.to_vec(),
        );
        pipeline.set_first_sequence_id(start_frame);
        let pipeline = Arc::new(pipeline);
        pipeline.start().await;

        // Producer: stamps dense sequence ids, honours stride and
        // max_frames, stops on cancellation.
        source.seek(start_frame * stride)?;
        let producer_pipeline = Arc::clone(&pipeline);
        let producer_token = self.cancellation_token.clone();
        let producer: tokio::task::JoinHandle<Result<(), EngineError>> =
            tokio::spawn(async move {
                let mut sequence_id = start_frame;
                loop {
                    if producer_token.is_cancelled() || sequence_id >= total_frames {
                        break;
                    }
                    let Some(image) = source.read_frame()? else {
                        break;
                    };
                    let mut frame = FrameData::new(sequence_id, image);
                    if let Some(embedding) = &source_embedding {
                        frame.set_source_embedding(embedding.clone());
                    }
                    if needs_original {
                        if let Some(image) = frame.image.clone() {
                            frame.set_original_image(image);
                        }
                    }
                    if !producer_pipeline.push_frame(frame).await {
                        return Ok(());
                    }
                    sequence_id += 1;

                    // Honour the stride by dropping the in-between frames.
                    for _ in 1..stride {
                        if source.read_frame()?.is_none() {
                            break;
                        }
                    }
                }
                producer_pipeline
                    .push_frame(FrameData::end_of_stream(sequence_id))
                    .await;
                Ok(())
            });

        // Consumer: writes in order, updating metrics, checkpoint and
        // progress as frames complete.
        let mut last_progress = Instant::now() - PROGRESS_MIN_INTERVAL;
        let mut item_error: Option<EngineError> = None;
        let mut cancelled = false;
        loop {
            if self.cancellation_token.is_cancelled() {
                cancelled = true;
                break;
            }
            let Some(frame) = pipeline.pop_frame().await else {
                cancelled = true;
                break;
            };
            if frame.is_end_of_stream {
                // A cancelled producer also ends the stream with EOS; the
                // token distinguishes that from a genuinely drained source.
                cancelled = self.cancellation_token.is_cancelled();
                break;
            }

            if frame.failed {
                self.metrics.record_frame_failed();
                item_error = Some(EngineError::ProcessorFailed {
                    name: "pipeline".to_string(),
                    message: format!("frame {} failed", frame.sequence_id),
                });
                break;
            }
            if frame.skipped {
                self.metrics.record_frame_skipped();
            } else {
                self.metrics.record_frame_completed();
            }

            let Some(image) = frame.image else {
                continue;
            };
            if let Err(e) = sink.write_frame(&image) {
                item_error = Some(e);
                break;
            }

            let record = CheckpointRecord {
                task_id: task_id.clone(),
                config_hash: config_hash.clone(),
                last_completed_frame: frame.sequence_id as i64,
                total_frames: total_frames as i64,
                output_path: output_path.display().to_string(),
                output_file_size: 0,
                ..Default::default()
            };
            if let Err(e) = checkpoints.save(&record, CHECKPOINT_MIN_INTERVAL) {
                tracing::warn!("checkpoint save failed: {e}");
            }

            if let Some(callback) = &progress {
                if last_progress.elapsed() >= PROGRESS_MIN_INTERVAL {
                    last_progress = Instant::now();
                    callback(TaskProgress {
                        task_id: task_id.clone(),
                        current_frame: frame.sequence_id + 1,
                        total_frames,
                        current_step: "processing".to_string(),
                    });
                }
            }
        }

        if cancelled || item_error.is_some() {
            // Keep the partial output and checkpoint so the next run can
            // resume; just drain the workers.
            let written = sink.frames_written();
            pipeline.stop().await;
            producer.abort();
            if written > 0 {
                let record = CheckpointRecord {
                    task_id: task_id.clone(),
                    config_hash,
                    last_completed_frame: written as i64 - 1,
                    total_frames: total_frames as i64,
                    output_path: output_path.display().to_string(),
                    output_file_size: 0,
                    ..Default::default()
                };
                checkpoints.force_save(&record)?;
            }
            return Err(match item_error {
                Some(error) => error,
                None => EngineError::TaskCancelled,
            });
        }

        match producer.await {
            Ok(result) => result?,
            Err(join_error) => {
                return Err(EngineError::ProcessorFailed {
                    name: "producer".to_string(),
                    message: join_error.to_string(),
                })
            }
        }
        pipeline.join().await;

        sink.finalize(task.io.output.audio_policy)?;
        backend.commit(&temp_path, &output_path)?;
        checkpoints.cleanup(&task_id)?;

        if let Some(callback) = &progress {
            callback(TaskProgress {
                task_id,
                current_frame: total_frames,
                total_frames,
                current_step: "completed".to_string(),
            });
        }
        tracing::info!(path = %output_path.display(), "video target written");
        Ok(output_path)
    }
}

use crate::config::{AppConfig, TaskConfig};
use crate::context::{EngineBuilder, EngineContext};
use crate::error::EngineError;
use crate::task::{exit_code, TaskRunner};
use pretty_assertions::assert_eq;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use visage_types::ErrorCode;

fn test_context(dir: &Path) -> Arc<EngineContext> {
    let app_config = AppConfig {
        model_base_path: dir.join("models"),
        model_catalog_path: dir.join("missing_catalog.json"),
        checkpoint_dir: dir.join("checkpoints"),
        metrics_path: Some(dir.join("metrics.json")),
        ..Default::default()
    };
    Arc::new(EngineBuilder::new(app_config).build().unwrap())
}

fn valid_task(dir: &Path) -> TaskConfig {
    let source = dir.join("source.png");
    let target = dir.join("target.png");
    File::create(&source).unwrap();
    File::create(&target).unwrap();

    let mut task = TaskConfig::example();
    task.io.source_paths = vec![source];
    task.io.target_paths = vec![target];
    task.io.output.path = dir.join("out");
    task
}

#[tokio::test]
async fn invalid_task_id_is_rejected_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let context = test_context(dir.path());
    let mut task = valid_task(dir.path());
    task.task_info.id = "bad id!".to_string();

    let mut runner = TaskRunner::new(context, CancellationToken::new());
    let result = runner.run(task, None).await;

    match &result {
        Err(EngineError::ConfigInvalid { yaml_path, code, .. }) => {
            assert_eq!(yaml_path, "task_info.id");
            assert_eq!(code.code(), 206);
        }
        other => panic!("expected ConfigInvalid, got {other:?}"),
    }
    assert_eq!(exit_code(&result), 1);
    // Nothing was produced.
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn missing_models_fail_the_task_as_runtime_errors() {
    let dir = tempfile::tempdir().unwrap();
    let context = test_context(dir.path());
    let task = valid_task(dir.path());

    let mut runner = TaskRunner::new(context, CancellationToken::new());
    let result = runner.run(task, None).await;

    // The example pipeline wants detector + swapper models, none of which
    // exist in the empty catalog.
    assert!(result.is_err());
    assert_eq!(exit_code(&result), 2);
}

#[tokio::test]
async fn cancelled_runs_exit_with_sigint_code() {
    let dir = tempfile::tempdir().unwrap();
    let context = test_context(dir.path());
    let task = valid_task(dir.path());

    let token = CancellationToken::new();
    token.cancel();
    let mut runner = TaskRunner::new(context, token);
    let result = runner.run(task, None).await;

    // Cancellation may surface either before or after chain construction;
    // with an empty catalog the chain fails first, so force the mapping
    // check on a synthetic result too.
    let cancelled: Result<crate::task::TaskReport, EngineError> =
        Err(EngineError::TaskCancelled);
    assert_eq!(exit_code(&cancelled), 130);
    assert_ne!(exit_code(&result), 0);
}

#[test]
fn exit_codes_cover_the_documented_table() {
    let ok: Result<crate::task::TaskReport, EngineError> =
        Ok(crate::task::TaskReport::default());
    assert_eq!(exit_code(&ok), 0);

    let validation: Result<crate::task::TaskReport, EngineError> =
        Err(EngineError::ConfigInvalid {
            yaml_path: "pipeline".to_string(),
            expected: "steps".to_string(),
            code: ErrorCode::RequiredFieldMissing,
        });
    assert_eq!(exit_code(&validation), 1);

    let runtime: Result<crate::task::TaskReport, EngineError> =
        Err(EngineError::InferenceFailed("boom".to_string()));
    assert_eq!(exit_code(&runtime), 2);

    let cancelled: Result<crate::task::TaskReport, EngineError> =
        Err(EngineError::TaskCancelled);
    assert_eq!(exit_code(&cancelled), 130);
}

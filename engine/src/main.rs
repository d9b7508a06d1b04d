use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use visage_engine::cli::{Cli, Commands, RunArgs};
use visage_engine::config::{self, AppConfig, TaskConfig};
use visage_engine::context::EngineBuilder;
use visage_engine::infer::{Provider, SessionOptions};
use visage_engine::task::{exit_code, ShutdownHandler, TaskRunner};

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_task_config(path: &std::path::Path) -> Result<TaskConfig, String> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    TaskConfig::from_json(&data).map_err(|e| format!("invalid task config: {e}"))
}

async fn run(args: RunArgs) -> ExitCode {
    init_tracing(&args.log_level);

    let mut app_config = match &args.app_config {
        Some(path) => match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_str::<AppConfig>(&data).map_err(|e| e.to_string()))
        {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("invalid app config: {e}");
                return ExitCode::from(1);
            }
        },
        None => AppConfig::default(),
    };
    if let Some(path) = args.model_base_path {
        app_config.model_base_path = path;
    }
    if let Some(path) = args.model_catalog {
        app_config.model_catalog_path = path;
    }
    if let Some(path) = args.metrics_path {
        app_config.metrics_path = Some(path);
    }

    let task_config = match load_task_config(&args.task_config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::from(1);
        }
    };

    let session_options = if args.gpu {
        SessionOptions {
            providers: vec![Provider::TensorRt, Provider::Cuda, Provider::Cpu],
            device_id: args.device_id,
            ..Default::default()
        }
    } else {
        SessionOptions::cpu()
    };

    let context = match EngineBuilder::new(app_config)
        .with_session_options(session_options)
        .build()
    {
        Ok(context) => Arc::new(context),
        Err(e) => {
            tracing::error!("engine startup failed: {e}");
            return ExitCode::from(2);
        }
    };

    let shutdown = Arc::new(ShutdownHandler::new(Duration::from_secs(
        args.shutdown_timeout,
    )));
    let shutdown_context = Arc::clone(&context);
    let shutdown_for_callback = Arc::clone(&shutdown);
    shutdown.install(
        move || {
            shutdown_context.clear_caches();
            shutdown_for_callback.mark_completed();
        },
        || std::process::exit(130),
    );

    let mut runner = TaskRunner::new(Arc::clone(&context), shutdown.cancellation_token());
    let result = runner.run(task_config, None).await;
    match &result {
        Ok(report) => {
            for output in &report.outputs {
                tracing::info!(path = %output.display(), "output ready");
            }
        }
        Err(e) => {
            let code = e.code();
            tracing::error!("task failed [{code}] {}: {e}", code.description());
            tracing::info!("suggested action: {}", code.remediation());
        }
    }
    ExitCode::from(exit_code(&result) as u8)
}

fn check(path: &std::path::Path) -> ExitCode {
    init_tracing("info");
    let task_config = match load_task_config(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };
    let issues = config::validate(&task_config);
    if issues.is_empty() {
        println!("configuration is valid");
        return ExitCode::SUCCESS;
    }
    for issue in issues {
        eprintln!("{}: {} (expected {})", issue.code, issue.yaml_path, issue.expected);
    }
    ExitCode::from(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check(args) => check(&args.task_config),
    }
}

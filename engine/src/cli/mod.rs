use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "visage face processing engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one task configuration end to end
    Run(RunArgs),
    /// Validate a task configuration and exit
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Task configuration (JSON)
    pub task_config: PathBuf,

    /// Application configuration (JSON); defaults apply when omitted
    #[arg(long)]
    pub app_config: Option<PathBuf>,

    /// Directory holding the model files
    #[arg(long)]
    pub model_base_path: Option<PathBuf>,

    /// Model catalog file
    #[arg(long)]
    pub model_catalog: Option<PathBuf>,

    /// Where metrics JSON is written ({timestamp} is substituted)
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,

    /// Use CUDA / TensorRT when available
    #[arg(long, default_value_t = false, action = ArgAction::SetTrue)]
    pub gpu: bool,

    /// CUDA device id
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// Graceful shutdown deadline in seconds
    #[arg(long, default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Log level
    #[arg(long, default_value_t = String::from("info"))]
    pub log_level: String,
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Task configuration (JSON)
    pub task_config: PathBuf,
}

use crate::config::Config;
use clap::Parser;
use std::path::PathBuf;

/// Stream classification inference server.
///
/// Flags override the file/environment configuration; anything not given on
/// the command line keeps its configured value.
#[derive(Debug, Parser)]
#[command(name = "stream_inference", version, about)]
pub struct Cli {
    /// Smoothing window size: number of recent batches averaged per client.
    #[arg(long)]
    pub window_size: Option<usize>,

    /// Bind address as host:port, e.g. 0.0.0.0:50051.
    #[arg(long)]
    pub bind: Option<String>,

    /// Maximum gRPC message size in bytes, applied to both directions.
    #[arg(long)]
    pub max_message_bytes: Option<usize>,

    /// Number of model sessions serving requests in parallel.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Path to the label mapping file, one class name per line.
    #[arg(long)]
    pub labels_file: Option<PathBuf>,

    /// Path to the model weights file.
    #[arg(long)]
    pub model_file: Option<PathBuf>,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) -> Result<(), String> {
        if let Some(window_size) = self.window_size {
            config.smoothing.window_size = window_size;
        }
        if let Some(bind) = &self.bind {
            let (host, port) = bind
                .rsplit_once(':')
                .ok_or_else(|| format!("invalid bind address {bind:?}, expected host:port"))?;
            config.server.host = host.to_string();
            config.server.port = port
                .parse()
                .map_err(|_| format!("invalid port in bind address {bind:?}"))?;
        }
        if let Some(max_message_bytes) = self.max_message_bytes {
            config.server.max_message_bytes = max_message_bytes;
        }
        if let Some(workers) = self.workers {
            config.model.num_instances = workers;
        }
        if let Some(labels_file) = &self.labels_file {
            apply_path(
                labels_file,
                &mut config.labels.labels_dir,
                &mut config.labels.labels_file,
            )?;
        }
        if let Some(model_file) = &self.model_file {
            apply_path(
                model_file,
                &mut config.model.model_dir,
                &mut config.model.model_file,
            )?;
        }
        Ok(())
    }
}

fn apply_path(path: &std::path::Path, dir: &mut PathBuf, file: &mut String) -> Result<(), String> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("path {path:?} has no file name"))?;
    *file = file_name.to_string();
    *dir = path.parent().map(PathBuf::from).unwrap_or_default();
    Ok(())
}

use clap::Parser;
use std::path::PathBuf;

use crate::errors::{BgStripError, Result};

/// Directory, relative to the home directory, where U2-Net weights are usually cached.
const MODEL_CACHE_DIR: &str = ".u2net";
const MODEL_FILE_NAME: &str = "u2net.onnx";

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory whose `*.png` files are overwritten with transparent-background versions
    pub input_dir: PathBuf,

    /// U2-Net ONNX model (defaults to ~/.u2net/u2net.onnx)
    #[arg(short, long)]
    pub model_path: Option<PathBuf>,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Config {
    /// Explicit `--model-path`, or the default cache location.
    pub fn resolve_model_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.model_path {
            return Ok(path.clone());
        }
        dirs::home_dir()
            .map(|home| home.join(MODEL_CACHE_DIR).join(MODEL_FILE_NAME))
            .ok_or_else(|| BgStripError::Configuration {
                message: "cannot determine home directory; pass --model-path".to_string(),
            })
    }
}

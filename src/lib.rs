pub mod config;
pub mod download;
pub mod errors;
pub mod imageops_ai;
pub mod logging;
pub mod model;
pub mod segmentation;
pub mod traits;

pub mod mocks;

use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use walkdir::WalkDir;

pub use config::Config;
pub use errors::{BgStripError, Result};
pub use model::Model;
pub use segmentation::{remove_background, MattingParameters};
pub use traits::*;

#[cfg(test)]
pub use mocks::*;

const PNG_EXTENSION: &str = "png";
const TEMP_PREFIX: &str = ".bgstrip-";
// must not match the `*.png` scan
const TEMP_SUFFIX: &str = ".tmp";

/// A file that could not be processed, with the rendered error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of one run over a directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub found: usize,
    pub succeeded: usize,
    pub failures: Vec<FileFailure>,
}

impl BatchSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// List the `*.png` files directly inside `dir`, sorted by file name.
///
/// Subdirectories are not traversed. A missing or unreadable directory is an error.
pub fn collect_png_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let metadata =
        fs::metadata(dir).map_err(|e| BgStripError::file_system(dir, "directory scan", e))?;
    if !metadata.is_dir() {
        return Err(BgStripError::file_system(
            dir,
            "directory scan",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }

    let mut png_files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            BgStripError::FileSystem {
                path,
                operation: "directory scan".to_string(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
            }
        })?;

        if entry.path().is_file() && is_png_path(entry.path()) {
            png_files.push(entry.into_path());
        }
    }

    Ok(png_files)
}

/// `*.png` glob semantics: the extension must be exactly `png`.
pub fn is_png_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(PNG_EXTENSION)
}

pub struct ImageProcessor<M: ImageSegmentationModel> {
    model: M,
    config: Config,
    params: MattingParameters,
}

impl<M: ImageSegmentationModel> ImageProcessor<M> {
    pub fn new(model: M, config: Config) -> Self {
        Self {
            model,
            config,
            params: MattingParameters::default(),
        }
    }

    pub const fn params(&self) -> &MattingParameters {
        &self.params
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Scan the configured directory and process every PNG in it.
    pub fn process_directory(&self) -> Result<BatchSummary> {
        let png_files = collect_png_files(&self.config.input_dir)?;
        info!("Found {} PNG files to process.", png_files.len());
        Ok(self.process_files(&png_files))
    }

    /// Process `files` one after another, overwriting each in place.
    ///
    /// A failing file is logged and recorded; the remaining files are still processed.
    pub fn process_files(&self, files: &[PathBuf]) -> BatchSummary {
        let mut summary = BatchSummary {
            found: files.len(),
            ..BatchSummary::default()
        };

        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        for path in files {
            let name = display_name(path);
            match self.process_single_image(path) {
                Ok(()) => {
                    pb.suspend(|| info!(file = %name, "done"));
                    summary.succeeded += 1;
                }
                Err(e) => {
                    pb.suspend(|| error!(file = %name, error = %e, "failed"));
                    summary.failures.push(FileFailure {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        info!(
            found = summary.found,
            succeeded = summary.succeeded,
            failed = summary.failed(),
            "All done!"
        );
        summary
    }

    /// Load, strip and overwrite a single PNG.
    pub fn process_single_image(&self, path: &Path) -> Result<()> {
        let image = image::open(path).map_err(|e| BgStripError::image(path, "image load", e))?;

        let cutout =
            remove_background(&self.model, &image, &self.params).map_err(|e| match e {
                BgStripError::ImageProcessing {
                    operation, source, ..
                } => BgStripError::ImageProcessing {
                    path: path.display().to_string(),
                    operation,
                    source,
                },
                other => other,
            })?;

        overwrite_png(path, &cutout)
    }
}

/// Scan `config.input_dir` and strip every PNG in it.
///
/// `load` builds the model and is only called when there is at least one file,
/// so an empty directory needs no model. A scan or load error is fatal;
/// per-file errors end up in the returned summary.
pub fn run<M, F>(config: Config, load: F) -> Result<BatchSummary>
where
    M: ImageSegmentationModel,
    F: FnOnce(&Config) -> Result<M>,
{
    let png_files = collect_png_files(&config.input_dir)?;
    info!("Found {} PNG files to process.", png_files.len());
    if png_files.is_empty() {
        info!(found = 0, succeeded = 0, failed = 0, "All done!");
        return Ok(BatchSummary::default());
    }

    let model = load(&config)?;
    let processor = ImageProcessor::new(model, config);
    Ok(processor.process_files(&png_files))
}

/// Load the U2-Net session named by `config`.
///
/// The default `~/.u2net/u2net.onnx` is downloaded on first use; an explicit
/// `--model-path` must already exist.
pub fn load_onnx_model(config: &Config) -> Result<Model> {
    let model_path = config.resolve_model_path()?;
    if config.model_path.is_none() {
        download::ensure_model(&model_path, download::U2NET_URL, None)?;
    } else if !model_path.is_file() {
        return Err(BgStripError::Configuration {
            message: format!("model path does not exist: {}", model_path.display()),
        });
    }
    Model::new(&model_path, config.device_id)
}

/// Replace `path` with `image` encoded as PNG.
///
/// The bytes go to a sibling temporary file first and are renamed over the
/// original, so the target is never left half written.
pub fn overwrite_png(path: &Path, image: &image::RgbaImage) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| BgStripError::file_system(dir, "temporary file creation", e))?;

    {
        let mut writer = BufWriter::new(temp.as_file());
        image
            .write_to(&mut writer, ImageFormat::Png)
            .map_err(|e| BgStripError::image(path, "image encode", e))?;
        writer
            .flush()
            .map_err(|e| BgStripError::file_system(temp.path(), "flush", e))?;
    }

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())
            .map_err(|e| BgStripError::file_system(temp.path(), "permission copy", e))?;
    }

    temp.persist(path)
        .map_err(|e| BgStripError::file_system(path, "image save", e.error))?;
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

//! Settings file handling.
//!
//! Compiled-in defaults apply unless a RON file overrides them: `--config <path>`, or
//! `archiver.ron` in the working directory when it exists. Fields left out of the file keep
//! their defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use archiver_engine::{ArchiverSettings, RunSettings};
use archiver_logging::archiver_info;

pub const DEFAULT_CONFIG_FILE: &str = "archiver.ron";
pub const DEFAULT_RAW_HTML_DIR: &str = "data/raw_html";

pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<ArchiverSettings> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !path.is_file() {
                archiver_info!("no {} found, using built-in settings", DEFAULT_CONFIG_FILE);
                return Ok(ArchiverSettings::default());
            }
            path
        }
    };
    let text = fs::read_to_string(&path)
        .with_context(|| format!("failed to read settings file {path:?}"))?;
    let settings =
        parse_settings(&text).with_context(|| format!("invalid settings file {path:?}"))?;
    archiver_info!("settings loaded from {:?}", path);
    Ok(settings)
}

pub fn parse_settings(text: &str) -> anyhow::Result<ArchiverSettings> {
    Ok(ron::from_str(text)?)
}

/// Command-line values that take precedence over the settings file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOverrides {
    pub batch_size: Option<usize>,
    pub max_miss: Option<u32>,
    pub sleep_secs: Option<f64>,
    pub save_html: bool,
}

impl RunOverrides {
    pub fn apply(&self, run: &mut RunSettings) -> anyhow::Result<()> {
        if let Some(batch_size) = self.batch_size {
            if batch_size == 0 {
                bail!("batch size must be at least 1");
            }
            run.batch_size = batch_size;
        }
        if let Some(max_miss) = self.max_miss {
            run.max_miss = max_miss;
        }
        if let Some(secs) = self.sleep_secs {
            run.sleep_between = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid sleep interval {secs}"))?;
        }
        if self.save_html && run.raw_html_dir.is_none() {
            run.raw_html_dir = Some(PathBuf::from(DEFAULT_RAW_HTML_DIR));
        }
        Ok(())
    }
}

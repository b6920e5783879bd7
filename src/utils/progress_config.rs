// src/utils/progress_config.rs

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::env;

/// Configuration for progress tracking throughout the pipeline
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Whether to show progress bars at all
    pub enabled: bool,
    /// Whether to show detailed sub-progress bars
    pub detailed: bool,
    /// Whether to show memory usage in progress messages
    pub show_memory: bool,
    /// Whether to show vector cache statistics when the run ends
    pub show_cache_stats: bool,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: true,
            show_memory: true,
            show_cache_stats: true,
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ProgressConfig {
    /// Create progress configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            enabled: env_flag("PROGRESS_ENABLED", true),
            detailed: env_flag("PROGRESS_DETAILED", true),
            show_memory: env_flag("PROGRESS_SHOW_MEMORY", true),
            show_cache_stats: env_flag("PROGRESS_SHOW_CACHE_STATS", true),
        }
    }

    /// Create a MultiProgress instance if progress is enabled, None otherwise
    pub fn create_multi_progress(&self) -> Option<MultiProgress> {
        if self.enabled {
            Some(MultiProgress::new())
        } else {
            None
        }
    }

    pub fn should_show_detailed(&self) -> bool {
        self.enabled && self.detailed
    }

    pub fn should_show_memory(&self) -> bool {
        self.enabled && self.show_memory
    }

    pub fn should_show_cache_stats(&self) -> bool {
        self.enabled && self.show_cache_stats
    }
}

/// Top-level phase bar.
pub fn create_phase_bar(multi_progress: &MultiProgress, phases: u64) -> Result<ProgressBar> {
    let pb = multi_progress.add(ProgressBar::new(phases));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Failed to set phase progress bar style")?
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    Ok(pb)
}

/// Indented detail bar for work inside a phase.
pub fn create_detail_bar(
    multi_progress: &MultiProgress,
    len: u64,
    message: &str,
) -> Result<ProgressBar> {
    let pb = multi_progress.add(ProgressBar::new(len));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("    {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("Failed to set detail progress bar style")?
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    Ok(pb)
}

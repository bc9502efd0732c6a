//! Logging Module
//!
//! `tracing` subscriber setup for the binary, plus the per-epoch progress
//! lines the trainer prints while a fold is running.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level for this crate when `RUST_LOG` is unset
    pub level: Level,
    /// Level for burn, ort and other dependencies
    pub dependency_level: Level,
    /// Print module paths
    pub show_targets: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            dependency_level: Level::WARN,
            show_targets: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Debug output for this crate, info for dependencies
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            dependency_level: Level::INFO,
            show_targets: true,
            ..Self::default()
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            dependency_level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Filter directives for the library and the `flora` binary
    pub fn directives(&self) -> String {
        let level = self.level.as_str().to_lowercase();
        format!(
            "{},{}={},flora={}",
            self.dependency_level.as_str().to_lowercase(),
            env!("CARGO_CRATE_NAME"),
            level,
            level
        )
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the configured levels
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.directives()))
        .map_err(|e| format!("Invalid log filter: {}", e))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.show_targets)
        .with_ansi(config.ansi)
        .compact()
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Progress lines for one training fold
pub struct TrainingLogger {
    fold: usize,
    total_epochs: usize,
    current: usize,
    epoch_started: Instant,
    fold_started: Instant,
}

impl TrainingLogger {
    pub fn new(fold: usize, total_epochs: usize) -> Self {
        let now = Instant::now();
        Self {
            fold,
            total_epochs,
            current: 0,
            epoch_started: now,
            fold_started: now,
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.current = epoch;
        self.epoch_started = Instant::now();
        tracing::debug!("[fold {}] epoch {}/{}", self.fold, epoch + 1, self.total_epochs);
    }

    /// One summary line per epoch
    pub fn end_epoch(&self, train_loss: f64, val_loss: f64, avg_f1: f64) {
        tracing::info!(
            "[fold {}] {}/{} ({:.1}s) loss {:.4}/{:.4} avg F1 {:.4}",
            self.fold,
            self.current + 1,
            self.total_epochs,
            self.epoch_started.elapsed().as_secs_f64(),
            train_loss,
            val_loss,
            avg_f1
        );
    }

    pub fn log_new_best(&self, previous: f64, current: f64) {
        tracing::info!("[fold {}] best avg F1 {:.4} -> {:.4}, checkpoint saved", self.fold, previous, current);
    }

    pub fn log_early_stop(&self, patience: usize) {
        tracing::warn!("[fold {}] no improvement for {} epochs, stopping", self.fold, patience);
    }

    pub fn log_complete(&self, epochs_run: usize, best_f1: f64) {
        tracing::info!(
            "[fold {}] finished {} epochs in {} | best avg F1 {:.4}",
            self.fold,
            epochs_run,
            super::format_duration(self.fold_started.elapsed().as_secs_f64()),
            best_f1
        );
    }
}

//! Utilities: errors, logging, metrics

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{FloraError, Result, ResultExt};
pub use logging::{init_logging, LogConfig};
pub use metrics::{macro_f1, ConfusionMatrix, Metrics};

/// Short human-readable duration: `42.0s`, `3m 05s`, `2h 10m`
pub fn format_duration(seconds: f64) -> String {
    let whole = seconds.max(0.0) as u64;
    match whole {
        0..=59 => format!("{:.1}s", seconds.max(0.0)),
        60..=3599 => format!("{}m {:02}s", whole / 60, whole % 60),
        _ => format!("{}h {:02}m", whole / 3600, (whole % 3600) / 60),
    }
}

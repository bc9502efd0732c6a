//! Training module
//!
//! - `optimizer`: parameter groups over a Burn optimizer
//! - `unfreeze`: staged backbone unfreezing
//! - `accumulator`: per-pass loss, accuracy and F1 totals
//! - `checkpoint`: best-F1 tracking, patience, model snapshots
//! - `epoch_log`: flushed per-epoch CSV
//! - `trainer`: the epoch loop for one fold
//! - `run`: manifest, splits and one trainer per fold

pub mod accumulator;
pub mod checkpoint;
pub mod epoch_log;
pub mod optimizer;
pub mod run;
pub mod trainer;
pub mod unfreeze;

pub use accumulator::{EpochAccumulator, PassSummary};
pub use checkpoint::{load_model, save_model, CheckpointDecision, CheckpointState};
pub use epoch_log::{EpochLog, EpochRecord};
pub use optimizer::{GroupedOptimizer, ParamGroup};
pub use run::{build_model, run_training, RunSummary};
pub use trainer::{StopReason, Trainer, TrainingReport};
pub use unfreeze::{should_unfreeze, StagedUnfreezer, UnfreezeOutcome};

//! Staged unfreezing
//!
//! Backbone stages become trainable one at a time, deepest first. Every
//! parameter that is unfrozen is registered with exactly one optimizer group;
//! the controller keeps its own set of registered ids rather than inferring
//! registration from require-grad flags.

use std::collections::HashSet;

use burn::{module::ParamId, tensor::backend::Backend};
use tracing::{debug, info};

use crate::model::{BackboneStage, DualHeadClassifier};
use crate::training::optimizer::GroupedOptimizer;

/// Result of one `unfreeze_next_stage` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnfreezeOutcome {
    /// `step_index` outside `1..=stages`; nothing changed
    OutOfRange,
    /// The stage was already trainable and registered
    NothingNew,
    /// `params` parameters became trainable and formed a new group
    Unfrozen { stage: BackboneStage, params: usize },
}

/// Whether the schedule unfreezes a stage at the start of `epoch`
pub fn should_unfreeze(epoch: usize, every: usize) -> bool {
    every > 0 && epoch > 0 && epoch % every == 0
}

/// Unfreeze controller owning the unfreeze order and registration bookkeeping
#[derive(Debug, Clone)]
pub struct StagedUnfreezer {
    order: [BackboneStage; 4],
    registered: HashSet<ParamId>,
}

impl StagedUnfreezer {
    /// `already_registered` are the ids of the optimizer's initial group
    pub fn new(already_registered: impl IntoIterator<Item = ParamId>) -> Self {
        Self {
            order: BackboneStage::UNFREEZE_ORDER,
            registered: already_registered.into_iter().collect(),
        }
    }

    pub fn is_registered(&self, id: &ParamId) -> bool {
        self.registered.contains(id)
    }

    /// Make the stage at 1-based `step_index` trainable and register its new parameters
    pub fn unfreeze_next_stage<B: Backend, O>(
        &mut self,
        model: DualHeadClassifier<B>,
        step_index: usize,
        optimizer: &mut GroupedOptimizer<O>,
        learning_rate: f64,
    ) -> (DualHeadClassifier<B>, UnfreezeOutcome) {
        if step_index == 0 || step_index > self.order.len() {
            debug!("Unfreeze step {} out of range, ignoring", step_index);
            return (model, UnfreezeOutcome::OutOfRange);
        }
        let stage = self.order[step_index - 1];

        let frozen: HashSet<ParamId> = model.frozen_stage_param_ids(stage).into_iter().collect();
        let fresh: Vec<ParamId> = model
            .stage_param_ids(stage)
            .into_iter()
            .filter(|id| !self.registered.contains(id))
            .collect();

        let model = if frozen.is_empty() {
            model
        } else {
            model.unfreeze_stage(stage)
        };

        if fresh.is_empty() {
            debug!("{} has no unregistered parameters", stage);
            return (model, UnfreezeOutcome::NothingNew);
        }

        let params = fresh.len();
        self.registered.extend(fresh.iter().copied());
        optimizer.add_group(fresh, learning_rate);

        info!(
            "Unfroze {} ({} parameters) at learning rate {:e}",
            stage, params, learning_rate
        );
        (model, UnfreezeOutcome::Unfrozen { stage, params })
    }
}

//! Parameter trainability helpers
//!
//! Burn has no per-parameter `requires_grad` toggle on modules, so these walk a
//! module with a `ModuleVisitor` (read) or a `ModuleMapper` (write) and touch
//! every float parameter. On a non-autodiff backend every parameter reports
//! frozen.
//!
//! BatchNorm running statistics reach the visitor exactly like parameters.
//! Modules list them through [`RunningStats`] and every helper here skips
//! them: they are never trainable, never counted and never grouped.

use std::collections::HashSet;

use burn::{
    module::{Module, ModuleMapper, ModuleVisitor, ParamId},
    nn::{BatchNorm, Linear},
    tensor::{backend::Backend, Tensor},
};

/// Float state a module carries that gradient descent never updates
pub trait RunningStats {
    fn running_stat_ids(&self) -> HashSet<ParamId>;
}

impl<B: Backend, const D: usize> RunningStats for BatchNorm<B, D> {
    fn running_stat_ids(&self) -> HashSet<ParamId> {
        let mut ids = IdCollector::default();
        self.running_mean.visit(&mut ids);
        self.running_var.visit(&mut ids);
        ids.0
    }
}

impl<B: Backend> RunningStats for Linear<B> {
    fn running_stat_ids(&self) -> HashSet<ParamId> {
        HashSet::new()
    }
}

#[derive(Default)]
struct IdCollector(HashSet<ParamId>);

impl<B: Backend> ModuleVisitor<B> for IdCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        self.0.insert(id);
    }
}

/// Number of trainable and frozen parameter tensors in a module
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrainabilityCensus {
    pub trainable: usize,
    pub frozen: usize,
}

impl TrainabilityCensus {
    pub fn total(&self) -> usize {
        self.trainable + self.frozen
    }

    pub fn all_trainable(&self) -> bool {
        self.frozen == 0 && self.trainable > 0
    }

    pub fn all_frozen(&self) -> bool {
        self.trainable == 0 && self.frozen > 0
    }
}

struct ParamCollector {
    skip: HashSet<ParamId>,
    trainable: Vec<ParamId>,
    frozen: Vec<ParamId>,
}

impl<B: Backend> ModuleVisitor<B> for ParamCollector {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if self.skip.contains(&id) {
            return;
        }
        if tensor.is_require_grad() {
            self.trainable.push(id);
        } else {
            self.frozen.push(id);
        }
    }
}

struct RequireGradMapper {
    skip: HashSet<ParamId>,
    require_grad: bool,
}

impl<B: Backend> ModuleMapper<B> for RequireGradMapper {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        if self.skip.contains(&id) {
            tensor
        } else {
            tensor.set_require_grad(self.require_grad)
        }
    }
}

fn collect<B: Backend, M: Module<B> + RunningStats>(module: &M) -> ParamCollector {
    let mut collector = ParamCollector {
        skip: module.running_stat_ids(),
        trainable: Vec::new(),
        frozen: Vec::new(),
    };
    module.visit(&mut collector);
    collector
}

/// Ids of every learnable float parameter in the module
pub fn param_ids<B: Backend, M: Module<B> + RunningStats>(module: &M) -> Vec<ParamId> {
    let collector = collect::<B, M>(module);
    collector
        .trainable
        .into_iter()
        .chain(collector.frozen)
        .collect()
}

/// Ids of parameters that currently require gradients
pub fn trainable_param_ids<B: Backend, M: Module<B> + RunningStats>(module: &M) -> Vec<ParamId> {
    collect::<B, M>(module).trainable
}

/// Ids of parameters that currently do not require gradients
pub fn frozen_param_ids<B: Backend, M: Module<B> + RunningStats>(module: &M) -> Vec<ParamId> {
    collect::<B, M>(module).frozen
}

/// Count trainable and frozen parameter tensors
pub fn census<B: Backend, M: Module<B> + RunningStats>(module: &M) -> TrainabilityCensus {
    let collector = collect::<B, M>(module);
    TrainabilityCensus {
        trainable: collector.trainable.len(),
        frozen: collector.frozen.len(),
    }
}

/// Set the require-grad flag on every learnable parameter of the module
pub fn set_trainable<B: Backend, M: Module<B> + RunningStats>(module: M, trainable: bool) -> M {
    let mut mapper = RequireGradMapper {
        skip: module.running_stat_ids(),
        require_grad: trainable,
    };
    module.map(&mut mapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::nn::{BatchNormConfig, LinearConfig};
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_freeze_and_unfreeze_linear() {
        let device = Default::default();
        let linear = LinearConfig::new(4, 2).init::<TestBackend>(&device);

        let before = census::<TestBackend, _>(&linear);
        assert_eq!(before.trainable, 2); // weight + bias
        assert!(before.all_trainable());

        let linear = set_trainable::<TestBackend, _>(linear, false);
        let frozen = census::<TestBackend, _>(&linear);
        assert!(frozen.all_frozen());
        assert_eq!(frozen_param_ids::<TestBackend, _>(&linear).len(), 2);

        let linear = set_trainable::<TestBackend, _>(linear, true);
        assert_eq!(trainable_param_ids::<TestBackend, _>(&linear).len(), 2);
    }

    #[test]
    fn test_param_ids_are_stable_across_freezing() {
        let device = Default::default();
        let linear = LinearConfig::new(3, 3).init::<TestBackend>(&device);

        let mut ids = param_ids::<TestBackend, _>(&linear);
        let linear = set_trainable::<TestBackend, _>(linear, false);
        let mut after = param_ids::<TestBackend, _>(&linear);

        ids.sort_by_key(|id| id.to_string());
        after.sort_by_key(|id| id.to_string());
        assert_eq!(ids, after);
    }

    #[test]
    fn test_batch_norm_running_stats_are_not_parameters() {
        let device = Default::default();
        let bn: BatchNorm<TestBackend, 2> = BatchNormConfig::new(3).init(&device);

        let stats = bn.running_stat_ids();
        assert_eq!(stats.len(), 2);

        // gamma + beta only
        let ids = param_ids::<TestBackend, _>(&bn);
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| !stats.contains(id)));

        let bn = set_trainable::<TestBackend, _>(bn, false);
        assert!(census::<TestBackend, _>(&bn).all_frozen());
        let bn = set_trainable::<TestBackend, _>(bn, true);
        assert_eq!(census::<TestBackend, _>(&bn), TrainabilityCensus { trainable: 2, frozen: 0 });
    }
}

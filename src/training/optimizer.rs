//! Optimizer parameter groups
//!
//! Burn optimizers take one learning rate per step. To train different
//! parameter sets at different rates, every group pulls its own gradients out
//! of the backward pass with `GradientsParams::from_params` and is stepped
//! separately. A parameter without a group never receives an update.

use std::collections::HashSet;

use burn::{
    module::{AutodiffModule, ParamId},
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};

/// Parameters sharing a learning rate
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub learning_rate: f64,
    pub params: Vec<ParamId>,
}

/// Wraps a Burn optimizer with an ordered list of parameter groups
pub struct GroupedOptimizer<O> {
    inner: O,
    groups: Vec<ParamGroup>,
}

impl<O> GroupedOptimizer<O> {
    /// Group 0 holds `params` at `learning_rate`
    pub fn new(inner: O, params: Vec<ParamId>, learning_rate: f64) -> Self {
        Self {
            inner,
            groups: vec![ParamGroup {
                learning_rate,
                params,
            }],
        }
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Learning rate of the first group
    pub fn first_group_lr(&self) -> f64 {
        self.groups.first().map(|g| g.learning_rate).unwrap_or(0.0)
    }

    /// Index of the group holding `id`
    pub fn group_of(&self, id: &ParamId) -> Option<usize> {
        self.groups.iter().position(|g| g.params.contains(id))
    }

    /// Append a group; ids already present in another group are dropped
    ///
    /// Returns the new group's index, or `None` when nothing was left to add.
    pub fn add_group(&mut self, params: Vec<ParamId>, learning_rate: f64) -> Option<usize> {
        let existing: HashSet<ParamId> = self
            .groups
            .iter()
            .flat_map(|g| g.params.iter().copied())
            .collect();

        let mut seen = HashSet::new();
        let params: Vec<ParamId> = params
            .into_iter()
            .filter(|id| !existing.contains(id) && seen.insert(*id))
            .collect();

        if params.is_empty() {
            return None;
        }

        self.groups.push(ParamGroup {
            learning_rate,
            params,
        });
        Some(self.groups.len() - 1)
    }

    /// Total number of registered parameters
    pub fn num_params(&self) -> usize {
        self.groups.iter().map(|g| g.params.len()).sum()
    }

    /// Apply one optimizer step per group
    pub fn step<B, M>(&mut self, model: M, mut grads: B::Gradients) -> M
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let mut model = model;
        for group in &self.groups {
            let group_grads = GradientsParams::from_params(&mut grads, &model, &group.params);
            if group_grads.is_empty() {
                continue;
            }
            model = self.inner.step(group.learning_rate, model, group_grads);
        }
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::module::Module;
    use burn::nn::{Linear, LinearConfig};
    use burn::tensor::backend::Backend;
    use burn::optim::AdamConfig;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    use crate::model::freeze;

    type TestBackend = Autodiff<NdArray>;

    #[derive(Module, Debug)]
    struct TwoLinear<B: Backend> {
        grouped: Linear<B>,
        ungrouped: Linear<B>,
    }

    #[test]
    fn test_add_group_rejects_duplicates() {
        let a = ParamId::new();
        let b = ParamId::new();
        let c = ParamId::new();

        let mut optimizer = GroupedOptimizer::new((), vec![a], 1e-3);
        assert_eq!(optimizer.add_group(vec![a, b, b], 1e-4), Some(1));
        assert_eq!(optimizer.groups()[1].params, vec![b]);

        assert_eq!(optimizer.add_group(vec![a, b], 1e-4), None);
        assert_eq!(optimizer.groups().len(), 2);

        assert_eq!(optimizer.add_group(vec![c], 1e-5), Some(2));
        assert_eq!(optimizer.group_of(&c), Some(2));
        assert_eq!(optimizer.num_params(), 3);
        assert_eq!(optimizer.first_group_lr(), 1e-3);
    }

    #[test]
    fn test_step_only_updates_grouped_params() {
        let device = Default::default();
        let model = TwoLinear::<TestBackend> {
            grouped: LinearConfig::new(2, 1).init(&device),
            ungrouped: LinearConfig::new(2, 1).init(&device),
        };

        let ids = freeze::param_ids::<TestBackend, _>(&model.grouped);
        let mut optimizer = GroupedOptimizer::new(
            AdamConfig::new().init::<TestBackend, TwoLinear<TestBackend>>(),
            ids,
            0.1,
        );

        let before_grouped: Vec<f32> = model.grouped.weight.val().into_data().iter::<f32>().collect();
        let before_ungrouped: Vec<f32> = model.ungrouped.weight.val().into_data().iter::<f32>().collect();

        let x = Tensor::<TestBackend, 2>::ones([4, 2], &device);
        let loss = (model.grouped.forward(x.clone()) + model.ungrouped.forward(x)).sum();
        let model = optimizer.step(model, loss.backward());

        let after_grouped: Vec<f32> = model.grouped.weight.val().into_data().iter::<f32>().collect();
        let after_ungrouped: Vec<f32> = model.ungrouped.weight.val().into_data().iter::<f32>().collect();

        assert_ne!(before_grouped, after_grouped);
        assert_eq!(before_ungrouped, after_ungrouped);
    }
}

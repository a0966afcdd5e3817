use rayon::prelude::*;

use crate::{MlErr, Result, arch::Nnet};

/// Counts how many times each updatable component, and the model as a whole, had its update
/// clipped by the max-change limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxChangeStats {
    names: Vec<String>,
    per_component: Vec<usize>,
    global: usize,
}

impl MaxChangeStats {
    /// Creates a new `MaxChangeStats` with one zeroed counter per updatable component.
    ///
    /// # Returns
    /// An error if a component is tagged as updatable without exposing the updatable interface.
    pub fn new(nnet: &Nnet) -> Result<Self> {
        let names: Vec<_> = nnet
            .updatable_components()?
            .into_iter()
            .map(|(_, name, _)| name.to_string())
            .collect();

        Ok(Self {
            per_component: vec![0; names.len()],
            names,
            global: 0,
        })
    }

    pub fn per_component(&self) -> &[usize] {
        &self.per_component
    }

    pub fn global(&self) -> usize {
        self.global
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Computes how often each limit was enforced, as a percentage of the updates.
    ///
    /// # Arguments
    /// * `num_minibatches` - The amount of minibatches trained so far.
    /// * `backstitch` - Whether every minibatch was updated twice.
    ///
    /// # Returns
    /// The percentage of each updatable component, in the order of `names`, and the global one.
    pub fn percentages(&self, num_minibatches: usize, backstitch: bool) -> (Vec<f64>, f64) {
        let updates_per_minibatch = if backstitch { 2.0 } else { 1.0 };
        let percent = |count: usize| match num_minibatches {
            0 => 0.0,
            n => 100.0 * count as f64 / n as f64 / updates_per_minibatch,
        };

        let per_component = self.per_component.iter().map(|&count| percent(count)).collect();
        (per_component, percent(self.global))
    }

    /// Logs how often each limit was enforced.
    pub fn print(&self, num_minibatches: usize, backstitch: bool) {
        let (per_component, global) = self.percentages(num_minibatches, backstitch);

        for ((name, &count), percent) in self.names.iter().zip(&self.per_component).zip(per_component) {
            if count > 0 {
                log::info!("For {name}, per-component max-change was enforced {percent} % of the time.");
            }
        }

        if self.global > 0 {
            log::info!("The global max-change was enforced {global} % of the time.");
        }
    }
}

/// Adds `scale` times `delta` into `nnet`, limiting the norm of the change of each updatable
/// component to its own max-change and the norm of the whole change to `max_param_change`, both
/// multiplied by `max_change_scale`.
///
/// Components without parameters get `scale` times the statistics stored in `delta`.
///
/// # Arguments
/// * `delta` - The accumulated change, congruent with `nnet`.
/// * `max_param_change` - The limit of the whole change, `0` disables it.
/// * `max_change_scale` - The factor applied to every limit.
/// * `scale` - The factor applied to `delta`.
/// * `nnet` - The network to update.
/// * `stats` - The clipping counters.
///
/// # Returns
/// Whether the update was applied, nothing is applied if the change isn't finite.
pub fn update_nnet_with_max_change(
    delta: &Nnet,
    max_param_change: f32,
    max_change_scale: f32,
    mut scale: f32,
    nnet: &mut Nnet,
    stats: &mut MaxChangeStats,
) -> Result<bool> {
    delta.check_congruent(nnet)?;

    let updatable = delta.updatable_components()?;
    if updatable.len() != stats.per_component.len() {
        return Err(MlErr::SizeMismatch {
            what: "max-change counters",
            got: stats.per_component.len(),
            expected: updatable.len(),
        });
    }

    let dot_prods: Vec<f32> = updatable
        .par_iter()
        .map(|(_, _, uc)| uc.dot_product(*uc))
        .collect();

    let mut factors = vec![1.0f32; updatable.len()];
    let mut num_clipped = 0;
    let mut smallest: Option<(usize, f32)> = None;

    for (i, ((_, name, uc), dot)) in updatable.iter().zip(&dot_prods).enumerate() {
        let max_change = uc.max_change() * max_change_scale;
        let norm = dot.sqrt() * scale.abs();

        if max_change > 0.0 && norm > max_change {
            factors[i] = max_change / norm;
            stats.per_component[i] += 1;
            num_clipped += 1;
            log::debug!(component = *name, norm, max_change; "per-component max-change enforced");

            if smallest.is_none_or(|(_, f)| factors[i] < f) {
                smallest = Some((i, factors[i]));
            }
        }
    }

    let param_delta = factors
        .iter()
        .zip(&dot_prods)
        .map(|(f, d)| f * f * d)
        .sum::<f32>()
        .sqrt()
        * scale.abs();

    let max_param_delta = max_param_change * max_change_scale;
    let global_clipped = max_param_change > 0.0 && param_delta > max_param_delta;

    if !param_delta.is_finite() || factors.iter().any(|f| !f.is_finite() || *f <= 0.0) {
        log::warn!("infinite parameter change, will not apply");
        return Ok(false);
    }

    if global_clipped {
        let global_factor = max_param_delta / param_delta;
        if !global_factor.is_finite() || global_factor <= 0.0 {
            log::warn!("degenerate global max-change factor {global_factor}, will not apply");
            return Ok(false);
        }

        scale *= global_factor;
        stats.global += 1;
    }

    if num_clipped > 0 || global_clipped {
        let mut msg = String::new();

        if let Some((i, factor)) = smallest {
            let (_, name, uc) = updatable[i];
            msg.push_str(&format!(
                "Per-component max-change active on {num_clipped} / {} updatable components (smallest factor={factor} on {name} with max-change={}). ",
                updatable.len(),
                uc.max_change(),
            ));
        }

        if global_clipped {
            msg.push_str(&format!(
                "Global max-change factor was {} with max-change={max_param_change}.",
                max_param_delta / param_delta
            ));
        }

        log::info!("{}", msg.trim_end());
    }

    for ((c, _, uc), factor) in updatable.iter().zip(&factors) {
        if let Some(target) = nnet.updatable_mut(*c)? {
            target.add(factor * scale, *uc)?;
        }
    }

    for c in 0..delta.num_components() {
        if delta.component(c).is_updatable() {
            continue;
        }

        if let (Some(src), Some(dst)) = (delta.component(c).stats(), nnet.component_mut(c).stats_mut()) {
            dst.add(scale, src)?;
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;
    use crate::arch::{
        Component, Node, ObjectiveType,
        components::{Affine, Sigmoid},
    };

    /// Two `1 × 1` affine layers, their flat parameters are `[w, b]`.
    fn nnet(params: [[f32; 2]; 2], max_change: f32) -> Nnet {
        let affine = |[w, b]: [f32; 2]| -> Box<dyn Component> {
            let layer = Affine::new((1, 1), 1.0, max_change)
                .with_params(array![[w]].view(), array![b].view())
                .unwrap();
            Box::new(layer)
        };

        let components = vec![
            ("affine1".to_string(), affine(params[0])),
            ("sigmoid".to_string(), Box::new(Sigmoid::new(1)) as Box<dyn Component>),
            ("affine2".to_string(), affine(params[1])),
        ];
        let nodes = vec![
            Node::input("input", 1),
            Node::output("output", 3, ObjectiveType::Quadratic),
        ];
        Nnet::new(components, nodes).unwrap()
    }

    fn params(nnet: &Nnet, c: usize) -> Vec<f32> {
        nnet.updatable(c).unwrap().unwrap().params().to_vec()
    }

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn unconstrained_updates_add_the_scaled_delta() {
        let mut model = nnet([[1.0, 1.0], [1.0, 1.0]], 0.0);
        let delta = nnet([[0.5, -0.5], [1.0, 2.0]], 0.0);
        let mut stats = MaxChangeStats::new(&model).unwrap();

        assert!(update_nnet_with_max_change(&delta, 0.0, 1.0, 2.0, &mut model, &mut stats).unwrap());
        assert_eq!(params(&model, 0), vec![2.0, 0.0]);
        assert_eq!(params(&model, 2), vec![3.0, 5.0]);
        assert_eq!(stats.per_component(), &[0, 0]);
        assert_eq!(stats.global(), 0);
    }

    #[test]
    fn per_component_clipping_meets_the_threshold() {
        let mut model = nnet([[0.0, 0.0], [0.0, 0.0]], 1.0);
        let delta = nnet([[3.0, 4.0], [0.3, 0.4]], 1.0);
        let mut stats = MaxChangeStats::new(&model).unwrap();

        assert!(update_nnet_with_max_change(&delta, 0.0, 1.0, 1.0, &mut model, &mut stats).unwrap());
        assert!((norm(&params(&model, 0)) - 1.0).abs() < 1e-6);
        assert!((norm(&params(&model, 2)) - 0.5).abs() < 1e-6);
        assert_eq!(stats.per_component(), &[1, 0]);
        assert_eq!(stats.global(), 0);
    }

    #[test]
    fn max_change_scale_scales_the_threshold() {
        let mut model = nnet([[0.0, 0.0], [0.0, 0.0]], 1.0);
        let delta = nnet([[3.0, 4.0], [0.0, 0.0]], 1.0);
        let mut stats = MaxChangeStats::new(&model).unwrap();

        update_nnet_with_max_change(&delta, 0.0, 0.5, -1.0, &mut model, &mut stats).unwrap();
        let applied = params(&model, 0);
        assert!((norm(&applied) - 0.5).abs() < 1e-6);
        assert!(applied.iter().all(|&p| p < 0.0));
    }

    #[test]
    fn global_clipping_scales_every_component_uniformly() {
        let mut model = nnet([[0.0, 0.0], [0.0, 0.0]], 10.0);
        let delta = nnet([[3.0, 0.0], [0.0, 4.0]], 10.0);
        let mut stats = MaxChangeStats::new(&model).unwrap();

        assert!(update_nnet_with_max_change(&delta, 1.0, 1.0, 1.0, &mut model, &mut stats).unwrap());
        let (a, b) = (params(&model, 0), params(&model, 2));
        assert!((a[0] - 0.6).abs() < 1e-6);
        assert!((b[1] - 0.8).abs() < 1e-6);
        assert!((norm(&a).hypot(norm(&b)) - 1.0).abs() < 1e-6);
        assert_eq!(stats.per_component(), &[0, 0]);
        assert_eq!(stats.global(), 1);
    }

    #[test]
    fn non_finite_changes_are_not_applied() {
        let mut model = nnet([[1.0, 1.0], [1.0, 1.0]], 0.0);
        let delta = nnet([[f32::INFINITY, 0.0], [0.0, 0.0]], 0.0);
        let mut stats = MaxChangeStats::new(&model).unwrap();

        assert!(!update_nnet_with_max_change(&delta, 2.0, 1.0, 1.0, &mut model, &mut stats).unwrap());
        assert_eq!(params(&model, 0), vec![1.0, 1.0]);
    }

    #[test]
    fn stats_of_fixed_components_are_added() {
        let mut model = nnet([[0.0, 0.0], [0.0, 0.0]], 0.0);
        let mut delta = model.clone();
        delta.component_mut(1).store_stats(array![[0.5], [0.25]].view());
        let mut stats = MaxChangeStats::new(&model).unwrap();

        update_nnet_with_max_change(&delta, 0.0, 1.0, 2.0, &mut model, &mut stats).unwrap();
        let sigmoid_stats = model.component(1).stats().unwrap();
        assert_eq!(sigmoid_stats.count(), 4.0);
        assert_eq!(sigmoid_stats.value_sum()[0], 1.5);
    }

    #[test]
    fn counters_are_named_after_components() {
        let stats = MaxChangeStats::new(&nnet([[0.0, 0.0], [0.0, 0.0]], 0.0)).unwrap();
        assert_eq!(stats.names(), &["affine1".to_string(), "affine2".to_string()]);
    }

    #[test]
    fn percentages_count_both_backstitch_updates() {
        let delta = nnet([[3.0, 4.0], [0.3, 0.4]], 1.0);
        let mut model = nnet([[0.0, 0.0], [0.0, 0.0]], 1.0);
        let mut stats = MaxChangeStats::new(&model).unwrap();

        for _ in 0..2 {
            update_nnet_with_max_change(&delta, 1.0, 1.0, 1.0, &mut model, &mut stats).unwrap();
        }
        assert_eq!(stats.per_component(), &[2, 0]);
        assert_eq!(stats.global(), 2);

        assert_eq!(stats.percentages(4, false), (vec![50.0, 0.0], 50.0));
        assert_eq!(stats.percentages(4, true), (vec![25.0, 0.0], 25.0));
        assert_eq!(stats.percentages(0, true), (vec![0.0, 0.0], 0.0));
    }
}

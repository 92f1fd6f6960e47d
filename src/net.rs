use anyhow::{Result, ensure};
use rand::Rng;
use rand_distr::{Bernoulli, Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Scale applied to the Gaussian draws at initialization.
const INIT_SCALE: f32 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Layer {
    /// Row-major `inputs x outputs` weight matrix.
    weights: Vec<f32>,
    biases: Vec<f32>,
    inputs: usize,
    outputs: usize,
}

/// Fixed-topology feed-forward network. The parameter set is the genome the
/// evolutionary engine selects, crosses, and mutates; the topology is set at
/// construction and never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    sizes: Vec<usize>,
    layers: Vec<Layer>,
}

impl Network {
    /// Builds a randomly initialized network from an ordered sequence of
    /// layer widths. Weights and biases are drawn from N(0, 1) scaled by
    /// 0.5.
    pub fn new<R: Rng>(sizes: &[usize], rng: &mut R) -> Result<Self> {
        ensure!(sizes.len() >= 2, "network needs at least 2 layers, got {}", sizes.len());
        ensure!(sizes.iter().all(|&s| s > 0), "layer widths must be positive: {sizes:?}");

        let layers = sizes
            .windows(2)
            .map(|w| {
                let (inputs, outputs) = (w[0], w[1]);
                Layer {
                    weights: (0..inputs * outputs)
                        .map(|_| rng.sample::<f32, _>(StandardNormal) * INIT_SCALE)
                        .collect(),
                    biases: (0..outputs)
                        .map(|_| rng.sample::<f32, _>(StandardNormal) * INIT_SCALE)
                        .collect(),
                    inputs,
                    outputs,
                }
            })
            .collect();

        Ok(Self { sizes: sizes.to_vec(), layers })
    }

    pub fn layer_sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn input_width(&self) -> usize {
        self.sizes[0]
    }

    pub fn output_width(&self) -> usize {
        *self.sizes.last().expect("sizes has at least 2 entries")
    }

    /// Total scalar parameter count across all weight matrices and biases.
    pub fn param_count(&self) -> usize {
        self.layers.iter().map(|l| l.weights.len() + l.biases.len()).sum()
    }

    /// Runs the forward pass: affine + ReLU at every hidden transition,
    /// affine + numerically stable softmax at the last. Pure; the returned
    /// vector has the output layer's width.
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        ensure!(
            input.len() == self.input_width(),
            "input length {} does not match input layer width {}",
            input.len(),
            self.input_width()
        );

        let mut activation = input.to_vec();
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let mut z = layer.biases.clone();
            for (row, &a) in activation.iter().enumerate() {
                let weights = &layer.weights[row * layer.outputs..(row + 1) * layer.outputs];
                for (out, &w) in z.iter_mut().zip(weights) {
                    *out += a * w;
                }
            }
            if i < last {
                for v in &mut z {
                    *v = v.max(0.0);
                }
            } else {
                softmax(&mut z);
            }
            activation = z;
        }
        Ok(activation)
    }

    /// Flattens all parameters into one vector: layer 0 weights (row-major),
    /// layer 0 biases, layer 1 weights, and so on. Inverse of `restore`.
    pub fn flatten(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            flat.extend_from_slice(&layer.weights);
            flat.extend_from_slice(&layer.biases);
        }
        flat
    }

    /// Restores all parameters from a flat vector in `flatten` order. A
    /// length mismatch is rejected before anything is written, so a failed
    /// restore leaves the network untouched.
    pub fn restore(&mut self, flat: &[f32]) -> Result<()> {
        ensure!(
            flat.len() == self.param_count(),
            "flat vector has {} values but the network has {} parameters",
            flat.len(),
            self.param_count()
        );

        let mut ix = 0;
        for layer in &mut self.layers {
            let w_len = layer.weights.len();
            layer.weights.copy_from_slice(&flat[ix..ix + w_len]);
            ix += w_len;
            let b_len = layer.biases.len();
            layer.biases.copy_from_slice(&flat[ix..ix + b_len]);
            ix += b_len;
        }
        Ok(())
    }

    /// Perturbs each scalar parameter independently with probability `rate`
    /// by a zero-mean Gaussian scaled by `strength`, in place.
    pub fn mutate<R: Rng>(&mut self, rate: f32, strength: f32, rng: &mut R) {
        let bern = Bernoulli::new(f64::from(rate.clamp(0.0, 1.0)))
            .expect("probability is clamped to [0, 1]");
        for layer in &mut self.layers {
            for w in layer.weights.iter_mut().chain(layer.biases.iter_mut()) {
                if bern.sample(rng) {
                    *w += rng.sample::<f32, _>(StandardNormal) * strength;
                }
            }
        }
    }

    /// Single-point crossover: the child takes `a`'s flattened values below
    /// a uniformly random point in `[0, total]` and `b`'s at or above it.
    /// Point 0 yields a copy of `b`; point `total` a copy of `a`.
    pub fn crossover<R: Rng>(a: &Network, b: &Network, rng: &mut R) -> Result<Network> {
        ensure!(
            a.sizes == b.sizes,
            "crossover requires matching topologies: {:?} vs {:?}",
            a.sizes,
            b.sizes
        );

        let mut flat = a.flatten();
        let point = rng.gen_range(0..=flat.len());
        flat[point..].copy_from_slice(&b.flatten()[point..]);

        let mut child = a.clone();
        child.restore(&flat)?;
        Ok(child)
    }
}

fn softmax(z: &mut [f32]) {
    let max = z.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for v in z.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in z.iter_mut() {
        *v /= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    #[test]
    fn rejects_degenerate_topologies() {
        let mut rng = rng();
        assert!(Network::new(&[8], &mut rng).is_err());
        assert!(Network::new(&[8, 0, 4], &mut rng).is_err());
        assert!(Network::new(&[8, 4], &mut rng).is_ok());
    }

    #[test]
    fn param_count_matches_topology() {
        let mut rng = rng();
        let net = Network::new(&[8, 6, 4], &mut rng).unwrap();
        assert_eq!(net.param_count(), 8 * 6 + 6 + 6 * 4 + 4);
        assert_eq!(net.flatten().len(), net.param_count());
    }

    #[test]
    fn forward_output_is_a_distribution() {
        let mut rng = rng();
        let net = Network::new(&[8, 6, 4], &mut rng).unwrap();
        let out = net.forward(&[0.1; 8]).unwrap();
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|&p| p >= 0.0));
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn forward_rejects_wrong_input_length() {
        let mut rng = rng();
        let net = Network::new(&[8, 4], &mut rng).unwrap();
        assert!(net.forward(&[0.0; 5]).is_err());
    }

    #[test]
    fn softmax_survives_large_logits() {
        let mut z = vec![1000.0, 1001.0, 999.0];
        softmax(&mut z);
        assert!(z.iter().all(|v| v.is_finite()));
        assert!((z.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn flatten_restore_round_trips_forward_output() {
        let mut rng = rng();
        let net = Network::new(&[8, 10, 4], &mut rng).unwrap();
        let mut other = Network::new(&[8, 10, 4], &mut rng).unwrap();
        other.restore(&net.flatten()).unwrap();

        let input = [0.3, -0.1, 0.9, 0.0, 0.5, -0.7, 0.2, 0.8];
        assert_eq!(net.forward(&input).unwrap(), other.forward(&input).unwrap());
    }

    #[test]
    fn restore_rejects_length_mismatch_without_mutating() {
        let mut rng = rng();
        let mut net = Network::new(&[8, 4], &mut rng).unwrap();
        let before = net.flatten();
        assert!(net.restore(&[0.0; 3]).is_err());
        assert_eq!(net.flatten(), before);
    }

    #[test]
    fn clone_is_independent() {
        let mut rng = rng();
        let net = Network::new(&[4, 4], &mut rng).unwrap();
        let mut copy = net.clone();
        copy.mutate(1.0, 1.0, &mut rng);
        assert_ne!(net.flatten(), copy.flatten());
    }

    #[test]
    fn mutation_rate_zero_is_a_no_op() {
        let mut rng = rng();
        let mut net = Network::new(&[6, 5, 3], &mut rng).unwrap();
        let before = net.flatten();
        net.mutate(0.0, 1.0, &mut rng);
        assert_eq!(net.flatten(), before);
    }

    #[test]
    fn mutation_rate_one_touches_every_parameter() {
        let mut rng = rng();
        let mut net = Network::new(&[6, 5, 3], &mut rng).unwrap();
        let before = net.flatten();
        net.mutate(1.0, 1.0, &mut rng);
        let after = net.flatten();
        let changed = before.iter().zip(&after).filter(|(a, b)| a != b).count();
        assert_eq!(changed, net.param_count());
    }

    #[test]
    fn crossover_child_is_a_prefix_suffix_splice() {
        let mut rng = rng();
        let a = Network::new(&[4, 3, 2], &mut rng).unwrap();
        let b = Network::new(&[4, 3, 2], &mut rng).unwrap();
        let (fa, fb) = (a.flatten(), b.flatten());

        let child = Network::crossover(&a, &b, &mut rng).unwrap();
        let fc = child.flatten();
        // Some split point must explain the child exactly.
        let point = (0..=fc.len())
            .find(|&p| fc[..p] == fa[..p] && fc[p..] == fb[p..])
            .expect("child is a single-point splice of its parents");
        assert!(point <= a.param_count());
    }

    #[test]
    fn crossover_rejects_mismatched_topologies() {
        let mut rng = rng();
        let a = Network::new(&[4, 3, 2], &mut rng).unwrap();
        let b = Network::new(&[4, 2], &mut rng).unwrap();
        assert!(Network::crossover(&a, &b, &mut rng).is_err());
    }
}

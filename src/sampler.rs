//! Sampler
//!
//! Strategies for sampling the training rows of every tree. The rows that were
//! never drawn are the tree's out-of-bag rows.
use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;

// A sampler can be used to subset the data prior to fitting a new tree.
pub trait Sampler {
    /// Sample the data, returning a tuple, where the first item is the samples
    /// chosen for training, and the second are the samples never chosen.
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>);
}

fn n_draws(fraction: f64, n: usize) -> usize {
    ((fraction * n as f64).round() as usize).clamp(1, n.max(1))
}

fn never_drawn(index: &[usize], drawn: &[bool]) -> Vec<usize> {
    index
        .iter()
        .zip(drawn)
        .filter_map(|(i, d)| if *d { None } else { Some(*i) })
        .collect()
}

/// Draws with replacement, rows can be chosen several times.
pub struct BootstrapSampler {
    fraction: f64,
}

impl BootstrapSampler {
    pub fn new(fraction: f64) -> Self {
        BootstrapSampler { fraction }
    }
}

impl Sampler for BootstrapSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        if index.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let mut drawn = vec![false; index.len()];
        let mut chosen: Vec<usize> = (0..n_draws(self.fraction, index.len()))
            .map(|_| {
                let k = rng.gen_range(0..index.len());
                drawn[k] = true;
                index[k]
            })
            .collect();
        chosen.sort_unstable();
        (chosen, never_drawn(index, &drawn))
    }
}

/// Draws without replacement.
pub struct SubSampler {
    fraction: f64,
}

impl SubSampler {
    pub fn new(fraction: f64) -> Self {
        SubSampler { fraction }
    }
}

impl Sampler for SubSampler {
    fn sample(&mut self, rng: &mut StdRng, index: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let n = index.len();
        let k = n_draws(self.fraction, n);
        if k >= n {
            return (index.to_vec(), Vec::new());
        }
        let mut drawn = vec![false; n];
        index::sample(rng, n, k).iter().for_each(|i| drawn[i] = true);
        let chosen = index.iter().zip(&drawn).filter(|(_, d)| **d).map(|(i, _)| *i).collect();
        (chosen, never_drawn(index, &drawn))
    }
}

/// Pick the sampler for the bootstrap flag and the fraction of rows per tree.
pub fn sampler_for(bootstrap: bool, fraction: f64) -> Box<dyn Sampler> {
    if bootstrap {
        Box::new(BootstrapSampler::new(fraction))
    } else {
        Box::new(SubSampler::new(fraction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_bootstrap_sampler() {
        let mut rng = StdRng::seed_from_u64(42);
        let index: Vec<usize> = (0..100).collect();
        let mut sampler = BootstrapSampler::new(1.0);
        let (chosen, oob) = sampler.sample(&mut rng, &index);
        assert_eq!(chosen.len(), 100);
        // Some rows are drawn twice, so some are never drawn.
        assert!(!oob.is_empty());
        assert!(oob.iter().all(|r| !chosen.contains(r)));
        let mut distinct = chosen.clone();
        distinct.dedup();
        assert_eq!(distinct.len() + oob.len(), 100);
    }

    #[test]
    fn test_sub_sampler() {
        let mut rng = StdRng::seed_from_u64(42);
        let index: Vec<usize> = (0..10).collect();
        let (chosen, oob) = SubSampler::new(0.5).sample(&mut rng, &index);
        assert_eq!(chosen.len(), 5);
        assert_eq!(oob.len(), 5);
        assert!(chosen.windows(2).all(|w| w[0] < w[1]));

        // Everything is chosen, so nothing is out of bag.
        let (chosen, oob) = SubSampler::new(1.0).sample(&mut rng, &index);
        assert_eq!(chosen, index);
        assert!(oob.is_empty());
    }

    #[test]
    fn test_sampler_is_seeded() {
        let index: Vec<usize> = (0..50).collect();
        let a = sampler_for(true, 0.7).sample(&mut StdRng::seed_from_u64(7), &index);
        let b = sampler_for(true, 0.7).sample(&mut StdRng::seed_from_u64(7), &index);
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 35);
    }
}

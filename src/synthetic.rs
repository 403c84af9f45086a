//! Seeded synthetic streams for tests and demos: gaussian mixtures and
//! noisy periodic waves.

use std::f32::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

/// A generated stream together with the mixture component (or change flag)
/// behind each point.
pub struct LabeledStream {
    pub points: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

fn next_gaussian(rng: &mut ChaCha20Rng) -> f32 {
    let mut radius = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>()));
    while !radius.is_finite() {
        radius = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>()));
    }
    let angle = 2.0 * PI * rng.gen::<f32>();
    if rng.gen::<f32>() < 0.5 {
        radius as f32 * angle.cos()
    } else {
        radius as f32 * angle.sin()
    }
}

fn gaussian_vector(mean: &[f32], scale: &[f32], rng: &mut ChaCha20Rng) -> Vec<f32> {
    mean.iter()
        .zip(scale)
        .map(|(&m, &s)| m + s * next_gaussian(rng))
        .collect()
}

/// Draws `num` points from a mixture of axis-aligned gaussians; `weights`
/// need not be normalized.
pub fn gaussian_mixture(
    num: usize,
    means: &[Vec<f32>],
    scales: &[Vec<f32>],
    weights: &[f32],
    seed: u64,
) -> LabeledStream {
    assert!(num > 0, "empty stream");
    assert!(!means.is_empty(), "need at least one component");
    assert!(means.len() == scales.len(), "means and scales must pair up");
    assert!(means.len() == weights.len(), "means and weights must pair up");
    let dimensions = means[0].len();
    for (mean, scale) in means.iter().zip(scales) {
        assert!(mean.len() == dimensions, "components must share dimension");
        assert!(scale.len() == dimensions, "components must share dimension");
    }
    let total: f32 = weights.iter().sum();
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(num);
    let mut labels = Vec::with_capacity(num);
    for _ in 0..num {
        let mut draw = total * rng.gen::<f32>();
        let mut component = 0;
        while draw > weights[component] && component + 1 < weights.len() {
            draw -= weights[component];
            component += 1;
        }
        points.push(gaussian_vector(&means[component], &scales[component], &mut rng));
        labels.push(component);
    }
    LabeledStream { points, labels }
}

/// A noisy cosine wave per dimension, with a random phase per dimension.
pub fn noisy_cosine(
    num: usize,
    periods: &[usize],
    amplitudes: &[f32],
    noise: f32,
    seed: u64,
) -> Vec<Vec<f32>> {
    assert!(periods.len() == amplitudes.len(), "periods and amplitudes must pair up");
    let base_dimension = periods.len();
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let phases: Vec<usize> = periods
        .iter()
        .map(|&p| rng.next_u64() as usize % p)
        .collect();
    let mut data = Vec::with_capacity(num);
    for i in 0..num {
        let mut block = vec![0.0f32; base_dimension];
        for j in 0..base_dimension {
            block[j] = amplitudes[j]
                * (2.0 * PI * (i + phases[j]) as f32 / periods[j] as f32).cos()
                + noise * rng.gen::<f32>();
        }
        data.push(block);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixture_respects_weights_roughly() {
        let stream = gaussian_mixture(
            10_000,
            &[vec![0.0], vec![100.0]],
            &[vec![1.0], vec![1.0]],
            &[0.9, 0.1],
            11,
        );
        let minority = stream.labels.iter().filter(|&&l| l == 1).count();
        assert!(minority > 500 && minority < 1500);
        assert!(stream.points[0].len() == 1);
    }

    #[test]
    fn cosine_stays_within_amplitude_plus_noise() {
        let wave = noisy_cosine(1000, &[60], &[10.0], 0.5, 3);
        assert!(wave.iter().all(|b| b[0].abs() <= 10.5));
    }
}

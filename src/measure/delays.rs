//! Randomized inter-trial delays

use rand::seq::SliceRandom;
use rand::Rng;

/// `count` delays evenly spaced over `[min, max]`, in random order.
///
/// Shuffling keeps any drift over the run (thermal, habituation) from
/// correlating with the delay length. `count <= 1` yields `[min]`.
pub fn delays(min: f64, max: f64, count: usize) -> Vec<f64> {
    delays_with_rng(min, max, count, &mut rand::rng())
}

/// Same as [`delays`] with an explicit random source
pub fn delays_with_rng<R: Rng + ?Sized>(min: f64, max: f64, count: usize, rng: &mut R) -> Vec<f64> {
    if count <= 1 {
        return vec![min];
    }

    let delta = max - min;
    let last = (count - 1) as f64;
    let mut out: Vec<f64> = (0..count).map(|k| min + delta * (k as f64 / last)).collect();
    out.shuffle(rng);
    out
}

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Additive white Gaussian noise source for BER testing and the loopback
/// channel harness.
pub struct AwgnChannel {
    rng: StdRng,
}

impl AwgnChannel {
    pub fn new(seed: u64) -> Self {
        AwgnChannel {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// One N(0, 1) sample via Box-Muller.
    pub fn gaussian(&mut self) -> f64 {
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    pub fn apply(&mut self, input: &[f64], output: &mut [f64], sigma: f64) {
        for (out, &s) in output.iter_mut().zip(input.iter()) {
            *out = s + self.gaussian() * sigma;
        }
    }

    /// Noise-filled output with the signal embedded `delay` samples in.
    pub fn apply_with_delay(
        &mut self,
        input: &[f64],
        output: &mut [f64],
        sigma: f64,
        delay: usize,
    ) {
        for out in output.iter_mut() {
            *out = self.gaussian() * sigma;
        }
        for (i, &s) in input.iter().enumerate() {
            if delay + i < output.len() {
                output[delay + i] += s;
            }
        }
    }
}

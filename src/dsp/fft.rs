use num_complex::Complex64;
use rustfft::FftPlanner;

/// Forward/inverse transforms with the scaling convention the OFDM chain
/// expects: the forward transform divides by N, the inverse is raw. A
/// round trip therefore reproduces the input exactly.
pub struct Fft {
    planner: FftPlanner<f64>,
}

impl Default for Fft {
    fn default() -> Self {
        Self::new()
    }
}

impl Fft {
    pub fn new() -> Self {
        Fft {
            planner: FftPlanner::new(),
        }
    }

    /// Forward transform of `input` into `output`, scaled by 1/N.
    pub fn fft(&mut self, input: &[Complex64], output: &mut [Complex64]) {
        let n = input.len();
        output[..n].copy_from_slice(input);
        let plan = self.planner.plan_fft_forward(n);
        plan.process(&mut output[..n]);
        let scale = 1.0 / n as f64;
        for value in output[..n].iter_mut() {
            *value *= scale;
        }
    }

    /// Inverse transform, unscaled.
    pub fn ifft(&mut self, input: &[Complex64], output: &mut [Complex64]) {
        let n = input.len();
        output[..n].copy_from_slice(input);
        let plan = self.planner.plan_fft_inverse(n);
        plan.process(&mut output[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn round_trip_error_below_1e_10() {
        let mut rng = StdRng::seed_from_u64(99);
        let mut fft = Fft::new();

        for nfft in [64usize, 128, 256, 512, 1024] {
            let input: Vec<Complex64> = (0..nfft)
                .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                .collect();
            let mut spectrum = vec![Complex64::default(); nfft];
            let mut back = vec![Complex64::default(); nfft];

            fft.fft(&input, &mut spectrum);
            fft.ifft(&spectrum, &mut back);

            let max_err = input
                .iter()
                .zip(back.iter())
                .map(|(a, b)| (a - b).norm())
                .fold(0.0f64, f64::max);
            assert!(max_err < 1e-10, "Nfft={nfft}: {max_err}");
        }
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut fft = Fft::new();
        let mut input = vec![Complex64::default(); 64];
        input[0] = Complex64::new(64.0, 0.0);
        let mut spectrum = vec![Complex64::default(); 64];
        fft.fft(&input, &mut spectrum);
        for bin in &spectrum {
            assert!((bin - Complex64::new(1.0, 0.0)).norm() < 1e-12);
        }
    }
}

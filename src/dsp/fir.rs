use std::f64::consts::PI;

use num_complex::Complex64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirWindow {
    Rectangular,
    Hanning,
    Hamming,
    Blackman,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirKind {
    LowPass,
    HighPass,
    BandPass,
}

/// Windowed-sinc FIR filter. The tap count follows from the requested
/// transition bandwidth and the window's normalized width.
#[derive(Debug, Clone)]
pub struct Fir {
    pub window: FirWindow,
    pub kind: FirKind,
    pub transition_bandwidth: f64,
    pub lpf_cut_frequency: f64,
    pub hpf_cut_frequency: f64,
    pub sampling_frequency: f64,
    coefficients: Vec<f64>,
}

impl Fir {
    pub fn new(
        window: FirWindow,
        kind: FirKind,
        transition_bandwidth: f64,
        lpf_cut_frequency: f64,
        hpf_cut_frequency: f64,
    ) -> Self {
        Fir {
            window,
            kind,
            transition_bandwidth,
            lpf_cut_frequency,
            hpf_cut_frequency,
            sampling_frequency: 0.0,
            coefficients: Vec::new(),
        }
    }

    pub fn n_taps(&self) -> usize {
        self.coefficients.len()
    }

    /// Compute the taps for the current sampling frequency. Must run before
    /// `apply`, and again after any parameter change.
    pub fn design(&mut self) {
        // Normalized transition widths of the standard windows.
        let width_factor = match self.window {
            FirWindow::Rectangular => 0.9,
            FirWindow::Hanning => 3.1,
            FirWindow::Hamming => 3.3,
            FirWindow::Blackman => 5.5,
        };
        let mut n_taps =
            (width_factor * self.sampling_frequency / self.transition_bandwidth).ceil() as usize;
        if n_taps % 2 == 0 {
            n_taps += 1;
        }

        self.coefficients = match self.kind {
            FirKind::LowPass => self.windowed_sinc(n_taps, self.lpf_cut_frequency),
            FirKind::HighPass => {
                // Spectral inversion of the complementary low-pass.
                let mut taps = self.windowed_sinc(n_taps, self.hpf_cut_frequency);
                for tap in taps.iter_mut() {
                    *tap = -*tap;
                }
                taps[n_taps / 2] += 1.0;
                taps
            }
            FirKind::BandPass => {
                let low = self.windowed_sinc(n_taps, self.hpf_cut_frequency);
                let high = self.windowed_sinc(n_taps, self.lpf_cut_frequency);
                high.iter().zip(low.iter()).map(|(h, l)| h - l).collect()
            }
        };
    }

    fn windowed_sinc(&self, n_taps: usize, cut_frequency: f64) -> Vec<f64> {
        let fc = cut_frequency / self.sampling_frequency;
        let mid = (n_taps / 2) as f64;
        let mut taps = Vec::with_capacity(n_taps);
        for i in 0..n_taps {
            let x = i as f64 - mid;
            let sinc = if x == 0.0 {
                2.0 * PI * fc
            } else {
                (2.0 * PI * fc * x).sin() / x
            };
            let m = (n_taps - 1) as f64;
            let w = match self.window {
                FirWindow::Rectangular => 1.0,
                FirWindow::Hanning => 0.5 - 0.5 * (2.0 * PI * i as f64 / m).cos(),
                FirWindow::Hamming => 0.54 - 0.46 * (2.0 * PI * i as f64 / m).cos(),
                FirWindow::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * i as f64 / m).cos()
                        + 0.08 * (4.0 * PI * i as f64 / m).cos()
                }
            };
            taps.push(sinc * w);
        }
        let sum: f64 = taps.iter().sum::<f64>().max(1e-12);
        // Unity DC gain; the high-pass path re-inverts afterwards.
        for tap in taps.iter_mut() {
            *tap /= sum;
        }
        taps
    }

    /// Convolve with group-delay compensation so input and output stay
    /// aligned. Samples beyond either edge are taken as zero.
    pub fn apply(&self, input: &[f64], output: &mut [f64]) {
        let n_taps = self.coefficients.len();
        let half = (n_taps / 2) as isize;
        for (i, out) in output.iter_mut().enumerate().take(input.len()) {
            let mut acc = 0.0;
            for (j, &c) in self.coefficients.iter().enumerate() {
                let k = i as isize + j as isize - half;
                if k >= 0 && (k as usize) < input.len() {
                    acc += c * input[k as usize];
                }
            }
            *out = acc;
        }
    }

    pub fn apply_complex(&self, input: &[Complex64], output: &mut [Complex64]) {
        let n_taps = self.coefficients.len();
        let half = (n_taps / 2) as isize;
        for (i, out) in output.iter_mut().enumerate().take(input.len()) {
            let mut acc = Complex64::default();
            for (j, &c) in self.coefficients.iter().enumerate() {
                let k = i as isize + j as isize - half;
                if k >= 0 && (k as usize) < input.len() {
                    acc += input[k as usize] * c;
                }
            }
            *out = acc;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f64, fs: f64, len: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    fn rms(samples: &[f64]) -> f64 {
        (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn low_pass_keeps_passband_and_rejects_stopband() {
        let fs = 48000.0;
        let mut fir = Fir::new(FirWindow::Hamming, FirKind::LowPass, 1000.0, 4000.0, 0.0);
        fir.sampling_frequency = fs;
        fir.design();

        let len = 4096;
        let pass = tone(1000.0, fs, len);
        let stop = tone(12000.0, fs, len);
        let mut out = vec![0.0; len];

        fir.apply(&pass, &mut out);
        let kept = rms(&out[500..len - 500]);
        fir.apply(&stop, &mut out);
        let rejected = rms(&out[500..len - 500]);

        assert!(kept > 0.6, "passband rms {kept}");
        assert!(rejected < 0.05, "stopband rms {rejected}");
    }

    #[test]
    fn high_pass_rejects_low_frequencies() {
        let fs = 48000.0;
        let mut fir = Fir::new(FirWindow::Hamming, FirKind::HighPass, 1000.0, 0.0, 5000.0);
        fir.sampling_frequency = fs;
        fir.design();

        let len = 4096;
        let low = tone(500.0, fs, len);
        let high = tone(10000.0, fs, len);
        let mut out = vec![0.0; len];

        fir.apply(&low, &mut out);
        let rejected = rms(&out[500..len - 500]);
        fir.apply(&high, &mut out);
        let kept = rms(&out[500..len - 500]);

        assert!(rejected < 0.05, "low tone rms {rejected}");
        assert!(kept > 0.6, "high tone rms {kept}");
    }

    #[test]
    fn taps_are_odd_counted() {
        let mut fir = Fir::new(FirWindow::Blackman, FirKind::LowPass, 300.0, 7500.0, 0.0);
        fir.sampling_frequency = 51200.0;
        fir.design();
        assert_eq!(fir.n_taps() % 2, 1);
    }
}

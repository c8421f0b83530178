use num_complex::Complex64;
use rayon::prelude::*;

/// One time-sync hypothesis: sample offset and its normalized correlation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncCandidate {
    pub delay: usize,
    pub correlation: f64,
}

fn accumulate(a: &[Complex64], b: &[Complex64], corr: &mut f64, norm_a: &mut f64, norm_b: &mut f64) {
    // Real and imaginary rails correlated independently.
    for (x, y) in a.iter().zip(b.iter()) {
        *corr += x.re * y.re + x.im * y.im;
        *norm_a += x.re * x.re + x.im * x.im;
        *norm_b += y.re * y.re + y.im * y.im;
    }
}

/// Cyclic-prefix correlator: at each candidate offset, correlate the guard
/// window with the window Nfft samples later across `time_sync_nsymb`
/// symbols. Peaks mark OFDM symbol boundaries.
#[allow(clippy::too_many_arguments)]
pub fn time_sync(
    input: &[Complex64],
    size: usize,
    nfft: usize,
    ngi: usize,
    interpolation_rate: usize,
    time_sync_nsymb: usize,
    n_candidates: usize,
) -> Vec<SyncCandidate> {
    let symbol = (nfft + ngi) * interpolation_rate;
    if size < symbol {
        return Vec::new();
    }
    let limit = size - symbol;

    let mut candidates: Vec<SyncCandidate> = (0..limit)
        .into_par_iter()
        .map(|i| {
            let mut corr = 0.0;
            let mut norm_a = 0.0;
            let mut norm_b = 0.0;
            for j in 0..time_sync_nsymb {
                let base = i + j * symbol;
                if base + symbol + nfft * interpolation_rate > input.len() {
                    break;
                }
                let a = &input[base..base + ngi * interpolation_rate];
                let b = &input[base + nfft * interpolation_rate
                    ..base + nfft * interpolation_rate + ngi * interpolation_rate];
                accumulate(a, b, &mut corr, &mut norm_a, &mut norm_b);
            }
            SyncCandidate {
                delay: i,
                correlation: corr / (norm_a * norm_b).sqrt().max(1e-30),
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.correlation.total_cmp(&a.correlation));
    candidates.truncate(n_candidates);
    candidates
}

/// Preamble correlator: sums, across all preamble symbols, the guard-window
/// correlation and the correlation between the two halves of the Nfft body.
/// The half-symbol term exists only for the preamble (energy on even bins
/// makes its body Nfft/2-periodic), so the metric peaks at the true start.
#[allow(clippy::too_many_arguments)]
pub fn time_sync_preamble(
    input: &[Complex64],
    size: usize,
    nfft: usize,
    ngi: usize,
    interpolation_rate: usize,
    preamble_nsymb: usize,
    step: usize,
    n_candidates: usize,
) -> Vec<SyncCandidate> {
    let symbol = (nfft + ngi) * interpolation_rate;
    let window = preamble_nsymb * symbol;
    let size = size.min(input.len());
    if size < window + 1 {
        return Vec::new();
    }
    let limit = size - window;

    let offsets: Vec<usize> = (0..limit).step_by(step.max(1)).collect();
    let mut candidates: Vec<SyncCandidate> = offsets
        .into_par_iter()
        .map(|i| {
            let data = &input[i..i + window];
            let mut corr = 0.0;
            let mut norm_a = 0.0;
            let mut norm_b = 0.0;

            for l in 0..preamble_nsymb {
                let base = l * symbol;

                // Guard interval against the end of the body.
                let a = &data[base..base + ngi * interpolation_rate];
                let b = &data[base + nfft * interpolation_rate
                    ..base + (nfft + ngi) * interpolation_rate];
                accumulate(a, b, &mut corr, &mut norm_a, &mut norm_b);

                // First half of the body against the second half.
                let body = base + ngi * interpolation_rate;
                let half = (nfft / 2) * interpolation_rate;
                let a = &data[body..body + half];
                let b = &data[body + half..body + 2 * half];
                accumulate(a, b, &mut corr, &mut norm_a, &mut norm_b);
            }

            SyncCandidate {
                delay: i,
                correlation: corr / (norm_a * norm_b).sqrt().max(1e-30),
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.correlation.total_cmp(&a.correlation));
    candidates.truncate(n_candidates);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Build a synthetic preamble: Nfft/2-periodic body plus cyclic prefix.
    fn synthetic_preamble(
        nfft: usize,
        ngi: usize,
        nsymb: usize,
        rng: &mut StdRng,
    ) -> Vec<Complex64> {
        let mut out = Vec::new();
        for _ in 0..nsymb {
            let half: Vec<Complex64> = (0..nfft / 2)
                .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                .collect();
            let mut body = half.clone();
            body.extend_from_slice(&half);
            let mut symbol: Vec<Complex64> = body[nfft - ngi..].to_vec();
            symbol.extend_from_slice(&body);
            out.extend_from_slice(&symbol);
        }
        out
    }

    #[test]
    fn preamble_correlator_finds_the_offset() {
        let mut rng = StdRng::seed_from_u64(21);
        let nfft = 128;
        let ngi = 8;
        let true_offset = 413;

        let mut signal: Vec<Complex64> = (0..true_offset)
            .map(|_| Complex64::new(rng.gen_range(-0.01..0.01), rng.gen_range(-0.01..0.01)))
            .collect();
        signal.extend(synthetic_preamble(nfft, ngi, 4, &mut rng));
        signal.extend((0..600).map(|_| {
            Complex64::new(rng.gen_range(-0.01..0.01), rng.gen_range(-0.01..0.01))
        }));

        let coarse = time_sync_preamble(&signal, signal.len(), nfft, ngi, 1, 4, 10, 2);
        assert!(!coarse.is_empty());
        let best = coarse[0];
        assert!(best.correlation > 0.7, "{}", best.correlation);
        assert!(
            best.delay.abs_diff(true_offset) <= 10,
            "coarse {} vs {}",
            best.delay,
            true_offset
        );

        let refined = time_sync_preamble(&signal, signal.len(), nfft, ngi, 1, 4, 1, 2);
        assert_eq!(refined[0].delay, true_offset);
    }

    #[test]
    fn noise_only_input_correlates_poorly() {
        let mut rng = StdRng::seed_from_u64(22);
        let signal: Vec<Complex64> = (0..4000)
            .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect();
        let found = time_sync_preamble(&signal, signal.len(), 128, 8, 1, 4, 1, 1);
        assert!(found[0].correlation < 0.5, "{}", found[0].correlation);
    }

    #[test]
    fn cp_correlator_locks_to_symbol_boundaries() {
        let mut rng = StdRng::seed_from_u64(23);
        let nfft = 128;
        let ngi = 8;
        // Symbols with proper cyclic prefixes starting at offset 77.
        let mut signal: Vec<Complex64> = (0..77)
            .map(|_| Complex64::new(rng.gen_range(-0.9..0.9), rng.gen_range(-0.9..0.9)))
            .collect();
        for _ in 0..6 {
            let body: Vec<Complex64> = (0..nfft)
                .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
                .collect();
            signal.extend_from_slice(&body[nfft - ngi..]);
            signal.extend_from_slice(&body);
        }

        let found = time_sync(&signal, signal.len(), nfft, ngi, 1, 4, 1);
        assert_eq!(found[0].delay % (nfft + ngi), 77 % (nfft + ngi));
    }
}

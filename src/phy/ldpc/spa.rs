use super::code::LdpcCode;

/// Sum-product decoding on the factor graph. Returns the iteration at which
/// the syndrome cleared, or `n_iteration_max` when it never did. A
/// consistent input counts as one iteration.
pub fn decode_spa(
    llr_in: &[f64],
    decoded: &mut [u8],
    code: &LdpcCode,
    n_iteration_max: usize,
) -> usize {
    let n = code.n;
    let mut bins: Vec<u8> = llr_in.iter().map(|&l| (l < 0.0) as u8).collect();
    let mut llr_tmp: Vec<f64> = llr_in.to_vec();

    if code.syndrome_clear(&bins) {
        for (out, &bit) in decoded.iter_mut().zip(bins.iter()).take(code.k) {
            *out = bit;
        }
        return 1;
    }

    // Messages live on the variable-side projection: R (check -> variable)
    // and Q (variable -> check), one slot per edge of vmatrix.
    let mut r: Vec<Vec<f64>> = code.vmatrix.iter().map(|row| vec![0.0; row.len()]).collect();
    let mut q: Vec<Vec<f64>> = code
        .vmatrix
        .iter()
        .enumerate()
        .map(|(v, row)| vec![llr_in[v]; row.len()])
        .collect();

    let mut iteration = 1;
    while iteration < n_iteration_max {
        // Check update: R = 2 atanh(prod tanh(Q/2)) over the other edges.
        for (i, row) in code.cmatrix.iter().enumerate() {
            for (slot, &v) in row.iter().enumerate() {
                let mut product = 1.0f64;
                for (other_slot, &v1) in row.iter().enumerate() {
                    if other_slot == slot {
                        continue;
                    }
                    let pos = code.cpos[i][other_slot] as usize;
                    product *= (0.5 * q[v1 as usize][pos]).tanh();
                }
                // Keep atanh off the poles.
                product = product.clamp(-0.999_999_9, 0.999_999_9);
                let pos = code.cpos[i][slot] as usize;
                r[v as usize][pos] = 2.0 * product.atanh();
            }
        }

        for v in 0..n {
            llr_tmp[v] = llr_in[v] + r[v].iter().sum::<f64>();
            bins[v] = (llr_tmp[v] < 0.0) as u8;
        }

        if code.syndrome_clear(&bins) {
            break;
        }

        // Variable update: Q = LLR + sum(R) - R_self.
        for v in 0..n {
            let total: f64 = r[v].iter().sum();
            for (slot, q_value) in q[v].iter_mut().enumerate() {
                *q_value = llr_in[v] + total - r[v][slot];
            }
        }

        iteration += 1;
    }

    for (out, &bit) in decoded.iter_mut().zip(bins.iter()).take(code.k) {
        *out = bit;
    }
    iteration
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::ldpc::code::LdpcRate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn llrs_from_codeword(codeword: &[u8]) -> Vec<f64> {
        codeword
            .iter()
            .map(|&b| if b == 0 { 4.0 } else { -4.0 })
            .collect()
    }

    #[test]
    fn clean_input_decodes_in_one_iteration() {
        let code = LdpcCode::new(LdpcRate::R14of16).unwrap();
        let data: Vec<u8> = (0..code.k).map(|i| (i % 2) as u8).collect();
        let mut codeword = vec![0u8; code.n];
        code.encode(&data, &mut codeword);

        let llrs = llrs_from_codeword(&codeword);
        let mut decoded = vec![0u8; code.k];
        let iterations = decode_spa(&llrs, &mut decoded, &code, 50);

        assert_eq!(iterations, 1);
        assert_eq!(decoded, data);
    }

    fn flip_sweep(code: &LdpcCode, flip_counts: &[usize], trials: usize, seed: u64) -> usize {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut failures = 0;
        for &n_flips in flip_counts {
            for _ in 0..trials {
                let data: Vec<u8> = (0..code.k).map(|_| rng.gen_range(0..2) as u8).collect();
                let mut codeword = vec![0u8; code.n];
                code.encode(&data, &mut codeword);

                let mut llrs = llrs_from_codeword(&codeword);
                for _ in 0..n_flips {
                    let at = rng.gen_range(0..code.n);
                    llrs[at] = -llrs[at];
                }

                let mut decoded = vec![0u8; code.k];
                let iterations = decode_spa(&llrs, &mut decoded, code, 50);
                if iterations >= 50 || decoded != data {
                    failures += 1;
                }
            }
        }
        failures
    }

    #[test]
    fn high_rate_recovers_from_scattered_bit_flips() {
        let code = LdpcCode::new(LdpcRate::R14of16).unwrap();
        // Within the high-rate operating range: 95% of trials recover.
        let failures = flip_sweep(&code, &[1, 4, 8, 12], 20, 7);
        assert!(failures <= 4, "{failures} failures");
    }

    #[test]
    fn low_rate_absorbs_heavy_flip_counts() {
        let code = LdpcCode::new(LdpcRate::R2of16).unwrap();
        let failures = flip_sweep(&code, &[10, 40, 80], 10, 9);
        assert!(failures <= 1, "{failures} failures");
    }

    #[test]
    fn unrecoverable_noise_hits_the_iteration_cap() {
        let code = LdpcCode::new(LdpcRate::R14of16).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        let llrs: Vec<f64> = (0..code.n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut decoded = vec![0u8; code.k];
        let iterations = decode_spa(&llrs, &mut decoded, &code, 12);
        assert_eq!(iterations, 12);
    }
}

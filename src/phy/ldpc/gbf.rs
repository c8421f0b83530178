use super::code::LdpcCode;

/// Gradient bit-flipping decoder. Cheap and iteration-hungry compared to
/// sum-product; kept for machines where the tanh traffic is too expensive.
/// Same return contract as `decode_spa`.
pub fn decode_gbf(
    llr_in: &[f64],
    decoded: &mut [u8],
    code: &LdpcCode,
    n_iteration_max: usize,
    eta: f64,
) -> usize {
    let n = code.n;
    let mut llr_tmp: Vec<f64> = llr_in.to_vec();
    let mut bins: Vec<u8> = vec![0; n];
    let mut delta: Vec<i32> = vec![0; n];

    let mut iteration = 1;
    loop {
        for v in 0..n {
            bins[v] = (llr_tmp[v] < 0.0) as u8;
        }

        let mut n_unsatisfied = 0;
        for row in &code.cmatrix {
            let check = row
                .iter()
                .fold(0u8, |acc, &v| acc ^ bins[v as usize]);
            n_unsatisfied += check as usize;
            // Failing checks push their variables toward a flip, passing
            // checks pull them back.
            let vote = 2 * check as i32 - 1;
            for &v in row {
                delta[v as usize] += vote;
            }
        }

        if n_unsatisfied == 0 || iteration >= n_iteration_max {
            break;
        }

        for v in 0..n {
            if delta[v] > 0 {
                let direction = if llr_tmp[v] < 0.0 { 1.0 } else { -1.0 };
                llr_tmp[v] += direction * delta[v] as f64 * eta;
            }
            delta[v] = 0;
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

    #[test]
    fn clean_input_returns_immediately() {
        let code = LdpcCode::new(LdpcRate::R14of16).unwrap();
        let data: Vec<u8> = (0..code.k).map(|i| ((i / 3) % 2) as u8).collect();
        let mut codeword = vec![0u8; code.n];
        code.encode(&data, &mut codeword);

        let llrs: Vec<f64> = codeword
            .iter()
            .map(|&b| if b == 0 { 2.0 } else { -2.0 })
            .collect();
        let mut decoded = vec![0u8; code.k];
        let iterations = decode_gbf(&llrs, &mut decoded, &code, 50, 0.5);

        assert_eq!(iterations, 1);
        assert_eq!(decoded, data);
    }

    #[test]
    fn fixes_a_few_flips() {
        let code = LdpcCode::new(LdpcRate::R2of16).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let data: Vec<u8> = (0..code.k).map(|_| rng.gen_range(0..2) as u8).collect();
        let mut codeword = vec![0u8; code.n];
        code.encode(&data, &mut codeword);

        let mut llrs: Vec<f64> = codeword
            .iter()
            .map(|&b| if b == 0 { 2.0 } else { -2.0 })
            .collect();
        for _ in 0..12 {
            let at = rng.gen_range(0..code.n);
            llrs[at] = -llrs[at];
        }

        let mut decoded = vec![0u8; code.k];
        let iterations = decode_gbf(&llrs, &mut decoded, &code, 50, 0.5);
        assert!(iterations < 50);
        assert_eq!(decoded, data);
    }

    #[test]
    fn garbage_hits_the_cap() {
        let code = LdpcCode::new(LdpcRate::R14of16).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let llrs: Vec<f64> = (0..code.n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut decoded = vec![0u8; code.k];
        assert_eq!(decode_gbf(&llrs, &mut decoded, &code, 15, 0.5), 15);
    }
}

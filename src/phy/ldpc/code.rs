use crate::error::ModemError;
use crate::utils::SeededRng;

/// Codeword length shared by every rate.
pub const CODEWORD_LEN: usize = 1600;

/// Seed of the deterministic info/check interleaver. Both ends build the
/// same parity-check matrix from it.
const INTERLEAVER_SEED: u32 = 1600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LdpcRate {
    /// 2/16: 200 information bits, 1400 parity bits.
    R2of16,
    /// 14/16: 1400 information bits, 200 parity bits.
    R14of16,
}

impl LdpcRate {
    pub fn value(self) -> f64 {
        match self {
            LdpcRate::R2of16 => 2.0 / 16.0,
            LdpcRate::R14of16 => 14.0 / 16.0,
        }
    }

    pub fn k(self) -> usize {
        (CODEWORD_LEN as f64 * self.value()).round() as usize
    }

    pub fn p(self) -> usize {
        CODEWORD_LEN - self.k()
    }

    /// How many checks each information bit participates in.
    fn repeat_degree(self) -> usize {
        match self {
            LdpcRate::R2of16 => 7,
            LdpcRate::R14of16 => 3,
        }
    }
}

/// Sparse parity-check structure in the two projections the decoders walk:
/// check rows (`cmatrix`) and variable rows (`vmatrix`), plus an encoder
/// projection of information bits per parity row.
///
/// The code is a repeat-accumulate construction: the parity part of H is a
/// dual diagonal, so parity bit i satisfies
/// `p[i] = p[i-1] ^ xor(info bits of check i)`,
/// and the information part connects each info bit to `repeat_degree`
/// checks through a seeded balanced interleaver.
pub struct LdpcCode {
    pub n: usize,
    pub k: usize,
    pub p: usize,
    /// Check -> variable adjacency.
    pub cmatrix: Vec<Vec<u32>>,
    /// Variable -> check adjacency.
    pub vmatrix: Vec<Vec<u32>>,
    /// For cmatrix[i][s] == v: the slot of check i inside vmatrix[v].
    pub cpos: Vec<Vec<u32>>,
    /// (count, degree) runs over the variable axis, info bits first.
    pub degree_sections: Vec<(usize, usize)>,
    /// Information bits feeding each parity row, for the encoder.
    pub enc_rows: Vec<Vec<u32>>,
}

impl LdpcCode {
    pub fn new(rate: LdpcRate) -> Result<Self, ModemError> {
        let n = CODEWORD_LEN;
        let k = rate.k();
        let p = rate.p();
        let q = rate.repeat_degree();

        if k * q % p != 0 {
            return Err(ModemError::Ldpc(format!(
                "edge count {} does not balance over {} checks",
                k * q,
                p
            )));
        }

        // Balanced edge targets, shuffled deterministically.
        let mut targets: Vec<u32> = (0..k * q).map(|i| (i % p) as u32).collect();
        let mut rng = SeededRng::new(INTERLEAVER_SEED);
        rng.shuffle(&mut targets);

        let mut enc_rows: Vec<Vec<u32>> = vec![Vec::new(); p];
        let mut vmatrix: Vec<Vec<u32>> = vec![Vec::new(); n];

        for j in 0..k {
            let mut picked: Vec<u32> = Vec::with_capacity(q);
            for t in 0..q {
                let mut check = targets[j * q + t];
                // Probe past duplicates so one bit never feeds a check twice.
                while picked.contains(&check) {
                    check = (check + 1) % p as u32;
                }
                picked.push(check);
                enc_rows[check as usize].push(j as u32);
                vmatrix[j].push(check);
            }
        }

        // Dual-diagonal parity connections.
        for i in 0..p {
            let var = (k + i) as u32;
            vmatrix[var as usize].push(i as u32);
            if i + 1 < p {
                vmatrix[var as usize].push((i + 1) as u32);
            }
        }

        let mut cmatrix: Vec<Vec<u32>> = Vec::with_capacity(p);
        for (i, info) in enc_rows.iter().enumerate() {
            let mut row = info.clone();
            if i > 0 {
                row.push((k + i - 1) as u32);
            }
            row.push((k + i) as u32);
            cmatrix.push(row);
        }

        let mut cpos: Vec<Vec<u32>> = Vec::with_capacity(p);
        for (i, row) in cmatrix.iter().enumerate() {
            let positions = row
                .iter()
                .map(|&v| {
                    vmatrix[v as usize]
                        .iter()
                        .position(|&c| c == i as u32)
                        .expect("edge present in both projections") as u32
                })
                .collect();
            cpos.push(positions);
        }

        let degree_sections = vec![(k, q), (p - 1, 2), (1, 1)];

        Ok(LdpcCode {
            n,
            k,
            p,
            cmatrix,
            vmatrix,
            cpos,
            degree_sections,
            enc_rows,
        })
    }

    /// Widest check row.
    pub fn cwidth(&self) -> usize {
        self.cmatrix.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Widest variable row.
    pub fn vwidth(&self) -> usize {
        self.vmatrix.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Systematic encoding: `codeword` receives K information bits followed
    /// by P accumulated parity bits.
    pub fn encode(&self, data: &[u8], codeword: &mut [u8]) {
        codeword[..self.k].copy_from_slice(&data[..self.k]);

        let mut previous = 0u8;
        for i in 0..self.p {
            let mut parity = previous;
            for &j in &self.enc_rows[i] {
                parity ^= data[j as usize] & 1;
            }
            codeword[self.k + i] = parity;
            previous = parity;
        }
    }

    /// True when every check is satisfied by the hard decisions.
    pub fn syndrome_clear(&self, bits: &[u8]) -> bool {
        self.cmatrix.iter().all(|row| {
            row.iter()
                .fold(0u8, |acc, &v| acc ^ (bits[v as usize] & 1))
                == 0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_follow_rate() {
        let low = LdpcCode::new(LdpcRate::R2of16).unwrap();
        assert_eq!((low.n, low.k, low.p), (1600, 200, 1400));

        let high = LdpcCode::new(LdpcRate::R14of16).unwrap();
        assert_eq!((high.n, high.k, high.p), (1600, 1400, 200));
    }

    #[test]
    fn encoded_words_satisfy_every_check() {
        for rate in [LdpcRate::R2of16, LdpcRate::R14of16] {
            let code = LdpcCode::new(rate).unwrap();
            let data: Vec<u8> = (0..code.k).map(|i| ((i * 31 + 7) % 2) as u8).collect();
            let mut codeword = vec![0u8; code.n];
            code.encode(&data, &mut codeword);
            assert!(code.syndrome_clear(&codeword), "{rate:?}");
        }
    }

    #[test]
    fn a_flipped_bit_breaks_the_syndrome() {
        let code = LdpcCode::new(LdpcRate::R14of16).unwrap();
        let data = vec![0u8; code.k];
        let mut codeword = vec![0u8; code.n];
        code.encode(&data, &mut codeword);
        codeword[37] ^= 1;
        assert!(!code.syndrome_clear(&codeword));
    }

    #[test]
    fn projections_agree() {
        let code = LdpcCode::new(LdpcRate::R14of16).unwrap();
        for (i, row) in code.cmatrix.iter().enumerate() {
            for (slot, &v) in row.iter().enumerate() {
                let pos = code.cpos[i][slot] as usize;
                assert_eq!(code.vmatrix[v as usize][pos], i as u32);
            }
        }
    }

    #[test]
    fn no_check_repeats_a_variable() {
        for rate in [LdpcRate::R2of16, LdpcRate::R14of16] {
            let code = LdpcCode::new(rate).unwrap();
            for row in &code.cmatrix {
                let mut seen = row.clone();
                seen.sort_unstable();
                seen.dedup();
                assert_eq!(seen.len(), row.len());
            }
        }
    }

    #[test]
    fn construction_is_deterministic() {
        let a = LdpcCode::new(LdpcRate::R14of16).unwrap();
        let b = LdpcCode::new(LdpcRate::R14of16).unwrap();
        assert_eq!(a.cmatrix, b.cmatrix);
    }
}

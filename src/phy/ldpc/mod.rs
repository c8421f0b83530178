mod code;
mod gbf;
mod spa;

pub use code::{LdpcCode, LdpcRate, CODEWORD_LEN};
pub use gbf::decode_gbf;
pub use spa::decode_spa;

use serde::{Deserialize, Serialize};

use crate::error::ModemError;
use crate::utils::consts::{DEFAULT_GBF_ETA, DEFAULT_LDPC_ITERATIONS_MAX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodingAlgorithm {
    Gbf,
    Spa,
}

/// The forward error correction unit: one code per configured rate plus the
/// decoding policy.
pub struct Ldpc {
    code: LdpcCode,
    pub rate: LdpcRate,
    pub decoding_algorithm: DecodingAlgorithm,
    pub gbf_eta: f64,
    pub n_iteration_max: usize,
}

impl Ldpc {
    pub fn new(rate: LdpcRate, decoding_algorithm: DecodingAlgorithm) -> Result<Self, ModemError> {
        Ok(Ldpc {
            code: LdpcCode::new(rate)?,
            rate,
            decoding_algorithm,
            gbf_eta: DEFAULT_GBF_ETA,
            n_iteration_max: DEFAULT_LDPC_ITERATIONS_MAX,
        })
    }

    pub fn n(&self) -> usize {
        self.code.n
    }

    pub fn k(&self) -> usize {
        self.code.k
    }

    pub fn p(&self) -> usize {
        self.code.p
    }

    /// Append parity to K data bits; `codeword` holds N bits afterwards.
    pub fn encode(&self, data: &[u8], codeword: &mut [u8]) {
        self.code.encode(data, codeword);
    }

    /// Soft decode N LLRs into K systematic bits. Returns the iterations
    /// used; `n_iteration_max` means the frame did not decode.
    pub fn decode(&self, llrs: &[f64], decoded: &mut [u8]) -> usize {
        match self.decoding_algorithm {
            DecodingAlgorithm::Spa => {
                decode_spa(llrs, decoded, &self.code, self.n_iteration_max)
            }
            DecodingAlgorithm::Gbf => decode_gbf(
                llrs,
                decoded,
                &self.code,
                self.n_iteration_max,
                self.gbf_eta,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_algorithms_round_trip_clean_words() {
        for algorithm in [DecodingAlgorithm::Spa, DecodingAlgorithm::Gbf] {
            let ldpc = Ldpc::new(LdpcRate::R14of16, algorithm).unwrap();
            let data: Vec<u8> = (0..ldpc.k()).map(|i| ((i * 5) % 2) as u8).collect();
            let mut codeword = vec![0u8; ldpc.n()];
            ldpc.encode(&data, &mut codeword);

            let llrs: Vec<f64> = codeword
                .iter()
                .map(|&b| if b == 0 { 3.0 } else { -3.0 })
                .collect();
            let mut decoded = vec![0u8; ldpc.k()];
            let iterations = ldpc.decode(&llrs, &mut decoded);
            assert!(iterations < ldpc.n_iteration_max);
            assert_eq!(decoded, data, "{algorithm:?}");
        }
    }
}

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Constellation order. The discriminant is the number of points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modulation {
    Bpsk = 2,
    Qpsk = 4,
    Psk8 = 8,
    Qam16 = 16,
    Qam32 = 32,
    Qam64 = 64,
}

impl Modulation {
    pub fn points(self) -> usize {
        self as usize
    }

    pub fn bits_per_symbol(self) -> usize {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Psk8 => 3,
            Modulation::Qam16 => 4,
            Modulation::Qam32 => 5,
            Modulation::Qam64 => 6,
        }
    }
}

/// Constellation mapper and per-bit soft demapper.
pub struct Mapper {
    constellation: Vec<Complex64>,
    n_bits: usize,
}

impl Mapper {
    pub fn new(modulation: Modulation) -> Self {
        let raw = predefined_constellation(modulation);

        // Normalize to unit average power.
        let mean_power: f64 =
            raw.iter().map(|c| c.norm_sqr()).sum::<f64>() / raw.len() as f64;
        let scale = 1.0 / mean_power.sqrt();
        let constellation = raw.iter().map(|c| c * scale).collect();

        Mapper {
            constellation,
            n_bits: modulation.bits_per_symbol(),
        }
    }

    pub fn bits_per_symbol(&self) -> usize {
        self.n_bits
    }

    /// Map 0/1 bits to symbols, first bit of each group most significant.
    pub fn modulate(&self, bits: &[u8], out: &mut [Complex64]) {
        for (chunk, symbol) in bits.chunks(self.n_bits).zip(out.iter_mut()) {
            let mut index = 0usize;
            for &bit in chunk {
                index = (index << 1) | bit as usize;
            }
            *symbol = self.constellation[index];
        }
    }

    /// Per-bit log-likelihood ratios from minimum squared distances to the
    /// nearest zero-labeled and one-labeled points, scaled by 1/variance.
    /// Positive LLR favors bit 0.
    pub fn demodulate(&self, symbols: &[Complex64], out: &mut [f64], variance: f64) {
        let n_symbols = self.constellation.len();
        let mut distances = vec![0.0f64; n_symbols];
        let inv_variance = 1.0 / variance;

        for (s, received) in symbols.iter().enumerate() {
            for (j, point) in self.constellation.iter().enumerate() {
                distances[j] = (received - point).norm_sqr();
            }

            let mut mask = 1usize;
            for k in 0..self.n_bits {
                let mut dmin0 = f64::INFINITY;
                let mut dmin1 = f64::INFINITY;
                for (j, &d) in distances.iter().enumerate() {
                    if j & mask == 0 {
                        dmin0 = dmin0.min(d);
                    } else {
                        dmin1 = dmin1.min(d);
                    }
                }
                // mask walks the index LSB up; output order is MSB first.
                out[s * self.n_bits + (self.n_bits - 1 - k)] =
                    inv_variance * (dmin1 - dmin0);
                mask <<= 1;
            }
        }
    }
}

fn predefined_constellation(modulation: Modulation) -> Vec<Complex64> {
    let c = |re: f64, im: f64| Complex64::new(re, im);
    match modulation {
        Modulation::Bpsk => vec![c(1.0, 0.0), c(-1.0, 0.0)],
        Modulation::Qpsk => vec![c(-1.0, 1.0), c(-1.0, -1.0), c(1.0, 1.0), c(1.0, -1.0)],
        Modulation::Psk8 => {
            let d = std::f64::consts::SQRT_2 / 2.0;
            vec![
                c(-d, -d),
                c(-1.0, 0.0),
                c(0.0, 1.0),
                c(-d, d),
                c(0.0, -1.0),
                c(d, -d),
                c(d, d),
                c(1.0, 0.0),
            ]
        }
        Modulation::Qam16 => vec![
            c(-3.0, 3.0),
            c(-3.0, 1.0),
            c(-3.0, -3.0),
            c(-3.0, -1.0),
            c(-1.0, 3.0),
            c(-1.0, 1.0),
            c(-1.0, -3.0),
            c(-1.0, -1.0),
            c(3.0, 3.0),
            c(3.0, 1.0),
            c(3.0, -3.0),
            c(3.0, -1.0),
            c(1.0, 3.0),
            c(1.0, 1.0),
            c(1.0, -3.0),
            c(1.0, -1.0),
        ],
        Modulation::Qam32 => vec![
            c(-3.0, 5.0),
            c(-1.0, 5.0),
            c(-3.0, -5.0),
            c(-1.0, -5.0),
            c(-5.0, 3.0),
            c(-5.0, 1.0),
            c(-5.0, -3.0),
            c(-5.0, -1.0),
            c(-1.0, 3.0),
            c(-1.0, 1.0),
            c(-1.0, -3.0),
            c(-1.0, -1.0),
            c(-3.0, 3.0),
            c(-3.0, 1.0),
            c(-3.0, -3.0),
            c(-3.0, -1.0),
            c(3.0, 5.0),
            c(1.0, 5.0),
            c(3.0, -5.0),
            c(1.0, -5.0),
            c(5.0, 3.0),
            c(5.0, 1.0),
            c(5.0, -3.0),
            c(5.0, -1.0),
            c(1.0, 3.0),
            c(1.0, 1.0),
            c(1.0, -3.0),
            c(1.0, -1.0),
            c(3.0, 3.0),
            c(3.0, 1.0),
            c(3.0, -3.0),
            c(3.0, -1.0),
        ],
        Modulation::Qam64 => {
            // Sign from the top bit, magnitude pattern {7,5,1,3} on the real
            // axis; per column the imaginary axis runs {7,5,1,3,-7,-5,-1,-3}.
            let mut points = Vec::with_capacity(64);
            for re_sign in [-1.0, 1.0] {
                for &re_mag in &[7.0, 5.0, 1.0, 3.0] {
                    for &im_val in &[7.0, 5.0, 1.0, 3.0, -7.0, -5.0, -1.0, -3.0] {
                        points.push(c(re_sign * re_mag, im_val));
                    }
                }
            }
            points
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hard_decide(mapper: &Mapper, llrs: &[f64]) -> Vec<u8> {
        let _ = mapper;
        llrs.iter().map(|&l| if l < 0.0 { 1 } else { 0 }).collect()
    }

    #[test]
    fn constellations_have_unit_average_power() {
        for modulation in [
            Modulation::Bpsk,
            Modulation::Qpsk,
            Modulation::Psk8,
            Modulation::Qam16,
            Modulation::Qam32,
            Modulation::Qam64,
        ] {
            let mapper = Mapper::new(modulation);
            let mean: f64 = mapper
                .constellation
                .iter()
                .map(|c| c.norm_sqr())
                .sum::<f64>()
                / mapper.constellation.len() as f64;
            assert!((mean - 1.0).abs() < 1e-12, "{modulation:?}: {mean}");
        }
    }

    #[test]
    fn constellation_sizes_match_order() {
        assert_eq!(Mapper::new(Modulation::Qam32).constellation.len(), 32);
        assert_eq!(Mapper::new(Modulation::Qam64).constellation.len(), 64);
    }

    #[test]
    fn noiseless_demod_inverts_mod() {
        for modulation in [
            Modulation::Bpsk,
            Modulation::Qpsk,
            Modulation::Psk8,
            Modulation::Qam16,
            Modulation::Qam32,
            Modulation::Qam64,
        ] {
            let mapper = Mapper::new(modulation);
            let n_bits = mapper.bits_per_symbol();
            let bits: Vec<u8> = (0..n_bits * 64).map(|i| ((i * 7 + 3) % 5 % 2) as u8).collect();
            let mut symbols = vec![Complex64::default(); 64];
            mapper.modulate(&bits, &mut symbols);

            let mut llrs = vec![0.0f64; bits.len()];
            mapper.demodulate(&symbols, &mut llrs, 0.1);
            assert_eq!(hard_decide(&mapper, &llrs), bits, "{modulation:?}");
        }
    }

    #[test]
    fn llr_magnitude_scales_with_variance() {
        let mapper = Mapper::new(Modulation::Bpsk);
        let symbols = [Complex64::new(1.0, 0.0)];
        let mut tight = [0.0f64];
        let mut loose = [0.0f64];
        mapper.demodulate(&symbols, &mut tight, 0.1);
        mapper.demodulate(&symbols, &mut loose, 1.0);
        assert!(tight[0] > loose[0]);
    }
}

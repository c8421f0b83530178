use num_complex::Complex64;

use super::CarrierType;
use crate::utils::SeededRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreambleModulation {
    Bpsk,
    Qpsk,
}

/// Synchronization preamble: pseudo-random symbols on the carriers that map
/// to even FFT bins, zeros elsewhere. Energy on even bins only makes each
/// time-domain preamble symbol periodic with period Nfft/2, which is what
/// the time and frequency synchronizers exploit.
pub struct PreambleConfigurator {
    pub nsymb: usize,
    pub modulation: PreambleModulation,
    pub boost: f64,
    pub seed: u32,
    pub n_zeros: usize,
    pub n_preamble: usize,
    /// Row-major nsymb x nc carrier tags.
    pub grid: Vec<CarrierType>,
    /// Row-major nsymb x nc carrier values, zero on ZERO slots.
    pub values: Vec<Complex64>,
}

impl PreambleConfigurator {
    pub fn new(nsymb: usize, modulation: PreambleModulation, boost: f64, seed: u32) -> Self {
        PreambleConfigurator {
            nsymb,
            modulation,
            boost,
            seed,
            n_zeros: 0,
            n_preamble: 0,
            grid: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn configure(&mut self, nfft: usize, nc: usize, start_shift: usize) {
        // Even-bin mask seen through the carrier-to-bin mapping.
        let bin_active: Vec<bool> = (0..nfft).map(|j| j % 2 == 0).collect();
        let mut carrier_active = vec![false; nc];
        for j in 0..nc / 2 {
            carrier_active[j] = bin_active[j + nfft - nc / 2];
        }
        for j in nc / 2..nc {
            carrier_active[j] = bin_active[j - nc / 2 + start_shift];
        }

        self.grid = Vec::with_capacity(self.nsymb * nc);
        self.n_zeros = 0;
        self.n_preamble = 0;
        for _ in 0..self.nsymb {
            for &active in &carrier_active {
                if active {
                    self.grid.push(CarrierType::Preamble);
                    self.n_preamble += 1;
                } else {
                    self.grid.push(CarrierType::Zero);
                    self.n_zeros += 1;
                }
            }
        }

        // One value drawn per slot; only PREAMBLE slots consume from the
        // front of the stream.
        let mut rng = SeededRng::new(self.seed);
        let sequence: Vec<Complex64> = (0..self.nsymb * nc)
            .map(|_| match self.modulation {
                PreambleModulation::Bpsk => {
                    Complex64::new(2.0 * (rng.next() % 2) as f64 - 1.0, 0.0)
                }
                PreambleModulation::Qpsk => {
                    let re = 2.0 * (rng.next() % 2) as f64 - 1.0;
                    let im = 2.0 * (rng.next() % 2) as f64 - 1.0;
                    Complex64::new(re, im) / std::f64::consts::SQRT_2
                }
            })
            .collect();

        let mut next_value = 0usize;
        self.values = self
            .grid
            .iter()
            .map(|&tag| {
                if tag == CarrierType::Preamble {
                    let v = sequence[next_value];
                    next_value += 1;
                    v
                } else {
                    Complex64::default()
                }
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roughly_half_the_carriers_are_active() {
        let mut preamble =
            PreambleConfigurator::new(4, PreambleModulation::Qpsk, std::f64::consts::SQRT_2, 1);
        preamble.configure(512, 50, 1);
        assert_eq!(preamble.n_zeros + preamble.n_preamble, 4 * 50);
        let per_symbol = preamble.n_preamble / 4;
        assert!((20..=30).contains(&per_symbol), "{per_symbol}");
    }

    #[test]
    fn zero_slots_have_zero_values() {
        let mut preamble =
            PreambleConfigurator::new(4, PreambleModulation::Qpsk, std::f64::consts::SQRT_2, 1);
        preamble.configure(512, 50, 1);
        for (tag, value) in preamble.grid.iter().zip(preamble.values.iter()) {
            match tag {
                CarrierType::Zero => assert_eq!(*value, Complex64::default()),
                CarrierType::Preamble => assert!((value.norm() - 1.0).abs() < 1e-12),
                _ => panic!("unexpected tag in preamble grid"),
            }
        }
    }

    #[test]
    fn same_seed_same_preamble() {
        let mut a = PreambleConfigurator::new(4, PreambleModulation::Qpsk, 1.0, 1);
        let mut b = PreambleConfigurator::new(4, PreambleModulation::Qpsk, 1.0, 1);
        a.configure(512, 50, 1);
        b.configure(512, 50, 1);
        assert_eq!(a.values, b.values);

        let mut c = PreambleConfigurator::new(4, PreambleModulation::Qpsk, 1.0, 2);
        c.configure(512, 50, 1);
        assert_ne!(a.values, c.values);
    }
}

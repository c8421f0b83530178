use num_complex::Complex64;

use super::CarrierType;
use crate::utils::SeededRng;

/// What a boundary row/column of the grid is forced to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryPolicy {
    Data,
    Pilot,
    Config,
    CopyFirstCol,
    Auto,
}

/// Derives the pilot layout of the Nsymb x Nc carrier grid and the
/// pseudo-random pilot values shared by both ends of the link.
pub struct PilotConfigurator {
    pub dx: usize,
    pub dy: usize,
    pub first_row: BoundaryPolicy,
    pub last_row: BoundaryPolicy,
    pub first_col: BoundaryPolicy,
    pub second_col: BoundaryPolicy,
    pub last_col: BoundaryPolicy,
    pub boost: f64,
    pub seed: u32,
    pub n_data: usize,
    pub n_pilots: usize,
    pub n_config: usize,
    /// Differential-BPSK pilot values, one per PILOT slot in grid order.
    pub sequence: Vec<Complex64>,
}

impl PilotConfigurator {
    pub fn new(dx: usize, dy: usize, boost: f64, seed: u32) -> Self {
        PilotConfigurator {
            dx,
            dy,
            first_row: BoundaryPolicy::Data,
            last_row: BoundaryPolicy::Data,
            first_col: BoundaryPolicy::Data,
            second_col: BoundaryPolicy::Data,
            last_col: BoundaryPolicy::Auto,
            boost,
            seed,
            n_data: 0,
            n_pilots: 0,
            n_config: 0,
            sequence: Vec::new(),
        }
    }

    /// Fill `frame` (row-major Nsymb x Nc) with carrier tags and regenerate
    /// the pilot sequence.
    pub fn configure(&mut self, nc: usize, nsymb: usize, frame: &mut [CarrierType]) {
        // The stepped-diagonal pattern is laid out on a square virtual grid
        // so it stays consistent whether the frame is wide or tall.
        let nc_max = nc.max(nsymb);
        let mut virtual_grid = vec![CarrierType::Data; nc_max * nc_max];

        let mut x = 0usize;
        let mut y = 0usize;
        while x < nc_max && y < nc_max {
            let mut j = y;
            while j < nc_max {
                virtual_grid[j * nc_max + x] = CarrierType::Pilot;
                j += self.dy;
            }
            let mut j = y as isize;
            while j >= 0 {
                virtual_grid[j as usize * nc_max + x] = CarrierType::Pilot;
                j -= self.dy as isize;
            }
            y += 1;
            x += self.dx;
        }

        // The last column anchors the frequency interpolation; make sure it
        // has at least two pilots to interpolate between.
        let mut last_col = self.last_col;
        if last_col == BoundaryPolicy::Auto {
            let pilot_count = (0..nsymb)
                .filter(|&j| virtual_grid[j * nc_max + nc - 1] == CarrierType::Pilot)
                .count();
            if pilot_count < 2 {
                last_col = BoundaryPolicy::CopyFirstCol;
            }
        }

        for j in 0..nc_max {
            if self.first_row == BoundaryPolicy::Pilot {
                virtual_grid[j] = CarrierType::Pilot;
            }
            if self.last_row == BoundaryPolicy::Pilot {
                virtual_grid[(nsymb - 1) * nc_max + j] = CarrierType::Pilot;
            }
            if self.first_col == BoundaryPolicy::Pilot {
                virtual_grid[j * nc_max] = CarrierType::Pilot;
            }
            if last_col == BoundaryPolicy::Pilot {
                virtual_grid[j * nc_max + nc - 1] = CarrierType::Pilot;
            }
            if last_col == BoundaryPolicy::CopyFirstCol {
                virtual_grid[j * nc_max + nc - 1] = virtual_grid[j * nc_max];
            }
            if self.second_col == BoundaryPolicy::Config
                && virtual_grid[j * nc_max + 1] != CarrierType::Pilot
            {
                virtual_grid[j * nc_max + 1] = CarrierType::Config;
            }
        }

        self.n_data = 0;
        self.n_pilots = 0;
        self.n_config = 0;
        for j in 0..nsymb {
            for i in 0..nc {
                let tag = virtual_grid[j * nc_max + i];
                frame[j * nc + i] = tag;
                match tag {
                    CarrierType::Pilot => self.n_pilots += 1,
                    CarrierType::Config => self.n_config += 1,
                    _ => self.n_data += 1,
                }
            }
        }

        self.generate_sequence();
    }

    fn generate_sequence(&mut self) {
        let mut rng = SeededRng::new(self.seed);
        self.sequence.clear();
        self.sequence.reserve(self.n_pilots);

        let mut last_pilot = 0u32;
        for _ in 0..self.n_pilots {
            let pilot_value = rng.next() % 2 ^ last_pilot;
            self.sequence.push(Complex64::new(
                (2.0 * pilot_value as f64 - 1.0) * self.boost,
                0.0,
            ));
            last_pilot = pilot_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_for(dx: usize, dy: usize, nc: usize, nsymb: usize) -> (PilotConfigurator, Vec<CarrierType>) {
        let mut pilots = PilotConfigurator::new(dx, dy, 1.33, 0);
        let mut frame = vec![CarrierType::Data; nc * nsymb];
        pilots.configure(nc, nsymb, &mut frame);
        (pilots, frame)
    }

    #[test]
    fn every_slot_has_exactly_one_tag_and_counts_add_up() {
        let (pilots, frame) = grid_for(7, 3, 50, 17);
        assert_eq!(
            pilots.n_data + pilots.n_pilots + pilots.n_config,
            frame.len()
        );
        assert_eq!(pilots.sequence.len(), pilots.n_pilots);
    }

    #[test]
    fn pilot_fraction_is_bounded_by_density() {
        // Boundary columns add pilots beyond the Dx*Dy lattice, so allow
        // the documented rounding slack.
        let (pilots, frame) = grid_for(7, 3, 50, 17);
        let fraction = pilots.n_pilots as f64 / frame.len() as f64;
        let lattice = 1.0 / (7.0 * 3.0);
        assert!(fraction >= lattice * 0.5);
        assert!(fraction <= lattice * 4.0, "fraction {fraction}");
    }

    #[test]
    fn last_column_keeps_at_least_two_pilots() {
        for (dx, dy, nc, nsymb) in [(7, 3, 50, 17), (5, 3, 46, 19), (1, 3, 50, 48), (7, 2, 50, 9)] {
            let (_, frame) = grid_for(dx, dy, nc, nsymb);
            let count = (0..nsymb)
                .filter(|&j| frame[j * nc + nc - 1] == CarrierType::Pilot)
                .count();
            assert!(count >= 2, "dx={dx} dy={dy}: {count}");
        }
    }

    #[test]
    fn dense_mode_pilots_every_dy_rows() {
        // Config 0 layout: Dx=1 marks every column.
        let (_, frame) = grid_for(1, 3, 50, 48);
        for col in 0..50 {
            let pilots_in_col = (0..48)
                .filter(|&j| frame[j * 50 + col] == CarrierType::Pilot)
                .count();
            assert!(pilots_in_col >= 48 / 3, "col {col}: {pilots_in_col}");
        }
    }

    #[test]
    fn sequence_is_deterministic_and_boosted() {
        let (a, _) = grid_for(7, 3, 50, 17);
        let (b, _) = grid_for(7, 3, 50, 17);
        assert_eq!(a.sequence.len(), b.sequence.len());
        for (x, y) in a.sequence.iter().zip(b.sequence.iter()) {
            assert_eq!(x, y);
            assert!((x.norm() - 1.33).abs() < 1e-12);
            assert_eq!(x.im, 0.0);
        }
    }
}

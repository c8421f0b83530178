use num_complex::Complex64;

use super::CarrierType;
use crate::dsp::interpolation::{interpolate_linear_complex, interpolate_bilinear_complex};
use crate::dsp::{get_angle, set_complex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Unknown,
    Measured,
    Interpolated,
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelEstimate {
    pub value: Complex64,
    pub status: ChannelStatus,
}

impl Default for ChannelEstimate {
    fn default() -> Self {
        ChannelEstimate {
            value: Complex64::new(1.0, 0.0),
            status: ChannelStatus::Unknown,
        }
    }
}

/// Which estimator fills the channel grid from the pilots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEstimator {
    ZeroForcing,
    /// Least squares over a pilot neighbourhood of the given width/height.
    LeastSquares { window_width: usize, window_height: usize },
}

/// Linear interpolation along one column of the channel grid, with edge
/// extrapolation from the two nearest measured points.
pub fn interpolate_linear_col(
    channel: &mut [ChannelEstimate],
    max_col: usize,
    max_row: usize,
    col: usize,
) {
    let at = |i: usize| i * max_col + col;

    // Interior spans between consecutive measured points.
    let mut loc_start = 0;
    let mut loc_end = max_row - 1;
    let mut n_locations = max_row - 1;
    while n_locations > 0 {
        for i in loc_start..max_row {
            if channel[at(i)].status == ChannelStatus::Measured {
                loc_start = i;
                break;
            }
        }
        for i in loc_start + 1..max_row {
            if channel[at(i)].status == ChannelStatus::Measured {
                loc_end = i;
                break;
            }
        }
        n_locations = loc_end.saturating_sub(loc_start);

        for i in loc_start + 1..loc_end {
            channel[at(i)].value = interpolate_linear_complex(
                channel[at(loc_start)].value,
                loc_start as f64,
                channel[at(loc_end)].value,
                loc_end as f64,
                i as f64,
            );
            channel[at(i)].status = ChannelStatus::Interpolated;
        }
        loc_start = loc_end;
    }

    // Extrapolate the head from the first two measured points.
    let mut loc_start = 0;
    let mut loc_end = max_row - 1;
    for i in 0..max_row {
        if channel[at(i)].status == ChannelStatus::Measured {
            loc_start = i;
            break;
        }
    }
    for i in loc_start + 1..max_row {
        if channel[at(i)].status == ChannelStatus::Measured {
            loc_end = i;
            break;
        }
    }
    if loc_start != 0 {
        for i in 0..loc_start {
            channel[at(i)].value = interpolate_linear_complex(
                channel[at(loc_start)].value,
                loc_start as f64,
                channel[at(loc_end)].value,
                loc_end as f64,
                i as f64,
            );
            channel[at(i)].status = ChannelStatus::Interpolated;
        }
    }

    // Extrapolate the tail from the last two measured points.
    let mut loc_end = 0;
    let mut loc_start = max_row - 1;
    for i in (0..max_row).rev() {
        if channel[at(i)].status == ChannelStatus::Measured {
            loc_end = i;
            break;
        }
    }
    for i in (0..loc_end).rev() {
        if channel[at(i)].status == ChannelStatus::Measured {
            loc_start = i;
            break;
        }
    }
    if loc_end != max_row - 1 {
        for i in (loc_end + 1..max_row).rev() {
            channel[at(i)].value = interpolate_linear_complex(
                channel[at(loc_start)].value,
                loc_start as f64,
                channel[at(loc_end)].value,
                loc_end as f64,
                i as f64,
            );
            channel[at(i)].status = ChannelStatus::Interpolated;
        }
    }
}

/// Fill the rectangle between two interpolated columns. The first and last
/// rows interpolate straight across; interior rows blend their vertical
/// neighbours bilinearly.
pub fn interpolate_bilinear_matrix(
    channel: &mut [ChannelEstimate],
    max_col: usize,
    col1: usize,
    col2: usize,
    row1: usize,
    row2: usize,
) {
    let a = channel[row1 * max_col + col1].value;
    let b = channel[row1 * max_col + col2].value;
    for i in col1 + 1..col2 {
        channel[row1 * max_col + i].value =
            interpolate_linear_complex(a, col1 as f64, b, col2 as f64, i as f64);
        channel[row1 * max_col + i].status = ChannelStatus::Interpolated;
    }

    for j in row1 + 1..row2 {
        let a = channel[(j - 1) * max_col + col1].value;
        let b = channel[(j - 1) * max_col + col2].value;
        let c = channel[(j + 1) * max_col + col1].value;
        let d = channel[(j + 1) * max_col + col2].value;
        for i in col1 + 1..col2 {
            channel[j * max_col + i].value = interpolate_bilinear_complex(
                a,
                col1 as f64,
                (j - 1) as f64,
                b,
                col2 as f64,
                c,
                (j + 1) as f64,
                d,
                i as f64,
                j as f64,
            );
            channel[j * max_col + i].status = ChannelStatus::Interpolated;
        }
    }

    let c = channel[row2 * max_col + col1].value;
    let d = channel[row2 * max_col + col2].value;
    for i in col1 + 1..col2 {
        channel[row2 * max_col + i].value =
            interpolate_linear_complex(c, col1 as f64, d, col2 as f64, i as f64);
        channel[row2 * max_col + i].status = ChannelStatus::Interpolated;
    }
}

fn interpolate_grid(
    channel: &mut [ChannelEstimate],
    nc: usize,
    nsymb: usize,
    dx: usize,
) {
    for j in 0..nc {
        if j % dx == 0 || j == nc - 1 {
            interpolate_linear_col(channel, nc, nsymb, j);
        }
    }

    let mut j = 0;
    while j < nc {
        if j + dx < nc {
            interpolate_bilinear_matrix(channel, nc, j, j + dx, 0, nsymb - 1);
        } else if j != nc - 1 {
            interpolate_bilinear_matrix(channel, nc, j, nc - 1, 0, nsymb - 1);
        }
        j += dx;
    }
}

/// Zero-forcing estimation: H = Y/X at each pilot, then grid interpolation.
#[allow(clippy::too_many_arguments)]
pub fn zf_estimate(
    channel: &mut [ChannelEstimate],
    frame: &[CarrierType],
    pilot_sequence: &[Complex64],
    received: &[Complex64],
    nc: usize,
    nsymb: usize,
    dx: usize,
) {
    let mut pilot_index = 0;
    for i in 0..nsymb {
        for j in 0..nc {
            let slot = i * nc + j;
            if frame[slot] == CarrierType::Pilot {
                channel[slot].status = ChannelStatus::Measured;
                channel[slot].value = received[slot] / pilot_sequence[pilot_index];
                pilot_index += 1;
            } else {
                channel[slot].status = ChannelStatus::Unknown;
                channel[slot].value = Complex64::default();
            }
        }
    }

    interpolate_grid(channel, nc, nsymb, dx);
}

/// Least-squares estimation with a moving pilot window, then the same grid
/// interpolation as zero forcing.
#[allow(clippy::too_many_arguments)]
pub fn ls_estimate(
    channel: &mut [ChannelEstimate],
    frame: &[CarrierType],
    pilot_sequence: &[Complex64],
    received: &[Complex64],
    nc: usize,
    nsymb: usize,
    dx: usize,
    window_width: usize,
    window_height: usize,
) {
    // Pilot reference values placed at their grid positions.
    let mut pilot_data = vec![Complex64::default(); nsymb * nc];
    let mut pilot_index = 0;
    for i in 0..nsymb {
        for j in 0..nc {
            let slot = i * nc + j;
            if frame[slot] == CarrierType::Pilot {
                pilot_data[slot] = pilot_sequence[pilot_index];
                pilot_index += 1;
            } else {
                channel[slot].status = ChannelStatus::Unknown;
                channel[slot].value = Complex64::default();
            }
        }
    }

    for j in 0..nc {
        for i in 0..nsymb {
            if frame[i * nc + j] != CarrierType::Pilot {
                continue;
            }

            let row_start = i as isize - (window_height / 2) as isize;
            let row_end = i as isize + (window_height / 2) as isize;
            let col_start = j as isize - (window_width / 2) as isize;
            let col_end = j as isize + (window_width / 2) as isize;

            // Scalar least squares over the window: H = sum(x*y)/sum(x*x).
            // Pilots are real, so no conjugation is needed.
            let mut xx = Complex64::default();
            let mut xy = Complex64::default();
            for k in row_start..=row_end {
                if k < 0 || k >= nsymb as isize {
                    continue;
                }
                for l in col_start..=col_end {
                    if l < 0 || l >= nc as isize {
                        continue;
                    }
                    let slot = k as usize * nc + l as usize;
                    if frame[slot] == CarrierType::Pilot {
                        xx += pilot_data[slot] * pilot_data[slot];
                        xy += pilot_data[slot] * received[slot];
                    }
                }
            }

            let slot = i * nc + j;
            channel[slot].status = ChannelStatus::Measured;
            channel[slot].value = xy / xx;
        }
    }

    interpolate_grid(channel, nc, nsymb, dx);
}

/// Replace every estimate with a unit-magnitude value of the same phase.
/// Biases the equalizer toward phase-only correction, which helps PSK
/// constellations at low SNR. The raw estimate is kept in `raw`.
pub fn restore_amplitude(channel: &mut [ChannelEstimate], raw: &mut [ChannelEstimate]) {
    for (estimate, backup) in channel.iter_mut().zip(raw.iter_mut()) {
        *backup = *estimate;
        estimate.value = set_complex(1.0, get_angle(estimate.value));
    }
}

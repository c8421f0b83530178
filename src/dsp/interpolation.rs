use num_complex::Complex64;

/// Linear interpolation between (a_x, a) and (b_x, b), evaluated at x.
pub fn interpolate_linear(a: f64, a_x: f64, b: f64, b_x: f64, x: f64) -> f64 {
    a + (b - a) * (x - a_x) / (b_x - a_x)
}

pub fn interpolate_linear_complex(
    a: Complex64,
    a_x: f64,
    b: Complex64,
    b_x: f64,
    x: f64,
) -> Complex64 {
    a + (b - a) * ((x - a_x) / (b_x - a_x))
}

/// Bilinear interpolation over the rectangle spanned by four corners.
#[allow(clippy::too_many_arguments)]
pub fn interpolate_bilinear_complex(
    a: Complex64,
    a_x: f64,
    a_y: f64,
    b: Complex64,
    b_x: f64,
    c: Complex64,
    c_y: f64,
    d: Complex64,
    x: f64,
    y: f64,
) -> Complex64 {
    let e = interpolate_linear_complex(a, a_x, b, b_x, x);
    let f = interpolate_linear_complex(c, a_x, d, b_x, x);
    interpolate_linear_complex(e, a_y, f, c_y, y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleDirection {
    Interpolation,
    Decimation,
}

/// Rational resampler: linear interpolation upward, sample dropping
/// downward. `output` must hold `input.len() * rate` items when
/// interpolating and `input.len() / rate` when decimating.
pub fn rational_resampler(
    input: &[Complex64],
    output: &mut [Complex64],
    rate: usize,
    direction: ResampleDirection,
) {
    match direction {
        ResampleDirection::Decimation => {
            for (index, i) in (0..input.len()).step_by(rate).enumerate() {
                output[index] = input[i];
            }
        }
        ResampleDirection::Interpolation => {
            let n = input.len();
            for i in 0..n - 1 {
                for j in 0..rate {
                    output[i * rate + j] = interpolate_linear_complex(
                        input[i],
                        0.0,
                        input[i + 1],
                        rate as f64,
                        j as f64,
                    );
                }
            }
            // Last input sample: extrapolate along the final segment.
            for j in 0..rate {
                output[(n - 1) * rate + j] = interpolate_linear_complex(
                    input[n - 2],
                    0.0,
                    input[n - 1],
                    rate as f64,
                    (rate + j) as f64,
                );
            }
        }
    }
}

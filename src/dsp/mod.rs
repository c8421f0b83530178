pub mod fft;
pub mod fir;
pub mod interpolation;

pub use fft::Fft;
pub use fir::{Fir, FirKind, FirWindow};

use num_complex::Complex64;

/// Phase angle in (-pi, pi].
pub fn get_angle(value: Complex64) -> f64 {
    value.im.atan2(value.re)
}

/// Complex value from polar amplitude and angle.
pub fn set_complex(amplitude: f64, theta: f64) -> Complex64 {
    Complex64::new(amplitude * theta.cos(), amplitude * theta.sin())
}

/// Drop the first `n_shift` items, moving the tail to the front. The
/// vacated tail keeps its previous contents, as the callers overwrite it.
pub fn shift_left<T: Copy>(buffer: &mut [T], n_shift: usize) {
    buffer.copy_within(n_shift.., 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polar_round_trip() {
        let v = Complex64::new(-0.3, 1.2);
        let back = set_complex(v.norm(), get_angle(v));
        assert!((v - back).norm() < 1e-12);
    }

    #[test]
    fn shift_left_moves_tail_forward() {
        let mut buf = [1, 2, 3, 4, 5];
        shift_left(&mut buf, 2);
        assert_eq!(&buf[..3], &[3, 4, 5]);
    }
}

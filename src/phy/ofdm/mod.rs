pub mod channel;
pub mod pilots;
pub mod preamble;
pub mod sync;

pub use channel::{ChannelEstimate, ChannelEstimator, ChannelStatus};
pub use pilots::{BoundaryPolicy, PilotConfigurator};
pub use preamble::{PreambleConfigurator, PreambleModulation};
pub use sync::{time_sync, time_sync_preamble, SyncCandidate};

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::dsp::interpolation::{rational_resampler, ResampleDirection};
use crate::dsp::{get_angle, set_complex, Fft, Fir};

/// Tag of one carrier slot in the frame grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarrierType {
    Data,
    Pilot,
    Config,
    Zero,
    Preamble,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PowerMeasurement {
    pub avg: f64,
    pub max: f64,
    pub papr_db: f64,
}

/// The OFDM waveform engine: grid framing, symbol (de)modulation, time and
/// frequency synchronization, channel estimation/equalization and the
/// passband conversion chain.
pub struct Ofdm {
    pub nfft: usize,
    pub nc: usize,
    pub nsymb: usize,
    pub gi: f64,
    pub ngi: usize,
    pub start_shift: usize,
    pub time_sync_nsymb: usize,
    pub freq_offset_ignore_limit: f64,
    pub preamble_papr_cut: f64,
    pub data_papr_cut: f64,
    pub channel_estimator: ChannelEstimator,
    pub amplitude_restoration: bool,
    /// Integer CFO search half-range in subcarriers; 0 disables the search.
    pub int_cfo_search_range: usize,

    pub frame: Vec<CarrierType>,
    pub pilots: PilotConfigurator,
    pub preamble: PreambleConfigurator,
    pub estimated_channel: Vec<ChannelEstimate>,
    raw_channel: Vec<ChannelEstimate>,

    pub fir_rx: Fir,
    pub fir_tx1: Fir,
    pub fir_tx2: Fir,

    /// Monotonic passband mixer sample counter; carrier phase stays
    /// continuous across frames within one keyed transmission.
    pub passband_start_sample: u64,

    fft: Fft,
    zero_padded: Vec<Complex64>,
    iffted: Vec<Complex64>,
    gi_removed: Vec<Complex64>,
    ffted: Vec<Complex64>,
}

impl Ofdm {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pilots: PilotConfigurator,
        preamble: PreambleConfigurator,
        fir_rx: Fir,
        fir_tx1: Fir,
        fir_tx2: Fir,
        start_shift: usize,
        channel_estimator: ChannelEstimator,
        amplitude_restoration: bool,
    ) -> Self {
        Ofdm {
            nfft: 0,
            nc: 0,
            nsymb: 0,
            gi: 0.0,
            ngi: 0,
            start_shift,
            time_sync_nsymb: 1,
            freq_offset_ignore_limit: 0.1,
            preamble_papr_cut: 99.0,
            data_papr_cut: 99.0,
            channel_estimator,
            amplitude_restoration,
            int_cfo_search_range: 0,
            frame: Vec::new(),
            pilots,
            preamble,
            estimated_channel: Vec::new(),
            raw_channel: Vec::new(),
            fir_rx,
            fir_tx1,
            fir_tx2,
            passband_start_sample: 0,
            fft: Fft::new(),
            zero_padded: Vec::new(),
            iffted: Vec::new(),
            gi_removed: Vec::new(),
            ffted: Vec::new(),
        }
    }

    /// Size every buffer for the given grid and rebuild both configurators.
    pub fn init(&mut self, nfft: usize, nc: usize, nsymb: usize, gi: f64) {
        self.nfft = nfft;
        self.nc = nc;
        self.nsymb = nsymb;
        self.gi = gi;
        self.ngi = (nfft as f64 * gi) as usize;

        self.frame = vec![CarrierType::Data; nsymb * nc];
        self.estimated_channel = vec![ChannelEstimate::default(); nsymb * nc];
        self.raw_channel = vec![ChannelEstimate::default(); nsymb * nc];
        self.zero_padded = vec![Complex64::default(); nfft];
        self.iffted = vec![Complex64::default(); nfft];
        self.gi_removed = vec![Complex64::default(); nfft];
        self.ffted = vec![Complex64::default(); nfft];
        self.passband_start_sample = 0;

        self.preamble.configure(nfft, nc, self.start_shift);
        self.pilots.configure(nc, nsymb, &mut self.frame);
    }

    pub fn symbol_len(&self) -> usize {
        self.nfft + self.ngi
    }

    // ------------------------------------------------------------------
    // Symbol-level processing
    // ------------------------------------------------------------------

    fn zero_padder(&self, input: &[Complex64], output: &mut [Complex64]) {
        let (nfft, nc, shift) = (self.nfft, self.nc, self.start_shift);
        output[..nfft].fill(Complex64::default());
        // Negative half of the spectrum sits at the top bins.
        for j in 0..nc / 2 {
            output[j + nfft - nc / 2] = input[j];
        }
        for j in nc / 2..nc {
            output[j - nc / 2 + shift] = input[j];
        }
    }

    fn zero_depadder(&self, input: &[Complex64], output: &mut [Complex64]) {
        let (nfft, nc, shift) = (self.nfft, self.nc, self.start_shift);
        for j in 0..nc / 2 {
            output[j] = input[j + nfft - nc / 2];
        }
        for j in nc / 2..nc {
            output[j] = input[j - nc / 2 + shift];
        }
    }

    fn gi_adder(&self, input: &[Complex64], output: &mut [Complex64]) {
        let (nfft, ngi) = (self.nfft, self.ngi);
        output[ngi..ngi + nfft].copy_from_slice(&input[..nfft]);
        output[..ngi].copy_from_slice(&input[nfft - ngi..nfft]);
    }

    fn gi_remover(&self, input: &[Complex64], output: &mut [Complex64]) {
        output[..self.nfft].copy_from_slice(&input[self.ngi..self.ngi + self.nfft]);
    }

    /// One OFDM symbol: Nc carriers -> Nfft+Ngi time samples.
    pub fn symbol_mod(&mut self, input: &[Complex64], output: &mut [Complex64]) {
        let mut zero_padded = std::mem::take(&mut self.zero_padded);
        let mut iffted = std::mem::take(&mut self.iffted);
        self.zero_padder(input, &mut zero_padded);
        self.fft.ifft(&zero_padded, &mut iffted);
        self.gi_adder(&iffted, output);
        self.zero_padded = zero_padded;
        self.iffted = iffted;
    }

    /// One OFDM symbol back: Nfft+Ngi time samples -> Nc carriers.
    pub fn symbol_demod(&mut self, input: &[Complex64], output: &mut [Complex64]) {
        let mut gi_removed = std::mem::take(&mut self.gi_removed);
        let mut ffted = std::mem::take(&mut self.ffted);
        self.gi_remover(input, &mut gi_removed);
        self.fft.fft(&gi_removed, &mut ffted);
        self.zero_depadder(&ffted, output);
        self.gi_removed = gi_removed;
        self.ffted = ffted;
    }

    // ------------------------------------------------------------------
    // Frame grid
    // ------------------------------------------------------------------

    /// Scatter data symbols and pilot values into the grid.
    pub fn framer(&self, input: &[Complex64], output: &mut [Complex64]) {
        let mut data_index = 0;
        let mut pilot_index = 0;
        for (slot, &tag) in self.frame.iter().enumerate() {
            output[slot] = match tag {
                CarrierType::Data => {
                    let value = input[data_index];
                    data_index += 1;
                    value
                }
                CarrierType::Pilot => {
                    let value = self.pilots.sequence[pilot_index];
                    pilot_index += 1;
                    value
                }
                _ => Complex64::default(),
            };
        }
    }

    /// Gather the data symbols back out of the grid.
    pub fn deframer(&self, input: &[Complex64], output: &mut [Complex64]) {
        let mut data_index = 0;
        for (slot, &tag) in self.frame.iter().enumerate() {
            if tag == CarrierType::Data {
                output[data_index] = input[slot];
                data_index += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Channel estimation and equalization
    // ------------------------------------------------------------------

    pub fn channel_estimator_frame(&mut self, received: &[Complex64]) {
        match self.channel_estimator {
            ChannelEstimator::ZeroForcing => channel::zf_estimate(
                &mut self.estimated_channel,
                &self.frame,
                &self.pilots.sequence,
                received,
                self.nc,
                self.nsymb,
                self.pilots.dx,
            ),
            ChannelEstimator::LeastSquares {
                window_width,
                window_height,
            } => channel::ls_estimate(
                &mut self.estimated_channel,
                &self.frame,
                &self.pilots.sequence,
                received,
                self.nc,
                self.nsymb,
                self.pilots.dx,
                window_width,
                window_height,
            ),
        }

        if self.amplitude_restoration {
            channel::restore_amplitude(&mut self.estimated_channel, &mut self.raw_channel);
        }
    }

    pub fn channel_equalizer(&mut self, input: &[Complex64], output: &mut [Complex64]) {
        for slot in 0..self.nsymb * self.nc {
            output[slot] = input[slot] / self.estimated_channel[slot].value;
            self.estimated_channel[slot].status = ChannelStatus::Unknown;
        }
    }

    /// Scale the whole frame so pilots land at their nominal amplitude.
    pub fn automatic_gain_control(&self, frame_data: &mut [Complex64]) {
        let mut pilot_amp = 0.0;
        let mut pilot_count = 0usize;
        for (slot, &tag) in self.frame.iter().enumerate() {
            if tag == CarrierType::Pilot {
                pilot_amp += frame_data[slot].norm();
                pilot_count += 1;
            }
        }
        if pilot_count == 0 {
            return;
        }
        let agc = self.pilots.boost / (pilot_amp / pilot_count as f64);
        for value in frame_data.iter_mut() {
            *value *= agc;
        }
    }

    /// Noise variance estimated from pilot residuals.
    pub fn measure_variance(&self, frame_data: &[Complex64]) -> f64 {
        let mut variance = 0.0;
        let mut pilot_index = 0usize;
        for (slot, &tag) in self.frame.iter().enumerate() {
            if tag == CarrierType::Pilot {
                let diff = frame_data[slot] - self.pilots.sequence[pilot_index];
                pilot_index += 1;
                variance += diff.norm_sqr();
            }
        }
        variance / pilot_index.max(1) as f64
    }

    // ------------------------------------------------------------------
    // Measurements and clipping
    // ------------------------------------------------------------------

    pub fn measure_signal_strength(input: &[Complex64]) -> f64 {
        let power: f64 = input.iter().map(|v| v.norm_sqr()).sum::<f64>() / input.len() as f64;
        10.0 * (power / 0.001).log10()
    }

    pub fn measure_power_papr(input: &[f64]) -> PowerMeasurement {
        let mut m = PowerMeasurement::default();
        for &s in input {
            let p = s * s;
            m.avg += p;
            m.max = m.max.max(p);
        }
        m.avg /= input.len() as f64;
        m.papr_db = 10.0 * (m.max / m.avg).log10();
        m
    }

    /// SNR in dB from the difference between a reference and a noisy frame.
    pub fn measure_snr(reference: &[Complex64], noisy: &[Complex64]) -> f64 {
        let variance: f64 = reference
            .iter()
            .zip(noisy.iter())
            .map(|(s, n)| (n - s).norm_sqr())
            .sum::<f64>()
            / reference.len() as f64;
        -10.0 * variance.log10()
    }

    /// Clip peaks above the target PAPR, preserving sign.
    pub fn peak_clip(input: &mut [f64], papr_db: f64) {
        let avg: f64 = input.iter().map(|s| s * s).sum::<f64>() / input.len() as f64;
        let peak_allowed = (avg * 10f64.powf(papr_db / 10.0)).sqrt();
        for s in input.iter_mut() {
            if *s > peak_allowed {
                *s = peak_allowed;
            } else if *s < -peak_allowed {
                *s = -peak_allowed;
            }
        }
    }

    /// Clip complex peaks above the target PAPR, preserving phase.
    pub fn peak_clip_complex(input: &mut [Complex64], papr_db: f64) {
        let avg: f64 = input.iter().map(|v| v.norm_sqr()).sum::<f64>() / input.len() as f64;
        let peak_allowed = avg * 10f64.powf(papr_db / 10.0);
        for v in input.iter_mut() {
            if v.norm_sqr() > peak_allowed {
                *v = set_complex(peak_allowed.sqrt(), get_angle(*v));
            }
        }
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    pub fn time_sync(&self, input: &[Complex64], size: usize, interpolation_rate: usize) -> Vec<SyncCandidate> {
        sync::time_sync(
            input,
            size,
            self.nfft,
            self.ngi,
            interpolation_rate,
            self.time_sync_nsymb,
            2,
        )
    }

    pub fn time_sync_preamble(
        &self,
        input: &[Complex64],
        size: usize,
        interpolation_rate: usize,
        step: usize,
        n_candidates: usize,
    ) -> Vec<SyncCandidate> {
        sync::time_sync_preamble(
            input,
            size,
            self.nfft,
            self.ngi,
            interpolation_rate,
            self.preamble.nsymb,
            step,
            n_candidates,
        )
    }

    /// Fractional carrier frequency offset in Hz, measured from the
    /// Nfft/2-periodicity of the preamble. `input` starts at the first
    /// preamble symbol of the decimated baseband. Gated on input energy and
    /// half-symbol correlation so noise does not produce corrections.
    pub fn frequency_sync(
        &mut self,
        input: &[Complex64],
        carrier_spacing: f64,
        preamble_nsymb: usize,
    ) -> f64 {
        let nfft = self.nfft;
        let ngi = self.ngi;
        let half = nfft / 2;
        let n_used = (preamble_nsymb / 2).max(1);

        let energy: f64 = input[ngi..ngi + nfft].iter().map(|v| v.norm_sqr()).sum();
        if energy < 1e-6 {
            tracing::trace!(energy, "frequency sync skipped, no signal");
            return 0.0;
        }

        let mut p = Complex64::default();
        let mut r = 0.0;
        for n in 0..half {
            let first = input[ngi + n];
            let second = input[ngi + n + half];
            p += first * second.conj();
            r += second.norm_sqr();
        }
        let corr_mag = if r > 0.0 { p.norm() / r } else { 0.0 };
        if corr_mag < 0.5 {
            tracing::trace!(corr_mag, "frequency sync skipped, weak correlation");
            return 0.0;
        }

        // Conjugate product of the two half-symbol spectra summed over the
        // active carriers; its angle over pi is the CFO in subcarrier units.
        let mut frame = vec![Complex64::default(); nfft];
        let mut frame_fft = vec![Complex64::default(); nfft];
        let mut depadded1 = vec![Complex64::default(); self.nc];
        let mut depadded2 = vec![Complex64::default(); self.nc];
        let mut mul = Complex64::default();

        for j in 0..n_used {
            let base = j * (nfft + ngi) + ngi;

            for i in 0..half {
                frame[i] = input[base + i];
                frame[i + half] = input[base + i];
            }
            self.fft.fft(&frame, &mut frame_fft);
            self.zero_depadder(&frame_fft, &mut depadded1);

            for i in 0..half {
                frame[i] = input[base + half + i];
                frame[i + half] = input[base + half + i];
            }
            self.fft.fft(&frame, &mut frame_fft);
            self.zero_depadder(&frame_fft, &mut depadded2);

            for i in 0..self.nc {
                mul += depadded2[i].conj() * depadded1[i];
            }
        }

        let fractional = get_angle(mul) / PI;
        let integer = if self.int_cfo_search_range > 0 {
            self.integer_cfo_search(input, fractional) as f64
        } else {
            0.0
        };

        (fractional + integer) * carrier_spacing
    }

    /// Integer CFO search over the even/odd preamble bin pattern: the shift
    /// maximizing the data-bin to null-bin energy ratio wins, accepted only
    /// above a 2.0 ratio. Off unless `int_cfo_search_range` is set.
    fn integer_cfo_search(&mut self, input: &[Complex64], fractional: f64) -> i32 {
        let nfft = self.nfft;
        let ngi = self.ngi;

        // Take one preamble symbol with the fractional offset removed.
        let phase_inc = -2.0 * PI * fractional / nfft as f64;
        let corrected: Vec<Complex64> = (0..nfft)
            .map(|n| input[ngi + n] * set_complex(1.0, phase_inc * n as f64))
            .collect();
        let mut spectrum = vec![Complex64::default(); nfft];
        self.fft.fft(&corrected, &mut spectrum);

        let search_limit = self.int_cfo_search_range.min(self.nc / 2) as i32;
        let mut best_shift = 0i32;
        let mut best_metric = 0.0f64;

        for k in -search_limit..=search_limit {
            let mut energy_data = 0.0;
            let mut energy_null = 0.0;
            for carrier in 0..self.nc {
                let fft_bin = if carrier < self.nc / 2 {
                    nfft - self.nc / 2 + carrier
                } else {
                    carrier - self.nc / 2 + self.start_shift
                };
                let received_bin =
                    (fft_bin as i32 + k).rem_euclid(nfft as i32) as usize;
                let bin_energy = spectrum[received_bin].norm_sqr();
                if fft_bin % 2 == 0 {
                    energy_data += bin_energy;
                } else {
                    energy_null += bin_energy;
                }
            }
            let metric = if energy_null > 1e-3 {
                energy_data / energy_null
            } else {
                energy_data
            };
            if metric > best_metric {
                best_metric = metric;
                best_shift = k;
            }
        }

        if best_metric > 2.0 {
            best_shift
        } else {
            0
        }
    }

    // ------------------------------------------------------------------
    // Passband conversion
    // ------------------------------------------------------------------

    /// Interpolate and mix baseband up to the passband carrier. The mixer
    /// phase runs off `passband_start_sample` and is never reset between
    /// frames of one transmission.
    #[allow(clippy::too_many_arguments)]
    pub fn baseband_to_passband(
        &mut self,
        input: &[Complex64],
        output: &mut [f64],
        sampling_frequency: f64,
        carrier_frequency: f64,
        carrier_amplitude: f64,
        interpolation_rate: usize,
    ) {
        let sampling_interval = 1.0 / sampling_frequency;
        let mut interpolated = vec![Complex64::default(); input.len() * interpolation_rate];
        rational_resampler(
            input,
            &mut interpolated,
            interpolation_rate,
            ResampleDirection::Interpolation,
        );

        for (i, &value) in interpolated.iter().enumerate() {
            let theta = 2.0 * PI * carrier_frequency
                * self.passband_start_sample as f64
                * sampling_interval;
            output[i] = value.re * carrier_amplitude * theta.cos()
                + value.im * carrier_amplitude * theta.sin();
            self.passband_start_sample += 1;
        }
    }

    /// Mix passband down, low-pass filter, and decimate.
    #[allow(clippy::too_many_arguments)]
    pub fn passband_to_baseband(
        &self,
        input: &[f64],
        output: &mut [Complex64],
        sampling_frequency: f64,
        carrier_frequency: f64,
        carrier_amplitude: f64,
        decimation_rate: usize,
    ) {
        let sampling_interval = 1.0 / sampling_frequency;
        let mut mixed = vec![Complex64::default(); input.len()];
        for (i, &s) in input.iter().enumerate() {
            let theta = 2.0 * PI * carrier_frequency * i as f64 * sampling_interval;
            mixed[i] = Complex64::new(
                s * carrier_amplitude * theta.cos(),
                s * carrier_amplitude * theta.sin(),
            );
        }

        let mut filtered = vec![Complex64::default(); input.len()];
        self.fir_rx.apply_complex(&mixed, &mut filtered);

        rational_resampler(
            &filtered,
            output,
            decimation_rate,
            ResampleDirection::Decimation,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{Fir, FirKind, FirWindow};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn test_ofdm(nc: usize, nsymb: usize) -> Ofdm {
        let pilots = PilotConfigurator::new(7, 3, 1.33, 0);
        let preamble =
            PreambleConfigurator::new(4, PreambleModulation::Qpsk, std::f64::consts::SQRT_2, 1);
        let fir = Fir::new(FirWindow::Hamming, FirKind::LowPass, 3000.0, 10000.0, 0.0);
        let mut ofdm = Ofdm::new(
            pilots,
            preamble,
            fir.clone(),
            fir.clone(),
            fir,
            1,
            ChannelEstimator::ZeroForcing,
            false,
        );
        ofdm.init(512, nc, nsymb, 1.0 / 16.0);
        ofdm
    }

    #[test]
    fn symbol_mod_demod_round_trip() {
        let mut ofdm = test_ofdm(50, 17);
        let mut rng = StdRng::seed_from_u64(1);
        let carriers: Vec<Complex64> = (0..50)
            .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect();

        let mut time = vec![Complex64::default(); ofdm.symbol_len()];
        ofdm.symbol_mod(&carriers, &mut time);

        let mut back = vec![Complex64::default(); 50];
        ofdm.symbol_demod(&time, &mut back);

        for (a, b) in carriers.iter().zip(back.iter()) {
            assert!((a - b).norm() < 1e-9);
        }
    }

    #[test]
    fn cyclic_prefix_copies_symbol_tail() {
        let mut ofdm = test_ofdm(50, 17);
        let carriers: Vec<Complex64> =
            (0..50).map(|i| Complex64::new(i as f64 / 50.0, 0.1)).collect();
        let mut time = vec![Complex64::default(); ofdm.symbol_len()];
        ofdm.symbol_mod(&carriers, &mut time);

        let ngi = ofdm.ngi;
        let nfft = ofdm.nfft;
        for m in 0..ngi {
            assert!((time[m] - time[nfft + m]).norm() < 1e-12);
        }
    }

    #[test]
    fn framer_deframer_round_trip() {
        let ofdm = test_ofdm(50, 17);

        let n_data = ofdm.pilots.n_data;
        let data: Vec<Complex64> = (0..n_data)
            .map(|i| Complex64::new(i as f64, -(i as f64)))
            .collect();

        let mut grid = vec![Complex64::default(); 50 * 17];
        ofdm.framer(&data, &mut grid);
        let mut back = vec![Complex64::default(); n_data];
        ofdm.deframer(&grid, &mut back);
        assert_eq!(back, data);

        // Pilot slots carry boosted pilot values.
        let mut pilot_index = 0;
        for (slot, &tag) in ofdm.frame.iter().enumerate() {
            if tag == CarrierType::Pilot {
                assert_eq!(grid[slot], ofdm.pilots.sequence[pilot_index]);
                pilot_index += 1;
            }
        }
    }

    #[test]
    fn preamble_time_waveform_is_half_periodic() {
        let mut ofdm = test_ofdm(50, 17);
        let nc = ofdm.nc;
        let values: Vec<Complex64> = ofdm.preamble.values[..nc].to_vec();
        let mut time = vec![Complex64::default(); ofdm.symbol_len()];
        ofdm.symbol_mod(&values, &mut time);

        let ngi = ofdm.ngi;
        let half = ofdm.nfft / 2;
        for n in 0..half {
            assert!(
                (time[ngi + n] - time[ngi + half + n]).norm() < 1e-9,
                "sample {n}"
            );
        }
    }

    #[test]
    fn equalizer_inverts_a_known_channel() {
        let mut ofdm = test_ofdm(50, 17);
        let n = 50 * 17;
        let h = Complex64::new(0.8, -0.4);
        for estimate in ofdm.estimated_channel.iter_mut() {
            estimate.value = h;
        }
        let input: Vec<Complex64> = (0..n).map(|i| Complex64::new(i as f64, 1.0) * h).collect();
        let mut output = vec![Complex64::default(); n];
        ofdm.channel_equalizer(&input, &mut output);
        for (i, value) in output.iter().enumerate() {
            assert!((value - Complex64::new(i as f64, 1.0)).norm() < 1e-9);
        }
    }

    #[test]
    fn peak_clip_caps_the_papr() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut samples: Vec<f64> = (0..4096).map(|_| rng.gen_range(-1.0..1.0)).collect();
        samples[100] = 40.0;
        Ofdm::peak_clip(&mut samples, 6.0);
        let m = Ofdm::measure_power_papr(&samples);
        assert!(m.papr_db <= 6.5, "papr {}", m.papr_db);
    }

    #[test]
    fn frequency_sync_measures_an_injected_offset() {
        let mut ofdm = test_ofdm(50, 17);
        let carrier_spacing = 50.0;
        let offset_hz = 7.0;

        // Preamble symbols at baseband with a rotating phase applied.
        let nsymb_preamble = ofdm.preamble.nsymb;
        let symbol_len = ofdm.symbol_len();
        let mut baseband = vec![Complex64::default(); nsymb_preamble * symbol_len];
        for s in 0..nsymb_preamble {
            let row: Vec<Complex64> =
                ofdm.preamble.values[s * ofdm.nc..(s + 1) * ofdm.nc].to_vec();
            let mut time = vec![Complex64::default(); symbol_len];
            ofdm.symbol_mod(&row, &mut time);
            baseband[s * symbol_len..(s + 1) * symbol_len].copy_from_slice(&time);
        }

        // A transmit carrier `offset_hz` high rotates the received baseband
        // clockwise; the estimator reports the +offset to re-mix with.
        let fs_baseband = ofdm.nfft as f64 * carrier_spacing;
        for (n, value) in baseband.iter_mut().enumerate() {
            let theta = 2.0 * PI * offset_hz * n as f64 / fs_baseband;
            *value *= set_complex(1.0, -theta);
        }

        let measured = ofdm.frequency_sync(&baseband, carrier_spacing, nsymb_preamble);
        assert!(
            (measured - offset_hz).abs() < 0.5,
            "measured {measured}, injected {offset_hz}"
        );
    }

    #[test]
    fn frequency_sync_ignores_noise() {
        let mut ofdm = test_ofdm(50, 17);
        let mut rng = StdRng::seed_from_u64(9);
        let baseband: Vec<Complex64> = (0..4 * ofdm.symbol_len())
            .map(|_| Complex64::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
            .collect();
        let measured = ofdm.frequency_sync(&baseband, 50.0, 4);
        assert_eq!(measured, 0.0);
    }

    #[test]
    fn passband_round_trip_preserves_baseband() {
        let mut ofdm = test_ofdm(50, 17);
        let fs = 51200.0;
        let carrier = 6000.0;
        let amplitude = std::f64::consts::SQRT_2;

        ofdm.fir_rx = Fir::new(FirWindow::Hamming, FirKind::LowPass, 3000.0, 5000.0, 0.0);
        ofdm.fir_rx.sampling_frequency = fs;
        ofdm.fir_rx.design();

        let mut rng = StdRng::seed_from_u64(17);
        let n = 2048;
        // Band-limited baseband: a handful of low-frequency tones.
        let baseband: Vec<Complex64> = (0..n)
            .map(|i| {
                let t = i as f64 / (fs / 2.0);
                Complex64::new(
                    (2.0 * PI * 400.0 * t).cos() + 0.5 * (2.0 * PI * 900.0 * t).sin(),
                    (2.0 * PI * 700.0 * t).sin(),
                ) * 0.3
                    + Complex64::new(rng.gen_range(-1e-6..1e-6), 0.0)
            })
            .collect();

        let mut passband = vec![0.0f64; n * 2];
        ofdm.baseband_to_passband(&baseband, &mut passband, fs, carrier, amplitude, 2);

        let mut recovered = vec![Complex64::default(); n];
        ofdm.passband_to_baseband(&passband, &mut recovered, fs, carrier, amplitude, 2);

        // Compare away from the filter edges.
        for i in 200..n - 200 {
            assert!(
                (recovered[i] - baseband[i]).norm() < 0.05,
                "sample {i}: {} vs {}",
                recovered[i],
                baseband[i]
            );
        }
    }

    #[test]
    fn mixer_phase_is_continuous_across_calls() {
        let mut ofdm = test_ofdm(50, 17);
        let fs = 51200.0;
        let baseband = vec![Complex64::new(0.5, 0.0); 256];

        let mut one_shot = vec![0.0f64; 1024];
        let mut first = vec![0.0f64; 512];
        let mut second = vec![0.0f64; 512];

        let big: Vec<Complex64> = baseband.iter().chain(baseband.iter()).copied().collect();
        ofdm.baseband_to_passband(&big, &mut one_shot, fs, 6000.0, 1.0, 2);

        ofdm.passband_start_sample = 0;
        ofdm.baseband_to_passband(&baseband, &mut first, fs, 6000.0, 1.0, 2);
        ofdm.baseband_to_passband(&baseband, &mut second, fs, 6000.0, 1.0, 2);

        for i in 0..512 {
            assert!((one_shot[512 + i] - second[i]).abs() < 1e-9, "sample {i}");
        }
    }
}

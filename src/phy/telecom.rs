use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use super::awgn::AwgnChannel;
use super::config::{
    mode_geometry, Bandwidth, ConfigId, FirSettings, TelecomConfig,
};
use super::constellation::{Mapper, Modulation};
use super::interleaver::{deinterleave, interleave};
use super::ldpc::Ldpc;
use super::ofdm::{Ofdm, PilotConfigurator, PreambleConfigurator};
use crate::dsp::{shift_left, Fir};
use crate::error::ModemError;
use crate::utils::consts::{TIME_SYNC_COARSE_STEP, TIME_SYNC_MIN_CORRELATION};
use crate::utils::{bit_to_byte, byte_to_bit};

/// Where a frame sits in a back-to-back transmission. Streamed frames run
/// through a three-frame sliding window so the transmit FIRs always see
/// their true neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLocation {
    Single,
    First,
    Middle,
    Flush,
}

/// Outcome of one receive attempt.
#[derive(Debug, Clone, Copy)]
pub struct RxStatus {
    pub message_decoded: bool,
    pub iterations_done: usize,
    pub sync_trials: usize,
    /// Detected frame start, samples into the interpolated baseband.
    pub delay: isize,
    pub delay_of_last_decoded_message: isize,
    pub freq_offset: f64,
    pub freq_offset_of_last_decoded_message: f64,
    pub snr: f64,
    pub signal_strength_dbm: f64,
}

impl Default for RxStatus {
    fn default() -> Self {
        RxStatus {
            message_decoded: false,
            iterations_done: 0,
            sync_trials: 0,
            delay: 0,
            delay_of_last_decoded_message: -1,
            freq_offset: 0.0,
            freq_offset_of_last_decoded_message: 0.0,
            snr: -99.9,
            signal_strength_dbm: -999.0,
        }
    }
}

/// Scratch buffers sized for the current mode.
#[derive(Default)]
pub struct DataContainer {
    pub n_data: usize,
    pub n_bits: usize,
    pub nc: usize,
    pub nfft: usize,
    pub nofdm: usize,
    pub ngi: usize,
    pub nsymb: usize,
    pub preamble_nsymb: usize,
    pub interpolation_rate: usize,
    pub buffer_nsymb: usize,
    pub total_frame_size: usize,

    pub data: Vec<u8>,
    pub encoded: Vec<u8>,
    pub bit_interleaved: Vec<u8>,
    pub modulated: Vec<Complex64>,
    pub ofdm_interleaved: Vec<Complex64>,
    pub ofdm_framed: Vec<Complex64>,
    pub ofdm_symbol_modulated: Vec<Complex64>,
    pub preamble_symbol_modulated: Vec<Complex64>,
    pub ofdm_symbol_demodulated: Vec<Complex64>,
    pub equalized: Vec<Complex64>,
    pub ofdm_deframed: Vec<Complex64>,
    pub ofdm_deinterleaved: Vec<Complex64>,
    pub demodulated: Vec<f64>,
    pub deinterleaved: Vec<f64>,
    pub hd_decoded: Vec<u8>,

    pub baseband: Vec<Complex64>,
    pub baseband_interpolated: Vec<Complex64>,
    pub passband_data: Vec<f64>,
    pub passband_tx_buffer: Vec<f64>,
    pub fir_stage_1: Vec<f64>,
    pub fir_stage_2: Vec<f64>,
}

impl DataContainer {
    #[allow(clippy::too_many_arguments)]
    pub fn set_size(
        &mut self,
        n_data: usize,
        nc: usize,
        bits_per_symbol: usize,
        nfft: usize,
        ngi: usize,
        nsymb: usize,
        preamble_nsymb: usize,
        interpolation_rate: usize,
        codeword_len: usize,
    ) {
        self.n_data = n_data;
        self.n_bits = n_data * bits_per_symbol;
        self.nc = nc;
        self.nfft = nfft;
        self.ngi = ngi;
        self.nofdm = nfft + ngi;
        self.nsymb = nsymb;
        self.preamble_nsymb = preamble_nsymb;
        self.interpolation_rate = interpolation_rate;
        self.buffer_nsymb = 2 * (nsymb + preamble_nsymb) + 1;
        self.total_frame_size = self.nofdm * (nsymb + preamble_nsymb) * interpolation_rate;

        self.data = vec![0; codeword_len];
        self.encoded = vec![0; codeword_len];
        self.bit_interleaved = vec![0; self.n_bits];
        self.modulated = vec![Complex64::default(); n_data];
        self.ofdm_interleaved = vec![Complex64::default(); n_data];
        self.ofdm_framed = vec![Complex64::default(); nsymb * nc];
        self.ofdm_symbol_modulated = vec![Complex64::default(); self.nofdm * nsymb];
        self.preamble_symbol_modulated =
            vec![Complex64::default(); self.nofdm * preamble_nsymb];
        self.ofdm_symbol_demodulated = vec![Complex64::default(); nsymb * nc];
        self.equalized = vec![Complex64::default(); nsymb * nc];
        self.ofdm_deframed = vec![Complex64::default(); n_data];
        self.ofdm_deinterleaved = vec![Complex64::default(); n_data];
        self.demodulated = vec![0.0; self.n_bits];
        self.deinterleaved = vec![0.0; codeword_len];
        self.hd_decoded = vec![0; codeword_len];

        self.baseband =
            vec![Complex64::default(); self.nofdm * (nsymb + preamble_nsymb)];
        self.baseband_interpolated =
            vec![Complex64::default(); self.nofdm * self.buffer_nsymb * interpolation_rate];
        self.passband_data = vec![0.0; self.total_frame_size];
        self.passband_tx_buffer = vec![0.0; 3 * self.total_frame_size];
        self.fir_stage_1 = vec![0.0; 2 * self.total_frame_size];
        self.fir_stage_2 = vec![0.0; 2 * self.total_frame_size];
    }

    /// Samples the receive path expects per call.
    pub fn rx_buffer_len(&self) -> usize {
        self.nofdm * self.buffer_nsymb * self.interpolation_rate
    }
}

/// The physical layer as one unit: owns the OFDM engine, the LDPC codec and
/// the constellation mapper, and runs the transmit and receive pipelines.
pub struct TelecomSystem {
    pub config: TelecomConfig,
    pub bandwidth: Bandwidth,
    pub current_configuration: ConfigId,
    pub last_configuration: ConfigId,
    pub modulation: Modulation,

    pub ofdm: Ofdm,
    pub ldpc: Ldpc,
    pub mapper: Mapper,
    pub data: DataContainer,
    pub awgn_channel: AwgnChannel,
    pub receive_stats: RxStatus,

    pub sampling_frequency: f64,
    pub carrier_frequency: f64,
    pub carrier_amplitude: f64,
    pub frequency_interpolation_rate: usize,
    pub output_power_watt: f64,
    pub time_sync_trials_max: usize,
    pub use_last_good_time_sync: bool,
    pub use_last_good_freq_offset: bool,

    pub bit_interleaver_block_size: usize,
    pub time_freq_interleaver_block_size: usize,

    // Derived link figures.
    pub ldpc_real_code_rate: f64,
    pub symbol_duration: f64,
    pub frame_duration: f64,
    pub bit_rate: f64,
    pub coded_bit_rate: f64,
    pub shannon_limit: f64,

    padding_rng: StdRng,
}

impl TelecomSystem {
    pub fn new(
        config: TelecomConfig,
        bandwidth: Bandwidth,
        initial: ConfigId,
    ) -> Result<Self, ModemError> {
        let pilots = PilotConfigurator::new(1, 1, config.pilot_boost, config.pilot_seed);
        let preamble = PreambleConfigurator::new(
            config.preamble_nsymb,
            config.preamble_modulation,
            config.preamble_boost,
            config.preamble_seed,
        );

        let build_fir = |settings: &FirSettings| {
            Fir::new(
                settings.window.into(),
                settings.kind.into(),
                settings.transition_bandwidth,
                settings.lpf_cut_frequency,
                settings.hpf_cut_frequency,
            )
        };

        let ofdm = Ofdm::new(
            pilots,
            preamble,
            build_fir(&config.fir_rx),
            build_fir(&config.fir_tx1),
            build_fir(&config.fir_tx2),
            config.start_shift,
            config.channel_estimator,
            config.amplitude_restoration,
        );

        let ldpc = Ldpc::new(initial.ldpc_rate(), config.ldpc_decoding_algorithm)?;

        let mut system = TelecomSystem {
            bandwidth,
            current_configuration: initial,
            last_configuration: initial,
            modulation: initial.modulation(),
            ofdm,
            ldpc,
            mapper: Mapper::new(initial.modulation()),
            data: DataContainer::default(),
            awgn_channel: AwgnChannel::new(0x6d65),
            receive_stats: RxStatus::default(),
            sampling_frequency: 0.0,
            carrier_frequency: config.carrier_frequency,
            carrier_amplitude: std::f64::consts::SQRT_2,
            frequency_interpolation_rate: config.frequency_interpolation_rate,
            output_power_watt: config.output_power_watt,
            time_sync_trials_max: config.time_sync_trials_max,
            use_last_good_time_sync: config.use_last_good_time_sync,
            use_last_good_freq_offset: config.use_last_good_freq_offset,
            bit_interleaver_block_size: 1,
            time_freq_interleaver_block_size: 1,
            ldpc_real_code_rate: 0.0,
            symbol_duration: 0.0,
            frame_duration: 0.0,
            bit_rate: 0.0,
            coded_bit_rate: 0.0,
            shannon_limit: 0.0,
            padding_rng: StdRng::seed_from_u64(0x7061_6464),
            config,
        };
        system.load_configuration(initial)?;
        Ok(system)
    }

    /// Tear down the previous mode and rebuild everything for `id`.
    pub fn load_configuration(&mut self, id: ConfigId) -> Result<(), ModemError> {
        self.last_configuration = self.current_configuration;
        self.current_configuration = id;
        self.modulation = id.modulation();

        let geometry = mode_geometry(id, self.bandwidth);
        self.ofdm.pilots.dx = geometry.dx;
        self.ofdm.pilots.dy = geometry.dy;
        self.ofdm.freq_offset_ignore_limit = self.config.freq_offset_ignore_limit;
        self.ofdm.preamble_papr_cut = self.config.preamble_papr_cut;
        self.ofdm.data_papr_cut = self.config.data_papr_cut;
        self.ofdm
            .init(self.config.nfft, geometry.nc, geometry.nsymb, self.config.gi);
        self.ofdm.time_sync_nsymb = geometry.nsymb;

        self.ldpc = Ldpc::new(id.ldpc_rate(), self.config.ldpc_decoding_algorithm)?;
        self.ldpc.gbf_eta = self.config.ldpc_gbf_eta;
        self.ldpc.n_iteration_max = self.config.ldpc_n_iteration_max;
        self.mapper = Mapper::new(self.modulation);

        let n_bits = self.ofdm.pilots.n_data * self.modulation.bits_per_symbol();
        if n_bits <= self.ldpc.p() || n_bits > self.ldpc.n() {
            return Err(ModemError::Config(format!(
                "mode {id:?}: {n_bits} frame bits do not fit the {}-bit code",
                self.ldpc.n()
            )));
        }

        self.calculate_parameters();

        self.ofdm.fir_rx.sampling_frequency = self.sampling_frequency;
        self.ofdm.fir_rx.design();
        self.ofdm.fir_tx1.sampling_frequency = self.sampling_frequency;
        self.ofdm.fir_tx1.design();
        self.ofdm.fir_tx2.sampling_frequency = self.sampling_frequency;
        self.ofdm.fir_tx2.design();

        self.data.set_size(
            self.ofdm.pilots.n_data,
            geometry.nc,
            self.modulation.bits_per_symbol(),
            self.config.nfft,
            self.ofdm.ngi,
            geometry.nsymb,
            self.config.preamble_nsymb,
            self.frequency_interpolation_rate,
            self.ldpc.n(),
        );

        self.bit_interleaver_block_size = (self.data.n_bits / 10).max(1);
        self.time_freq_interleaver_block_size = (self.data.n_data / 10).max(1);
        self.receive_stats = RxStatus::default();

        debug!(
            mode = ?id,
            n_bits = self.data.n_bits,
            payload_bytes = self.payload_bytes(),
            sampling_frequency = self.sampling_frequency,
            coded_kbps = self.coded_bit_rate / 1024.0,
            "configuration loaded"
        );
        Ok(())
    }

    pub fn return_to_last_configuration(&mut self) -> Result<(), ModemError> {
        let target = self.last_configuration;
        self.load_configuration(target)
    }

    /// Mode the gear shift should run at for the given SNR.
    pub fn get_configuration(&self, snr_db: f64) -> ConfigId {
        super::config::configuration_for_snr(snr_db)
    }

    fn calculate_parameters(&mut self) {
        let m = self.modulation.points() as f64;
        let n_data = self.ofdm.pilots.n_data as f64;
        let bandwidth = self.bandwidth.hz();
        let p = self.ldpc.p() as f64;

        self.ldpc_real_code_rate = (n_data * m.log2() - p) / (n_data * m.log2());
        let tu = self.ofdm.nc as f64 / bandwidth;
        self.symbol_duration = tu * (1.0 + self.ofdm.gi);
        self.frame_duration = self.symbol_duration
            * (self.ofdm.nsymb + self.config.preamble_nsymb) as f64;
        self.bit_rate = n_data * m.log2() / self.frame_duration;
        self.coded_bit_rate = self.bit_rate * self.ldpc_real_code_rate;
        self.shannon_limit = 10.0
            * ((2f64.powf(self.bit_rate * self.ldpc.rate.value() / bandwidth) - 1.0)
                * m.log2()
                * bandwidth
                / self.bit_rate)
                .log10();
        self.sampling_frequency = self.frequency_interpolation_rate as f64
            * (bandwidth / self.ofdm.nc as f64)
            * self.ofdm.nfft as f64;
    }

    /// Frame payload capacity in whole bytes.
    pub fn payload_bytes(&self) -> usize {
        (self.data.n_bits - self.ldpc.p()) / 8
    }

    /// Wall-clock duration of one frame including the preamble, in ms.
    pub fn frame_duration_ms(&self) -> f64 {
        self.frame_duration * 1000.0
    }

    // ------------------------------------------------------------------
    // Transmit
    // ------------------------------------------------------------------

    /// Bit-level transmit: `input` carries nBits-P payload bits; `output`
    /// receives one passband frame (total_frame_size samples).
    pub fn transmit(&mut self, input: &[u8], output: &mut [f64], location: MessageLocation) {
        let n_virtual = self.ldpc.n() - self.data.n_bits;
        let n_real = self.data.n_bits - self.ldpc.p();
        let k = self.ldpc.k();
        let p = self.ldpc.p();
        let data = &mut self.data;

        data.data[..n_real].copy_from_slice(&input[..n_real]);
        // Virtual bits wrap the payload so the full K-bit systematic input
        // is defined even when the frame carries fewer bits than K.
        for i in 0..n_virtual {
            data.data[n_real + i] = data.data[i];
        }

        self.ldpc.encode(&data.data, &mut data.encoded);

        // The frame carries [payload, parity]; the virtual span is not sent.
        for i in 0..p {
            data.encoded[n_real + i] = data.encoded[k + i];
        }

        interleave(
            &data.encoded[..data.n_bits],
            &mut data.bit_interleaved,
            self.bit_interleaver_block_size,
        );
        self.mapper
            .modulate(&data.bit_interleaved, &mut data.modulated);
        interleave(
            &data.modulated,
            &mut data.ofdm_interleaved,
            self.time_freq_interleaver_block_size,
        );
        self.ofdm
            .framer(&data.ofdm_interleaved, &mut data.ofdm_framed);

        let nc = data.nc;
        let nofdm = data.nofdm;
        for i in 0..data.preamble_nsymb {
            let row = self.ofdm.preamble.values[i * nc..(i + 1) * nc].to_vec();
            self.ofdm.symbol_mod(
                &row,
                &mut data.preamble_symbol_modulated[i * nofdm..(i + 1) * nofdm],
            );
        }
        for i in 0..data.nsymb {
            let row = data.ofdm_framed[i * nc..(i + 1) * nc].to_vec();
            self.ofdm.symbol_mod(
                &row,
                &mut data.ofdm_symbol_modulated[i * nofdm..(i + 1) * nofdm],
            );
        }

        // Unit per-sample RMS, then the configured output power. The
        // preamble rides `preamble_boost` above the data.
        let power_normalization =
            ((self.ofdm.nfft * self.frequency_interpolation_rate) as f64).sqrt();
        let data_scale = self.output_power_watt.sqrt() / power_normalization;
        let preamble_scale = data_scale * self.ofdm.preamble.boost;
        for value in data.ofdm_symbol_modulated.iter_mut() {
            *value *= data_scale;
        }
        for value in data.preamble_symbol_modulated.iter_mut() {
            *value *= preamble_scale;
        }

        let interpolation_rate = self.frequency_interpolation_rate;
        let preamble_len = nofdm * data.preamble_nsymb * interpolation_rate;
        let data_len = nofdm * data.nsymb * interpolation_rate;
        {
            let (preamble_section, data_section) =
                data.passband_data.split_at_mut(preamble_len);
            self.ofdm.baseband_to_passband(
                &data.preamble_symbol_modulated,
                preamble_section,
                self.sampling_frequency,
                self.carrier_frequency,
                self.carrier_amplitude,
                interpolation_rate,
            );
            self.ofdm.baseband_to_passband(
                &data.ofdm_symbol_modulated,
                &mut data_section[..data_len],
                self.sampling_frequency,
                self.carrier_frequency,
                self.carrier_amplitude,
                interpolation_rate,
            );

            Ofdm::peak_clip(preamble_section, self.ofdm.preamble_papr_cut);
            Ofdm::peak_clip(&mut data_section[..data_len], self.ofdm.data_papr_cut);
        }

        let total = data.total_frame_size;
        if location == MessageLocation::Single {
            self.ofdm
                .fir_tx1
                .apply(&data.passband_data, &mut data.fir_stage_1[..total]);
            self.ofdm
                .fir_tx2
                .apply(&data.fir_stage_1[..total], &mut data.fir_stage_2[..total]);
            output[..total].copy_from_slice(&data.fir_stage_2[..total]);
            return;
        }

        // Streamed frames: slide a three-frame window and emit the middle
        // one, so filter edge effects land outside the emitted frame.
        match location {
            MessageLocation::First => {
                data.passband_tx_buffer[total..2 * total].copy_from_slice(&data.passband_data);
                data.passband_tx_buffer[2 * total..3 * total]
                    .copy_from_slice(&data.passband_data);
            }
            MessageLocation::Middle | MessageLocation::Flush => {
                data.passband_tx_buffer[2 * total..3 * total]
                    .copy_from_slice(&data.passband_data);
            }
            _ => {}
        }

        self.ofdm.fir_tx1.apply(
            &data.passband_tx_buffer[total / 2..total / 2 + 2 * total],
            &mut data.fir_stage_1,
        );
        self.ofdm
            .fir_tx2
            .apply(&data.fir_stage_1, &mut data.fir_stage_2);
        output[..total].copy_from_slice(&data.fir_stage_2[total / 2..total / 2 + total]);

        shift_left(&mut data.passband_tx_buffer, total);
    }

    /// Byte-level transmit: pads the unfilled payload bits with noise bits
    /// so the encoder input is fully defined. Bytes beyond the frame
    /// capacity are dropped.
    pub fn transmit_byte(
        &mut self,
        bytes: &[u8],
        output: &mut [f64],
        location: MessageLocation,
    ) {
        let n_real = self.data.n_bits - self.ldpc.p();
        let usable = bytes.len().min(n_real / 8);
        let mut bits = vec![0u8; n_real];
        byte_to_bit(&bytes[..usable], &mut bits[..usable * 8]);
        for bit in bits[usable * 8..].iter_mut() {
            *bit = self.padding_rng.gen_range(0..2) as u8;
        }
        self.transmit(&bits, output, location);
    }

    // ------------------------------------------------------------------
    // Receive
    // ------------------------------------------------------------------

    /// Bit-level receive over one capture window
    /// (`data.rx_buffer_len()` passband samples).
    pub fn receive(&mut self, input: &[f64], output: &mut [u8]) -> RxStatus {
        let interpolation_rate = self.frequency_interpolation_rate;
        let nofdm = self.data.nofdm;
        let nsymb = self.data.nsymb;
        let preamble_nsymb = self.data.preamble_nsymb;
        let nc = self.data.nc;
        let n_virtual = self.ldpc.n() - self.data.n_bits;
        let n_real = self.data.n_bits - self.ldpc.p();
        let k = self.ldpc.k();
        let p = self.ldpc.p();

        debug_assert_eq!(input.len(), self.data.rx_buffer_len());
        self.receive_stats.message_decoded = false;
        self.receive_stats.sync_trials = 0;

        {
            let data = &mut self.data;
            self.ofdm.passband_to_baseband(
                input,
                &mut data.baseband_interpolated,
                self.sampling_frequency,
                self.carrier_frequency,
                self.carrier_amplitude,
                1,
            );
        }
        self.receive_stats.signal_strength_dbm =
            Ofdm::measure_signal_strength(&self.data.baseband_interpolated);

        // Coarse preamble hunt over the first frame-length of the buffer.
        let search_len = (preamble_nsymb + nsymb) * nofdm * interpolation_rate;
        let coarse = self.ofdm.time_sync_preamble(
            &self.data.baseband_interpolated,
            search_len,
            interpolation_rate,
            TIME_SYNC_COARSE_STEP,
            1,
        );
        let Some(&coarse_best) = coarse.first() else {
            return self.receive_stats;
        };
        if coarse_best.correlation < TIME_SYNC_MIN_CORRELATION {
            trace!(
                correlation = coarse_best.correlation,
                "no preamble in capture window"
            );
            return self.receive_stats;
        }

        self.receive_stats.delay = coarse_best.delay as isize;
        let preamble_symb_loc = coarse_best.delay / (nofdm * interpolation_rate);
        // Process once the frame sits a few symbols into the window, with
        // a floor that keeps the gate non-empty for the short fast modes.
        let gate_high = preamble_nsymb + (nsymb / 2).max(2);
        if preamble_symb_loc <= preamble_nsymb || preamble_symb_loc >= gate_high {
            // Frame not yet centred in the window; wait for more samples.
            return self.receive_stats;
        }

        // Single-sample refinement around the coarse hit, keeping the
        // runner-up as a second hypothesis.
        let fine_base = (preamble_symb_loc - 1) * nofdm * interpolation_rate;
        let fine = self.ofdm.time_sync_preamble(
            &self.data.baseband_interpolated[fine_base..],
            (preamble_nsymb + 2) * nofdm * interpolation_rate,
            interpolation_rate,
            1,
            self.time_sync_trials_max,
        );
        if fine.is_empty() {
            return self.receive_stats;
        }

        while self.receive_stats.sync_trials <= self.time_sync_trials_max {
            let trial = self.receive_stats.sync_trials;
            let last_good_trial = trial == self.time_sync_trials_max;

            let delay = if last_good_trial
                && self.use_last_good_time_sync
                && self.receive_stats.delay_of_last_decoded_message != -1
            {
                self.receive_stats.delay_of_last_decoded_message as usize
            } else {
                let candidate = fine[trial.min(fine.len() - 1)];
                fine_base + candidate.delay
            };
            self.receive_stats.delay = delay as isize;

            let frame_samples = nofdm * (nsymb + preamble_nsymb) * interpolation_rate;
            if delay + frame_samples > self.data.baseband_interpolated.len() {
                self.receive_stats.sync_trials += 1;
                continue;
            }

            {
                let data = &mut self.data;
                crate::dsp::interpolation::rational_resampler(
                    &data.baseband_interpolated[delay..delay + frame_samples],
                    &mut data.baseband,
                    interpolation_rate,
                    crate::dsp::interpolation::ResampleDirection::Decimation,
                );
            }

            let freq_offset = if last_good_trial
                && self.use_last_good_freq_offset
                && self.receive_stats.freq_offset_of_last_decoded_message != 0.0
            {
                self.receive_stats.freq_offset_of_last_decoded_message
            } else {
                let baseband = std::mem::take(&mut self.data.baseband);
                let measured = self.ofdm.frequency_sync(
                    &baseband,
                    self.bandwidth.hz() / nc as f64,
                    preamble_nsymb,
                );
                self.data.baseband = baseband;
                measured
            };
            self.receive_stats.freq_offset = freq_offset;

            // A real offset shifts the whole buffer; mix again against the
            // corrected carrier, re-synchronize time once, and re-slice.
            let mut delay = delay;
            if freq_offset.abs() > self.ofdm.freq_offset_ignore_limit {
                {
                    let data = &mut self.data;
                    self.ofdm.passband_to_baseband(
                        input,
                        &mut data.baseband_interpolated,
                        self.sampling_frequency,
                        self.carrier_frequency + freq_offset,
                        self.carrier_amplitude,
                        1,
                    );
                }
                let resync = self.ofdm.time_sync_preamble(
                    &self.data.baseband_interpolated[fine_base..],
                    (preamble_nsymb + 2) * nofdm * interpolation_rate,
                    interpolation_rate,
                    1,
                    1,
                );
                if let Some(best) = resync.first() {
                    let candidate = fine_base + best.delay;
                    if candidate + frame_samples <= self.data.baseband_interpolated.len() {
                        delay = candidate;
                        self.receive_stats.delay = delay as isize;
                    }
                }
                let data = &mut self.data;
                crate::dsp::interpolation::rational_resampler(
                    &data.baseband_interpolated[delay..delay + frame_samples],
                    &mut data.baseband,
                    interpolation_rate,
                    crate::dsp::interpolation::ResampleDirection::Decimation,
                );
            }

            {
                let data = &mut self.data;
                for i in 0..nsymb {
                    let row = data.baseband
                        [(preamble_nsymb + i) * nofdm..(preamble_nsymb + i + 1) * nofdm]
                        .to_vec();
                    self.ofdm
                        .symbol_demod(&row, &mut data.ofdm_symbol_demodulated[i * nc..(i + 1) * nc]);
                }
            }

            self.ofdm
                .automatic_gain_control(&mut self.data.ofdm_symbol_demodulated);
            let variance = self
                .ofdm
                .measure_variance(&self.data.ofdm_symbol_demodulated)
                .max(1e-12);

            self.ofdm
                .channel_estimator_frame(&self.data.ofdm_symbol_demodulated);
            {
                let data = &mut self.data;
                let demodulated_grid = data.ofdm_symbol_demodulated.clone();
                self.ofdm
                    .channel_equalizer(&demodulated_grid, &mut data.equalized);
                self.ofdm.deframer(&data.equalized, &mut data.ofdm_deframed);
                deinterleave(
                    &data.ofdm_deframed,
                    &mut data.ofdm_deinterleaved,
                    self.time_freq_interleaver_block_size,
                );
                self.mapper.demodulate(
                    &data.ofdm_deinterleaved,
                    &mut data.demodulated,
                    variance,
                );
                deinterleave(
                    &data.demodulated,
                    &mut data.deinterleaved[..data.n_bits],
                    self.bit_interleaver_block_size,
                );

                // Undo the transmit-side parity packing: parity returns to
                // the codeword tail, the virtual span wraps the payload.
                for i in (0..p).rev() {
                    data.deinterleaved[i + n_real + n_virtual] = data.deinterleaved[i + n_real];
                }
                for i in 0..n_virtual {
                    data.deinterleaved[n_real + i] = data.deinterleaved[i];
                }
            }

            let iterations = self
                .ldpc
                .decode(&self.data.deinterleaved, &mut self.data.hd_decoded);
            self.receive_stats.iterations_done = iterations;
            output[..n_real].copy_from_slice(&self.data.hd_decoded[..n_real]);

            let all_zeros = self.data.hd_decoded[..n_real].iter().all(|&b| b == 0);

            if iterations >= self.ldpc.n_iteration_max || all_zeros {
                self.receive_stats.snr = -99.9;
                self.receive_stats.message_decoded = false;
                self.receive_stats.sync_trials += 1;
                continue;
            }

            // Decode succeeded: rebuild the reference constellation to
            // measure SNR against what was actually received.
            {
                let data = &mut self.data;
                for i in 0..n_virtual {
                    data.hd_decoded[n_real + i] = data.hd_decoded[i];
                }
                let decoded = data.hd_decoded.clone();
                self.ldpc.encode(&decoded, &mut data.encoded);
                for i in 0..p {
                    data.encoded[n_real + i] = data.encoded[k + i];
                }
                interleave(
                    &data.encoded[..data.n_bits],
                    &mut data.bit_interleaved,
                    self.bit_interleaver_block_size,
                );
                self.mapper
                    .modulate(&data.bit_interleaved, &mut data.modulated);
                interleave(
                    &data.modulated,
                    &mut data.ofdm_interleaved,
                    self.time_freq_interleaver_block_size,
                );
            }
            self.receive_stats.snr =
                Ofdm::measure_snr(&self.data.ofdm_interleaved, &self.data.ofdm_deframed);

            self.receive_stats.message_decoded = true;
            self.receive_stats.freq_offset_of_last_decoded_message = freq_offset;
            self.receive_stats.delay_of_last_decoded_message = delay as isize;
            trace!(
                iterations,
                delay,
                freq_offset,
                snr = self.receive_stats.snr,
                "frame decoded"
            );
            break;
        }

        self.receive_stats
    }

    /// Byte-level receive; `output` gets `payload_bytes()` bytes.
    pub fn receive_byte(&mut self, input: &[f64], output: &mut [u8]) -> RxStatus {
        let n_real = self.data.n_bits - self.ldpc.p();
        let mut bits = vec![0u8; n_real];
        let stats = self.receive(input, &mut bits);
        bit_to_byte(&bits[..self.payload_bytes() * 8], output);
        stats
    }

    // ------------------------------------------------------------------
    // Link quality harnesses
    // ------------------------------------------------------------------

    /// Frame error count over the full passband chain with AWGN and a
    /// fixed frame placement inside the capture window.
    pub fn passband_frame_errors(&mut self, es_n0_db: f64, n_frames: usize) -> usize {
        let sigma = 1.0 / 10f64.powf(es_n0_db / 10.0).sqrt();
        let payload_len = self.payload_bytes();
        let delay = ((self.data.preamble_nsymb + 2) * self.data.nofdm + 50)
            * self.data.interpolation_rate;
        let mut errors = 0;

        for frame in 0..n_frames {
            let payload: Vec<u8> = (0..payload_len)
                .map(|_| self.padding_rng.gen_range(0..=255) as u8)
                .collect();

            let mut passband = vec![0.0f64; self.data.total_frame_size];
            self.transmit_byte(&payload, &mut passband, MessageLocation::Single);

            let mut capture = vec![0.0f64; self.data.rx_buffer_len()];
            self.awgn_channel
                .apply_with_delay(&passband, &mut capture, sigma, delay);

            let mut decoded = vec![0u8; payload_len];
            let stats = self.receive_byte(&capture, &mut decoded);
            if !stats.message_decoded || decoded != payload {
                errors += 1;
                trace!(frame, "passband test frame errored");
            }
        }
        errors
    }

    /// Frame error count over an ideal-timing baseband AWGN loop.
    pub fn baseband_frame_errors(&mut self, es_n0_db: f64, n_frames: usize) -> usize {
        let n_real = self.data.n_bits - self.ldpc.p();
        let sigma = 1.0 / 10f64.powf(es_n0_db / 10.0).sqrt();
        let power_normalization = (self.ofdm.nfft as f64).sqrt();
        let mut errors = 0;

        for frame in 0..n_frames {
            let bits: Vec<u8> = (0..n_real)
                .map(|_| self.padding_rng.gen_range(0..2) as u8)
                .collect();

            // Modulate through the grid without the passband chain.
            let data = &mut self.data;
            let n_virtual = self.ldpc.n() - data.n_bits;
            data.data[..n_real].copy_from_slice(&bits);
            for i in 0..n_virtual {
                data.data[n_real + i] = data.data[i];
            }
            self.ldpc.encode(&data.data, &mut data.encoded);
            for i in 0..self.ldpc.p() {
                data.encoded[n_real + i] = data.encoded[self.ldpc.k() + i];
            }
            interleave(
                &data.encoded[..data.n_bits],
                &mut data.bit_interleaved,
                self.bit_interleaver_block_size,
            );
            self.mapper
                .modulate(&data.bit_interleaved, &mut data.modulated);
            interleave(
                &data.modulated,
                &mut data.ofdm_interleaved,
                self.time_freq_interleaver_block_size,
            );
            self.ofdm
                .framer(&data.ofdm_interleaved, &mut data.ofdm_framed);

            let nc = data.nc;
            let nofdm = data.nofdm;
            for i in 0..data.nsymb {
                let row = data.ofdm_framed[i * nc..(i + 1) * nc].to_vec();
                self.ofdm.symbol_mod(
                    &row,
                    &mut data.ofdm_symbol_modulated[i * nofdm..(i + 1) * nofdm],
                );
            }

            // AWGN at the normalized per-sample scale.
            let mut noisy = vec![Complex64::default(); nofdm * data.nsymb];
            for (out, &s) in noisy.iter_mut().zip(data.ofdm_symbol_modulated.iter()) {
                let scaled = s / power_normalization;
                let with_noise = Complex64::new(
                    scaled.re + self.awgn_channel.gaussian() * sigma,
                    scaled.im + self.awgn_channel.gaussian() * sigma,
                );
                *out = with_noise * power_normalization;
            }

            for i in 0..data.nsymb {
                let row = noisy[i * nofdm..(i + 1) * nofdm].to_vec();
                self.ofdm
                    .symbol_demod(&row, &mut data.ofdm_symbol_demodulated[i * nc..(i + 1) * nc]);
            }
            let variance = self
                .ofdm
                .measure_variance(&data.ofdm_symbol_demodulated)
                .max(1e-12);
            self.ofdm
                .channel_estimator_frame(&data.ofdm_symbol_demodulated);
            let demodulated_grid = data.ofdm_symbol_demodulated.clone();
            self.ofdm
                .channel_equalizer(&demodulated_grid, &mut data.equalized);
            self.ofdm.deframer(&data.equalized, &mut data.ofdm_deframed);
            deinterleave(
                &data.ofdm_deframed,
                &mut data.ofdm_deinterleaved,
                self.time_freq_interleaver_block_size,
            );
            self.mapper
                .demodulate(&data.ofdm_deinterleaved, &mut data.demodulated, variance);
            deinterleave(
                &data.demodulated,
                &mut data.deinterleaved[..data.n_bits],
                self.bit_interleaver_block_size,
            );
            for i in (0..self.ldpc.p()).rev() {
                data.deinterleaved[i + n_real + n_virtual] = data.deinterleaved[i + n_real];
            }
            for i in 0..n_virtual {
                data.deinterleaved[n_real + i] = data.deinterleaved[i];
            }

            let iterations = self.ldpc.decode(&data.deinterleaved, &mut data.hd_decoded);
            if iterations >= self.ldpc.n_iteration_max
                || data.hd_decoded[..n_real] != bits[..]
            {
                errors += 1;
                trace!(frame, iterations, "baseband test frame errored");
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_MODES: [ConfigId; 7] = [
        ConfigId::Config0,
        ConfigId::Config1,
        ConfigId::Config2,
        ConfigId::Config3,
        ConfigId::Config4,
        ConfigId::Config5,
        ConfigId::Config6,
    ];

    fn system(id: ConfigId) -> TelecomSystem {
        TelecomSystem::new(TelecomConfig::default(), Bandwidth::Bw2500, id).unwrap()
    }

    #[test]
    fn every_mode_loads_and_fits_the_codeword() {
        for bandwidth in [Bandwidth::Bw2300, Bandwidth::Bw2500] {
            let mut sys =
                TelecomSystem::new(TelecomConfig::default(), bandwidth, ConfigId::Config0)
                    .unwrap();
            for id in ALL_MODES {
                sys.load_configuration(id).unwrap();
                assert!(sys.data.n_bits <= sys.ldpc.n(), "{bandwidth:?} {id:?}");
                assert!(sys.data.n_bits > sys.ldpc.p(), "{bandwidth:?} {id:?}");
                assert!(sys.payload_bytes() > 0);
                assert!((sys.sampling_frequency - 51200.0).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn faster_modes_carry_more_payload() {
        let mut previous = 0.0;
        for id in [ConfigId::Config0, ConfigId::Config2, ConfigId::Config6] {
            let sys = system(id);
            assert!(sys.coded_bit_rate > previous, "{id:?}");
            previous = sys.coded_bit_rate;
        }
    }

    #[test]
    fn baseband_round_trip_is_error_free_in_every_mode() {
        for id in ALL_MODES {
            let mut sys = system(id);
            let errors = sys.baseband_frame_errors(100.0, 2);
            assert_eq!(errors, 0, "{id:?}");
        }
    }

    #[test]
    fn passband_round_trip_decodes_at_a_random_offset() {
        let mut sys = system(ConfigId::Config2);
        let payload: Vec<u8> = (0..sys.payload_bytes()).map(|i| (i * 13 + 5) as u8).collect();

        let total = sys.data.total_frame_size;
        let mut frame = vec![0.0f64; total];
        sys.transmit_byte(&payload, &mut frame, MessageLocation::Single);

        let delay = ((sys.data.preamble_nsymb + 2) * sys.data.nofdm + 50)
            * sys.data.interpolation_rate;
        let mut capture = vec![0.0f64; sys.data.rx_buffer_len()];
        sys.awgn_channel.apply_with_delay(&frame, &mut capture, 1e-6, delay);

        let mut decoded = vec![0u8; sys.payload_bytes()];
        let stats = sys.receive_byte(&capture, &mut decoded);

        assert!(stats.message_decoded, "stats: {stats:?}");
        assert_eq!(decoded, payload);
        assert!(stats.iterations_done < sys.ldpc.n_iteration_max);
        assert!((stats.delay - delay as isize).abs() < 8, "delay {}", stats.delay);
    }

    #[test]
    fn passband_round_trip_survives_a_carrier_offset() {
        let mut sys = system(ConfigId::Config2);
        let payload: Vec<u8> = (0..sys.payload_bytes()).map(|i| i as u8).collect();

        let total = sys.data.total_frame_size;
        let mut frame = vec![0.0f64; total];
        // Transmit 1.5 Hz high by nudging the mixer.
        sys.carrier_frequency += 1.5;
        sys.transmit_byte(&payload, &mut frame, MessageLocation::Single);
        sys.carrier_frequency -= 1.5;

        let delay = ((sys.data.preamble_nsymb + 2) * sys.data.nofdm + 50)
            * sys.data.interpolation_rate;
        let mut capture = vec![0.0f64; sys.data.rx_buffer_len()];
        sys.awgn_channel.apply_with_delay(&frame, &mut capture, 1e-6, delay);

        let mut decoded = vec![0u8; sys.payload_bytes()];
        let stats = sys.receive_byte(&capture, &mut decoded);

        assert!(stats.message_decoded, "stats: {stats:?}");
        assert_eq!(decoded, payload);
        assert!(
            (stats.freq_offset - 1.5).abs() < 0.5,
            "freq offset {}",
            stats.freq_offset
        );
    }

    #[test]
    fn passband_harness_is_clean_at_high_esn0() {
        let mut sys = system(ConfigId::Config2);
        assert_eq!(sys.passband_frame_errors(60.0, 2), 0);
    }

    #[test]
    fn an_empty_capture_window_reports_no_decode() {
        let mut sys = system(ConfigId::Config2);
        let capture = vec![0.0f64; sys.data.rx_buffer_len()];
        let mut decoded = vec![0u8; sys.payload_bytes()];
        let stats = sys.receive_byte(&capture, &mut decoded);
        assert!(!stats.message_decoded);
    }

    #[test]
    fn streamed_frames_emit_every_message_once_after_priming() {
        let mut sys = system(ConfigId::Config2);
        let total = sys.data.total_frame_size;
        let payload_a = vec![0xAAu8; sys.payload_bytes()];
        let payload_b = vec![0x55u8; sys.payload_bytes()];

        let mut first = vec![0.0f64; total];
        let mut middle = vec![0.0f64; total];
        let mut flush = vec![0.0f64; total];
        sys.transmit_byte(&payload_a, &mut first, MessageLocation::First);
        sys.transmit_byte(&payload_b, &mut middle, MessageLocation::Middle);
        sys.transmit_byte(&payload_b, &mut flush, MessageLocation::Flush);

        // Priming frame then each message in order: decode the flush window,
        // which carries payload_b.
        let delay = ((sys.data.preamble_nsymb + 2) * sys.data.nofdm + 50)
            * sys.data.interpolation_rate;
        let mut capture = vec![0.0f64; sys.data.rx_buffer_len()];
        sys.awgn_channel.apply_with_delay(&flush, &mut capture, 1e-6, delay);
        let mut decoded = vec![0u8; sys.payload_bytes()];
        let stats = sys.receive_byte(&capture, &mut decoded);
        assert!(stats.message_decoded);
        assert_eq!(decoded, payload_b);
    }
}

use serde::{Deserialize, Serialize};

use super::constellation::Modulation;
use super::ldpc::{DecodingAlgorithm, LdpcRate};
use super::ofdm::{ChannelEstimator, PreambleModulation};
use crate::dsp::{FirKind, FirWindow};
use crate::error::ModemError;
use crate::utils::consts::*;

/// The seven physical-layer presets, most robust first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigId {
    Config0,
    Config1,
    Config2,
    Config3,
    Config4,
    Config5,
    Config6,
}

impl ConfigId {
    pub fn from_u8(value: u8) -> Result<Self, ModemError> {
        match value {
            0 => Ok(ConfigId::Config0),
            1 => Ok(ConfigId::Config1),
            2 => Ok(ConfigId::Config2),
            3 => Ok(ConfigId::Config3),
            4 => Ok(ConfigId::Config4),
            5 => Ok(ConfigId::Config5),
            6 => Ok(ConfigId::Config6),
            other => Err(ModemError::Config(format!("unknown mode id {other}"))),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn modulation(self) -> Modulation {
        match self {
            ConfigId::Config0 | ConfigId::Config1 => Modulation::Bpsk,
            ConfigId::Config2 => Modulation::Qpsk,
            ConfigId::Config3 => Modulation::Psk8,
            ConfigId::Config4 => Modulation::Qam16,
            ConfigId::Config5 => Modulation::Qam32,
            ConfigId::Config6 => Modulation::Qam64,
        }
    }

    pub fn ldpc_rate(self) -> LdpcRate {
        match self {
            ConfigId::Config0 => LdpcRate::R2of16,
            _ => LdpcRate::R14of16,
        }
    }
}

/// Audio bandwidth presets selectable over the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    Bw2300,
    Bw2500,
}

impl Bandwidth {
    pub fn hz(self) -> f64 {
        match self {
            Bandwidth::Bw2300 => 2300.0,
            Bandwidth::Bw2500 => 2500.0,
        }
    }
}

/// Grid geometry of one mode at one bandwidth.
#[derive(Debug, Clone, Copy)]
pub struct ModeGeometry {
    pub nc: usize,
    pub nsymb: usize,
    pub dx: usize,
    pub dy: usize,
}

/// Symbols per frame are sized so the coded frame (data carriers times bits
/// per symbol) never exceeds the 1600-bit codeword; the remainder is the
/// virtual span wrapped at the encoder input.
pub fn mode_geometry(id: ConfigId, bandwidth: Bandwidth) -> ModeGeometry {
    let modulation = id.modulation();
    match bandwidth {
        Bandwidth::Bw2500 => {
            let (nsymb, dx, dy) = match modulation {
                Modulation::Bpsk => (48, 1, 3),
                Modulation::Qpsk => (16, 7, 3),
                Modulation::Psk8 => (11, 7, 2),
                Modulation::Qam16 => (8, 7, 2),
                Modulation::Qam32 => (6, 7, 3),
                Modulation::Qam64 => (5, 7, 2),
            };
            ModeGeometry {
                nc: 50,
                nsymb,
                dx,
                dy,
            }
        }
        Bandwidth::Bw2300 => {
            let (nsymb, dx, dy) = match modulation {
                Modulation::Bpsk => (37, 5, 3),
                Modulation::Qpsk => (18, 5, 3),
                Modulation::Psk8 => (12, 5, 3),
                Modulation::Qam16 => (9, 5, 2),
                Modulation::Qam32 => (7, 5, 3),
                Modulation::Qam64 => (6, 5, 2),
            };
            ModeGeometry {
                nc: 46,
                nsymb,
                dx,
                dy,
            }
        }
    }
}

/// SNR thresholds driving the adaptive gear shift.
pub fn configuration_for_snr(snr_db: f64) -> ConfigId {
    if snr_db > 40.0 {
        ConfigId::Config6
    } else if snr_db > 35.0 {
        ConfigId::Config5
    } else if snr_db > 33.0 {
        ConfigId::Config4
    } else if snr_db > 30.0 {
        ConfigId::Config3
    } else if snr_db > 20.0 {
        ConfigId::Config2
    } else if snr_db > 10.0 {
        ConfigId::Config1
    } else {
        ConfigId::Config0
    }
}

/// One FIR stage as configured; designed for a sampling rate at load time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FirSettings {
    pub window: FirWindowSetting,
    pub kind: FirKindSetting,
    pub transition_bandwidth: f64,
    pub lpf_cut_frequency: f64,
    pub hpf_cut_frequency: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum FirWindowSetting {
    Rectangular,
    Hanning,
    Hamming,
    Blackman,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum FirKindSetting {
    LowPass,
    HighPass,
    BandPass,
}

impl From<FirWindowSetting> for FirWindow {
    fn from(value: FirWindowSetting) -> Self {
        match value {
            FirWindowSetting::Rectangular => FirWindow::Rectangular,
            FirWindowSetting::Hanning => FirWindow::Hanning,
            FirWindowSetting::Hamming => FirWindow::Hamming,
            FirWindowSetting::Blackman => FirWindow::Blackman,
        }
    }
}

impl From<FirKindSetting> for FirKind {
    fn from(value: FirKindSetting) -> Self {
        match value {
            FirKindSetting::LowPass => FirKind::LowPass,
            FirKindSetting::HighPass => FirKind::HighPass,
            FirKindSetting::BandPass => FirKind::BandPass,
        }
    }
}

/// Static physical-layer parameters shared by every mode.
#[derive(Debug, Clone)]
pub struct TelecomConfig {
    pub nfft: usize,
    pub gi: f64,
    pub start_shift: usize,

    pub pilot_boost: f64,
    pub pilot_seed: u32,

    pub preamble_nsymb: usize,
    pub preamble_modulation: PreambleModulation,
    pub preamble_boost: f64,
    pub preamble_seed: u32,

    pub preamble_papr_cut: f64,
    pub data_papr_cut: f64,

    pub channel_estimator: ChannelEstimator,
    pub amplitude_restoration: bool,

    pub freq_offset_ignore_limit: f64,
    pub time_sync_trials_max: usize,
    pub use_last_good_time_sync: bool,
    pub use_last_good_freq_offset: bool,

    pub frequency_interpolation_rate: usize,
    pub carrier_frequency: f64,
    pub output_power_watt: f64,

    pub ldpc_decoding_algorithm: DecodingAlgorithm,
    pub ldpc_gbf_eta: f64,
    pub ldpc_n_iteration_max: usize,

    pub fir_rx: FirSettings,
    pub fir_tx1: FirSettings,
    pub fir_tx2: FirSettings,
}

impl Default for TelecomConfig {
    fn default() -> Self {
        let carrier = DEFAULT_CARRIER_FREQUENCY;
        let max_bandwidth = 2500.0 * 1.2;
        TelecomConfig {
            nfft: DEFAULT_NFFT,
            gi: DEFAULT_GI,
            start_shift: DEFAULT_START_SHIFT,
            pilot_boost: DEFAULT_PILOT_BOOST,
            pilot_seed: DEFAULT_PILOT_SEED,
            preamble_nsymb: DEFAULT_PREAMBLE_NSYMB,
            preamble_modulation: PreambleModulation::Qpsk,
            preamble_boost: std::f64::consts::SQRT_2,
            preamble_seed: DEFAULT_PREAMBLE_SEED,
            preamble_papr_cut: DEFAULT_PREAMBLE_PAPR_CUT,
            data_papr_cut: DEFAULT_DATA_PAPR_CUT,
            channel_estimator: ChannelEstimator::ZeroForcing,
            amplitude_restoration: false,
            freq_offset_ignore_limit: DEFAULT_FREQ_OFFSET_IGNORE_LIMIT,
            time_sync_trials_max: DEFAULT_TIME_SYNC_TRIALS_MAX,
            use_last_good_time_sync: true,
            use_last_good_freq_offset: true,
            frequency_interpolation_rate: DEFAULT_INTERPOLATION_RATE,
            carrier_frequency: carrier,
            output_power_watt: DEFAULT_OUTPUT_POWER_WATT,
            ldpc_decoding_algorithm: DecodingAlgorithm::Spa,
            ldpc_gbf_eta: DEFAULT_GBF_ETA,
            ldpc_n_iteration_max: DEFAULT_LDPC_ITERATIONS_MAX,
            fir_rx: FirSettings {
                window: FirWindowSetting::Hamming,
                kind: FirKindSetting::LowPass,
                transition_bandwidth: 3000.0,
                lpf_cut_frequency: 2.0 * 2500.0,
                hpf_cut_frequency: 0.0,
            },
            fir_tx1: FirSettings {
                window: FirWindowSetting::Hamming,
                kind: FirKindSetting::HighPass,
                transition_bandwidth: 300.0,
                lpf_cut_frequency: carrier + max_bandwidth / 2.0,
                hpf_cut_frequency: carrier - max_bandwidth / 2.0,
            },
            fir_tx2: FirSettings {
                window: FirWindowSetting::Blackman,
                kind: FirKindSetting::LowPass,
                transition_bandwidth: 300.0,
                lpf_cut_frequency: carrier + max_bandwidth / 2.0,
                hpf_cut_frequency: carrier - max_bandwidth / 2.0,
            },
        }
    }
}

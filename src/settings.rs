use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::arq::ArqConfig;
use crate::error::ModemError;
use crate::phy::{Bandwidth, ConfigId, TelecomConfig};
use crate::utils::consts::*;

/// Start-up parameters a front-end may persist and hand to the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub my_call_sign: String,
    pub listen: bool,
    pub initial_mode: u8,
    pub bandwidth_hz: u32,
    pub carrier_frequency: f64,
    pub tcp_base_port: u16,
    pub gear_shift_on: bool,
    pub data_batch_size: usize,
    pub ack_batch_size: usize,
    pub n_resends: u8,
    pub link_timeout_ms: i64,
    pub switch_role_timeout_ms: i64,
    pub ptt_on_delay_ms: i64,
    pub ptt_off_delay_ms: i64,
    pub ptt_pilot_tone: bool,
    pub output_power_watt: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            my_call_sign: String::new(),
            listen: false,
            initial_mode: 0,
            bandwidth_hz: 2500,
            carrier_frequency: DEFAULT_CARRIER_FREQUENCY,
            tcp_base_port: DEFAULT_TCP_BASE_PORT,
            gear_shift_on: true,
            data_batch_size: DEFAULT_DATA_BATCH_SIZE,
            ack_batch_size: DEFAULT_ACK_BATCH_SIZE,
            n_resends: DEFAULT_N_RESENDS,
            link_timeout_ms: DEFAULT_LINK_TIMEOUT_MS,
            switch_role_timeout_ms: DEFAULT_SWITCH_ROLE_TIMEOUT_MS,
            ptt_on_delay_ms: DEFAULT_PTT_ON_DELAY_MS,
            ptt_off_delay_ms: DEFAULT_PTT_OFF_DELAY_MS,
            ptt_pilot_tone: false,
            output_power_watt: DEFAULT_OUTPUT_POWER_WATT,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ModemError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ModemError::Settings(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| ModemError::Settings(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), ModemError> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| ModemError::Settings(e.to_string()))?;
        std::fs::write(path, raw)
            .map_err(|e| ModemError::Settings(format!("{}: {e}", path.display())))
    }

    pub fn bandwidth(&self) -> Result<Bandwidth, ModemError> {
        match self.bandwidth_hz {
            2300 => Ok(Bandwidth::Bw2300),
            2500 => Ok(Bandwidth::Bw2500),
            other => Err(ModemError::Config(format!(
                "unsupported bandwidth {other} Hz"
            ))),
        }
    }

    pub fn initial_mode(&self) -> Result<ConfigId, ModemError> {
        ConfigId::from_u8(self.initial_mode)
    }

    pub fn telecom_config(&self) -> TelecomConfig {
        let mut config = TelecomConfig::default();
        config.carrier_frequency = self.carrier_frequency;
        let max_bandwidth = 2500.0 * 1.2;
        config.fir_tx1.hpf_cut_frequency = self.carrier_frequency - max_bandwidth / 2.0;
        config.fir_tx1.lpf_cut_frequency = self.carrier_frequency + max_bandwidth / 2.0;
        config.fir_tx2.hpf_cut_frequency = self.carrier_frequency - max_bandwidth / 2.0;
        config.fir_tx2.lpf_cut_frequency = self.carrier_frequency + max_bandwidth / 2.0;
        config.output_power_watt = self.output_power_watt;
        config
    }

    pub fn arq_config(&self) -> ArqConfig {
        ArqConfig {
            data_batch_size: self.data_batch_size,
            ack_batch_size: self.ack_batch_size,
            n_resends: self.n_resends,
            link_timeout_ms: self.link_timeout_ms,
            switch_role_timeout_ms: self.switch_role_timeout_ms,
            ptt_on_delay_ms: self.ptt_on_delay_ms,
            ptt_off_delay_ms: self.ptt_off_delay_ms,
            ptt_pilot_tone: self.ptt_pilot_tone,
            gear_shift_on: self.gear_shift_on,
            ..ArqConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::default();
        settings.my_call_sign = "PU2ABC".into();
        settings.initial_mode = 2;
        settings.bandwidth_hz = 2300;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.my_call_sign, "PU2ABC");
        assert_eq!(loaded.initial_mode, 2);
        assert_eq!(loaded.bandwidth().unwrap(), Bandwidth::Bw2300);
    }

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"listen": true}"#).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.listen);
        assert_eq!(loaded.bandwidth_hz, 2500);
    }

    #[test]
    fn bad_bandwidth_is_rejected() {
        let mut settings = Settings::default();
        settings.bandwidth_hz = 3000;
        assert!(settings.bandwidth().is_err());
    }
}

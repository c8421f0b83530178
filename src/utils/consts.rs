/// Log level used when RUST_LOG is not set.
pub const LOG_LEVEL: &str = "info";

// ============================================================================
// Physical layer defaults
// ============================================================================

/// FFT length in bins.
pub const DEFAULT_NFFT: usize = 512;

/// Cyclic prefix fraction of the FFT length.
pub const DEFAULT_GI: f64 = 1.0 / 16.0;

/// OFDM symbols carrying the synchronization preamble.
pub const DEFAULT_PREAMBLE_NSYMB: usize = 4;

/// Pilot carrier amplitude relative to data carriers.
pub const DEFAULT_PILOT_BOOST: f64 = 1.33;

/// Seed of the pilot pseudo-random sequence (identical on both ends).
pub const DEFAULT_PILOT_SEED: u32 = 0;

/// Seed of the preamble pseudo-random sequence (identical on both ends).
pub const DEFAULT_PREAMBLE_SEED: u32 = 1;

/// Time-domain interpolation factor between baseband and passband.
pub const DEFAULT_INTERPOLATION_RATE: usize = 2;

/// Passband carrier frequency in Hz.
pub const DEFAULT_CARRIER_FREQUENCY: f64 = 6000.0;

/// First positive FFT bin used by active carriers.
pub const DEFAULT_START_SHIFT: usize = 1;

/// PAPR clip target for the preamble section, dB.
pub const DEFAULT_PREAMBLE_PAPR_CUT: f64 = 7.0;

/// PAPR clip target for the data section, dB.
pub const DEFAULT_DATA_PAPR_CUT: f64 = 10.0;

/// Measured carrier offsets below this many Hz are not corrected.
pub const DEFAULT_FREQ_OFFSET_IGNORE_LIMIT: f64 = 0.1;

/// Time synchronization attempts per receive call.
pub const DEFAULT_TIME_SYNC_TRIALS_MAX: usize = 2;

/// Coarse preamble search stride in samples.
pub const TIME_SYNC_COARSE_STEP: usize = 100;

/// Preamble correlation below this is treated as "no preamble".
pub const TIME_SYNC_MIN_CORRELATION: f64 = 0.5;

/// Transmit power scale.
pub const DEFAULT_OUTPUT_POWER_WATT: f64 = 0.1;

/// LDPC iteration cap.
pub const DEFAULT_LDPC_ITERATIONS_MAX: usize = 50;

/// GBF decoder correction rate.
pub const DEFAULT_GBF_ETA: f64 = 0.5;

// ============================================================================
// Datalink defaults
// ============================================================================

/// Byte FIFO capacities (tx, rx and mode-change backup).
pub const DEFAULT_FIFO_BUFFER_SIZE: usize = 128_000;

/// Link drops after this long without a successful decode, in ms.
pub const DEFAULT_LINK_TIMEOUT_MS: i64 = 100_000;

/// Data messages per transmission batch.
pub const DEFAULT_DATA_BATCH_SIZE: usize = 50;

/// Acknowledgement messages per batch.
pub const DEFAULT_ACK_BATCH_SIZE: usize = 2;

/// Control messages per batch.
pub const DEFAULT_CONTROL_BATCH_SIZE: usize = 2;

/// Outstanding message slots (ids are one byte).
pub const DEFAULT_N_MESSAGES: usize = 250;

/// Worst-case ARQ frame header, bytes.
pub const DEFAULT_N_BYTES_HEADER: usize = 5;

/// Retransmissions before a message is declared FAILED.
pub const DEFAULT_N_RESENDS: u8 = 10;

/// Idle time before the commander offers a role switch, in ms.
pub const DEFAULT_SWITCH_ROLE_TIMEOUT_MS: i64 = 1_000;

/// Radio keying settle time before audio is emitted, in ms.
pub const DEFAULT_PTT_ON_DELAY_MS: i64 = 0;

/// Trailing settle time before the radio is unkeyed, in ms.
pub const DEFAULT_PTT_OFF_DELAY_MS: i64 = 0;

/// Out-of-band tone frequency emitted during the keying delay, Hz.
pub const PTT_PILOT_TONE_HZ: f64 = 250.0;

// ============================================================================
// External surfaces
// ============================================================================

/// Control listens on the base port, data on base + 1.
pub const DEFAULT_TCP_BASE_PORT: u16 = 7002;

/// Keep-alive cadence on the control surface, in seconds.
pub const IAMALIVE_PERIOD_S: u64 = 60;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use super::buffer::FifoBuffer;
use super::message::{
    decode_frame, decode_snr, encode_frame, encode_snr, ConnectionStatus, ControlCode,
    LinkStatus, Message, MessageStatus, MessageType, ParsedFrame, Role, BROADCAST_ID,
};
use super::timer::Timer;
use crate::io::audio::{AudioInterface, CaptureGeometry, CaptureWindow};
use crate::phy::config::{configuration_for_snr, ConfigId};
use crate::phy::telecom::{MessageLocation, RxStatus, TelecomSystem};
use crate::phy::Bandwidth;
use crate::utils::consts::*;

/// Tunables of the datalink engine.
#[derive(Debug, Clone)]
pub struct ArqConfig {
    pub fifo_buffer_tx_size: usize,
    pub fifo_buffer_rx_size: usize,
    pub fifo_buffer_backup_size: usize,
    pub link_timeout_ms: i64,
    pub data_batch_size: usize,
    pub ack_batch_size: usize,
    pub control_batch_size: usize,
    pub n_messages: usize,
    pub n_bytes_header: usize,
    pub n_resends: u8,
    pub switch_role_timeout_ms: i64,
    pub ptt_on_delay_ms: i64,
    pub ptt_off_delay_ms: i64,
    pub ptt_pilot_tone: bool,
    pub gear_shift_on: bool,
    pub print_stats_period_ms: i64,
}

impl Default for ArqConfig {
    fn default() -> Self {
        ArqConfig {
            fifo_buffer_tx_size: DEFAULT_FIFO_BUFFER_SIZE,
            fifo_buffer_rx_size: DEFAULT_FIFO_BUFFER_SIZE,
            fifo_buffer_backup_size: DEFAULT_FIFO_BUFFER_SIZE,
            link_timeout_ms: DEFAULT_LINK_TIMEOUT_MS,
            data_batch_size: DEFAULT_DATA_BATCH_SIZE,
            ack_batch_size: DEFAULT_ACK_BATCH_SIZE,
            control_batch_size: DEFAULT_CONTROL_BATCH_SIZE,
            n_messages: DEFAULT_N_MESSAGES,
            n_bytes_header: DEFAULT_N_BYTES_HEADER,
            n_resends: DEFAULT_N_RESENDS,
            switch_role_timeout_ms: DEFAULT_SWITCH_ROLE_TIMEOUT_MS,
            ptt_on_delay_ms: DEFAULT_PTT_ON_DELAY_MS,
            ptt_off_delay_ms: DEFAULT_PTT_OFF_DELAY_MS,
            ptt_pilot_tone: false,
            gear_shift_on: true,
            print_stats_period_ms: 2_000,
        }
    }
}

/// Events pushed to the control surface client.
#[derive(Debug, Clone, PartialEq)]
pub enum CtlEvent {
    Reply(String),
    PttOn,
    PttOff,
    Connected {
        my_call: String,
        dst_call: String,
        bandwidth_hz: f64,
    },
    Disconnected,
}

/// One decoded physical-layer frame handed up by the DSP-RX worker.
#[derive(Debug, Clone)]
pub struct RxFrame {
    pub bytes: Vec<u8>,
    pub stats: RxStatus,
}

/// One frame job handed down to the DSP-TX worker.
#[derive(Debug, Clone)]
pub struct TxJob {
    pub bytes: Vec<u8>,
    pub location: MessageLocation,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ArqStats {
    pub n_sent_data: u64,
    pub n_acked_data: u64,
    pub n_received_data: u64,
    pub n_lost_data: u64,
    pub n_resent_data: u64,
    pub n_acks_sent_data: u64,
    pub n_nacked_data: u64,
    pub n_sent_control: u64,
    pub n_acked_control: u64,
    pub n_received_control: u64,
    pub n_lost_control: u64,
    pub n_resent_control: u64,
    pub n_acks_sent_control: u64,
    pub n_nacked_control: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Measurements {
    pub snr_uplink: f64,
    pub snr_downlink: f64,
    pub signal_strength_dbm: f64,
    pub frequency_offset: f64,
}

impl Default for Measurements {
    fn default() -> Self {
        Measurements {
            snr_uplink: -99.9,
            snr_downlink: -99.9,
            signal_strength_dbm: -99.9,
            frequency_offset: 0.0,
        }
    }
}

/// Channel plumbing between the controller and the rest of the process.
pub struct ArqChannels {
    pub rx_frames: Receiver<RxFrame>,
    pub tx_jobs: Sender<TxJob>,
    pub tx_done: Receiver<()>,
    pub commands: Receiver<String>,
    pub ctl_events: Sender<CtlEvent>,
    pub data_in: Receiver<Vec<u8>>,
    pub data_out: Sender<Vec<u8>>,
}

/// The half-duplex session engine: batched selective-repeat ARQ with
/// role-based exchange discipline, PTT sequencing and the adaptive gear
/// shift.
pub struct ArqController {
    pub config: ArqConfig,
    telecom: Arc<Mutex<TelecomSystem>>,
    capture: Arc<CaptureWindow>,
    audio: Arc<AudioInterface>,
    channels: ArqChannels,
    shutdown: Arc<AtomicBool>,

    pub link_status: LinkStatus,
    pub connection_status: ConnectionStatus,
    pub role: Role,
    pub listen: bool,
    pub connection_id: u8,
    next_connection_id: u8,
    pub my_call_sign: String,
    pub destination_call_sign: String,

    pub current_configuration: ConfigId,
    pub negotiated_configuration: ConfigId,
    last_configuration: ConfigId,
    pub gear_shift_on: bool,
    connected_reported: bool,

    messages_tx: Vec<Message>,
    messages_rx: Vec<Message>,
    messages_batch_tx: Vec<Message>,
    message_batch_counter_tx: usize,
    messages_control: Message,
    last_ack_batch: Vec<Message>,
    pending_control: Option<ParsedFrame>,
    pending_data_in: Vec<u8>,

    n_messages: usize,
    max_data_length: usize,
    max_message_length: usize,
    data_batch_size: usize,
    ack_batch_size: usize,
    control_batch_size: usize,
    n_resends: u8,

    message_transmission_time_ms: i64,
    ack_timeout_data: i64,
    ack_timeout_control: i64,
    receiving_timeout_commander: i64,
    inter_frame_silence_ms: i64,

    link_timer: Timer,
    connection_timer: Timer,
    receiving_timer: Timer,
    gear_shift_timer: Timer,
    switch_role_timer: Timer,
    print_stats_timer: Timer,

    fifo_tx: FifoBuffer,
    fifo_rx: FifoBuffer,
    fifo_backup: FifoBuffer,

    pub stats: ArqStats,
    pub measurements: Measurements,

    last_message_sent_type: MessageType,
    last_message_sent_code: Option<ControlCode>,
    last_received_sequence: u8,
    data_ack_received: bool,
    block_under_tx: bool,
}

impl ArqController {
    pub fn new(
        config: ArqConfig,
        telecom: Arc<Mutex<TelecomSystem>>,
        capture: Arc<CaptureWindow>,
        audio: Arc<AudioInterface>,
        channels: ArqChannels,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let initial = telecom.lock().unwrap().current_configuration;
        let mut controller = ArqController {
            telecom,
            capture,
            audio,
            channels,
            shutdown,
            link_status: LinkStatus::Idle,
            connection_status: ConnectionStatus::Idle,
            role: Role::Responder,
            listen: false,
            connection_id: BROADCAST_ID,
            next_connection_id: 1,
            my_call_sign: String::new(),
            destination_call_sign: String::new(),
            current_configuration: initial,
            negotiated_configuration: initial,
            last_configuration: initial,
            gear_shift_on: config.gear_shift_on,
            connected_reported: false,
            messages_tx: Vec::new(),
            messages_rx: Vec::new(),
            messages_batch_tx: Vec::new(),
            message_batch_counter_tx: 0,
            messages_control: Message::free(0),
            last_ack_batch: Vec::new(),
            pending_control: None,
            pending_data_in: Vec::new(),
            n_messages: config.n_messages.min(255),
            max_data_length: 0,
            max_message_length: 0,
            data_batch_size: config.data_batch_size,
            ack_batch_size: config.ack_batch_size,
            control_batch_size: config.control_batch_size,
            n_resends: config.n_resends,
            message_transmission_time_ms: 500,
            ack_timeout_data: 1000,
            ack_timeout_control: 1000,
            receiving_timeout_commander: 10_000,
            inter_frame_silence_ms: 1_000,
            link_timer: Timer::new(),
            connection_timer: Timer::new(),
            receiving_timer: Timer::new(),
            gear_shift_timer: Timer::new(),
            switch_role_timer: Timer::new(),
            print_stats_timer: Timer::new(),
            fifo_tx: FifoBuffer::new(config.fifo_buffer_tx_size),
            fifo_rx: FifoBuffer::new(config.fifo_buffer_rx_size),
            fifo_backup: FifoBuffer::new(config.fifo_buffer_backup_size),
            stats: ArqStats::default(),
            measurements: Measurements::default(),
            last_message_sent_type: MessageType::None,
            last_message_sent_code: None,
            last_received_sequence: 255,
            data_ack_received: false,
            block_under_tx: false,
            config,
        };
        controller.apply_mode_dimensions();
        controller.init_messages_buffers();
        controller.print_stats_timer.start();
        controller
    }

    /// Blocking worker loop; exits on the shared shutdown flag.
    pub fn run(&mut self) {
        info!("ARQ worker started");
        while !self.shutdown.load(Ordering::Relaxed) {
            self.process_main();
            std::thread::sleep(Duration::from_millis(2));
        }
        info!("ARQ worker stopped");
    }

    /// One polling pass: surface traffic, timers, then the role machine.
    pub fn process_main(&mut self) {
        while let Ok(command) = self.channels.commands.try_recv() {
            self.process_user_command(&command);
        }

        // Application bytes into the tx FIFO; stalled remainder retried
        // next pass so the surface back-pressures instead of dropping.
        if !self.pending_data_in.is_empty() {
            let pending = std::mem::take(&mut self.pending_data_in);
            if !self.fifo_tx.push(&pending) {
                self.pending_data_in = pending;
            }
        }
        if self.pending_data_in.is_empty() {
            while let Ok(bytes) = self.channels.data_in.try_recv() {
                if !self.fifo_tx.push(&bytes) {
                    self.pending_data_in = bytes;
                    break;
                }
            }
        }

        // Received payload out to the application; a full channel puts the
        // bytes back so nothing is lost while the surface is slow.
        while !self.fifo_rx.is_empty() {
            let mut chunk = vec![0u8; self.fifo_rx.len().min(4096)];
            let got = self.fifo_rx.pop(&mut chunk);
            chunk.truncate(got);
            if let Err(error) = self.channels.data_out.try_send(chunk) {
                self.fifo_rx.unshift(error.into_inner().as_slice());
                break;
            }
        }

        self.update_status();
        match self.role {
            Role::Commander => {
                self.process_messages_commander();
                self.process_buffer_data_commander();
            }
            Role::Responder => {
                self.process_messages_responder();
            }
        }
        self.cleanup();
    }

    // ------------------------------------------------------------------
    // Configuration plumbing
    // ------------------------------------------------------------------

    fn apply_mode_dimensions(&mut self) {
        let telecom = self.telecom.lock().unwrap();
        let payload = telecom.payload_bytes();
        self.max_message_length = payload;
        self.max_data_length = payload - self.config.n_bytes_header;
        self.message_transmission_time_ms = telecom.frame_duration_ms().ceil() as i64;
        self.current_configuration = telecom.current_configuration;
        drop(telecom);

        self.data_batch_size = self
            .config
            .data_batch_size
            .min(self.max_data_length.saturating_sub(5))
            .max(1);

        let t = self.message_transmission_time_ms;
        self.ack_timeout_data = (1.2
            * (self.data_batch_size + 1 + self.ack_batch_size + 1) as f64
            * t as f64) as i64
            + 2 * self.config.ptt_on_delay_ms;
        self.ack_timeout_control = ((self.control_batch_size + 1 + self.ack_batch_size + 1)
            as i64)
            * t
            + 2 * self.config.ptt_on_delay_ms;
        self.receiving_timeout_commander =
            2 * (self.ack_batch_size as i64 + 1) * t + self.config.ptt_on_delay_ms;
        self.inter_frame_silence_ms = (2.5 * t as f64) as i64 + self.config.ptt_on_delay_ms;
    }

    fn init_messages_buffers(&mut self) {
        self.messages_tx = (0..self.n_messages)
            .map(|_| Message::free(self.max_data_length))
            .collect();
        self.messages_rx = (0..self.n_messages)
            .map(|_| Message::free(self.max_data_length))
            .collect();
        self.messages_batch_tx = Vec::with_capacity(self.data_batch_size);
        self.message_batch_counter_tx = 0;
        self.messages_control = Message::free(self.max_data_length);
        self.last_ack_batch.clear();
    }

    /// Mode reload ordered strictly between batches: re-queue the backup
    /// block, rebuild the physical layer, then resize every buffer.
    fn load_configuration(&mut self, id: ConfigId) {
        self.restore_backup_buffer_data();

        let control_backup = self.messages_control.clone();

        {
            let mut telecom = self.telecom.lock().unwrap();
            if let Err(error) = telecom.load_configuration(id) {
                warn!(%error, "mode change rejected");
                return;
            }
            let geometry = CaptureGeometry {
                symbol_samples: telecom.data.nofdm * telecom.data.interpolation_rate,
                buffer_nsymb: telecom.data.buffer_nsymb,
                frame_symbols: telecom.data.nsymb + telecom.data.preamble_nsymb,
            };
            self.capture.resize(geometry);
        }

        self.last_configuration = self.current_configuration;
        self.current_configuration = id;
        self.apply_mode_dimensions();
        self.init_messages_buffers();

        // The in-flight control exchange survives the reload.
        self.messages_control = control_backup;
        if self.messages_control.status == MessageStatus::PendingAck {
            self.messages_control.ack_timer.start();
        }
        info!(mode = ?id, "configuration reloaded");
    }

    fn restore_backup_buffer_data(&mut self) {
        if self.fifo_backup.is_empty() || self.max_data_length == 0 {
            return;
        }
        let mut block = vec![0u8; self.fifo_backup.len()];
        let got = self.fifo_backup.pop(&mut block);
        block.truncate(got);
        // The interrupted block goes back in front of newer bytes.
        self.fifo_tx.unshift(&block);
        debug!(bytes = got, "backup block re-queued for retransmission");
    }

    // ------------------------------------------------------------------
    // User command surface
    // ------------------------------------------------------------------

    fn reply(&self, text: &str) {
        let _ = self.channels.ctl_events.try_send(CtlEvent::Reply(text.to_string()));
    }

    pub fn process_user_command(&mut self, command: &str) {
        let command = command.trim_end_matches(['\r', '\n']);
        debug!(command, "control command");
        if let Some(call) = command.strip_prefix("MYCALL ") {
            self.my_call_sign = truncate_call_sign(call);
            self.reply("OK\r");
        } else if let Some(args) = command.strip_prefix("CONNECT ") {
            let mut parts = args.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(src), Some(dst)) => {
                    self.my_call_sign = truncate_call_sign(src);
                    self.destination_call_sign = truncate_call_sign(dst);
                    self.set_role(Role::Commander);
                    self.link_status = LinkStatus::Connecting;
                    self.connection_status = ConnectionStatus::Idle;
                    self.connected_reported = false;
                    self.reset_all_timers();
                    self.reply("OK\r");
                }
                _ => self.reply("WRONG\r"),
            }
        } else if command == "DISCONNECT" {
            self.link_status = LinkStatus::Disconnecting;
            self.reply("OK\r");
        } else if command == "LISTEN ON" {
            self.listen = true;
            self.set_role(Role::Responder);
            self.link_status = LinkStatus::Listening;
            self.connection_status = ConnectionStatus::Receiving;
            self.reset_all_timers();
            self.reply("OK\r");
        } else if command == "LISTEN OFF" {
            self.listen = false;
            self.set_role(Role::Responder);
            self.link_status = LinkStatus::Idle;
            self.connection_status = ConnectionStatus::Idle;
            self.reset_all_timers();
            self.reply("OK\r");
        } else if command == "BW2300" {
            self.change_bandwidth(Bandwidth::Bw2300);
            self.reply("OK\r");
        } else if command == "BW2500" {
            self.change_bandwidth(Bandwidth::Bw2500);
            self.reply("OK\r");
        } else if command == "BUFFER TX" {
            let reply = format!("BUFFER {}\r", self.fifo_tx.len());
            self.reply(&reply);
        } else {
            self.reply("WRONG\r");
        }
    }

    fn change_bandwidth(&mut self, bandwidth: Bandwidth) {
        {
            let mut telecom = self.telecom.lock().unwrap();
            telecom.bandwidth = bandwidth;
        }
        let current = self.current_configuration;
        self.load_configuration(current);
    }

    // ------------------------------------------------------------------
    // Role and timers
    // ------------------------------------------------------------------

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
        self.last_message_sent_type = MessageType::None;
        self.last_message_sent_code = None;
        self.last_received_sequence = 255;
    }

    fn reset_all_timers(&mut self) {
        for timer in [
            &mut self.link_timer,
            &mut self.connection_timer,
            &mut self.gear_shift_timer,
            &mut self.receiving_timer,
            &mut self.switch_role_timer,
        ] {
            timer.stop();
            timer.reset();
        }
    }

    fn drop_link(&mut self) {
        warn!("link dropped");
        self.link_status = LinkStatus::Dropped;
        self.connection_id = BROADCAST_ID;
        self.reset_all_timers();
        for message in self.messages_tx.iter_mut() {
            message.clear();
        }
        for message in self.messages_rx.iter_mut() {
            message.clear();
        }
        self.messages_control.clear();
        self.message_batch_counter_tx = 0;
        self.messages_batch_tx.clear();
        self.block_under_tx = false;
        self.connected_reported = false;

        match self.role {
            Role::Commander => {
                self.set_role(Role::Responder);
                self.link_status = if self.listen {
                    LinkStatus::Listening
                } else {
                    LinkStatus::Idle
                };
                self.connection_status = if self.listen {
                    ConnectionStatus::Receiving
                } else {
                    ConnectionStatus::Idle
                };
            }
            Role::Responder => {
                self.link_status = if self.listen {
                    LinkStatus::Listening
                } else {
                    LinkStatus::Idle
                };
                self.connection_status = if self.listen {
                    ConnectionStatus::Receiving
                } else {
                    ConnectionStatus::Idle
                };
            }
        }
        let _ = self.channels.ctl_events.try_send(CtlEvent::Disconnected);
    }

    /// Timer sweep: per-message ack timeouts, link/connection expiry, the
    /// gear-shift fallback and the stats cadence.
    fn update_status(&mut self) {
        for message in self.messages_tx.iter_mut() {
            if message.status == MessageStatus::PendingAck
                && message.ack_timer.elapsed_ms() >= message.ack_timeout
            {
                message.status = MessageStatus::AckTimedOut;
                self.stats.n_nacked_data += 1;
            }
        }
        if self.messages_control.status == MessageStatus::PendingAck
            && self.messages_control.ack_timer.elapsed_ms() >= self.messages_control.ack_timeout
        {
            self.messages_control.status = MessageStatus::AckTimedOut;
            self.stats.n_nacked_control += 1;
        }

        if self.link_timer.is_counting()
            && self.link_timer.elapsed_ms() >= self.config.link_timeout_ms
        {
            self.drop_link();
            return;
        }

        let connection_limit = (self.n_resends as i64 + 3)
            * (self.control_batch_size + self.ack_batch_size + 3) as i64
            * self.message_transmission_time_ms;
        if self.connection_timer.is_counting()
            && self.connection_timer.elapsed_ms() >= connection_limit
        {
            debug!("negotiation abandoned");
            self.drop_link();
            return;
        }

        let gear_limit = (self.n_resends as i64 / 2)
            * (self.data_batch_size + self.ack_batch_size + 3) as i64
            * self.message_transmission_time_ms;
        if self.gear_shift_on
            && self.gear_shift_timer.is_counting()
            && self.gear_shift_timer.elapsed_ms() >= gear_limit
        {
            self.gear_shift_timer.stop();
            self.gear_shift_timer.reset();
            warn!("no decodes for too long, falling back to the robust mode");
            if self.current_configuration != ConfigId::Config0 {
                self.load_configuration(ConfigId::Config0);
            }
            match self.role {
                Role::Commander => {
                    if self.current_configuration != self.last_configuration {
                        self.add_message_control(ControlCode::TestConnection);
                        self.gear_shift_timer.start();
                    } else {
                        self.connection_status = ConnectionStatus::TransmittingData;
                    }
                }
                Role::Responder => {
                    self.connection_status = ConnectionStatus::Receiving;
                }
            }
        }

        if self.print_stats_timer.elapsed_ms() > self.config.print_stats_period_ms {
            self.print_stats_timer.start();
            self.log_stats();
        }
    }

    fn cleanup(&mut self) {
        if matches!(
            self.messages_control.status,
            MessageStatus::Acked | MessageStatus::Failed
        ) {
            self.messages_control.clear();
        }
        for message in self.messages_tx.iter_mut() {
            if matches!(
                message.status,
                MessageStatus::Acked | MessageStatus::Failed
            ) {
                message.clear();
            }
        }
    }

    fn log_stats(&self) {
        debug!(
            mode = ?self.current_configuration,
            frame_bytes = self.max_message_length,
            role = ?self.role,
            link = ?self.link_status,
            connection = ?self.connection_status,
            snr_uplink = self.measurements.snr_uplink,
            snr_downlink = self.measurements.snr_downlink,
            sent_data = self.stats.n_sent_data,
            acked_data = self.stats.n_acked_data,
            received_data = self.stats.n_received_data,
            resent_data = self.stats.n_resent_data,
            lost_data = self.stats.n_lost_data,
            sent_control = self.stats.n_sent_control,
            acked_control = self.stats.n_acked_control,
            tx_fifo = self.fifo_tx.len(),
            rx_fifo = self.fifo_rx.len(),
            "arq status"
        );
    }

    // ------------------------------------------------------------------
    // Physical send path
    // ------------------------------------------------------------------

    fn ptt_on(&mut self) {
        let _ = self.channels.ctl_events.try_send(CtlEvent::PttOn);
        if self.config.ptt_on_delay_ms > 0 {
            if self.config.ptt_pilot_tone {
                // Out-of-band tone so RF-sensing amplifiers key up early.
                let sample_rate = self.telecom.lock().unwrap().sampling_frequency;
                let n = (sample_rate * self.config.ptt_on_delay_ms as f64 / 1000.0) as usize;
                let tone: Vec<f64> = (0..n)
                    .map(|i| {
                        0.05 * (2.0 * std::f64::consts::PI * PTT_PILOT_TONE_HZ * i as f64
                            / sample_rate)
                            .sin()
                    })
                    .collect();
                self.audio.tx_transfer(&tone);
            }
            std::thread::sleep(Duration::from_millis(self.config.ptt_on_delay_ms as u64));
        }
    }

    fn ptt_off(&mut self) {
        // Bounded wait for the playback ring to drain before unkeying.
        let mut drain_timer = Timer::new();
        drain_timer.start();
        let worst_case =
            (self.data_batch_size as i64 + 2) * self.message_transmission_time_ms + 5_000;
        while !self.audio.playback.is_empty() && drain_timer.elapsed_ms() < worst_case {
            std::thread::sleep(Duration::from_millis(2));
        }
        if self.config.ptt_off_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.ptt_off_delay_ms as u64));
        }
        let _ = self.channels.ctl_events.try_send(CtlEvent::PttOff);
    }

    /// Replay earlier batch entries cyclically until the batch has `size`
    /// messages, keeping the RF envelope length fixed.
    fn pad_messages_batch_tx(&mut self, size: usize) {
        let original = self.message_batch_counter_tx;
        if original == 0 || original >= size {
            return;
        }
        let mut source = 0usize;
        while self.message_batch_counter_tx < size {
            let clone = self.messages_batch_tx[source].clone();
            self.messages_batch_tx.push(clone);
            self.message_batch_counter_tx += 1;
            source = (source + 1) % original;
        }
    }

    /// Key, stream the whole batch (plus the pipeline priming frame),
    /// wait for the air to clear, unkey. Ack timers start at unkey.
    fn send_batch(&mut self) {
        if self.message_batch_counter_tx == 0 {
            return;
        }
        self.ptt_on();

        let count = self.message_batch_counter_tx;
        let mut jobs = Vec::with_capacity(count + 1);
        for (i, message) in self.messages_batch_tx.iter_mut().enumerate().take(count) {
            message.sequence_number = i as u8;
            let location = if i == 0 {
                MessageLocation::First
            } else {
                MessageLocation::Middle
            };
            jobs.push(TxJob {
                bytes: encode_frame(message, self.connection_id),
                location,
            });
        }
        // Flush re-sends the last frame to push it out of the FIR window.
        let last = self.messages_batch_tx[count - 1].clone();
        jobs.push(TxJob {
            bytes: encode_frame(&last, self.connection_id),
            location: MessageLocation::Flush,
        });

        let n_jobs = jobs.len();
        for job in jobs {
            if self.channels.tx_jobs.send(job).is_err() {
                warn!("DSP-TX worker gone, dropping batch");
                break;
            }
        }
        let per_frame = Duration::from_millis(
            (self.message_transmission_time_ms as u64).max(100) * 10 + 2_000,
        );
        for _ in 0..n_jobs {
            if self.channels.tx_done.recv_timeout(per_frame).is_err() {
                warn!("DSP-TX completion timed out");
                break;
            }
        }

        for message in self.messages_batch_tx.iter().take(count) {
            match message.message_type {
                MessageType::DataLong | MessageType::DataShort => {
                    let slot = message.id as usize;
                    self.messages_tx[slot].ack_timer.start();
                    self.messages_tx[slot].status = MessageStatus::PendingAck;
                }
                MessageType::Control => {
                    self.messages_control.ack_timer.start();
                    self.messages_control.status = MessageStatus::PendingAck;
                }
                _ => {}
            }
            self.last_message_sent_type = message.message_type;
            if matches!(
                message.message_type,
                MessageType::Control | MessageType::AckControl
            ) {
                self.last_message_sent_code = ControlCode::from_u8(message.data[0]);
            }
        }
        self.messages_batch_tx.clear();
        self.message_batch_counter_tx = 0;
        self.last_received_sequence = 255;

        self.ptt_off();
    }

    // ------------------------------------------------------------------
    // Physical receive path
    // ------------------------------------------------------------------

    /// Poll one decoded frame, filter it to this session, update the link
    /// measurements.
    fn receive(&mut self) -> Option<ParsedFrame> {
        let frame = self.channels.rx_frames.try_recv().ok()?;
        let stats = frame.stats;

        self.measurements.signal_strength_dbm = stats.signal_strength_dbm;
        self.measurements.frequency_offset = stats.freq_offset;
        match self.role {
            Role::Commander => self.measurements.snr_uplink = stats.snr,
            Role::Responder => self.measurements.snr_downlink = stats.snr,
        }
        // Every successful decode refreshes the session timers.
        if self.link_timer.is_counting() {
            self.link_timer.start();
        }
        if self.gear_shift_timer.is_counting() {
            self.gear_shift_timer.start();
        }

        let parsed = match decode_frame(&frame.bytes, self.max_data_length) {
            Ok(parsed) => parsed,
            Err(error) => {
                trace!(%error, "undecodable frame layout");
                return None;
            }
        };

        if parsed.connection_id != self.connection_id
            && parsed.connection_id != BROADCAST_ID
            && self.connection_id != BROADCAST_ID
        {
            trace!(
                got = parsed.connection_id,
                want = self.connection_id,
                "foreign connection id"
            );
            return None;
        }

        self.last_received_sequence = parsed.sequence_number;
        if matches!(
            parsed.message_type,
            MessageType::Control | MessageType::AckControl
        ) {
            self.stats.n_received_control += 1;
        }
        Some(parsed)
    }

    // ------------------------------------------------------------------
    // Commander
    // ------------------------------------------------------------------

    fn process_messages_commander(&mut self) {
        match self.link_status {
            LinkStatus::Connecting => {
                self.add_message_control(ControlCode::StartConnection);
            }
            LinkStatus::ConnectionAccepted => {
                self.add_message_control(ControlCode::TestConnection);
            }
            LinkStatus::Negotiating => {
                self.add_message_control(ControlCode::SetConfig);
            }
            LinkStatus::Disconnecting => {
                self.add_message_control(ControlCode::CloseConnection);
            }
            _ => {}
        }

        match self.connection_status {
            ConnectionStatus::TransmittingControl => self.process_messages_tx_control(),
            ConnectionStatus::ReceivingAcksControl => self.process_messages_rx_acks_control(),
            ConnectionStatus::TransmittingData => self.process_messages_tx_data(),
            ConnectionStatus::ReceivingAcksData => self.process_messages_rx_acks_data(),
            _ => {}
        }
    }

    fn add_message_control(&mut self, code: ControlCode) {
        if self.messages_control.status != MessageStatus::Free {
            return;
        }
        let control = &mut self.messages_control;
        control.message_type = MessageType::Control;
        control.n_resends = self.n_resends;
        control.ack_timeout = self.ack_timeout_control;
        control.status = MessageStatus::AddedToList;
        control.id = 0;
        control.data[0] = code.as_u8();

        match code {
            ControlCode::StartConnection => {
                let my = self.my_call_sign.as_bytes();
                let dst = self.destination_call_sign.as_bytes();
                control.data[1] = my.len() as u8;
                control.data[2] = dst.len() as u8;
                control.data[3..3 + my.len()].copy_from_slice(my);
                control.data[3 + my.len()..3 + my.len() + dst.len()].copy_from_slice(dst);
                control.length = 3 + my.len() + dst.len();
                self.connection_timer.start();
            }
            ControlCode::TestConnection => {
                control.data[1..5].copy_from_slice(&encode_snr(self.measurements.snr_uplink));
                control.length = 5;
            }
            ControlCode::SetConfig => {
                let floor = self
                    .measurements
                    .snr_uplink
                    .min(self.measurements.snr_downlink);
                self.negotiated_configuration = configuration_for_snr(floor);
                control.data[1] = self.negotiated_configuration.as_u8();
                control.length = 2;
            }
            ControlCode::RepeatLastAck => {
                control.length = 1;
                control.n_resends = 1;
            }
            _ => {
                control.length = 1;
            }
        }
        self.connection_status = ConnectionStatus::TransmittingControl;
    }

    fn process_messages_tx_control(&mut self) {
        match self.messages_control.status {
            MessageStatus::AddedToList => {
                if self.message_batch_counter_tx < self.control_batch_size {
                    self.messages_batch_tx.push(self.messages_control.clone());
                    self.message_batch_counter_tx += 1;
                    self.messages_control.status = MessageStatus::AddedToBatchBuffer;
                    self.stats.n_sent_control += 1;
                }
            }
            MessageStatus::AckTimedOut => {
                if self.messages_control.n_resends > 1
                    && self.message_batch_counter_tx < self.control_batch_size
                {
                    self.messages_control.n_resends -= 1;
                    self.messages_batch_tx.push(self.messages_control.clone());
                    self.message_batch_counter_tx += 1;
                    self.messages_control.status = MessageStatus::AddedToBatchBuffer;
                    self.stats.n_resent_control += 1;
                } else {
                    self.stats.n_lost_control += 1;
                    self.messages_control.status = MessageStatus::Failed;
                    if self.link_status == LinkStatus::Connecting
                        || self.link_status == LinkStatus::Disconnecting
                    {
                        self.drop_link();
                    }
                    return;
                }
            }
            _ => {}
        }

        if self.messages_control.status == MessageStatus::AddedToBatchBuffer {
            let code = ControlCode::from_u8(self.messages_control.data[0]);
            self.pad_messages_batch_tx(self.ack_batch_size);
            self.send_batch();
            self.connection_status = ConnectionStatus::ReceivingAcksControl;
            self.receiving_timer.start();
            self.link_timer.start();

            if code == Some(ControlCode::SetConfig) {
                if self.negotiated_configuration != self.current_configuration {
                    // Both ends hop modes between batches; the pending
                    // control rides through the reload.
                    let target = self.negotiated_configuration;
                    self.load_configuration(target);
                } else {
                    self.link_status = LinkStatus::Connected;
                    self.report_connected();
                    self.messages_control.clear();
                    self.connection_status = ConnectionStatus::TransmittingData;
                }
            }

            if code == Some(ControlCode::RepeatLastAck) {
                self.messages_control.clear();
                self.connection_status = ConnectionStatus::ReceivingAcksData;
                self.receiving_timer.start();
                self.link_timer.start();
            }
        }
    }

    fn add_message_tx_data(&mut self, message_type: MessageType, data: &[u8]) -> bool {
        if data.len() > self.max_data_length {
            return false;
        }
        for i in 0..self.n_messages {
            if self.messages_tx[i].status == MessageStatus::Free {
                let slot = &mut self.messages_tx[i];
                slot.message_type = message_type;
                slot.length = data.len();
                slot.data[..data.len()].copy_from_slice(data);
                slot.id = i as u8;
                slot.n_resends = self.n_resends;
                slot.ack_timeout = self.ack_timeout_data;
                slot.status = MessageStatus::AddedToList;
                return true;
            }
        }
        false
    }

    fn process_messages_tx_data(&mut self) {
        for i in 0..self.n_messages {
            if self.message_batch_counter_tx == self.data_batch_size {
                break;
            }
            match self.messages_tx[i].status {
                MessageStatus::AddedToList => {
                    self.messages_batch_tx.push(self.messages_tx[i].clone());
                    self.message_batch_counter_tx += 1;
                    self.messages_tx[i].status = MessageStatus::AddedToBatchBuffer;
                    self.stats.n_sent_data += 1;
                }
                MessageStatus::AckTimedOut => {
                    if self.messages_tx[i].n_resends > 1 {
                        self.messages_tx[i].n_resends -= 1;
                        self.messages_batch_tx.push(self.messages_tx[i].clone());
                        self.message_batch_counter_tx += 1;
                        self.messages_tx[i].status = MessageStatus::AddedToBatchBuffer;
                        self.stats.n_resent_data += 1;
                    } else {
                        self.stats.n_lost_data += 1;
                        self.messages_tx[i].status = MessageStatus::Failed;
                    }
                }
                _ => {}
            }
        }

        if self.message_batch_counter_tx != 0 {
            self.pad_messages_batch_tx(self.data_batch_size);
            self.send_batch();
            self.data_ack_received = false;
            self.connection_status = ConnectionStatus::ReceivingAcksData;
            self.receiving_timer.start();
            self.link_timer.start();
        }
    }

    fn register_ack(&mut self, message_id: u8) {
        let slot = message_id as usize;
        if slot < self.n_messages && self.messages_tx[slot].status == MessageStatus::PendingAck {
            self.messages_tx[slot].status = MessageStatus::Acked;
            self.stats.n_acked_data += 1;
        }
    }

    fn process_messages_rx_acks_control(&mut self) {
        if self.receiving_timer.elapsed_ms() < self.receiving_timeout_commander {
            if let Some(frame) = self.receive() {
                if frame.message_type == MessageType::AckControl
                    && self.messages_control.status == MessageStatus::PendingAck
                    && frame.data[0] == self.messages_control.data[0]
                {
                    let n = frame.data.len().min(self.messages_control.data.len());
                    self.messages_control.data[..n].copy_from_slice(&frame.data[..n]);
                    self.link_timer.start();
                    self.gear_shift_timer.start();
                    self.messages_control.status = MessageStatus::Acked;
                    self.stats.n_acked_control += 1;
                }
            }
        } else {
            if self.messages_control.status == MessageStatus::Acked {
                self.process_control_commander();
                self.messages_control.clear();
            } else {
                self.connection_status = ConnectionStatus::TransmittingControl;
            }
            self.receiving_timer.stop();
            self.receiving_timer.reset();
        }
    }

    fn report_connected(&mut self) {
        if self.connected_reported {
            return;
        }
        self.connected_reported = true;
        let bandwidth_hz = self.telecom.lock().unwrap().bandwidth.hz();
        let _ = self.channels.ctl_events.try_send(CtlEvent::Connected {
            my_call: self.my_call_sign.clone(),
            dst_call: self.destination_call_sign.clone(),
            bandwidth_hz,
        });
    }

    /// Acknowledged control message drives the session state machine.
    fn process_control_commander(&mut self) {
        let Some(code) = ControlCode::from_u8(self.messages_control.data[0]) else {
            return;
        };
        match (self.link_status, code) {
            (LinkStatus::Connecting, ControlCode::StartConnection) => {
                self.connection_timer.start();
                self.link_status = LinkStatus::ConnectionAccepted;
                self.connection_status = ConnectionStatus::TransmittingControl;
                self.connection_id = self.messages_control.data[1];
                info!(connection_id = self.connection_id, "call accepted");
            }
            (
                LinkStatus::ConnectionAccepted | LinkStatus::Connected,
                ControlCode::TestConnection,
            ) => {
                self.measurements.snr_downlink = decode_snr(&self.messages_control.data[1..5]);
                self.connection_timer.stop();
                self.connection_timer.reset();
                self.link_timer.start();
                if self.gear_shift_on {
                    self.link_status = LinkStatus::Negotiating;
                    self.connection_status = ConnectionStatus::TransmittingControl;
                    self.gear_shift_timer.start();
                } else {
                    self.link_status = LinkStatus::Connected;
                    self.connection_status = ConnectionStatus::TransmittingData;
                    self.report_connected();
                }
            }
            (LinkStatus::Negotiating, ControlCode::SetConfig) => {
                self.link_status = LinkStatus::Connected;
                self.connection_status = ConnectionStatus::TransmittingData;
                self.link_timer.start();
                self.gear_shift_timer.start();
                self.report_connected();
            }
            (LinkStatus::Connected, ControlCode::FileEnd) => {
                self.connection_status = ConnectionStatus::TransmittingData;
            }
            (LinkStatus::Connected, ControlCode::BlockEnd) => {
                for message in self.messages_tx.iter_mut() {
                    message.clear();
                }
                self.block_under_tx = false;
                self.fifo_backup.flush();
                self.connection_status = ConnectionStatus::TransmittingData;
                debug!("block delivered and acknowledged");
                if self.gear_shift_on {
                    self.add_message_control(ControlCode::TestConnection);
                }
            }
            (LinkStatus::Connected, ControlCode::SwitchRole) => {
                info!("handing the commander role over");
                self.set_role(Role::Responder);
                self.connection_status = ConnectionStatus::Receiving;
                self.connection_timer.stop();
                self.connection_timer.reset();
                self.link_timer.start();
            }
            (LinkStatus::Disconnecting, ControlCode::CloseConnection) => {
                self.link_status = LinkStatus::Idle;
                self.connection_status = ConnectionStatus::Idle;
                self.reset_all_timers();
                self.connection_id = BROADCAST_ID;
                self.connected_reported = false;
                let _ = self.channels.ctl_events.try_send(CtlEvent::Disconnected);
            }
            _ => {
                trace!(?code, link = ?self.link_status, "unexpected control ack");
            }
        }
    }

    fn process_messages_rx_acks_data(&mut self) {
        if self.receiving_timer.elapsed_ms() < self.receiving_timeout_commander {
            if let Some(frame) = self.receive() {
                self.link_timer.start();
                self.gear_shift_timer.start();
                match frame.message_type {
                    MessageType::AckRange => {
                        self.data_ack_received = true;
                        let start = frame.data[0];
                        let end = frame.data[1];
                        for id in start..=end {
                            self.register_ack(id);
                        }
                    }
                    MessageType::AckMulti => {
                        self.data_ack_received = true;
                        let count = frame.data[0] as usize;
                        for i in 0..count.min(frame.data.len() - 1) {
                            self.register_ack(frame.data[i + 1]);
                        }
                    }
                    _ => {}
                }

                // A data ack also settles an outstanding REPEAT_LAST_ACK.
                if self.data_ack_received
                    && self.messages_control.status == MessageStatus::PendingAck
                    && ControlCode::from_u8(self.messages_control.data[0])
                        == Some(ControlCode::RepeatLastAck)
                {
                    self.messages_control.clear();
                    self.stats.n_acked_control += 1;
                }
            }
        } else if !self.data_ack_received
            && !(self.last_message_sent_type == MessageType::Control
                && self.last_message_sent_code == Some(ControlCode::RepeatLastAck))
        {
            debug!("ack batch lost, requesting the cached one");
            self.add_message_control(ControlCode::RepeatLastAck);
        } else {
            if self.last_message_sent_type == MessageType::Control
                && self.last_message_sent_code == Some(ControlCode::RepeatLastAck)
                && !self.data_ack_received
            {
                self.stats.n_nacked_control += 1;
            }
            self.receiving_timer.stop();
            self.receiving_timer.reset();
            self.connection_status = ConnectionStatus::TransmittingData;
        }
    }

    /// Feed the message slots from the tx FIFO and manage the block
    /// boundary: BLOCK_END when everything is acked, SWITCH_ROLE offer
    /// after sustained idle.
    fn process_buffer_data_commander(&mut self) {
        if self.link_status != LinkStatus::Connected {
            return;
        }

        let n_occupied = self
            .messages_tx
            .iter()
            .filter(|m| m.status != MessageStatus::Free)
            .count();

        if !self.fifo_tx.is_empty() && !self.block_under_tx {
            let mut chunk = vec![0u8; self.max_data_length];
            for _ in 0..self.n_messages {
                let got = self.fifo_tx.pop(&mut chunk);
                if got == 0 {
                    break;
                }
                self.block_under_tx = true;
                let message_type = if got == self.max_data_length {
                    MessageType::DataLong
                } else {
                    MessageType::DataShort
                };
                if !self.add_message_tx_data(message_type, &chunk[..got]) {
                    // No free slot: give the bytes back for the next block.
                    self.fifo_tx.unshift(&chunk[..got]);
                    break;
                }
                self.fifo_backup.push(&chunk[..got]);
            }
            self.switch_role_timer.stop();
            self.switch_role_timer.reset();
        } else if self.block_under_tx
            && self.message_batch_counter_tx == 0
            && n_occupied == 0
            && self.messages_control.status == MessageStatus::Free
        {
            self.add_message_control(ControlCode::BlockEnd);
        } else if !self.block_under_tx
            && self.message_batch_counter_tx == 0
            && n_occupied == 0
            && self.messages_control.status == MessageStatus::Free
            && self.fifo_tx.is_empty()
        {
            if !self.switch_role_timer.is_counting() {
                self.switch_role_timer.reset();
                self.switch_role_timer.start();
            } else if self.switch_role_timer.elapsed_ms() > self.config.switch_role_timeout_ms {
                self.switch_role_timer.stop();
                self.switch_role_timer.reset();
                self.add_message_control(ControlCode::SwitchRole);
            }
        }
    }

    // ------------------------------------------------------------------
    // Responder
    // ------------------------------------------------------------------

    fn process_messages_responder(&mut self) {
        match self.connection_status {
            ConnectionStatus::Receiving | ConnectionStatus::Idle => {
                self.receive_responder();

                let have_unacked = self
                    .messages_rx
                    .iter()
                    .any(|m| m.status == MessageStatus::Received);
                if have_unacked
                    && self.receiving_timer.is_counting()
                    && self.receiving_timer.elapsed_ms() >= self.inter_frame_silence_ms
                {
                    self.receiving_timer.stop();
                    self.receiving_timer.reset();
                    self.connection_status = ConnectionStatus::AcknowledgingData;
                }
            }
            ConnectionStatus::AcknowledgingData => self.process_messages_acknowledging_data(),
            ConnectionStatus::AcknowledgingControl => {
                self.process_messages_acknowledging_control()
            }
            _ => {
                self.connection_status = ConnectionStatus::Receiving;
            }
        }
    }

    fn receive_responder(&mut self) {
        let Some(frame) = self.receive() else {
            return;
        };
        match frame.message_type {
            MessageType::DataLong | MessageType::DataShort => {
                if self.add_message_rx_data(&frame) {
                    self.stats.n_received_data += 1;
                }
                // Inter-frame silence clock: restarted by every data frame.
                self.receiving_timer.start();
            }
            MessageType::Control => {
                self.pending_control = Some(frame);
                self.connection_status = ConnectionStatus::AcknowledgingControl;
            }
            _ => {
                trace!(message_type = ?frame.message_type, "ignoring ack as responder");
            }
        }
    }

    /// Store a data message by its slot id; duplicates overwrite in place.
    fn add_message_rx_data(&mut self, frame: &ParsedFrame) -> bool {
        let slot = frame.id as usize;
        if slot >= self.n_messages || frame.data.len() > self.max_data_length {
            return false;
        }
        let message = &mut self.messages_rx[slot];
        let is_new = message.status == MessageStatus::Free;
        message.message_type = frame.message_type;
        message.id = frame.id;
        message.sequence_number = frame.sequence_number;
        message.length = frame.data.len();
        message.data[..frame.data.len()].copy_from_slice(&frame.data);
        message.status = MessageStatus::Received;
        is_new
    }

    /// Consolidate the received ids into range/multi acknowledgements,
    /// transmit them, and cache the batch for REPEAT_LAST_ACK.
    fn process_messages_acknowledging_data(&mut self) {
        let mut ids: Vec<u8> = self
            .messages_rx
            .iter()
            .filter(|m| m.status == MessageStatus::Received)
            .map(|m| m.id)
            .collect();
        ids.sort_unstable();

        let acks = build_ack_messages(&ids, self.max_data_length, self.ack_batch_size);
        for message in &acks {
            self.messages_batch_tx.push(message.clone());
            self.message_batch_counter_tx += 1;
            self.stats.n_acks_sent_data += 1;
        }
        self.last_ack_batch = acks;
        self.pad_messages_batch_tx(self.ack_batch_size);
        self.send_batch();

        for id in ids {
            self.messages_rx[id as usize].status = MessageStatus::Acked;
        }
        self.connection_status = ConnectionStatus::Receiving;
    }

    /// Acknowledge a control command and apply its effect. SET_CONFIG
    /// reloads before acking so the ack already travels in the new mode.
    fn process_messages_acknowledging_control(&mut self) {
        let Some(frame) = self.pending_control.take() else {
            self.connection_status = ConnectionStatus::Receiving;
            return;
        };
        let Some(code) = ControlCode::from_u8(frame.data[0]) else {
            self.connection_status = ConnectionStatus::Receiving;
            return;
        };

        if code == ControlCode::RepeatLastAck {
            debug!("repeating the last acknowledgement batch");
            for message in self.last_ack_batch.clone() {
                self.messages_batch_tx.push(message);
                self.message_batch_counter_tx += 1;
            }
            if self.message_batch_counter_tx > 0 {
                self.pad_messages_batch_tx(self.ack_batch_size);
                self.send_batch();
            }
            self.connection_status = ConnectionStatus::Receiving;
            return;
        }

        let mut ack = Message::free(self.max_data_length);
        ack.message_type = MessageType::AckControl;
        ack.data[0] = code.as_u8();
        ack.length = 1;

        match code {
            ControlCode::StartConnection => {
                let my_len = frame.data[1] as usize;
                let dst_len = frame.data[2] as usize;
                if 3 + my_len + dst_len > frame.data.len() {
                    self.connection_status = ConnectionStatus::Receiving;
                    return;
                }
                let caller =
                    String::from_utf8_lossy(&frame.data[3..3 + my_len]).to_string();
                let callee = String::from_utf8_lossy(
                    &frame.data[3 + my_len..3 + my_len + dst_len],
                )
                .to_string();

                // Retransmitted calls after an ack loss re-use the session.
                let open_for_calls = matches!(
                    self.link_status,
                    LinkStatus::Listening
                        | LinkStatus::ConnectionAccepted
                        | LinkStatus::Connected
                );
                if !open_for_calls || callee != self.my_call_sign {
                    trace!(%caller, %callee, "call not for us");
                    self.connection_status = ConnectionStatus::Receiving;
                    return;
                }

                if self.link_status == LinkStatus::Listening {
                    self.destination_call_sign = caller;
                    self.connection_id = self.next_connection_id;
                    self.next_connection_id = self.next_connection_id.wrapping_add(1).max(1);
                    self.link_status = LinkStatus::ConnectionAccepted;
                    info!(
                        caller = %self.destination_call_sign,
                        connection_id = self.connection_id,
                        "incoming call accepted"
                    );
                }
                ack.data[1] = self.connection_id;
                ack.length = 2;
                self.link_timer.start();
            }
            ControlCode::TestConnection => {
                // Echo back what this end measures on its downlink.
                ack.data[1..5].copy_from_slice(&encode_snr(self.measurements.snr_downlink));
                ack.length = 5;
                if self.link_status == LinkStatus::ConnectionAccepted {
                    self.link_status = LinkStatus::Connected;
                    self.report_connected();
                }
                if self.gear_shift_on {
                    self.gear_shift_timer.start();
                }
            }
            ControlCode::SetConfig => {
                match ConfigId::from_u8(frame.data[1]) {
                    Ok(target) => {
                        ack.data[1] = frame.data[1];
                        ack.length = 2;
                        if target != self.current_configuration {
                            self.load_configuration(target);
                        }
                        self.link_status = LinkStatus::Connected;
                        self.report_connected();
                    }
                    Err(error) => {
                        warn!(%error, "malformed SET_CONFIG ignored");
                        self.connection_status = ConnectionStatus::Receiving;
                        return;
                    }
                }
            }
            _ => {}
        }

        self.messages_batch_tx.push(ack);
        self.message_batch_counter_tx += 1;
        self.stats.n_acks_sent_control += 1;
        self.pad_messages_batch_tx(self.ack_batch_size);
        self.send_batch();

        // Post-ack side effects.
        match code {
            ControlCode::CloseConnection => {
                self.connection_id = BROADCAST_ID;
                self.link_status = if self.listen {
                    LinkStatus::Listening
                } else {
                    LinkStatus::Idle
                };
                self.connection_status = if self.listen {
                    ConnectionStatus::Receiving
                } else {
                    ConnectionStatus::Idle
                };
                self.reset_all_timers();
                self.connected_reported = false;
                let _ = self.channels.ctl_events.try_send(CtlEvent::Disconnected);
                return;
            }
            ControlCode::SwitchRole => {
                info!("taking over as commander");
                self.set_role(Role::Commander);
                self.link_status = LinkStatus::Connected;
                self.connection_status = ConnectionStatus::TransmittingData;
                self.link_timer.start();
                return;
            }
            ControlCode::BlockEnd => {
                self.deliver_block();
            }
            _ => {}
        }
        self.connection_status = ConnectionStatus::Receiving;
    }

    /// Push the completed block up in id order and free the slots.
    fn deliver_block(&mut self) {
        for i in 0..self.n_messages {
            if matches!(
                self.messages_rx[i].status,
                MessageStatus::Acked | MessageStatus::Received
            ) {
                let length = self.messages_rx[i].length;
                let payload = self.messages_rx[i].data[..length].to_vec();
                if !self.fifo_rx.push(&payload) {
                    warn!("rx fifo full, dropping part of a block");
                }
                self.messages_rx[i].clear();
            }
        }
        debug!("block complete");
    }
}

/// Callsigns stay short so both fit one control frame in every mode.
fn truncate_call_sign(raw: &str) -> String {
    raw.chars().take(15).collect()
}

/// Consolidate sorted ids into ACK_RANGE / ACK_MULTI messages, ranges
/// preferred for contiguous runs.
pub fn build_ack_messages(
    ids: &[u8],
    max_data_length: usize,
    max_messages: usize,
) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut singles: Vec<u8> = Vec::new();
    let mut i = 0usize;

    while i < ids.len() && messages.len() < max_messages {
        // Length of the contiguous run starting here.
        let mut run = 1usize;
        while i + run < ids.len() && ids[i + run] == ids[i] + run as u8 {
            run += 1;
        }
        if run >= 3 {
            let mut message = Message::free(max_data_length);
            message.message_type = MessageType::AckRange;
            message.data[0] = ids[i];
            message.data[1] = ids[i + run - 1];
            message.length = 2;
            messages.push(message);
        } else {
            singles.extend_from_slice(&ids[i..i + run]);
        }
        i += run;
    }

    let per_multi = max_data_length.saturating_sub(1).max(1);
    for chunk in singles.chunks(per_multi) {
        if messages.len() >= max_messages {
            break;
        }
        let mut message = Message::free(max_data_length);
        message.message_type = MessageType::AckMulti;
        message.data[0] = chunk.len() as u8;
        message.data[1..1 + chunk.len()].copy_from_slice(chunk);
        message.length = 1 + chunk.len();
        messages.push(message);
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_ids_collapse_into_one_range() {
        let ids: Vec<u8> = (5..=25).collect();
        let acks = build_ack_messages(&ids, 64, 4);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].message_type, MessageType::AckRange);
        assert_eq!(acks[0].data[0], 5);
        assert_eq!(acks[0].data[1], 25);
    }

    #[test]
    fn scattered_ids_become_a_multi() {
        let ids = vec![1u8, 4, 9, 200];
        let acks = build_ack_messages(&ids, 64, 4);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].message_type, MessageType::AckMulti);
        assert_eq!(acks[0].data[0], 4);
        assert_eq!(&acks[0].data[1..5], &[1, 4, 9, 200]);
    }

    #[test]
    fn mixed_ids_split_into_range_plus_multi() {
        let mut ids: Vec<u8> = (10..=20).collect();
        ids.push(40);
        ids.push(77);
        let acks = build_ack_messages(&ids, 64, 4);
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0].message_type, MessageType::AckRange);
        assert_eq!(acks[1].message_type, MessageType::AckMulti);
        assert_eq!(acks[1].data[0], 2);
    }

    #[test]
    fn message_cap_is_respected() {
        // Alternating ids never form ranges; they overflow one multi when
        // the payload is tiny.
        let ids: Vec<u8> = (0..40).map(|i| (i * 2) as u8).collect();
        let acks = build_ack_messages(&ids, 8, 2);
        assert_eq!(acks.len(), 2);
        for ack in &acks {
            assert!(ack.length <= 8);
        }
    }
}

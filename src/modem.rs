use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{info, trace, warn};

use crate::arq::{ArqChannels, ArqConfig, ArqController, CtlEvent, RxFrame, TxJob};
use crate::error::ModemError;
use crate::io::audio::{AudioInterface, CaptureGeometry, CaptureWindow};
use crate::phy::{Bandwidth, ConfigId, TelecomConfig, TelecomSystem};

/// Samples each audio ring can hold; several frames of the largest mode.
const AUDIO_RING_SAMPLES: usize = 1 << 19;

/// External handles of a running modem: the command/data byte surfaces the
/// front-ends consume.
pub struct ModemHandles {
    pub commands: Sender<String>,
    pub ctl_events: Receiver<CtlEvent>,
    pub data_in: Sender<Vec<u8>>,
    pub data_out: Receiver<Vec<u8>>,
}

/// Owns the worker threads of one station: audio capture feeder, DSP-RX,
/// DSP-TX and the ARQ control worker. Audio enters and leaves through the
/// ring buffers in `audio`.
pub struct Modem {
    pub audio: Arc<AudioInterface>,
    pub telecom: Arc<Mutex<TelecomSystem>>,
    pub capture: Arc<CaptureWindow>,
    pub shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Modem {
    pub fn start(
        telecom_config: TelecomConfig,
        bandwidth: Bandwidth,
        initial_mode: ConfigId,
        arq_config: ArqConfig,
    ) -> Result<(Modem, ModemHandles), ModemError> {
        let telecom = TelecomSystem::new(telecom_config, bandwidth, initial_mode)?;
        let geometry = CaptureGeometry {
            symbol_samples: telecom.data.nofdm * telecom.data.interpolation_rate,
            buffer_nsymb: telecom.data.buffer_nsymb,
            frame_symbols: telecom.data.nsymb + telecom.data.preamble_nsymb,
        };
        let telecom = Arc::new(Mutex::new(telecom));
        let audio = Arc::new(AudioInterface::new(AUDIO_RING_SAMPLES));
        let capture = Arc::new(CaptureWindow::new(geometry));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (rx_frames_tx, rx_frames_rx) = bounded::<RxFrame>(32);
        let (tx_jobs_tx, tx_jobs_rx) = bounded::<TxJob>(128);
        let (tx_done_tx, tx_done_rx) = bounded::<()>(128);
        let (commands_tx, commands_rx) = bounded::<String>(32);
        let (ctl_events_tx, ctl_events_rx) = bounded::<CtlEvent>(256);
        let (data_in_tx, data_in_rx) = bounded::<Vec<u8>>(64);
        let (data_out_tx, data_out_rx) = bounded::<Vec<u8>>(64);

        let mut workers = Vec::new();

        // Capture feeder: audio ring -> sliding window, one symbol period
        // at a time.
        {
            let audio = audio.clone();
            let capture = capture.clone();
            let shutdown = shutdown.clone();
            workers.push(
                thread::Builder::new()
                    .name("capture-feeder".into())
                    .spawn(move || {
                        while !shutdown.load(Ordering::Relaxed) {
                            let block_len = capture.geometry().symbol_samples;
                            let mut block = vec![0.0f64; block_len];
                            let got = audio.rx_transfer(&mut block);
                            if got == 0 {
                                // Ring closed; shutting down.
                                thread::sleep(Duration::from_millis(10));
                                continue;
                            }
                            capture.push_block(&block[..got]);
                        }
                    })
                    .expect("spawn capture-feeder"),
            );
        }

        // DSP-RX: window snapshots through the receive pipeline, decoded
        // frames up to the ARQ worker.
        {
            let telecom = telecom.clone();
            let capture = capture.clone();
            let shutdown = shutdown.clone();
            workers.push(
                thread::Builder::new()
                    .name("dsp-rx".into())
                    .spawn(move || {
                        while !shutdown.load(Ordering::Relaxed) {
                            let Some((window, push_count)) =
                                capture.wait_window(Duration::from_millis(200))
                            else {
                                continue;
                            };
                            let mut system = telecom.lock().unwrap();
                            if window.len() != system.data.rx_buffer_len() {
                                // Mode changed under the snapshot.
                                continue;
                            }
                            let mut bytes = vec![0u8; system.payload_bytes()];
                            let stats = system.receive_byte(&window, &mut bytes);
                            drop(system);

                            capture.consume(stats.message_decoded, stats.delay, push_count);
                            if stats.message_decoded {
                                trace!(snr = stats.snr, "frame up to ARQ");
                                if rx_frames_tx.try_send(RxFrame { bytes, stats }).is_err() {
                                    warn!("ARQ rx queue full, frame dropped");
                                }
                            }
                        }
                    })
                    .expect("spawn dsp-rx"),
            );
        }

        // DSP-TX: frame jobs from the ARQ worker into passband samples.
        {
            let telecom = telecom.clone();
            let audio = audio.clone();
            let shutdown = shutdown.clone();
            workers.push(
                thread::Builder::new()
                    .name("dsp-tx".into())
                    .spawn(move || {
                        while !shutdown.load(Ordering::Relaxed) {
                            let Ok(job) = tx_jobs_rx.recv_timeout(Duration::from_millis(200))
                            else {
                                continue;
                            };
                            let mut system = telecom.lock().unwrap();
                            let mut samples = vec![0.0f64; system.data.total_frame_size];
                            system.transmit_byte(&job.bytes, &mut samples, job.location);
                            drop(system);

                            audio.tx_transfer(&samples);
                            let _ = tx_done_tx.send(());
                        }
                    })
                    .expect("spawn dsp-tx"),
            );
        }

        // ARQ control worker.
        {
            let channels = ArqChannels {
                rx_frames: rx_frames_rx,
                tx_jobs: tx_jobs_tx,
                tx_done: tx_done_rx,
                commands: commands_rx,
                ctl_events: ctl_events_tx,
                data_in: data_in_rx,
                data_out: data_out_tx,
            };
            let mut controller = ArqController::new(
                arq_config,
                telecom.clone(),
                capture.clone(),
                audio.clone(),
                channels,
                shutdown.clone(),
            );
            workers.push(
                thread::Builder::new()
                    .name("arq".into())
                    .spawn(move || controller.run())
                    .expect("spawn arq"),
            );
        }

        info!("modem started");
        Ok((
            Modem {
                audio,
                telecom,
                capture,
                shutdown,
                workers,
            },
            ModemHandles {
                commands: commands_tx,
                ctl_events: ctl_events_rx,
                data_in: data_in_tx,
                data_out: data_out_rx,
            },
        ))
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.audio.capture.close();
        self.audio.playback.close();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("modem stopped");
    }
}

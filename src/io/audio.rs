use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::ring_buffer::RingBuffer;
use crate::dsp::shift_left;
use crate::phy::awgn::AwgnChannel;

/// The audio boundary: one capture ring filled by the sound driver and one
/// playback ring drained by it. The core never talks to hardware directly.
pub struct AudioInterface {
    pub capture: Arc<RingBuffer>,
    pub playback: Arc<RingBuffer>,
}

impl AudioInterface {
    pub fn new(capacity_samples: usize) -> Self {
        AudioInterface {
            capture: Arc::new(RingBuffer::new(capacity_samples)),
            playback: Arc::new(RingBuffer::new(capacity_samples)),
        }
    }

    /// Queue samples for the speaker; blocks on back-pressure.
    pub fn tx_transfer(&self, samples: &[f64]) {
        self.playback.write(samples);
    }

    /// Pull captured samples; blocks until the block is full.
    pub fn rx_transfer(&self, out: &mut [f64]) -> usize {
        self.capture.read(out)
    }
}

/// Window sizes derived from the active mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureGeometry {
    /// One OFDM symbol period at the passband rate.
    pub symbol_samples: usize,
    /// Sliding window length in symbol periods.
    pub buffer_nsymb: usize,
    /// Symbols per frame including the preamble.
    pub frame_symbols: usize,
}

impl CaptureGeometry {
    pub fn window_samples(&self) -> usize {
        self.symbol_samples * self.buffer_nsymb
    }
}

struct WindowState {
    geometry: CaptureGeometry,
    buffer: Vec<f64>,
    data_ready: bool,
    frames_to_read: usize,
    push_count: u64,
}

/// Sliding passband capture window. The feeder pushes one symbol period at
/// a time; the receive worker takes a snapshot whenever the window has new
/// content and no frames are pending skip. After a decode, `consume`
/// schedules how many symbol periods to skip so the same frame is not
/// processed twice.
pub struct CaptureWindow {
    state: Mutex<WindowState>,
    ready: Condvar,
}

impl CaptureWindow {
    pub fn new(geometry: CaptureGeometry) -> Self {
        CaptureWindow {
            state: Mutex::new(WindowState {
                geometry,
                buffer: vec![0.0; geometry.window_samples()],
                data_ready: false,
                frames_to_read: 0,
                push_count: 0,
            }),
            ready: Condvar::new(),
        }
    }

    pub fn geometry(&self) -> CaptureGeometry {
        self.state.lock().unwrap().geometry
    }

    /// Re-size after a mode change; the window content restarts clean.
    pub fn resize(&self, geometry: CaptureGeometry) {
        let mut state = self.state.lock().unwrap();
        state.geometry = geometry;
        state.buffer = vec![0.0; geometry.window_samples()];
        state.data_ready = false;
        state.frames_to_read = 0;
    }

    /// Slide one symbol period in.
    pub fn push_block(&self, block: &[f64]) {
        let mut state = self.state.lock().unwrap();
        let n = block.len().min(state.buffer.len());
        shift_left(&mut state.buffer, n);
        let start = state.buffer.len() - n;
        state.buffer[start..].copy_from_slice(&block[..n]);
        if state.frames_to_read > 0 {
            state.frames_to_read -= 1;
        }
        state.data_ready = true;
        state.push_count += 1;
        drop(state);
        self.ready.notify_one();
    }

    /// Wait for a processable window; returns the snapshot and the push
    /// counter it was taken at.
    pub fn wait_window(&self, timeout: Duration) -> Option<(Vec<f64>, u64)> {
        let mut state = self.state.lock().unwrap();
        if !(state.data_ready && state.frames_to_read == 0) {
            let (next, result) = self
                .ready
                .wait_timeout_while(state, timeout, |s| {
                    !(s.data_ready && s.frames_to_read == 0)
                })
                .unwrap();
            state = next;
            if result.timed_out() && !(state.data_ready && state.frames_to_read == 0) {
                return None;
            }
        }
        state.data_ready = false;
        Some((state.buffer.clone(), state.push_count))
    }

    /// Account for a finished receive attempt. On decode, skip the symbols
    /// of the decoded frame that are still inside the window, minus what
    /// already slid past while the decoder ran.
    pub fn consume(&self, decoded: bool, delay: isize, snapshot_push_count: u64) {
        if !decoded {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let geometry = state.geometry;
        let symbol = geometry.symbol_samples as isize;
        let frame_symbols = geometry.frame_symbols as isize;
        let buffer_nsymb = geometry.buffer_nsymb as isize;

        let end_of_message = delay / symbol + frame_symbols;
        let frames_left = (buffer_nsymb - end_of_message).max(0);
        let pushed_while_processing = (state.push_count - snapshot_push_count) as isize;

        let mut frames_to_read = frame_symbols - frames_left - pushed_while_processing;
        if frames_to_read > frame_symbols || frames_to_read < 0 {
            frames_to_read = frame_symbols - frames_left;
        }
        state.frames_to_read = frames_to_read.max(0) as usize;
    }
}

/// In-process acoustic channel for two-station tests: moves playback audio
/// of one side into the capture ring of the other with attenuation, noise
/// and optional block erasure, padding with silence when the transmitter
/// is quiet.
pub struct LoopbackChannel {
    pub attenuation: f64,
    pub noise_sigma: f64,
    pub drop_probability: f64,
    pub block_samples: usize,
    pub awgn: AwgnChannel,
    erasure_rng: rand::rngs::StdRng,
}

impl LoopbackChannel {
    pub fn new(block_samples: usize, attenuation: f64, noise_sigma: f64, seed: u64) -> Self {
        use rand::SeedableRng;
        LoopbackChannel {
            attenuation,
            noise_sigma,
            drop_probability: 0.0,
            block_samples,
            awgn: AwgnChannel::new(seed),
            erasure_rng: rand::rngs::StdRng::seed_from_u64(seed ^ 0x1b5),
        }
    }

    /// Move one block from `from` to `to`; silence-fills the shortfall.
    pub fn pump_block(&mut self, from: &RingBuffer, to: &RingBuffer) {
        use rand::Rng;
        let mut block = vec![0.0f64; self.block_samples];
        let got = from.try_read(&mut block);
        for sample in block[got..].iter_mut() {
            *sample = 0.0;
        }
        let erased =
            self.drop_probability > 0.0 && self.erasure_rng.gen_bool(self.drop_probability);
        for sample in block.iter_mut() {
            let signal = if erased { 0.0 } else { *sample };
            *sample = signal * self.attenuation + self.awgn.gaussian() * self.noise_sigma;
        }
        to.write(&block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_geometry() -> CaptureGeometry {
        CaptureGeometry {
            symbol_samples: 8,
            buffer_nsymb: 6,
            frame_symbols: 2,
        }
    }

    #[test]
    fn pushes_slide_the_window() {
        let window = CaptureWindow::new(test_geometry());
        window.push_block(&[1.0; 8]);
        window.push_block(&[2.0; 8]);

        let (snapshot, pushes) = window.wait_window(Duration::from_millis(10)).unwrap();
        assert_eq!(pushes, 2);
        assert_eq!(snapshot.len(), 48);
        assert!(snapshot[..32].iter().all(|&s| s == 0.0));
        assert!(snapshot[32..40].iter().all(|&s| s == 1.0));
        assert!(snapshot[40..].iter().all(|&s| s == 2.0));
    }

    #[test]
    fn consume_skips_the_decoded_frame() {
        let window = CaptureWindow::new(test_geometry());
        for _ in 0..6 {
            window.push_block(&[1.0; 8]);
        }
        let (_, pushes) = window.wait_window(Duration::from_millis(10)).unwrap();

        // Frame decoded at symbol 3 of 6: its tail has already left.
        window.consume(true, 3 * 8, pushes);
        let state = window.state.lock().unwrap();
        assert_eq!(state.frames_to_read, 1);
    }

    #[test]
    fn window_not_ready_until_pending_frames_pass() {
        let window = CaptureWindow::new(test_geometry());
        for _ in 0..6 {
            window.push_block(&[1.0; 8]);
        }
        let (_, pushes) = window.wait_window(Duration::from_millis(10)).unwrap();
        window.consume(true, 4 * 8, pushes);

        assert!(window.wait_window(Duration::from_millis(5)).is_none());
        window.push_block(&[1.0; 8]);
        window.push_block(&[1.0; 8]);
        assert!(window.wait_window(Duration::from_millis(5)).is_some());
    }

    #[test]
    fn no_decode_leaves_the_schedule_untouched(){
        let window = CaptureWindow::new(test_geometry());
        window.push_block(&[1.0; 8]);
        let (_, pushes) = window.wait_window(Duration::from_millis(10)).unwrap();
        window.consume(false, 0, pushes);
        let state = window.state.lock().unwrap();
        assert_eq!(state.frames_to_read, 0);
    }
}

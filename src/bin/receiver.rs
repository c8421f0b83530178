use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use mercury::phy::{Bandwidth, ConfigId, TelecomConfig, TelecomSystem};
use mercury::utils::dump::load_from_wav;
use mercury::utils::logging::init_logging;

/// Offline receiver: slide a capture window across a WAV recording and
/// print every frame that decodes.
#[derive(Parser)]
#[command(name = "receiver", about)]
struct Args {
    /// Physical-layer mode the recording was made with.
    #[arg(long, default_value_t = 0)]
    mode: u8,

    /// Input WAV path.
    #[arg(long, default_value = "tx.wav")]
    input: PathBuf,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mode = ConfigId::from_u8(args.mode).context("mode id")?;
    let mut system = TelecomSystem::new(TelecomConfig::default(), Bandwidth::Bw2500, mode)
        .context("building the physical layer")?;

    let (samples, sample_rate) = load_from_wav(&args.input)?;
    if sample_rate as f64 != system.sampling_frequency {
        warn!(
            wav = sample_rate,
            expected = system.sampling_frequency,
            "sample rate mismatch, decoding anyway"
        );
    }

    let window = system.data.rx_buffer_len();
    let step = system.data.nofdm * system.data.interpolation_rate;
    let payload_bytes = system.payload_bytes();
    let mut decoded_frames = 0usize;
    let mut position = 0usize;

    while position + window <= samples.len() {
        let mut bytes = vec![0u8; payload_bytes];
        let stats = system.receive_byte(&samples[position..position + window], &mut bytes);
        if stats.message_decoded {
            decoded_frames += 1;
            let text: String = bytes
                .iter()
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
                .collect();
            info!(
                frame = decoded_frames,
                iterations = stats.iterations_done,
                snr = format!("{:.1}", stats.snr).as_str(),
                freq_offset = format!("{:.2}", stats.freq_offset).as_str(),
                "decoded: {text}"
            );
            // Jump past the decoded frame.
            position += stats.delay.max(0) as usize
                + system.data.total_frame_size;
        } else {
            position += step;
        }
    }

    info!(decoded_frames, "done");
    Ok(())
}

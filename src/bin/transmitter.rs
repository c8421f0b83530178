use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use mercury::phy::{Bandwidth, ConfigId, MessageLocation, TelecomConfig, TelecomSystem};
use mercury::utils::dump::dump_to_wav;
use mercury::utils::logging::init_logging;

/// Offline transmitter: encode a text payload into passband frames and
/// write them to a WAV file for playback experiments.
#[derive(Parser)]
#[command(name = "transmitter", about)]
struct Args {
    /// Physical-layer mode, 0 to 6.
    #[arg(long, default_value_t = 0)]
    mode: u8,

    /// Payload text; repeated frame-by-frame until consumed.
    #[arg(long, default_value = "The quick brown fox jumps over the lazy dog")]
    message: String,

    /// Output WAV path.
    #[arg(long, default_value = "tx.wav")]
    output: PathBuf,

    /// Seconds of leading silence before the first frame.
    #[arg(long, default_value_t = 1.0)]
    lead_in: f64,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mode = ConfigId::from_u8(args.mode).context("mode id")?;
    let mut system = TelecomSystem::new(TelecomConfig::default(), Bandwidth::Bw2500, mode)
        .context("building the physical layer")?;

    let payload_bytes = system.payload_bytes();
    let total = system.data.total_frame_size;
    let sample_rate = system.sampling_frequency as u32;

    let mut samples = vec![0.0f64; (args.lead_in * system.sampling_frequency) as usize];

    for chunk in args.message.as_bytes().chunks(payload_bytes) {
        let mut padded = chunk.to_vec();
        padded.resize(payload_bytes, 0);
        let mut frame = vec![0.0f64; total];
        system.transmit_byte(&padded, &mut frame, MessageLocation::Single);
        samples.extend_from_slice(&frame);
        // Inter-frame gap so each frame syncs independently.
        samples.extend(std::iter::repeat(0.0).take(total / 2));
    }

    dump_to_wav(&args.output, &samples, sample_rate)?;
    info!(
        frames = args.message.len().div_ceil(payload_bytes),
        samples = samples.len(),
        output = %args.output.display(),
        "transmission written"
    );
    Ok(())
}

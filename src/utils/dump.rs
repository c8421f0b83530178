use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::ModemError;

/// Write mono f64 samples to a 16-bit WAV file for offline inspection.
pub fn dump_to_wav(path: &Path, samples: &[f64], sample_rate: u32) -> Result<(), ModemError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer =
        WavWriter::create(path, spec).map_err(|e| ModemError::Audio(e.to_string()))?;

    let peak = samples
        .iter()
        .fold(0.0f64, |acc, &s| acc.max(s.abs()))
        .max(1e-12);
    let scale = if peak > 1.0 { 1.0 / peak } else { 1.0 };
    for &s in samples {
        let value = (s * scale * i16::MAX as f64) as i16;
        writer
            .write_sample(value)
            .map_err(|e| ModemError::Audio(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| ModemError::Audio(e.to_string()))?;
    Ok(())
}

/// Read a mono WAV file back into f64 samples in [-1, 1].
pub fn load_from_wav(path: &Path) -> Result<(Vec<f64>, u32), ModemError> {
    let mut reader = WavReader::open(path).map_err(|e| ModemError::Audio(e.to_string()))?;
    let spec = reader.spec();
    let samples: Vec<f64> = match spec.sample_format {
        SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f64 / i16::MAX as f64))
            .collect::<Result<_, _>>()
            .map_err(|e| ModemError::Audio(e.to_string()))?,
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| v as f64))
            .collect::<Result<_, _>>()
            .map_err(|e| ModemError::Audio(e.to_string()))?,
    };
    Ok((samples, spec.sample_rate))
}

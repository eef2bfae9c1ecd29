//! Audio encoding and decoding helpers.
//!
//! Generated speech is written as 16-bit PCM WAV straight into memory.
//! Uploaded reference clips may be WAV, MP3, FLAC or M4A and are decoded to
//! mono `f32` with symphonia.

use std::{fs::File, io::Cursor, path::Path};

use anyhow::{bail, Context, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

/// Encode mono samples in `[-1.0, 1.0]` as a 16-bit PCM WAV file image.
///
/// 16-bit PCM rather than float WAV because several browser and mobile
/// players accept the float header but play silence.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).context("Cannot start WAV stream")?;
        for &s in samples {
            let s16 = (s * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            writer.write_sample(s16).context("WAV write error")?;
        }
        writer.finalize().context("WAV finalise error")?;
    }
    Ok(cursor.into_inner())
}

/// Decode an audio file to mono samples and its native sample rate.
///
/// Multi-channel audio is averaged down to one channel.
pub fn decode_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let file = File::open(path).with_context(|| format!("Cannot open audio: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unrecognised audio format")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            // A corrupt frame is skipped, as players do.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(e).context("Failed to decode audio"),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        mono.extend(
            buf.samples()
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32),
        );
    }

    if mono.is_empty() || sample_rate == 0 {
        bail!("Audio file contains no samples: {}", path.display());
    }
    Ok((mono, sample_rate))
}

/// Resample mono audio from `from_hz` to `to_hz`.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>> {
    if from_hz == to_hz || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    const CHUNK: usize = 1024;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_hz as f64 / from_hz as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK, 1)
        .context("Cannot build resampler")?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut out = Vec::with_capacity(expected + CHUNK);
    let mut chunks = samples.chunks_exact(CHUNK);
    for chunk in chunks.by_ref() {
        let frames = resampler.process(&[chunk][..], None).context("Resampling failed")?;
        out.extend_from_slice(&frames[0]);
    }
    let tail = chunks.remainder();
    if !tail.is_empty() {
        let frames = resampler
            .process_partial(Some(&[tail][..]), None)
            .context("Resampling failed")?;
        out.extend_from_slice(&frames[0]);
    }
    // Flush the filter delay.
    let frames = resampler
        .process_partial::<&[f32]>(None, None)
        .context("Resampling failed")?;
    out.extend_from_slice(&frames[0]);

    let delay = resampler.output_delay().min(out.len());
    out.drain(..delay);
    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wav_header_and_length() {
        let bytes = encode_wav(&[0.0, 0.5, -0.5, 1.0], 24_000).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + 4 * 2);

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![0, 16383, -16383, i16::MAX]);
    }

    #[test]
    fn test_encode_wav_empty_is_valid_header() {
        let bytes = encode_wav(&[], 24_000).unwrap();
        assert_eq!(bytes.len(), 44);
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 0);
    }

    #[test]
    fn test_encode_wav_clamps() {
        let bytes = encode_wav(&[4.0, -4.0], 16_000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let samples: Vec<i16> = reader.into_samples().map(Result::unwrap).collect();
        assert_eq!(samples, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_decode_stereo_wav_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            w.write_sample(16384i16).unwrap();
            w.write_sample(0i16).unwrap();
        }
        w.finalize().unwrap();

        let (mono, rate) = decode_file(&path).unwrap();
        assert_eq!(rate, 22_050);
        assert_eq!(mono.len(), 100);
        assert!((mono[0] - 0.25).abs() < 1e-3, "got {}", mono[0]);
    }

    #[test]
    fn test_decode_rejects_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(decode_file(&path).is_err());
    }

    #[test]
    fn test_resample_length() {
        let input = vec![0.1f32; 48_000];
        let out = resample(&input, 48_000, 16_000).unwrap();
        assert_eq!(out.len(), 16_000);
        assert_eq!(resample(&input, 16_000, 16_000).unwrap().len(), 48_000);
    }
}

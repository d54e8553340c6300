//! Audio loading: file path to float PCM.
//!
//! The primary path decodes in-process with symphonia. Containers symphonia
//! cannot probe fall back to an external `ffmpeg` process that materializes
//! a temporary WAV (deleted on every exit path, bounded in wall-clock time),
//! which is then decoded in-process.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, warn};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::probe::Hint;

use crate::errors::{AnalysisError, AnalysisResult};

/// Wall-clock bound on the external decoder.
pub const EXTERNAL_DECODER_TIMEOUT_SECS: u64 = 300;

/// Decoded PCM: interleaved floats in [-1, 1] (L then R per frame for
/// stereo), plus the native sample rate and channel count.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub path: PathBuf,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedAudio {
    /// Duration of the decoded audio in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate) / f64::from(self.channels)
    }
}

/// Trait used to implement your own audio loader.
///
/// `decode` must produce interleaved f32 PCM scaled to [-1, 1] at the
/// file's native sample rate, preserving up to two channels.
pub trait Decoder {
    /// Decode the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist, the container cannot be
    /// identified, the stream is truncated beyond recovery, or the decoded
    /// PCM contains non-finite samples.
    fn decode(&self, path: &Path) -> AnalysisResult<DecodedAudio>;
}

/// Symphonia-based loader with an ffmpeg fallback for foreign containers.
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    /// Disable the external fallback (used by tests and minimal installs).
    pub disable_external_fallback: bool,
}

impl SymphoniaDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> AnalysisResult<DecodedAudio> {
        if !path.exists() {
            return Err(AnalysisError::NotFound(path.to_path_buf()));
        }

        if is_riff_wav(path)? {
            validate_riff_size(path)?;
        }

        match decode_with_symphonia(path) {
            Ok(audio) => Ok(audio),
            Err(AnalysisError::UnsupportedFormat(reason)) if !self.disable_external_fallback => {
                debug!(
                    "symphonia could not probe {} ({reason}), trying external decoder",
                    path.display()
                );
                decode_with_ffmpeg(path)
            }
            Err(e) => Err(e),
        }
    }
}

fn decode_with_symphonia(path: &Path) -> AnalysisResult<DecodedAudio> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &Default::default())
        .map_err(|e| AnalysisError::UnsupportedFormat(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.sample_rate.is_some())
        .ok_or_else(|| AnalysisError::Decode("no audio tracks found".into()))?;
    let track_id = track.id;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AnalysisError::Decode("no sample rate in stream".into()))?;
    let source_channels = track
        .codec_params
        .channels
        .map_or(1, symphonia::core::audio::Channels::count);
    if source_channels == 0 {
        return Err(AnalysisError::Decode("stream has no channels".into()));
    }
    if source_channels > 2 {
        warn!(
            "{} has {source_channels} channels, folding to stereo",
            path.display()
        );
    }
    let out_channels: u16 = if source_channels >= 2 { 2 } else { 1 };

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AnalysisError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream; symphonia surfaces it as an I/O error.
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AnalysisError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(buffer) => collect_interleaved(&mut samples, &buffer, out_channels),
            // Skip frames that cannot be decoded.
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AnalysisError::Decode(e.to_string())),
        }
    }

    if samples.is_empty() {
        return Err(AnalysisError::Decode("no audio samples decoded".into()));
    }
    if !samples.iter().all(|s| s.is_finite()) {
        return Err(AnalysisError::InvalidSamples);
    }

    debug!(
        "decoded {} samples at {sample_rate} Hz / {out_channels} ch from {}",
        samples.len(),
        path.display()
    );

    Ok(DecodedAudio {
        path: path.to_path_buf(),
        samples,
        sample_rate,
        channels: out_channels,
    })
}

/// Append one decoded buffer, folded to at most two interleaved channels.
fn collect_interleaved(samples: &mut Vec<f32>, buffer: &AudioBufferRef, out_channels: u16) {
    macro_rules! process_buffer {
        ($buf:expr, $norm_fn:expr) => {{
            let n_frames = $buf.frames();
            let ch_count = $buf.spec().channels.count();
            if n_frames == 0 || ch_count == 0 {
                return;
            }
            samples.reserve(n_frames * usize::from(out_channels));
            for frame_idx in 0..n_frames {
                if out_channels == 1 {
                    let mut sum = 0.0f32;
                    for ch in 0..ch_count {
                        sum += $norm_fn($buf.chan(ch)[frame_idx]);
                    }
                    samples.push(sum / ch_count as f32);
                } else {
                    // Fold any surround layout down to front left/right.
                    let mut left = 0.0f32;
                    let mut right = 0.0f32;
                    let mut left_n = 0u32;
                    let mut right_n = 0u32;
                    for ch in 0..ch_count {
                        let value = $norm_fn($buf.chan(ch)[frame_idx]);
                        if ch % 2 == 0 {
                            left += value;
                            left_n += 1;
                        } else {
                            right += value;
                            right_n += 1;
                        }
                    }
                    samples.push(left / left_n.max(1) as f32);
                    samples.push(right / right_n.max(1) as f32);
                }
            }
        }};
    }

    match buffer {
        AudioBufferRef::F32(buf) => process_buffer!(buf, |v: f32| v),
        AudioBufferRef::F64(buf) => process_buffer!(buf, |v: f64| v as f32),
        AudioBufferRef::S8(buf) => process_buffer!(buf, |v: i8| f32::from(v) / f32::from(i8::MAX)),
        AudioBufferRef::S16(buf) => {
            process_buffer!(buf, |v: i16| f32::from(v) / f32::from(i16::MAX))
        }
        AudioBufferRef::S24(buf) => process_buffer!(buf, |v: symphonia::core::sample::i24| {
            v.into_i32() as f32 / (2_i32.pow(23) - 1) as f32
        }),
        AudioBufferRef::S32(buf) => {
            process_buffer!(buf, |v: i32| (v as f64 / f64::from(i32::MAX)) as f32)
        }
        AudioBufferRef::U8(buf) => {
            process_buffer!(buf, |v: u8| (f32::from(v) / 255. - 0.5) * 2.)
        }
        AudioBufferRef::U16(buf) => {
            process_buffer!(buf, |v: u16| (f32::from(v) / 65_535. - 0.5) * 2.)
        }
        AudioBufferRef::U24(buf) => process_buffer!(buf, |v: symphonia::core::sample::u24| {
            ((v.into_u32() as f64 / f64::from(2_u32.pow(24) - 1)) as f32 - 0.5) * 2.
        }),
        AudioBufferRef::U32(buf) => {
            process_buffer!(buf, |v: u32| ((v as f64 / f64::from(u32::MAX)) as f32 - 0.5) * 2.)
        }
    }
}

/// True when the file carries a RIFF/WAVE header.
fn is_riff_wav(path: &Path) -> AnalysisResult<bool> {
    let Some(ext) = path.extension() else {
        return Ok(false);
    };
    if !ext.to_string_lossy().eq_ignore_ascii_case("wav") {
        return Ok(false);
    }
    let mut header = [0u8; 12];
    let mut file = File::open(path)?;
    let read = file.read(&mut header)?;
    Ok(read == 12 && &header[0..4] == b"RIFF" && &header[8..12] == b"WAVE")
}

/// Compare the RIFF header's declared size against the bytes actually on
/// disk. Less than 10 % present is a hard failure, 10-90 % decodes what is
/// there with a warning, 90 %+ is accepted silently.
fn validate_riff_size(path: &Path) -> AnalysisResult<()> {
    let mut header = [0u8; 8];
    let mut file = File::open(path)?;
    file.read_exact(&mut header)?;

    let declared = u64::from(u32::from_le_bytes([
        header[4], header[5], header[6], header[7],
    ]))
    .saturating_add(8);
    let actual = std::fs::metadata(path)?.len();
    if declared <= 8 {
        return Ok(());
    }

    let fraction = actual as f64 / declared as f64;
    if fraction < 0.1 {
        return Err(AnalysisError::Truncated(format!(
            "{}: header declares {declared} bytes, only {actual} present",
            path.display()
        )));
    }
    if fraction < 0.9 {
        warn!(
            "{}: truncated wav ({actual} of {declared} declared bytes), decoding what is there",
            path.display()
        );
    }
    Ok(())
}

/// Decode through an external ffmpeg process via a temporary WAV file.
///
/// The temp file lives in a [`tempfile::TempDir`] so it is removed on every
/// exit path, including errors and the timeout kill.
fn decode_with_ffmpeg(path: &Path) -> AnalysisResult<DecodedAudio> {
    let temp_dir = tempfile::tempdir()?;
    let temp_wav = temp_dir.path().join("decoded.wav");

    let mut child = Command::new("ffmpeg")
        .arg("-nostdin")
        .arg("-i")
        .arg(path)
        .arg("-f")
        .arg("wav")
        .arg("-acodec")
        .arg("pcm_f32le")
        .arg("-y")
        .arg(&temp_wav)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AnalysisError::UnsupportedFormat(format!(
                    "{}: unsupported container and no external decoder available",
                    path.display()
                ))
            } else {
                AnalysisError::ExternalDecoder(e.to_string())
            }
        })?;

    let deadline = Instant::now() + Duration::from_secs(EXTERNAL_DECODER_TIMEOUT_SECS);
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AnalysisError::ExternalDecoderTimeout(
                    EXTERNAL_DECODER_TIMEOUT_SECS,
                ));
            }
            None => std::thread::sleep(Duration::from_millis(100)),
        }
    };

    if !status.success() {
        return Err(AnalysisError::ExternalDecoder(format!(
            "ffmpeg exited with {status} for {}",
            path.display()
        )));
    }

    let mut audio = decode_with_symphonia(&temp_wav)?;
    audio.path = path.to_path_buf();
    Ok(audio)
}

#[cfg(test)]
pub(crate) mod test_wav {
    //! Minimal WAV writer for test fixtures: 16-bit PCM, mono or stereo.

    use std::io::Write;
    use std::path::Path;

    pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32, channels: u16) {
        let data_len = (samples.len() * 2) as u32;
        let byte_rate = sample_rate * u32::from(channels) * 2;
        let block_align = channels * 2;

        let mut bytes = Vec::with_capacity(44 + samples.len() * 2);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&byte_rate.to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for &sample in samples {
            let value = (sample.clamp(-1., 1.) * f32::from(i16::MAX)) as i16;
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_wav::write_wav;
    use super::*;
    use pretty_assertions::assert_eq;
    use std::f32::consts::TAU;

    fn sine(freq: f32, sample_rate: u32, secs: f32) -> Vec<f32> {
        let n = (secs * sample_rate as f32) as usize;
        (0..n)
            .map(|i| (TAU * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_decode_mono_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, &sine(440., 22_050, 1.), 22_050, 1);

        let audio = SymphoniaDecoder::new().decode(&path).unwrap();
        assert_eq!(audio.sample_rate, 22_050);
        assert_eq!(audio.channels, 1);
        assert!((audio.duration_secs() - 1.).abs() < 0.05);
        assert!(audio.samples.iter().all(|s| s.is_finite() && s.abs() <= 1.));
    }

    #[test]
    fn test_decode_stereo_preserves_interleaving() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        // Left channel loud, right channel silent.
        let left = sine(440., 22_050, 1.);
        let interleaved: Vec<f32> = left.iter().flat_map(|&l| [l, 0.0]).collect();
        write_wav(&path, &interleaved, 22_050, 2);

        let audio = SymphoniaDecoder::new().decode(&path).unwrap();
        assert_eq!(audio.channels, 2);
        let left_energy: f64 = audio
            .samples
            .chunks_exact(2)
            .map(|f| f64::from(f[0]) * f64::from(f[0]))
            .sum();
        let right_energy: f64 = audio
            .samples
            .chunks_exact(2)
            .map(|f| f64::from(f[1]) * f64::from(f[1]))
            .sum();
        assert!(left_energy > 1.);
        assert!(right_energy < 1e-6);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = SymphoniaDecoder::new().decode(Path::new("/nonexistent/audio.flac"));
        assert!(matches!(result, Err(AnalysisError::NotFound(_))));
    }

    #[test]
    fn test_garbage_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.xyz");
        std::fs::write(&path, b"this is not audio at all").unwrap();

        let decoder = SymphoniaDecoder {
            disable_external_fallback: true,
        };
        let result = decoder.decode(&path);
        assert!(matches!(result, Err(AnalysisError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_severely_truncated_wav_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.wav");
        write_wav(&path, &sine(440., 22_050, 2.), 22_050, 1);

        // Keep only the first 2% of the file.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 50]).unwrap();

        let result = SymphoniaDecoder::new().decode(&path);
        assert!(matches!(result, Err(AnalysisError::Truncated(_))));
    }

    #[test]
    fn test_mildly_truncated_wav_decodes_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mild.wav");
        write_wav(&path, &sine(440., 22_050, 2.), 22_050, 1);

        // Keep half the file: inside the warn-and-proceed band.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let audio = SymphoniaDecoder::new().decode(&path).unwrap();
        assert!(!audio.samples.is_empty());
    }
}

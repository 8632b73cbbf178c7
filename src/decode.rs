//! Audio decoding - turn WAV or MP3 bytes into a sample buffer.
//!
//! Stands in for the platform's `decodeAudioData`: the container is
//! sniffed from the leading bytes, decoded with hound or minimp3, and
//! deinterleaved down to at most two channels.

use std::io::Cursor;

use log::debug;

use crate::dsp::buffer::SampleBuffer;
use crate::error::DecodeError;

/// Decode a WAV or MP3 byte stream into planar samples at the stream's
/// native rate. Callers resample to the graph rate afterwards.
pub fn decode_audio_data(bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
    if bytes.len() < 4 {
        return Err(DecodeError::UnsupportedFormat);
    }
    if &bytes[..4] == b"RIFF" {
        decode_wav(bytes)
    } else {
        decode_mp3(bytes)
    }
}

fn decode_wav(bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| {
        DecodeError::Malformed {
            detail: e.to_string(),
        }
    })?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| DecodeError::Malformed {
                detail: e.to_string(),
            })?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()
                .map_err(|e| DecodeError::Malformed {
                    detail: e.to_string(),
                })?
        }
    };
    debug!(
        "decoded WAV: {} Hz, {} channel(s), {} samples",
        spec.sample_rate,
        spec.channels,
        samples.len()
    );
    deinterleave(&samples, spec.channels as usize, spec.sample_rate)
}

fn decode_mp3(bytes: &[u8]) -> Result<SampleBuffer, DecodeError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples: Vec<f32> = Vec::new();
    let mut channels = 0usize;
    let mut sample_rate = 0u32;
    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if channels == 0 {
                    channels = frame.channels;
                    sample_rate = frame.sample_rate as u32;
                } else if frame.channels != channels {
                    return Err(DecodeError::Malformed {
                        detail: "channel count changed mid-stream".to_string(),
                    });
                }
                samples.extend(frame.data.iter().map(|&s| s as f32 / 32768.0));
            }
            Err(minimp3::Error::Eof) | Err(minimp3::Error::InsufficientData) => break,
            Err(minimp3::Error::SkippedData) => continue,
            Err(e) => {
                return Err(DecodeError::Malformed {
                    detail: format!("{e:?}"),
                });
            }
        }
    }
    if channels == 0 || samples.is_empty() {
        // No frame sync anywhere in the input: not MP3 at all.
        return Err(DecodeError::UnsupportedFormat);
    }
    debug!(
        "decoded MP3: {sample_rate} Hz, {channels} channel(s), {} samples",
        samples.len()
    );
    deinterleave(&samples, channels, sample_rate)
}

fn deinterleave(
    samples: &[f32],
    channels: usize,
    sample_rate: u32,
) -> Result<SampleBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::Malformed {
            detail: "stream reports zero channels".to_string(),
        });
    }
    let frames = samples.len() / channels;
    if frames == 0 {
        return Err(DecodeError::Malformed {
            detail: "stream decoded to zero frames".to_string(),
        });
    }
    let kept = channels.min(2);
    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); kept];
    for frame in samples.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample);
        }
    }
    Ok(SampleBuffer::new(planes, sample_rate))
}

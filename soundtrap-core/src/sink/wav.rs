//! Mono WAV encoding via `hound`.

use std::io::Cursor;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::{EncodedSegment, EncoderSink};
use crate::{
    capture::Segment,
    error::{Result, SoundtrapError},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WavFormat {
    /// 16-bit signed PCM.
    #[default]
    Pcm16,
    /// 32-bit IEEE float.
    Float32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WavEncoder {
    format: WavFormat,
}

impl WavEncoder {
    pub fn new(format: WavFormat) -> Self {
        Self { format }
    }

    fn spec(&self, sample_rate: u32) -> WavSpec {
        match self.format {
            WavFormat::Pcm16 => WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            },
            WavFormat::Float32 => WavSpec {
                channels: 1,
                sample_rate,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
        }
    }
}

impl EncoderSink for WavEncoder {
    fn encode(&mut self, segment: &Segment) -> Result<EncodedSegment> {
        if segment.sample_rate == 0 {
            return Err(SoundtrapError::Encode(format!(
                "segment {} has no sample rate",
                segment.id
            )));
        }

        let mut cursor = Cursor::new(Vec::with_capacity(44 + segment.sample_count() * 4));
        {
            let mut writer = WavWriter::new(&mut cursor, self.spec(segment.sample_rate))
                .map_err(|e| SoundtrapError::Encode(e.to_string()))?;
            match self.format {
                WavFormat::Pcm16 => {
                    for sample in segment.samples() {
                        let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                        writer
                            .write_sample(v)
                            .map_err(|e| SoundtrapError::Encode(e.to_string()))?;
                    }
                }
                WavFormat::Float32 => {
                    for sample in segment.samples() {
                        writer
                            .write_sample(sample)
                            .map_err(|e| SoundtrapError::Encode(e.to_string()))?;
                    }
                }
            }
            writer
                .finalize()
                .map_err(|e| SoundtrapError::Encode(e.to_string()))?;
        }

        Ok(EncodedSegment {
            segment_id: segment.id,
            bytes: cursor.into_inner(),
            content_type: "audio/wav",
            extension: "wav",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::SampleBlock;
    use std::time::{Duration, Instant};

    fn segment(samples: Vec<f32>, sample_rate: u32) -> Segment {
        let t0 = Instant::now();
        let half = samples.len() / 2;
        Segment {
            id: 3,
            trigger_at: t0,
            sample_rate,
            blocks: vec![
                SampleBlock::new(samples[..half].to_vec(), sample_rate, t0),
                SampleBlock::new(samples[half..].to_vec(), sample_rate, t0 + Duration::from_millis(1)),
            ],
        }
    }

    #[test]
    fn pcm16_preserves_sample_order() {
        let input = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
        let encoded = WavEncoder::default().encode(&segment(input, 8_000)).unwrap();
        assert_eq!(encoded.content_type, "audio/wav");
        assert_eq!(encoded.segment_id, 3);

        let mut reader = hound::WavReader::new(Cursor::new(encoded.bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.spec().channels, 1);
        let decoded: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![0, 16384, -16384, 32767, -32767, 8192]);
    }

    #[test]
    fn float32_is_lossless() {
        let input = vec![0.125, -0.75, 0.5, 0.0];
        let encoded = WavEncoder::new(WavFormat::Float32)
            .encode(&segment(input.clone(), 16_000))
            .unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(encoded.bytes)).unwrap();
        let decoded: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, input);
    }

    #[test]
    fn zero_sample_rate_is_an_encode_error() {
        let empty = Segment {
            id: 0,
            trigger_at: Instant::now(),
            sample_rate: 0,
            blocks: vec![],
        };
        let err = WavEncoder::default().encode(&empty).unwrap_err();
        assert!(matches!(err, SoundtrapError::Encode(_)));
    }
}

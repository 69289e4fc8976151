use std::{io::Cursor, str::FromStr};

/// Sample format of the WAV container sent to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WavEncoding {
    /// 16-bit signed integer PCM
    #[default]
    Pcm16,
    /// 32-bit IEEE float
    Float32,
}

impl WavEncoding {
    pub fn bits_per_sample(self) -> u16 {
        match self {
            WavEncoding::Pcm16 => 16,
            WavEncoding::Float32 => 32,
        }
    }
}

impl FromStr for WavEncoding {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm16" | "pcm_16" | "s16" | "16" => Ok(WavEncoding::Pcm16),
            "f32" | "float" | "float32" | "32" => Ok(WavEncoding::Float32),
            other => Err(anyhow::anyhow!(
                "unknown wav encoding '{other}' (expected pcm16 or f32)"
            )),
        }
    }
}

/// Encode mono f32 samples as a WAV file in memory
pub fn encode_wav(
    samples: &[f32],
    sample_rate: u32,
    encoding: WavEncoding,
) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: encoding.bits_per_sample(),
        sample_format: match encoding {
            WavEncoding::Pcm16 => hound::SampleFormat::Int,
            WavEncoding::Float32 => hound::SampleFormat::Float,
        },
    };

    // WAV header (44 bytes) + payload; hound may add a fact chunk for float
    let bytes_per_sample = usize::from(encoding.bits_per_sample() / 8);
    let estimated_size = 58 + samples.len() * bytes_per_sample;
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(estimated_size));

    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;

        match encoding {
            WavEncoding::Pcm16 => {
                const I16_MAX_F32: f32 = i16::MAX as f32;
                for &s in samples {
                    // Clamp and convert f32 [-1.0, 1.0] -> i16
                    let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
                    writer
                        .write_sample(v)
                        .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
                }
            }
            WavEncoding::Float32 => {
                for &s in samples {
                    writer
                        .write_sample(s)
                        .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
                }
            }
        }

        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }

    Ok(cursor.into_inner())
}

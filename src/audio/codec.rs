//! Capture side of the hardware codec, as seen by the front-end.

use std::thread;
use std::time::Duration;

use anyhow::Result;

/// Input format reported by a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecFormat {
    pub sample_rate: u32,
    /// Total interleaved input channels, reference included.
    pub input_channels: u32,
    /// The last input channel carries the playback reference for AEC.
    pub input_reference: bool,
}

/// A source of interleaved 16-bit PCM capture frames.
pub trait AudioCodec: Send {
    fn format(&self) -> CodecFormat;

    /// Fill `buf` with interleaved samples. Returns the number of frames
    /// (samples per channel) written.
    fn read(&mut self, buf: &mut [i16]) -> Result<usize>;
}

/// Codec that produces silence in real time. Used when no capture hardware
/// is configured.
pub struct IdleCodec {
    format: CodecFormat,
}

impl IdleCodec {
    pub fn new(format: CodecFormat) -> Self {
        Self { format }
    }
}

impl AudioCodec for IdleCodec {
    fn format(&self) -> CodecFormat {
        self.format
    }

    fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
        let channels = self.format.input_channels.max(1) as usize;
        let frames = buf.len() / channels;
        buf.fill(0);
        if self.format.sample_rate > 0 {
            let micros = frames as u64 * 1_000_000 / self.format.sample_rate as u64;
            thread::sleep(Duration::from_micros(micros));
        }
        Ok(frames)
    }
}

#[cfg(feature = "alsa-codec")]
pub use alsa_codec::AlsaCodec;

#[cfg(feature = "alsa-codec")]
mod alsa_codec {
    use super::{AudioCodec, CodecFormat};
    use crate::audio::alsa_device;
    use alsa::pcm::PCM;
    use anyhow::Result;

    /// ALSA capture device feeding the front-end.
    pub struct AlsaCodec {
        pcm: PCM,
        format: CodecFormat,
    }

    impl AlsaCodec {
        pub fn open(device: &str, sample_rate: u32, channels: u32, input_reference: bool) -> Result<Self> {
            let (pcm, params) = alsa_device::open_capture(device, sample_rate, channels)?;
            if params.sample_rate != sample_rate {
                anyhow::bail!(
                    "Capture device '{}' negotiated {}Hz, front-end needs {}Hz",
                    device,
                    params.sample_rate,
                    sample_rate
                );
            }
            Ok(Self {
                pcm,
                format: CodecFormat {
                    sample_rate: params.sample_rate,
                    input_channels: params.channels,
                    input_reference,
                },
            })
        }
    }

    impl AudioCodec for AlsaCodec {
        fn format(&self) -> CodecFormat {
            self.format
        }

        fn read(&mut self, buf: &mut [i16]) -> Result<usize> {
            let io = self.pcm.io_i16()?;
            match io.readi(buf) {
                Ok(frames) => Ok(frames),
                Err(e) => {
                    log::warn!("ALSA capture error: {}, recovering...", e);
                    self.pcm.prepare()?;
                    Ok(0)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_codec_reads_silence() {
        let mut codec = IdleCodec::new(CodecFormat {
            sample_rate: 16000,
            input_channels: 2,
            input_reference: true,
        });
        let mut buf = vec![5i16; 320];
        let frames = codec.read(&mut buf).unwrap();
        assert_eq!(frames, 160);
        assert!(buf.iter().all(|&s| s == 0));
    }
}

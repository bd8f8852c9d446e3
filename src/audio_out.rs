use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{error, info, warn};

use crate::synth::{Renderer, BLOCK_SIZE, SAMPLE_RATE};

/// Live audio output via cpal.
///
/// Holds the cpal `Stream` alive. Drop this to stop playback. The renderer
/// is moved into the output callback and pulled block by block; the device
/// callback's buffer size need not match the render block size.
pub struct AudioOutput {
    _stream: Stream,
}

/// Mono sample source backed by the renderer's fixed-size blocks.
struct MonoSource {
    renderer: Renderer,
    block: [f32; BLOCK_SIZE],
    cursor: usize,
}

impl MonoSource {
    fn new(renderer: Renderer) -> Self {
        Self {
            renderer,
            block: [0.0; BLOCK_SIZE],
            cursor: BLOCK_SIZE, // force a render on first pull
        }
    }

    fn next(&mut self) -> f32 {
        if self.cursor >= BLOCK_SIZE {
            self.renderer.render(&mut self.block);
            self.cursor = 0;
        }
        let s = self.block[self.cursor];
        self.cursor += 1;
        s
    }
}

impl AudioOutput {
    /// Open the default output device and start streaming.
    /// Returns immediately — rendering happens on the device's thread.
    pub fn start(renderer: Renderer) -> Result<Self, String> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| "No default audio output device found".to_string())?;

        info!(
            "Audio output: {}",
            device.name().unwrap_or_else(|_| "unknown".into())
        );

        let supported = device
            .default_output_config()
            .map_err(|e| format!("No supported output config: {e}"))?;

        // Prefer the renderer's native rate; fall back to the device default
        let preferred = cpal::SampleRate(SAMPLE_RATE);
        let config_native = device.supported_output_configs().ok().and_then(|configs| {
            configs
                .filter(|c| {
                    c.channels() == supported.channels()
                        && c.min_sample_rate() <= preferred
                        && c.max_sample_rate() >= preferred
                })
                .max_by_key(|c| c.max_sample_rate())
                .map(|c| c.with_sample_rate(preferred))
        });

        let (config, sample_rate, format): (StreamConfig, u32, SampleFormat) =
            if let Some(cfg) = config_native {
                let sr = cfg.sample_rate().0;
                let fmt = cfg.sample_format();
                (cfg.into(), sr, fmt)
            } else {
                let sr = supported.sample_rate().0;
                let fmt = supported.sample_format();
                (supported.into(), sr, fmt)
            };

        if sample_rate != SAMPLE_RATE {
            warn!(
                "Device runs at {}Hz, renderer at {}Hz — pitch will be off",
                sample_rate, SAMPLE_RATE
            );
        }

        let channels = config.channels as usize;
        info!(
            "Output config: {}Hz  {} ch  {:?}",
            sample_rate, channels, format
        );

        let mut source = MonoSource::new(renderer);
        let err_fn = |e: cpal::StreamError| error!("Audio stream error: {e}");

        let stream = match format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        for frame in data.chunks_mut(channels) {
                            let s = source.next();
                            frame.fill(s);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _| {
                        for frame in data.chunks_mut(channels) {
                            let s = (source.next() * i16::MAX as f32) as i16;
                            frame.fill(s);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| e.to_string())?,
            fmt => {
                return Err(format!(
                    "Unsupported sample format {fmt:?}. Use an F32 or I16 device."
                ))
            }
        };

        stream.play().map_err(|e| e.to_string())?;
        Ok(Self { _stream: stream })
    }
}

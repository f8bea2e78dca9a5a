//! Audio conversion: Opus-in-Ogg output with level-scaled perturbation

use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{artifact_path, run_piped, ConvertError, ConverterStats, StatsCell};
use crate::types::AfLevel;

/// Sampled transcode parameters for one audio conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub bitrate_kbps: u32,
    pub compression: u32,
    pub silence_pad_ms: u32,
    pub pitch_factor: f64,
    pub noise_amplitude: Option<f64>,
}

/// Draw a parameter set for `level`.
pub fn sample_params(level: AfLevel, rng: &mut impl Rng) -> AudioParams {
    match level {
        AfLevel::None => AudioParams {
            bitrate_kbps: 72,
            compression: 10,
            silence_pad_ms: 0,
            pitch_factor: 1.0,
            noise_amplitude: None,
        },
        AfLevel::Basic => AudioParams {
            bitrate_kbps: rng.gen_range(70..=74),
            compression: rng.gen_range(8..=10),
            silence_pad_ms: rng.gen_range(1..=3),
            pitch_factor: 1.0,
            noise_amplitude: None,
        },
        AfLevel::Moderate => AudioParams {
            bitrate_kbps: rng.gen_range(70..=74),
            compression: rng.gen_range(8..=10),
            silence_pad_ms: rng.gen_range(1..=3),
            pitch_factor: 1.0 + rng.gen_range(-0.001..=0.001),
            noise_amplitude: None,
        },
        AfLevel::Paranoid => AudioParams {
            bitrate_kbps: rng.gen_range(68..=76),
            compression: rng.gen_range(7..=10),
            silence_pad_ms: rng.gen_range(1..=5),
            pitch_factor: 1.0 + rng.gen_range(-0.002..=0.002),
            noise_amplitude: Some(rng.gen_range(0.0005..=0.0006)),
        },
    }
}

fn build_args(params: &AudioParams, input_len: usize) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-i",
        "pipe:0",
        "-vn",
        "-map",
        "0:a:0",
        "-c:a",
        "libopus",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.push("-b:a".into());
    args.push(format!("{}k", params.bitrate_kbps));
    args.push("-vbr".into());
    args.push("on".into());
    args.push("-compression_level".into());
    args.push(params.compression.to_string());
    args.push("-application".into());
    args.push("voip".into());
    args.push("-ar".into());
    args.push("48000".into());
    args.push("-ac".into());
    args.push("1".into());

    let mut filters = Vec::new();
    if params.silence_pad_ms > 0 {
        filters.push(format!("adelay={}:all=1", params.silence_pad_ms));
    }
    if params.pitch_factor != 1.0 {
        filters.push(format!(
            "asetrate=48000*{:.6},aresample=48000",
            params.pitch_factor
        ));
    }
    if let Some(amplitude) = params.noise_amplitude {
        filters.push(format!(
            "anoisesrc=d={}:c=pink:r=48000:a=0.001,amix=inputs=2:weights=1 {:.6}",
            input_len / 1000,
            amplitude
        ));
    }
    if !filters.is_empty() {
        args.push("-af".into());
        args.push(filters.join(","));
    }

    args.push("-f".into());
    args.push("opus".into());
    args.push("pipe:1".into());
    args
}

/// Audio converter with per-instance statistics.
pub struct AudioConverter {
    stats: StatsCell,
}

impl AudioConverter {
    pub fn new() -> Self {
        Self {
            stats: StatsCell::new(),
        }
    }

    pub fn output_extension(&self) -> &'static str {
        ".opus"
    }

    pub fn output_path(&self, dir: &Path, device_id: &str, url_key: &str) -> PathBuf {
        artifact_path(dir, device_id, url_key, self.output_extension())
    }

    /// Transcode `input` and persist the result at `output_path`.
    pub async fn convert(
        &self,
        input: &[u8],
        level: AfLevel,
        output_path: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf, ConvertError> {
        let start = Instant::now();
        let result = self.run(input, level, output_path, token).await;
        match &result {
            Ok(_) => self.stats.record_success(start.elapsed()),
            Err(_) => self.stats.record_failure(),
        }
        result
    }

    async fn run(
        &self,
        input: &[u8],
        level: AfLevel,
        output_path: &Path,
        token: &CancellationToken,
    ) -> Result<PathBuf, ConvertError> {
        if input.is_empty() {
            return Err(ConvertError::EmptyInput);
        }

        let params = {
            let mut rng = rand::thread_rng();
            sample_params(level, &mut rng)
        };
        debug!(level = %level, ?params, "audio conversion parameters");

        let args = build_args(&params, input.len());
        let output = run_piped("ffmpeg", &args, input, token).await?;

        tokio::fs::write(output_path, &output)
            .await
            .map_err(ConvertError::WriteOutput)?;
        Ok(output_path.to_path_buf())
    }

    pub fn stats(&self) -> ConverterStats {
        self.stats.snapshot()
    }
}

impl Default for AudioConverter {
    fn default() -> Self {
        Self::new()
    }
}

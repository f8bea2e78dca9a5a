//! Video conversion: H.264/MP4 re-encode around a probed bitrate

use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{artifact_path, run_piped, ConvertError, ConverterStats, StatsCell};
use crate::types::AfLevel;

/// Fallback when the bitrate probe fails, in kbps.
const DEFAULT_BITRATE_KBPS: i64 = 2000;

/// Sampled transcode parameters for one video conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub bitrate_kbps: i64,
    pub crf: u32,
    pub preset: &'static str,
    pub keyframe_interval: u32,
    pub audio: AudioTrack,
    pub noise_strength: Option<u32>,
    pub color_adjust: Option<ColorAdjust>,
    pub timestamp_tag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioTrack {
    Copy,
    Reencode { bitrate_kbps: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAdjust {
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
}

/// Draw a parameter set for `level` around the probed source bitrate.
pub fn sample_params(level: AfLevel, probed_kbps: i64, rng: &mut impl Rng) -> VideoParams {
    match level {
        AfLevel::None => VideoParams {
            bitrate_kbps: probed_kbps,
            crf: 23,
            preset: "medium",
            keyframe_interval: 250,
            audio: AudioTrack::Copy,
            noise_strength: None,
            color_adjust: None,
            timestamp_tag: false,
        },
        AfLevel::Basic => VideoParams {
            bitrate_kbps: perturb_bitrate(probed_kbps, 0.05, 0.10, rng),
            crf: rng.gen_range(22..=24),
            preset: "medium",
            keyframe_interval: rng.gen_range(240..=260),
            audio: AudioTrack::Copy,
            noise_strength: None,
            color_adjust: None,
            timestamp_tag: false,
        },
        AfLevel::Moderate => VideoParams {
            bitrate_kbps: perturb_bitrate(probed_kbps, 0.08, 0.12, rng),
            crf: rng.gen_range(22..=25),
            preset: "medium",
            keyframe_interval: rng.gen_range(230..=270),
            audio: AudioTrack::Reencode {
                bitrate_kbps: rng.gen_range(128..=143),
            },
            noise_strength: Some(rng.gen_range(1..=2)),
            color_adjust: Some(ColorAdjust {
                brightness: rng.gen_range(-0.001..=0.001),
                contrast: 1.0 + rng.gen_range(-0.001..=0.001),
                saturation: 1.0 + rng.gen_range(-0.001..=0.001),
            }),
            timestamp_tag: false,
        },
        AfLevel::Paranoid => VideoParams {
            bitrate_kbps: perturb_bitrate(probed_kbps, 0.10, 0.15, rng),
            crf: rng.gen_range(21..=25),
            preset: ["fast", "medium", "medium"][rng.gen_range(0..3)],
            keyframe_interval: rng.gen_range(220..=280),
            audio: AudioTrack::Reencode {
                bitrate_kbps: rng.gen_range(128..=143),
            },
            noise_strength: Some(rng.gen_range(2..=5)),
            color_adjust: Some(ColorAdjust {
                brightness: rng.gen_range(-0.002..=0.002),
                contrast: 1.0 + rng.gen_range(-0.002..=0.002),
                saturation: 1.0 + rng.gen_range(-0.002..=0.002),
            }),
            timestamp_tag: true,
        },
    }
}

/// Shift `bitrate` by a random offset whose magnitude is a uniform draw in
/// `[min_pct, max_pct]` of the original.
fn perturb_bitrate(bitrate: i64, min_pct: f64, max_pct: f64, rng: &mut impl Rng) -> i64 {
    let variation = (bitrate as f64 * rng.gen_range(min_pct..=max_pct)) as i64;
    if variation == 0 {
        return bitrate;
    }
    bitrate + rng.gen_range(-variation..=variation)
}

fn build_args(params: &VideoParams) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-i", "pipe:0"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut filters = Vec::new();
    if let Some(strength) = params.noise_strength {
        filters.push(format!("noise=alls={strength}:allf=t+u"));
    }
    if let Some(color) = params.color_adjust {
        filters.push(format!(
            "eq=brightness={:.6}:contrast={:.6}:saturation={:.6}",
            color.brightness, color.contrast, color.saturation
        ));
    }
    if params.timestamp_tag {
        filters.push("drawtext=text='':x=0:y=0:fontsize=1:fontcolor=black@0.01".to_string());
    }
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    args.push("-c:v".into());
    args.push("libx264".into());
    args.push("-b:v".into());
    args.push(format!("{}k", params.bitrate_kbps));
    args.push("-crf".into());
    args.push(params.crf.to_string());
    args.push("-preset".into());
    args.push(params.preset.to_string());
    args.push("-g".into());
    args.push(params.keyframe_interval.to_string());
    args.push("-bf".into());
    args.push("2".into());
    args.push("-movflags".into());
    args.push("+faststart".into());

    match params.audio {
        AudioTrack::Copy => {
            args.push("-c:a".into());
            args.push("copy".into());
        }
        AudioTrack::Reencode { bitrate_kbps } => {
            args.push("-c:a".into());
            args.push("aac".into());
            args.push("-b:a".into());
            args.push(format!("{bitrate_kbps}k"));
            args.push("-ar".into());
            args.push("48000".into());
        }
    }

    args.push("-f".into());
    args.push("mp4".into());
    args.push("pipe:1".into());
    args
}

fn probe_args() -> Vec<String> {
    [
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=bit_rate",
        "-of",
        "default=noprint_wrappers=1:nokey=1",
        "-i",
        "pipe:0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Video converter with per-instance statistics.
pub struct VideoConverter {
    stats: StatsCell,
}

impl VideoConverter {
    pub fn new() -> Self {
        Self {
            stats: StatsCell::new(),
        }
    }

    pub fn output_extension(&self) -> &'static str {
        ".mp4"
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

        let probed_kbps = self.probe_bitrate(input, token).await;
        let params = {
            let mut rng = rand::thread_rng();
            sample_params(level, probed_kbps, &mut rng)
        };
        debug!(level = %level, probed_kbps, ?params, "video conversion parameters");

        let args = build_args(&params);
        let output = run_piped("ffmpeg", &args, input, token).await?;

        tokio::fs::write(output_path, &output)
            .await
            .map_err(ConvertError::WriteOutput)?;
        Ok(output_path.to_path_buf())
    }

    /// Best-effort bitrate probe of the first video stream, in kbps.
    async fn probe_bitrate(&self, input: &[u8], token: &CancellationToken) -> i64 {
        let result = run_piped("ffprobe", &probe_args(), input, token).await;
        match result {
            Ok(stdout) => String::from_utf8_lossy(&stdout)
                .trim()
                .parse::<i64>()
                .map(|bits| bits / 1000)
                .unwrap_or(DEFAULT_BITRATE_KBPS),
            Err(_) => DEFAULT_BITRATE_KBPS,
        }
    }

    pub fn stats(&self) -> ConverterStats {
        self.stats.snapshot()
    }
}

impl Default for VideoConverter {
    fn default() -> Self {
        Self::new()
    }
}

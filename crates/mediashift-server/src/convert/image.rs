//! Image conversion: format-preserving re-encode with level-scaled noise

use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{artifact_path, run_piped, ConvertError, ConverterStats, StatsCell};
use crate::media::ImageFormat;
use crate::types::AfLevel;

/// Sampled transcode parameters for one image conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    pub quality: u32,
    pub compression_level: u32,
    pub jpeg_qscale: u32,
    pub noise_strength: Option<u32>,
    pub color_adjust: Option<ColorAdjust>,
    pub blur_amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAdjust {
    pub brightness: f64,
    pub contrast: f64,
}

/// Draw a parameter set for `level`. PNG inputs get gentler noise since the
/// lossless round trip preserves it verbatim.
pub fn sample_params(level: AfLevel, is_png: bool, rng: &mut impl Rng) -> ImageParams {
    match level {
        AfLevel::None => ImageParams {
            quality: 90,
            compression_level: 6,
            jpeg_qscale: 3,
            noise_strength: None,
            color_adjust: None,
            blur_amount: None,
        },
        AfLevel::Basic => ImageParams {
            quality: rng.gen_range(88..=92),
            compression_level: rng.gen_range(5..=7),
            jpeg_qscale: rng.gen_range(3..=4),
            noise_strength: None,
            color_adjust: None,
            blur_amount: None,
        },
        AfLevel::Moderate => ImageParams {
            quality: rng.gen_range(88..=92),
            compression_level: rng.gen_range(5..=7),
            jpeg_qscale: rng.gen_range(3..=4),
            noise_strength: Some(if is_png {
                rng.gen_range(1..=2)
            } else {
                rng.gen_range(2..=4)
            }),
            color_adjust: Some(ColorAdjust {
                brightness: rng.gen_range(-0.001..=0.001),
                contrast: 1.0 + rng.gen_range(-0.001..=0.001),
            }),
            blur_amount: None,
        },
        AfLevel::Paranoid => ImageParams {
            quality: rng.gen_range(85..=92),
            compression_level: rng.gen_range(4..=7),
            jpeg_qscale: rng.gen_range(2..=4),
            noise_strength: Some(if is_png {
                rng.gen_range(1..=3)
            } else {
                rng.gen_range(3..=7)
            }),
            color_adjust: Some(ColorAdjust {
                brightness: rng.gen_range(-0.002..=0.002),
                contrast: 1.0 + rng.gen_range(-0.002..=0.002),
            }),
            blur_amount: Some(rng.gen_range(0.10..=0.14)),
        },
    }
}

fn build_args(params: &ImageParams, format: ImageFormat) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-i", "pipe:0"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut filters = Vec::new();
    if let Some(strength) = params.noise_strength {
        filters.push(format!("noise=alls={strength}:allf=t"));
    }
    if let Some(color) = params.color_adjust {
        filters.push(format!(
            "eq=brightness={:.6}:contrast={:.6}",
            color.brightness, color.contrast
        ));
    }
    if let Some(amount) = params.blur_amount {
        filters.push(format!("unsharp=3:3:{amount:.2}"));
    }
    if !filters.is_empty() {
        args.push("-vf".into());
        args.push(filters.join(","));
    }

    match format {
        ImageFormat::Png => {
            args.push("-c:v".into());
            args.push("png".into());
            args.push("-compression_level".into());
            args.push(params.compression_level.to_string());
        }
        ImageFormat::Webp => {
            args.push("-c:v".into());
            args.push("libwebp".into());
            args.push("-quality".into());
            args.push(params.quality.to_string());
        }
        ImageFormat::Jpeg | ImageFormat::Unknown => {
            args.push("-c:v".into());
            args.push("mjpeg".into());
            args.push("-q:v".into());
            args.push(params.jpeg_qscale.to_string());
        }
    }

    args.push("-f".into());
    args.push("image2".into());
    args.push("pipe:1".into());
    args
}

/// Swap the path's extension for the one matching the output format.
fn adjust_output_path(path: &Path, format: ImageFormat) -> PathBuf {
    path.with_extension(format.output_extension().trim_start_matches('.'))
}

/// Image converter with per-instance statistics.
pub struct ImageConverter {
    stats: StatsCell,
}

impl ImageConverter {
    pub fn new() -> Self {
        Self {
            stats: StatsCell::new(),
        }
    }

    /// Default extension; the actual output may be rewritten to match the
    /// detected input format.
    pub fn output_extension(&self) -> &'static str {
        ".jpg"
    }

    pub fn output_path(&self, dir: &Path, device_id: &str, url_key: &str) -> PathBuf {
        artifact_path(dir, device_id, url_key, self.output_extension())
    }

    /// Transcode `input` and persist the result. Returns the final path,
    /// which may differ from `output_path` in extension.
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

        let format = ImageFormat::sniff(input);
        let params = {
            let mut rng = rand::thread_rng();
            sample_params(level, format.is_png(), &mut rng)
        };
        debug!(level = %level, ?format, ?params, "image conversion parameters");

        let args = build_args(&params, format);
        let output = run_piped("ffmpeg", &args, input, token).await?;

        let final_path = adjust_output_path(output_path, format);
        tokio::fs::write(&final_path, &output)
            .await
            .map_err(ConvertError::WriteOutput)?;
        Ok(final_path)
    }

    pub fn stats(&self) -> ConverterStats {
        self.stats.snapshot()
    }
}

impl Default for ImageConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sampled_params_stay_inside_level_envelope() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..200 {
            let p = sample_params(AfLevel::Basic, false, &mut rng);
            assert!((88..=92).contains(&p.quality));
            assert!((5..=7).contains(&p.compression_level));
            assert!((3..=4).contains(&p.jpeg_qscale));
            assert!(p.noise_strength.is_none());
            assert!(p.color_adjust.is_none());
            assert!(p.blur_amount.is_none());

            let p = sample_params(AfLevel::Moderate, true, &mut rng);
            assert!((1..=2).contains(&p.noise_strength.unwrap()));
            let color = p.color_adjust.unwrap();
            assert!(color.brightness.abs() <= 0.001);
            assert!((color.contrast - 1.0).abs() <= 0.001);
            assert!(p.blur_amount.is_none());

            let p = sample_params(AfLevel::Moderate, false, &mut rng);
            assert!((2..=4).contains(&p.noise_strength.unwrap()));

            let p = sample_params(AfLevel::Paranoid, false, &mut rng);
            assert!((85..=92).contains(&p.quality));
            assert!((4..=7).contains(&p.compression_level));
            assert!((2..=4).contains(&p.jpeg_qscale));
            assert!((3..=7).contains(&p.noise_strength.unwrap()));
            let blur = p.blur_amount.unwrap();
            assert!((0.10..=0.14).contains(&blur));

            let p = sample_params(AfLevel::Paranoid, true, &mut rng);
            assert!((1..=3).contains(&p.noise_strength.unwrap()));
        }
    }

    #[test]
    fn args_pick_codec_by_format() {
        let params = sample_params(AfLevel::None, false, &mut StdRng::seed_from_u64(1));

        let png_args = build_args(&params, ImageFormat::Png);
        assert!(png_args.windows(2).any(|w| w == ["-c:v", "png"]));
        assert!(png_args.windows(2).any(|w| w == ["-compression_level", "6"]));

        let webp_args = build_args(&params, ImageFormat::Webp);
        assert!(webp_args.windows(2).any(|w| w == ["-c:v", "libwebp"]));
        assert!(webp_args.windows(2).any(|w| w == ["-quality", "90"]));

        let unknown_args = build_args(&params, ImageFormat::Unknown);
        assert!(unknown_args.windows(2).any(|w| w == ["-c:v", "mjpeg"]));
        assert!(unknown_args.windows(2).any(|w| w == ["-q:v", "3"]));
    }

    #[test]
    fn filter_chain_reflects_enabled_perturbations() {
        let params = ImageParams {
            quality: 90,
            compression_level: 6,
            jpeg_qscale: 3,
            noise_strength: Some(2),
            color_adjust: Some(ColorAdjust {
                brightness: 0.001,
                contrast: 0.999,
            }),
            blur_amount: Some(0.12),
        };
        let args = build_args(&params, ImageFormat::Jpeg);
        let vf = args
            .iter()
            .position(|a| a == "-vf")
            .map(|i| args[i + 1].clone())
            .unwrap();
        assert!(vf.contains("noise=alls=2:allf=t"));
        assert!(vf.contains("eq=brightness=0.001000:contrast=0.999000"));
        assert!(vf.contains("unsharp=3:3:0.12"));
    }

    #[test]
    fn output_path_extension_follows_detected_format() {
        let base = Path::new("/cache/image/d1_abcd1234_100.jpg");
        assert_eq!(
            adjust_output_path(base, ImageFormat::Png),
            Path::new("/cache/image/d1_abcd1234_100.png")
        );
        assert_eq!(
            adjust_output_path(base, ImageFormat::Webp),
            Path::new("/cache/image/d1_abcd1234_100.webp")
        );
        assert_eq!(
            adjust_output_path(base, ImageFormat::Unknown),
            Path::new("/cache/image/d1_abcd1234_100.jpg")
        );
    }

    #[tokio::test]
    async fn convert_rejects_empty_input() {
        let converter = ImageConverter::new();
        let token = CancellationToken::new();
        let result = converter
            .convert(b"", AfLevel::None, Path::new("/tmp/out.jpg"), &token)
            .await;
        assert!(matches!(result, Err(ConvertError::EmptyInput)));
    }
}

//! Converter family: randomized-parameter transcoding through ffmpeg
//!
//! Each converter samples a parameter set from the distribution selected by
//! the anti-fingerprint level, then drives an external ffmpeg process with
//! the input piped to stdin and stdout captured to memory. The sampled
//! parameters are the only source of content perturbation.

mod audio;
mod image;
mod video;

pub use audio::AudioConverter;
pub use image::ImageConverter;
pub use video::VideoConverter;

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const STDERR_EXCERPT_LIMIT: usize = 2048;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("empty input data")]
    EmptyInput,
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        source: std::io::Error,
    },
    #[error("{program} i/o error: {source}")]
    Io {
        program: &'static str,
        source: std::io::Error,
    },
    #[error("{program} failed: {stderr}")]
    TranscoderFailed {
        program: &'static str,
        stderr: String,
    },
    #[error("{program} produced no output")]
    EmptyOutput { program: &'static str },
    #[error("conversion cancelled")]
    Cancelled,
    #[error("failed to write output file: {0}")]
    WriteOutput(std::io::Error),
}

/// Run `program` with `input` piped to stdin, collecting stdout.
///
/// Cancelling the token abandons the wait; `kill_on_drop` then takes the
/// child down with the dropped future.
pub(crate) async fn run_piped(
    program: &'static str,
    args: &[String],
    input: &[u8],
    token: &CancellationToken,
) -> Result<Vec<u8>, ConvertError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ConvertError::Spawn { program, source: e })?;

    let stdin = child.stdin.take();
    let feed = async {
        if let Some(mut stdin) = stdin {
            // write errors mean the child exited early; its status tells why
            let _ = stdin.write_all(input).await;
            let _ = stdin.shutdown().await;
        }
    };

    // stdin is fed while stdout/stderr drain, otherwise a full pipe stalls
    // the child and the write never finishes
    let output = tokio::select! {
        _ = token.cancelled() => return Err(ConvertError::Cancelled),
        joined = async { tokio::join!(feed, child.wait_with_output()) } => {
            let (_, output) = joined;
            output.map_err(|e| ConvertError::Io { program, source: e })?
        }
    };

    if !output.status.success() {
        let mut stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if stderr.len() > STDERR_EXCERPT_LIMIT {
            let mut end = STDERR_EXCERPT_LIMIT;
            while !stderr.is_char_boundary(end) {
                end -= 1;
            }
            stderr.truncate(end);
        }
        return Err(ConvertError::TranscoderFailed { program, stderr });
    }

    if output.stdout.is_empty() {
        return Err(ConvertError::EmptyOutput { program });
    }

    Ok(output.stdout)
}

/// First line of `ffmpeg -version`, for the health endpoint.
pub async fn ffmpeg_version() -> String {
    match Command::new("ffmpeg").arg("-version").output().await {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string(),
        _ => "unknown".to_string(),
    }
}

/// Lifetime conversion counters for one converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConverterStats {
    pub total_conversions: u64,
    pub failed_conversions: u64,
    pub avg_duration: Duration,
}

pub(crate) struct StatsCell {
    inner: Mutex<ConverterStats>,
}

impl StatsCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(ConverterStats::default()),
        }
    }

    pub(crate) fn record_success(&self, elapsed: Duration) {
        let mut stats = self.inner.lock().expect("converter stats lock poisoned");
        stats.total_conversions += 1;
        stats.avg_duration = (stats.avg_duration * 9 + elapsed) / 10;
    }

    pub(crate) fn record_failure(&self) {
        let mut stats = self.inner.lock().expect("converter stats lock poisoned");
        stats.failed_conversions += 1;
    }

    pub(crate) fn snapshot(&self) -> ConverterStats {
        *self.inner.lock().expect("converter stats lock poisoned")
    }
}

/// `{device_id}_{url_key_prefix_8}_{unix_seconds}{ext}` inside `dir`.
pub(crate) fn artifact_path(
    dir: &std::path::Path,
    device_id: &str,
    url_key: &str,
    extension: &str,
) -> std::path::PathBuf {
    let prefix = &url_key[..url_key.len().min(8)];
    let timestamp = chrono::Utc::now().timestamp();
    dir.join(format!("{device_id}_{prefix}_{timestamp}{extension}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn artifact_path_has_expected_shape() {
        let key = "0123456789abcdef0123456789abcdef";
        let path = artifact_path(Path::new("/cache/audio"), "device-1", key, ".opus");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("device-1_01234567_"));
        assert!(name.ends_with(".opus"));
        assert_eq!(path.parent().unwrap(), Path::new("/cache/audio"));
    }

    #[test]
    fn stats_cell_tracks_success_and_failure() {
        let cell = StatsCell::new();
        cell.record_success(Duration::from_millis(100));
        cell.record_success(Duration::from_millis(100));
        cell.record_failure();

        let stats = cell.snapshot();
        assert_eq!(stats.total_conversions, 2);
        assert_eq!(stats.failed_conversions, 1);
        assert!(stats.avg_duration > Duration::ZERO);
        assert!(stats.avg_duration <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn run_piped_reports_missing_program() {
        let token = CancellationToken::new();
        let result = run_piped("definitely-not-a-real-binary", &[], b"x", &token).await;
        assert!(matches!(result, Err(ConvertError::Spawn { .. })));
    }

    #[tokio::test]
    async fn run_piped_captures_stdout() {
        let token = CancellationToken::new();
        let output = run_piped("cat", &[], b"pass-through", &token).await.unwrap();
        assert_eq!(output, b"pass-through");
    }

    #[tokio::test]
    async fn run_piped_rejects_empty_stdout() {
        let token = CancellationToken::new();
        let args = vec!["-c".to_string(), "exit 0".to_string()];
        let result = run_piped("sh", &args, b"", &token).await;
        assert!(matches!(result, Err(ConvertError::EmptyOutput { .. })));
    }

    #[tokio::test]
    async fn run_piped_surfaces_stderr_on_failure() {
        let token = CancellationToken::new();
        let args = vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()];
        let result = run_piped("sh", &args, b"", &token).await;
        match result {
            Err(ConvertError::TranscoderFailed { stderr, .. }) => {
                assert!(stderr.contains("broken"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn run_piped_cancellation_kills_child() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let started = std::time::Instant::now();
        let result = run_piped("sh", &args, b"", &token).await;
        assert!(matches!(result, Err(ConvertError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

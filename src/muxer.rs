//! The external muxer collaborator: an `ffmpeg` subprocess invoked to cut
//! boundary segments, concatenate the middle run, and assemble the final
//! container.
//!
//! Video re-encoding settings per codec mirror what upstream muxing tools
//! typically default to for a lossless-looking cut at a non-keyframe
//! boundary; audio is always stream-copied.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{RewindError, Result};

fn default_video_encoding_args(codec_name: &str) -> Result<Vec<String>> {
    let args: &[&str] = match codec_name {
        "h264" => &["libx264", "-crf", "18"],
        "vp9" => &["libvpx-vp9", "-crf", "31", "-b:v", "0"],
        "av1" => &["libaom-av1", "-crf", "31"],
        other => {
            return Err(RewindError::Muxer {
                stage: "select video encoder".to_string(),
                stderr: format!("no default encoding settings for video codec '{other}'"),
            })
        }
    };
    Ok(args.iter().map(|s| s.to_string()).collect())
}

async fn run_ffmpeg(ffmpeg_path: &str, args: &[String], stage: &str) -> Result<()> {
    let mut full_args = vec![
        "-hide_banner".to_string(),
        "-nostats".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-nostdin".to_string(),
    ];
    full_args.extend_from_slice(args);

    let output = Command::new(ffmpeg_path)
        .args(&full_args)
        .output()
        .await
        .map_err(|e| RewindError::io(e, ffmpeg_path))?;

    if !output.status.success() {
        return Err(RewindError::Muxer {
            stage: stage.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

async fn probe_duration_ms(path: &Path) -> Result<i64> {
    let info = ffprobe::ffprobe(path).map_err(|e| RewindError::Muxer {
        stage: "probe boundary segment duration".to_string(),
        stderr: e.to_string(),
    })?;
    let seconds: f64 = info
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| RewindError::Muxer {
            stage: "probe boundary segment duration".to_string(),
            stderr: "ffprobe returned no duration".to_string(),
        })?;
    Ok((seconds * 1000.0).round() as i64)
}

fn codec_name_of(info: &ffprobe::FfProbeOutput) -> Option<String> {
    info.streams.iter().find(|s| s.codec_type.as_deref() == Some("video")).and_then(|s| s.codec_name.clone())
}

/// Where a boundary segment pair should be cut.
#[derive(Debug, Clone, Copy)]
pub enum Cut {
    /// Drop the first `ms` milliseconds.
    Start(i64),
    /// Drop the last `ms` milliseconds.
    End(i64),
    /// No trimming — a plain stream-copy mux.
    None,
}

/// Muxes one sequence's audio and/or video segment, optionally trimmed at a
/// boundary, into `output_path`.
#[tracing::instrument(level = "debug", skip(ffmpeg_path))]
pub async fn mux_and_cut_boundary_segment(
    ffmpeg_path: &str,
    audio_path: Option<&Path>,
    video_path: Option<&Path>,
    output_path: &Path,
    cut: Cut,
) -> Result<()> {
    if audio_path.is_none() && video_path.is_none() {
        return Err(RewindError::Muxer {
            stage: "mux boundary segment".to_string(),
            stderr: "neither an audio nor a video path was given".to_string(),
        });
    }

    let cut_ms = match cut {
        Cut::Start(ms) | Cut::End(ms) => ms,
        Cut::None => 0,
    };

    if cut_ms <= 0 {
        let mut args = Vec::new();
        if let Some(v) = video_path {
            args.push("-i".to_string());
            args.push(v.display().to_string());
        }
        if let Some(a) = audio_path {
            args.push("-i".to_string());
            args.push(a.display().to_string());
        }
        args.push("-c".to_string());
        args.push("copy".to_string());
        args.push(output_path.display().to_string());
        return run_ffmpeg(ffmpeg_path, &args, "mux boundary segment (no cut)").await;
    }

    let mut input_args = Vec::new();
    let mut codec_args = Vec::new();

    if let Some(video) = video_path {
        match cut {
            Cut::Start(ms) => {
                input_args.push("-ss".to_string());
                input_args.push(format!("{ms}ms"));
                input_args.push("-i".to_string());
                input_args.push(video.display().to_string());
            }
            Cut::End(ms) => {
                let duration_ms = probe_duration_ms(video).await?;
                let end_seek_ms = duration_ms - ms;
                input_args.push("-i".to_string());
                input_args.push(video.display().to_string());
                input_args.push("-to".to_string());
                input_args.push(format!("{end_seek_ms}ms"));
            }
            Cut::None => unreachable!(),
        }

        let info = ffprobe::ffprobe(video).map_err(|e| RewindError::Muxer {
            stage: "probe video codec".to_string(),
            stderr: e.to_string(),
        })?;
        let codec_name = codec_name_of(&info).ok_or_else(|| RewindError::Muxer {
            stage: "probe video codec".to_string(),
            stderr: "no video stream found".to_string(),
        })?;
        codec_args.push("-c:v".to_string());
        codec_args.extend(default_video_encoding_args(&codec_name)?);
    }

    if let Some(audio) = audio_path {
        match cut {
            Cut::Start(ms) => {
                input_args.push("-ss".to_string());
                input_args.push(format!("{ms}ms"));
                input_args.push("-i".to_string());
                input_args.push(audio.display().to_string());
            }
            Cut::End(ms) => {
                let duration_ms = probe_duration_ms(audio).await?;
                let end_seek_ms = duration_ms - ms;
                input_args.push("-i".to_string());
                input_args.push(audio.display().to_string());
                input_args.push("-to".to_string());
                input_args.push(format!("{end_seek_ms}ms"));
            }
            Cut::None => unreachable!(),
        }
        codec_args.push("-c:a".to_string());
        codec_args.push("copy".to_string());
    }

    let mut args = input_args;
    args.extend(codec_args);
    args.push(output_path.display().to_string());
    run_ffmpeg(ffmpeg_path, &args, "mux and cut boundary segment").await
}

/// Writes an ffmpeg concat-demuxer list file naming `paths` in order.
fn write_concat_file(scratch_dir: &Path, suffix: &str, paths: &[PathBuf]) -> Result<PathBuf> {
    let concat_path = scratch_dir.join(format!("concat_{suffix}"));
    let mut content = String::new();
    for path in paths {
        content.push_str(&format!("file '{}'\n", path.display()));
    }
    fs_err::write(&concat_path, content).map_err(|e| RewindError::io(e, &concat_path))?;
    Ok(concat_path)
}

/// Concatenates separate audio-only and video-only concat lists into one
/// container in a single pass (used for the "no cut" / `no_merge=false`,
/// zero-trim path).
#[tracing::instrument(level = "debug", skip(ffmpeg_path))]
pub async fn concat_audio_and_video_streams(
    ffmpeg_path: &str,
    scratch_dir: &Path,
    audio_paths: &[PathBuf],
    video_paths: &[PathBuf],
    output_path: &Path,
) -> Result<()> {
    let mut args = Vec::new();
    if !video_paths.is_empty() {
        let concat = write_concat_file(scratch_dir, "video", video_paths)?;
        args.extend(["-safe".to_string(), "0".to_string(), "-f".to_string(), "concat".to_string(), "-i".to_string(), concat.display().to_string()]);
    }
    if !audio_paths.is_empty() {
        let concat = write_concat_file(scratch_dir, "audio", audio_paths)?;
        args.extend(["-safe".to_string(), "0".to_string(), "-f".to_string(), "concat".to_string(), "-i".to_string(), concat.display().to_string()]);
    }
    args.push("-c".to_string());
    args.push("copy".to_string());
    args.push(output_path.display().to_string());
    run_ffmpeg(ffmpeg_path, &args, "concatenate audio and video streams").await
}

/// Concatenates the three (or fewer) muxed parts into the final output
/// container.
#[tracing::instrument(level = "debug", skip(ffmpeg_path))]
pub async fn concat_parts(ffmpeg_path: &str, scratch_dir: &Path, parts: &[PathBuf], output_path: &Path) -> Result<()> {
    if parts.len() == 1 {
        let args = vec!["-i".to_string(), parts[0].display().to_string(), "-c".to_string(), "copy".to_string(), output_path.display().to_string()];
        return run_ffmpeg(ffmpeg_path, &args, "finalize single-part output").await;
    }
    let concat_path = write_concat_file(scratch_dir, "parts", parts)?;
    let args = vec![
        "-safe".to_string(),
        "0".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-i".to_string(),
        concat_path.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output_path.display().to_string(),
    ];
    run_ffmpeg(ffmpeg_path, &args, "finalize multi-part output").await
}

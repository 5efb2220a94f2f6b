//! Deterministic ffmpeg job construction.
//!
//! Inputs are the segment images (looped stills) followed by the segment
//! narration tracks. The filter graph normalizes every still, optionally
//! burns in its caption, chains `xfade` transitions at the timeline offsets,
//! and mixes the narration tracks delayed to their clip starts.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::caption::{CaptionStyle, drawtext_filter};
use crate::timeline::Timeline;

/// Fixed output encoding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_codec: String,
    pub audio_codec: String,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    pub preset: String,
    pub threads: u32,
}

/// One segment's inputs, already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipSource {
    pub image_path: PathBuf,
    pub audio_path: PathBuf,
    pub duration_secs: f64,
    /// Caption text file, when captions are enabled.
    pub caption_file: Option<PathBuf>,
}

/// A fully specified mux: ready to hand to a [`Muxer`](crate::Muxer).
#[derive(Debug, Clone, PartialEq)]
pub struct MuxJob {
    pub clips: Vec<ClipSource>,
    pub filter_graph: String,
    pub duration_secs: f64,
    pub output: PathBuf,
    pub encoding: EncodingSettings,
}

impl MuxJob {
    /// Assemble the job for `clips` laid out on `timeline`.
    ///
    /// `audio_fade_secs` is applied at both ends of every narration track and
    /// capped at half its clip.
    pub fn build(
        clips: Vec<ClipSource>,
        timeline: &Timeline,
        encoding: EncodingSettings,
        captions: Option<&CaptionStyle>,
        audio_fade_secs: f64,
        output: impl Into<PathBuf>,
    ) -> Self {
        let filter_graph = filter_graph(&clips, timeline, &encoding, captions, audio_fade_secs);
        Self {
            clips,
            filter_graph,
            duration_secs: timeline.total_secs,
            output: output.into(),
            encoding,
        }
    }

    /// Full ffmpeg argument list (without the binary).
    pub fn to_ffmpeg_args(&self) -> Vec<OsString> {
        let enc = &self.encoding;
        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-nostdin"]
            .into_iter()
            .map(OsString::from)
            .collect();

        for clip in &self.clips {
            args.extend(
                [
                    "-loop".to_string(),
                    "1".to_string(),
                    "-framerate".to_string(),
                    enc.fps.to_string(),
                    "-t".to_string(),
                    secs(clip.duration_secs),
                    "-i".to_string(),
                ]
                .map(OsString::from),
            );
            args.push(clip.image_path.clone().into_os_string());
        }
        for clip in &self.clips {
            args.push("-i".into());
            args.push(clip.audio_path.clone().into_os_string());
        }

        let tail = [
            "-filter_complex".to_string(),
            self.filter_graph.clone(),
            "-map".into(),
            "[outv]".into(),
            "-map".into(),
            "[outa]".into(),
            "-c:v".into(),
            enc.video_codec.clone(),
            "-preset".into(),
            enc.preset.clone(),
            "-b:v".into(),
            enc.video_bitrate.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-r".into(),
            enc.fps.to_string(),
            "-threads".into(),
            enc.threads.to_string(),
            "-c:a".into(),
            enc.audio_codec.clone(),
            "-b:a".into(),
            enc.audio_bitrate.clone(),
            "-t".into(),
            secs(self.duration_secs),
            "-movflags".into(),
            "+faststart".into(),
            "-f".into(),
            "mp4".into(),
        ];
        args.extend(tail.map(OsString::from));
        args.push(self.output.clone().into_os_string());
        args
    }

    /// Path ffmpeg writes to.
    pub fn output(&self) -> &Path {
        &self.output
    }
}

fn secs(value: f64) -> String {
    format!("{value:.3}")
}

fn filter_graph(
    clips: &[ClipSource],
    timeline: &Timeline,
    enc: &EncodingSettings,
    captions: Option<&CaptionStyle>,
    audio_fade_secs: f64,
) -> String {
    let n = clips.len();
    let overlap = timeline.overlap_secs;
    let mut chains: Vec<String> = Vec::with_capacity(2 * n + 2);

    // Normalize each still. Captions fade with the clip's own clock, over
    // the same length as the clip's visual fade.
    for (i, (clip, placement)) in clips.iter().zip(&timeline.clips).enumerate() {
        let mut chain = format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p",
            w = enc.width,
            h = enc.height,
            fps = enc.fps,
        );
        if let (Some(style), Some(file)) = (captions, &clip.caption_file) {
            chain.push(',');
            chain.push_str(&drawtext_filter(
                file,
                style,
                clip.duration_secs,
                placement.fade_in_secs,
            ));
        }
        let _ = write!(chain, "[v{i}]");
        chains.push(chain);
    }

    // Chain transitions at each clip's start offset.
    let joined = if n == 1 {
        "v0".to_string()
    } else if overlap > 0.0 {
        let mut current = "v0".to_string();
        for (i, placement) in timeline.clips.iter().enumerate().skip(1) {
            let label = format!("x{i}");
            chains.push(format!(
                "[{current}][v{i}]xfade=transition=fade:duration={:.3}:offset={:.3}[{label}]",
                overlap, placement.start_secs
            ));
            current = label;
        }
        current
    } else {
        let inputs: String = (0..n).map(|i| format!("[v{i}]")).collect();
        chains.push(format!("{inputs}concat=n={n}:v=1:a=0[vcat]"));
        "vcat".to_string()
    };

    // Fade the whole video from and to black, even a single clip.
    let fade_in = timeline.clips.first().map_or(0.0, |c| c.fade_in_secs);
    let fade_out = timeline.clips.last().map_or(0.0, |c| c.fade_out_secs);
    if fade_in > 0.0 || fade_out > 0.0 {
        chains.push(format!(
            "[{joined}]fade=t=in:st=0:d={fade_in:.3},fade=t=out:st={st:.3}:d={fade_out:.3}[outv]",
            st = (timeline.total_secs - fade_out).max(0.0),
        ));
    } else {
        chains.push(format!("[{joined}]null[outv]"));
    }

    // Narration: fade each track, shift it to its clip start, then mix.
    for (i, (clip, placement)) in clips.iter().zip(&timeline.clips).enumerate() {
        let fade = audio_fade_secs.clamp(0.0, clip.duration_secs / 2.0);
        let delay_ms = (placement.start_secs * 1000.0).round() as u64;
        chains.push(format!(
            "[{input}:a]aformat=sample_rates=44100:channel_layouts=stereo,\
             afade=t=in:st=0:d={fade:.3},afade=t=out:st={out:.3}:d={fade:.3},\
             adelay={delay_ms}|{delay_ms}[a{i}]",
            input = n + i,
            out = (clip.duration_secs - fade).max(0.0),
        ));
    }
    if n == 1 {
        chains.push("[a0]anull[outa]".to_string());
    } else {
        let inputs: String = (0..n).map(|i| format!("[a{i}]")).collect();
        chains.push(format!(
            "{inputs}amix=inputs={n}:duration=longest:dropout_transition=0:normalize=0[outa]"
        ));
    }

    chains.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding() -> EncodingSettings {
        EncodingSettings {
            width: 768,
            height: 432,
            fps: 24,
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            video_bitrate: "8000k".into(),
            audio_bitrate: "384k".into(),
            preset: "medium".into(),
            threads: 4,
        }
    }

    fn clips(durations: &[f64]) -> Vec<ClipSource> {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| ClipSource {
                image_path: PathBuf::from(format!("/out/images/image_{i}.png")),
                audio_path: PathBuf::from(format!("/tmp/run/narration_{i}.wav")),
                duration_secs: *d,
                caption_file: None,
            })
            .collect()
    }

    fn job(durations: &[f64], overlap: f64) -> MuxJob {
        let timeline = Timeline::build(durations, overlap);
        MuxJob::build(clips(durations), &timeline, encoding(), None, 0.3, "/out/.story.mp4.partial")
    }

    #[test]
    fn xfade_offsets_follow_timeline() {
        let job = job(&[22.0, 24.5, 23.0, 25.5, 25.0], 0.5);
        let graph = &job.filter_graph;

        assert!(graph.contains("[v0][v1]xfade=transition=fade:duration=0.500:offset=21.500[x1]"));
        assert!(graph.contains("[x1][v2]xfade=transition=fade:duration=0.500:offset=45.500[x2]"));
        assert!(graph.contains("[x3][v4]xfade=transition=fade:duration=0.500:offset=93.000[x4]"));
        assert!(graph.contains("[x4]fade=t=in:st=0:d=0.500,fade=t=out:st=117.500:d=0.500[outv]"));
        assert!(graph.contains("adelay=93000|93000[a4]"));
        assert!(graph.contains("amix=inputs=5"));
        assert_eq!(job.duration_secs, 118.0);
    }

    #[test]
    fn args_carry_encoding_and_inputs() {
        let job = job(&[30.0, 30.0], 0.5);
        let args: Vec<String> = job
            .to_ffmpeg_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let pos = |flag: &str| args.iter().position(|a| a == flag).expect(flag);
        assert_eq!(args[pos("-c:v") + 1], "libx264");
        assert_eq!(args[pos("-b:v") + 1], "8000k");
        assert_eq!(args[pos("-c:a") + 1], "aac");
        assert_eq!(args[pos("-b:a") + 1], "384k");
        assert_eq!(args[pos("-preset") + 1], "medium");
        assert_eq!(args[pos("-r") + 1], "24");
        assert_eq!(args[pos("-threads") + 1], "4");
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 4);
        assert!(args.contains(&"59.500".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/out/.story.mp4.partial"));
    }

    #[test]
    fn single_clip_fades_without_transition() {
        let job = job(&[12.0], 0.5);
        assert!(!job.filter_graph.contains("xfade"));
        assert!(job.filter_graph.contains("[v0]fade=t=in:st=0:d=0.500,fade=t=out:st=11.500:d=0.500[outv]"));
        assert!(job.filter_graph.contains("[a0]anull[outa]"));
        assert_eq!(job.duration_secs, 12.0);
    }

    #[test]
    fn zero_overlap_concatenates() {
        let job = job(&[5.0, 6.0, 7.0], 0.0);
        assert!(job.filter_graph.contains("[v0][v1][v2]concat=n=3:v=1:a=0[vcat]"));
        assert!(job.filter_graph.contains("[vcat]null[outv]"));
        assert_eq!(job.duration_secs, 18.0);
    }

    #[test]
    fn captions_are_burned_per_clip() {
        let timeline = Timeline::build(&[10.0, 10.0], 0.5);
        let mut sources = clips(&[10.0, 10.0]);
        for (i, clip) in sources.iter_mut().enumerate() {
            clip.caption_file = Some(PathBuf::from(format!("/scratch/caption_{i}.txt")));
        }
        let style = CaptionStyle {
            wrap_width: 50,
            font_size: 24,
            font_file: None,
        };
        let job = MuxJob::build(sources, &timeline, encoding(), Some(&style), 0.3, "/out/x.mp4");

        assert!(job.filter_graph.contains("textfile='/scratch/caption_0.txt'"));
        assert!(job.filter_graph.contains("textfile='/scratch/caption_1.txt'"));
        assert_eq!(job.filter_graph.matches(":expansion=none").count(), 2);
    }

    #[test]
    fn identical_input_gives_identical_job() {
        assert_eq!(job(&[20.0, 25.0, 30.0, 45.0], 0.5), job(&[20.0, 25.0, 30.0, 45.0], 0.5));
    }
}

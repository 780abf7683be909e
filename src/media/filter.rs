//! Crossfade timing and encoder argument construction

use std::path::{Path, PathBuf};

/// Fade-in length between two images, in seconds
pub const DEFAULT_TRANSITION: f64 = 0.8;

/// Resolution of every rendered video
pub const OUTPUT_RESOLUTION: &str = "1920x1080";

const LOG_LEVEL: &str = "8";

/// One still image shown for `duration` seconds
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub image: PathBuf,
    pub duration: f64,
}

/// Start offset of every clip: the running sum of all earlier durations
pub fn start_offsets(durations: &[f64]) -> Vec<f64> {
    durations
        .iter()
        .scan(0.0, |elapsed, duration| {
            let start = *elapsed;
            *elapsed += duration;
            Some(start)
        })
        .collect()
}

/// Filter graph fading each image over its predecessor
///
/// Layer `f{i}` is input `i + 1`, faded in with alpha starting at that image's
/// start offset. Overlays are chained onto the running background `bg{j}` and the
/// last stage converts to `yuv420p` as `[v]`. Returns `None` for two or fewer
/// images; those are encoded without a graph.
pub fn crossfade_graph(durations: &[f64], transition: f64) -> Option<String> {
    let count = durations.len();
    if count <= 2 {
        return None;
    }

    let offsets = start_offsets(durations);
    let mut graph = String::new();
    for i in 0..count - 1 {
        graph.push_str(&format!(
            "[{}]format=yuva444p,fade=d={}:t=in:alpha=1,setpts=PTS-STARTPTS+{}/TB[f{}];",
            i + 1,
            transition,
            offsets[i + 1],
            i
        ));
    }
    for j in 0..count - 1 {
        if j == 0 {
            graph.push_str("[0][f0]overlay[bg1];");
        } else if j == count - 2 {
            graph.push_str(&format!("[bg{}][f{}]overlay,format=yuv420p[v]", j, j));
        } else {
            graph.push_str(&format!("[bg{}][f{}]overlay[bg{}];", j, j, j + 1));
        }
    }
    Some(graph)
}

/// Lines of an ffmpeg concat demuxer list
pub fn concat_list(audios: &[PathBuf]) -> String {
    audios
        .iter()
        .map(|audio| format!("file 'file:{}'\n", audio.display()))
        .collect()
}

/// Arguments concatenating the listed audio files without re-encoding
pub fn audio_concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-loglevel".to_string(),
        LOG_LEVEL.to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.display().to_string(),
    ]
}

/// Arguments rendering the clips, with the concatenated audio track if any
pub fn video_args(
    clips: &[Clip],
    audio: Option<&Path>,
    transition: f64,
    h264_nvenc: bool,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-loglevel".into(), LOG_LEVEL.into(), "-y".into()];

    for clip in clips {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-t".to_string(),
            clip.duration.to_string(),
            "-i".to_string(),
            clip.image.display().to_string(),
        ]);
    }

    if let Some(audio) = audio {
        args.extend([
            "-i".to_string(),
            audio.display().to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
        ]);
    }

    let durations: Vec<f64> = clips.iter().map(|c| c.duration).collect();
    match crossfade_graph(&durations, transition) {
        Some(graph) => {
            args.extend(["-filter_complex".to_string(), graph, "-map".to_string(), "[v]".to_string()]);
            if audio.is_some() {
                args.extend(["-map".to_string(), format!("{}:a", clips.len())]);
            }
        }
        None => args.extend(["-pix_fmt".to_string(), "yuv420p".to_string()]),
    }

    if h264_nvenc {
        args.extend(["-c:v".to_string(), "h264_nvenc".to_string()]);
    }

    args.extend([
        "-s".to_string(),
        OUTPUT_RESOLUTION.to_string(),
        output.display().to_string(),
    ]);
    args
}

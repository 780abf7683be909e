//! Test: Video Assembly - timelines, crossfade graphs and encoder calls

use crate::helpers::*;
use assert_matches::assert_matches;
use serde_json::json;
use tempfile::TempDir;
use visuflow::StepError;

/// Custom pattern durations drive the crossfade offsets
#[tokio::test]
async fn test_custom_pattern_offsets() {
    let yaml = r#"
name: custom
steps:
  - type: sequence
    sequence:
      type: custom
      transitions: 0.5
      pattern:
        - image: title
          time_diff: 2
        - image: chart
          time_diff: 3
        - image: outro
          time_diff: 4
    images:
      title: /img/title.png
      chart: /img/chart.png
      outro: /img/outro.png
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "custom"), MockEncoder::new()).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.invocations.len(), 1);

    let video = &outcome.invocations[0];
    assert_eq!(clip_durations(video), vec!["2", "3", "4"]);
    let graph = arg_after(video, "-filter_complex").unwrap();
    assert!(graph.contains("[1]format=yuva444p,fade=d=0.5:t=in:alpha=1,setpts=PTS-STARTPTS+2/TB[f0];"));
    assert!(graph.contains("[2]format=yuva444p,fade=d=0.5:t=in:alpha=1,setpts=PTS-STARTPTS+5/TB[f1];"));
    assert!(graph.ends_with("[bg1][f1]overlay,format=yuv420p[v]"));
    assert_eq!(arg_after(video, "-map"), Some("[v]"));
    assert!(video.env.is_empty());

    let expected = output_file(&dir, "custom");
    assert_eq!(video.args.last().map(String::as_str), Some(expected.to_str().unwrap()));
    assert_eq!(outcome.report().artifact.as_deref(), Some(expected.as_path()));
    assert_eq!(outcome.data_at("_sequence"), json!(expected.display().to_string()));
}

/// One image per audio clip; the clip length is the audio length
#[tokio::test]
async fn test_successively_with_audio_and_nvenc() {
    let yaml = r#"
name: successive
steps:
  - type: sequence
    sequence:
      type: successively
    images:
      today: /img/today.png
      tomorrow: /img/tomorrow.png
      later: /img/later.png
    audio:
      audios:
        today: /audio/today.mp3
        tomorrow: /audio/tomorrow.mp3
        later: /audio/later.mp3
"#;

    let dir = TempDir::new().unwrap();
    let mut config = job_config(&dir, "successive");
    config.h264_nvenc = true;
    let encoder = MockEncoder::new()
        .with_duration("today.mp3", 2.5)
        .with_duration("tomorrow.mp3", 3.0)
        .with_duration("later.mp3", 1.5);

    let outcome = run_document(yaml, config, encoder).await;

    assert_run_completed(&outcome);
    assert_eq!(outcome.invocations.len(), 2);

    let (concat, video) = (&outcome.invocations[0], &outcome.invocations[1]);
    assert_eq!(arg_after(concat, "-f"), Some("concat"));
    assert!(arg_after(concat, "-i").unwrap().ends_with("input.txt"));
    assert!(concat.args.last().unwrap().ends_with("audio.mp3"));

    assert_eq!(clip_durations(video), vec!["2.5", "3", "1.5"]);
    let graph = arg_after(video, "-filter_complex").unwrap();
    assert!(graph.contains("+2.5/TB[f0]"));
    assert!(graph.contains("+5.5/TB[f1]"));
    assert!(video.args.windows(2).any(|pair| pair[0] == "-map" && pair[1] == "3:a"));
    assert_eq!(arg_after(video, "-c:v"), Some("h264_nvenc"));

    for invocation in &outcome.invocations {
        assert!(invocation
            .env
            .iter()
            .any(|(key, _)| key == "LD_LIBRARY_PATH"));
    }
}

/// Two clips are encoded without a filter graph
#[tokio::test]
async fn test_two_clips_skip_filter_graph() {
    let yaml = r#"
name: short
steps:
  - type: sequence
    sequence:
      type: successively
    images:
      a: /img/a.png
      b: /img/b.png
    audio:
      audios:
        a: /audio/a.mp3
        b: /audio/b.mp3
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "short"), MockEncoder::new()).await;

    assert_run_completed(&outcome);
    let video = &outcome.invocations[1];
    assert!(arg_after(video, "-filter_complex").is_none());
    assert_eq!(arg_after(video, "-pix_fmt"), Some("yuv420p"));
    assert!(arg_after(video, "-c:v").is_none());
}

/// Every image needs an audio clip
#[tokio::test]
async fn test_more_images_than_audio_fails() {
    let yaml = r#"
name: uneven
steps:
  - type: sequence
    sequence:
      type: successively
    images:
      a: /img/a.png
      b: /img/b.png
    audio:
      audios:
        a: /audio/a.mp3
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "uneven"), MockEncoder::new()).await;

    assert_matches!(outcome.error(), StepError::Sequence { step_type, .. } if step_type == "successively");
    assert_matches!(
        outcome.error().root_cause(),
        StepError::InvalidValue { field, message } if field == "images" && message.contains("2 images for 1 audio")
    );
    assert!(outcome.invocations.is_empty());
}

/// Image paths and pattern names are templates
#[tokio::test]
async fn test_templated_paths_and_names() {
    let yaml = r#"
name: templated
steps:
  - type: input
    input:
      scene: chart
      pause: "1.5"
  - type: sequence
    sequence:
      type: custom
      pattern:
        - image: "{_req.scene}"
          time_diff: "{_req.pause}"
          audio_l: speech
    images:
      chart: "{_conf.assets}/chart.png"
    audio:
      audios:
        speech: "{_conf.assets}/speech.mp3"
"#;

    let dir = TempDir::new().unwrap();
    let mut config = job_config(&dir, "templated");
    config.extra.insert("assets".to_string(), json!("/srv/assets"));
    let encoder = MockEncoder::new().with_duration("speech.mp3", 2.0);

    let outcome = run_document(yaml, config, encoder).await;

    assert_run_completed(&outcome);
    let video = &outcome.invocations[1];
    assert_eq!(arg_after(video, "-i"), Some("/srv/assets/chart.png"));
    assert_eq!(clip_durations(video), vec!["3.5"]);
}

/// An unknown pattern name is a resolution error
#[tokio::test]
async fn test_unknown_pattern_image() {
    let yaml = r#"
name: missing
steps:
  - type: sequence
    sequence:
      type: custom
      pattern:
        - image: nowhere
          time_diff: 1
    images:
      chart: /img/chart.png
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "missing"), MockEncoder::new()).await;

    assert_matches!(
        outcome.error().root_cause(),
        StepError::DataResolution { path } if path == "images.nowhere"
    );
}

/// `out_time` stamps the output file name
#[tokio::test]
async fn test_out_time_names_output() {
    let yaml = r#"
name: stamped
steps:
  - type: sequence
    out_time: true
    key: video
    sequence:
      type: custom
      pattern:
        - image: only
          time_diff: 1
    images:
      only: /img/only.png
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "stamped"), MockEncoder::new()).await;

    assert_run_completed(&outcome);
    let artifact = outcome.report().artifact.clone().unwrap();
    let file_name = artifact.file_name().unwrap().to_str().unwrap().to_string();
    assert!(file_name.starts_with("stamped_"));
    assert!(file_name.ends_with(".mp4"));
    assert_eq!(file_name.len(), "stamped_2024-01-01_00-00-00.mp4".len());
    assert_eq!(outcome.data_at("video"), json!(artifact.display().to_string()));
}

/// The artifact path cannot be stored under a read-only binding
#[tokio::test]
async fn test_artifact_key_under_conf_fails_step() {
    let yaml = r#"
name: readonly
steps:
  - type: sequence
    key: _conf.video
    sequence:
      type: custom
      pattern:
        - image: only
          time_diff: 1
    images:
      only: /img/only.png
"#;

    let dir = TempDir::new().unwrap();
    let outcome = run_document(yaml, job_config(&dir, "readonly"), MockEncoder::new()).await;

    assert_matches!(outcome.error(), StepError::Sequence { step_type, .. } if step_type == "custom");
    assert_matches!(
        outcome.error().root_cause(),
        StepError::InvalidValue { field, .. } if field == "_conf.video"
    );
    assert_step_failed(&outcome, 0, "sequence 'custom' failed");
}

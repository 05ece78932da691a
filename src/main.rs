use std::{
    env, fs,
    io::{BufRead, BufReader},
    path::PathBuf,
    thread,
};

use anyhow::{Context, Result, anyhow, bail};
use sign_stream::{
    DetectionRequest, HandReply, KeypointFrame, LabelSet, OrtClassifierConfig, OrtSignClassifier,
    PipelineConfig, PoseReply, SignPipeline,
    keypoints::KEYPOINT_WIDTH,
    model_download::{CLASSIFIER_MODEL_URL_ENV, ensure_classifier_model_ready},
};

/// Capture interval assumed for replayed frames.
const FRAME_INTERVAL_MS: u64 = 33;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let (Some(model), Some(labels), Some(keypoints)) = (args.next(), args.next(), args.next())
    else {
        bail!("usage: sign-replay <model.onnx> <labels.txt> <keypoints.csv>");
    };
    let model_path = PathBuf::from(model);
    let keypoints_path = PathBuf::from(keypoints);

    let download_url = env::var(CLASSIFIER_MODEL_URL_ENV).ok();
    ensure_classifier_model_ready(&model_path, download_url.as_deref(), |event| {
        log::debug!("model download: {event:?}");
    })?;

    let labels = LabelSet::from_file(&PathBuf::from(labels))?;
    let config = PipelineConfig::default();
    let window_len = config
        .features
        .model_window_len
        .unwrap_or(config.temporal.capacity);
    let classifier =
        OrtSignClassifier::new(&model_path, window_len, OrtClassifierConfig::default())?;

    // Keypoints are read from disk, so the detectors are never asked.
    let (pipeline, states) = SignPipeline::start(
        config,
        |_: DetectionRequest, _: PoseReply| {},
        |_: DetectionRequest, _: HandReply| {},
        classifier,
        labels,
    )?;

    let printer = thread::spawn(move || {
        let mut sentence = String::new();
        for state in states {
            log::debug!("{}", state.display_text());
            if let Some(ref word) = state.newly_committed {
                println!("{word}");
            }
            sentence = state.sentence();
        }
        sentence
    });

    let file = fs::File::open(&keypoints_path)
        .with_context(|| format!("failed to open {}", keypoints_path.display()))?;
    let mut frames = 0u64;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", keypoints_path.display()))?;
        let keypoints = parse_keypoint_line(&line)
            .with_context(|| format!("{}:{}", keypoints_path.display(), index + 1))?;
        if !pipeline.submit_keypoints(frames * FRAME_INTERVAL_MS, keypoints) {
            bail!("pipeline stopped while replaying");
        }
        frames += 1;
    }
    pipeline.shutdown();

    let sentence = printer
        .join()
        .map_err(|_| anyhow!("state printer panicked"))?;
    log::info!("replayed {frames} frames");
    println!("{sentence}");
    Ok(())
}

/// One frame per line: 258 comma-separated floats, or an empty line for a
/// frame without detections.
fn parse_keypoint_line(line: &str) -> Result<Option<KeypointFrame>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let values = line
        .split(',')
        .map(|field| field.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid keypoint value")?;
    KeypointFrame::from_slice(&values)
        .map(Some)
        .ok_or_else(|| anyhow!("expected {KEYPOINT_WIDTH} values, got {}", values.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_is_missing_frame() {
        assert!(parse_keypoint_line("  ").unwrap().is_none());
    }

    #[test]
    fn parses_full_row() {
        let row = vec!["0.5"; KEYPOINT_WIDTH].join(",");
        let frame = parse_keypoint_line(&row).unwrap().unwrap();
        assert!(frame.as_slice().iter().all(|v| *v == 0.5));
    }

    #[test]
    fn rejects_short_or_garbled_rows() {
        assert!(parse_keypoint_line("0.1,0.2").is_err());
        assert!(parse_keypoint_line("0.1,abc").is_err());
    }
}

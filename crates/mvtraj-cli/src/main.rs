use std::{fs, path::Path};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mvtraj_pipeline::{
    ReconstructionConfig, ReconstructionInput, ReconstructionOutput, ReconstructionProblem,
    ReconstructionSession, run_reconstruction,
};

/// Reconstruct a 3D trajectory from unsynchronized multi-camera detections.
#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-camera trajectory reconstruction")]
struct Args {
    /// Path to JSON file containing ReconstructionInput.
    #[arg(long)]
    input: String,

    /// Optional path to JSON ReconstructionConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<String>,

    /// Where to write the output JSON. Falls back to `path_output` from the
    /// config, then to stdout.
    #[arg(long)]
    output: Option<String>,

    /// Also write the full session (state, events, log) to this path.
    #[arg(long)]
    snapshot: Option<String>,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn reconstruct_from_files(
    input_path: &str,
    config_path: Option<&str>,
) -> Result<ReconstructionSession<ReconstructionProblem>> {
    let input: ReconstructionInput = load_json_file(Path::new(input_path))?;

    let config = if let Some(cfg_path) = config_path {
        load_json_file::<ReconstructionConfig>(Path::new(cfg_path))?
    } else {
        ReconstructionConfig::default()
    };

    let mut session = ReconstructionSession::<ReconstructionProblem>::with_input(input)?;
    session.set_config(config)?;
    run_reconstruction(&mut session)?;
    Ok(session)
}

fn write_output_json(output: &ReconstructionOutput) -> Result<String> {
    Ok(serde_json::to_string_pretty(output)?)
}

fn main() {
    pretty_env_logger::init_timed();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let mut session = reconstruct_from_files(&args.input, args.config.as_deref())?;
    let json = write_output_json(&session.export()?)?;

    let output_path = args.output.or_else(|| session.config.path_output.clone());
    match output_path {
        Some(path) => {
            fs::write(&path, json).with_context(|| format!("writing {path}"))?;
            info!("output written to {path}");
        }
        None => println!("{json}"),
    }

    if let Some(path) = args.snapshot {
        fs::write(&path, session.to_json()?).with_context(|| format!("writing {path}"))?;
        info!("session snapshot written to {path}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvtraj_core::synthetic::{SceneOptions, SyntheticScene};
    use mvtraj_pipeline::reconstruction::CameraInput;
    use serde_json::{Value, json};
    use tempfile::NamedTempFile;

    fn synthetic_input() -> ReconstructionInput {
        let mut opts = SceneOptions::default();
        opts.cameras.truncate(2);
        let scene = SyntheticScene::generate(&opts);
        ReconstructionInput {
            cameras: scene
                .cameras
                .iter()
                .enumerate()
                .map(|(i, cam)| CameraInput {
                    name: format!("cam{i}"),
                    intrinsics: cam.intrinsics,
                    fps: cam.fps,
                    resolution: cam.resolution,
                    detections: cam.detections.clone(),
                    time_prior: Some(cam.time),
                })
                .collect(),
            reference_camera: 0,
        }
    }

    /// Rewrites detections into the `[frame, u, v]` row form.
    fn with_raw_detections(input: &ReconstructionInput) -> Value {
        let mut value = serde_json::to_value(input).unwrap();
        for (cam, src) in value["cameras"]
            .as_array_mut()
            .unwrap()
            .iter_mut()
            .zip(&input.cameras)
        {
            cam["detections"] = json!(
                src.detections
                    .iter()
                    .map(|d| d.to_raw())
                    .collect::<Vec<_>>()
            );
        }
        value
    }

    #[test]
    fn helper_smoke_test() {
        let input = synthetic_input();
        let config = json!({
            "time_shift": false,
            "knot_spacing": 4.0,
            "thres_Fmatix": 2.0,
        });
        let input_file = NamedTempFile::new().unwrap();
        let config_file = NamedTempFile::new().unwrap();
        fs::write(input_file.path(), with_raw_detections(&input).to_string()).unwrap();
        fs::write(config_file.path(), config.to_string()).unwrap();

        let mut session = reconstruct_from_files(
            input_file.path().to_str().unwrap(),
            Some(config_file.path().to_str().unwrap()),
        )
        .expect("cli helper should succeed");

        assert!(!session.config.time_shift);
        let json = write_output_json(&session.export().unwrap()).unwrap();
        let output: ReconstructionOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(output.sequence, vec![0, 1]);
        assert!(!output.trajectory.is_empty());
        for cam in &output.cameras {
            let err = cam.mean_error.unwrap();
            assert!(err < 0.5, "{}: mean error {err} px", cam.name);
        }
    }

    #[test]
    fn missing_input_file_reports_path() {
        let err = reconstruct_from_files("/nonexistent/input.json", None).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/input.json"));
    }
}

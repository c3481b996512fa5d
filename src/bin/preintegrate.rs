use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Parser;
use flate2::read::GzDecoder;
use imu_preintegration::types::{AccelData, GyroData, O_BA, O_BG, O_P, O_R, O_V};
use imu_preintegration::{BiasEstimate, ImuPreintegration, PreintegrationConfig};
use log::{info, warn};
use nalgebra::{Matrix3, Vector3};
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "preintegrate")]
#[command(about = "Preintegrate an IMU log into a single relative-motion window", long_about = None)]
struct Args {
    /// Path to an IMU log (*.json or *.json.gz)
    #[arg(long)]
    log: PathBuf,

    /// Optional preintegration config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Accelerometer bias linearization point "x,y,z" [m/s²]
    #[arg(long, value_parser = parse_vec3, default_value = "0,0,0")]
    ba: Vector3<f64>,

    /// Gyroscope bias linearization point "x,y,z" [rad/s]
    #[arg(long, value_parser = parse_vec3, default_value = "0,0,0")]
    bg: Vector3<f64>,

    /// Replay the window with this accelerometer bias after integrating
    #[arg(long, value_parser = parse_vec3)]
    replay_ba: Option<Vector3<f64>>,

    /// Replay the window with this gyroscope bias after integrating
    #[arg(long, value_parser = parse_vec3)]
    replay_bg: Option<Vector3<f64>>,

    /// Skip samples that fail validation instead of aborting
    #[arg(long, default_value_t = false)]
    skip_invalid: bool,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    accel: Option<AccelData>,
    gyro: Option<GyroData>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn parse_vec3(s: &str) -> Result<Vector3<f64>, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => Err(format!("expected 3 comma-separated values, got {}", parts.len())),
    }
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn block(m: &imu_preintegration::types::StateMat15, row: usize, col: usize) -> Vec<Vec<f64>> {
    let b: Matrix3<f64> = m.fixed_view::<3, 3>(row, col).into_owned();
    b.row_iter().map(|r| r.iter().copied().collect()).collect()
}

fn vec3(v: &Vector3<f64>) -> [f64; 3] {
    [v.x, v.y, v.z]
}

fn report(preint: &ImuPreintegration, replayed: bool) -> serde_json::Value {
    let state = preint.state();
    let q = state.delta_q;
    let jac = preint.jacobian();
    let cov_diag: Vec<f64> = preint.covariance().diagonal().iter().copied().collect();

    json!({
        "generated_at": Utc::now().to_rfc3339(),
        "samples": preint.sample_count(),
        "replayed": replayed,
        "sum_dt": state.sum_dt,
        "bias": { "ba": vec3(&preint.bias().ba), "bg": vec3(&preint.bias().bg) },
        "delta_p": vec3(&state.delta_p),
        "delta_v": vec3(&state.delta_v),
        "delta_q": [q.w, q.i, q.j, q.k],
        "covariance_diagonal": cov_diag,
        "covariance_trace": preint.covariance().trace(),
        "bias_jacobians": {
            "dp_dba": block(jac, O_P, O_BA),
            "dp_dbg": block(jac, O_P, O_BG),
            "dq_dbg": block(jac, O_R, O_BG),
            "dv_dba": block(jac, O_V, O_BA),
            "dv_dbg": block(jac, O_V, O_BG),
        },
    })
}

fn run(args: &Args) -> anyhow::Result<serde_json::Value> {
    let config = match &args.config {
        Some(path) => PreintegrationConfig::load(path)?,
        None => PreintegrationConfig::default(),
    };

    let log = load_log(&args.log)?;
    let mut samples = log
        .readings
        .iter()
        .filter_map(|r| match (&r.accel, &r.gyro) {
            (Some(a), Some(g)) => Some((r.timestamp, a.vector(), g.vector())),
            _ => None,
        });

    let Some((mut last_ts, acc0, gyr0)) = samples.next() else {
        anyhow::bail!("log {} has no paired accel/gyro readings", args.log.display());
    };

    let mut preint = ImuPreintegration::new(acc0, gyr0, BiasEstimate::new(args.ba, args.bg), config)?;
    let mut skipped = 0usize;

    for (ts, accel, gyro) in samples {
        match preint.record(ts - last_ts, accel, gyro) {
            Ok(()) => last_ts = ts,
            Err(err) if args.skip_invalid => {
                warn!("skipping reading at t={ts:.6}: {err}");
                skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }

    info!(
        "integrated {} samples over {:.3}s ({} skipped)",
        preint.sample_count(),
        preint.sum_dt(),
        skipped
    );

    let replayed = args.replay_ba.is_some() || args.replay_bg.is_some();
    if replayed {
        let bias = BiasEstimate::new(
            args.replay_ba.unwrap_or(args.ba),
            args.replay_bg.unwrap_or(args.bg),
        );
        if let Err(err) = preint.check_linearization(&bias) {
            warn!("{err}");
        }
        preint.replay(bias)?;
    }

    let mut value = report(&preint, replayed);
    value["skipped"] = json!(skipped);
    Ok(value)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let value = run(&args)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

use anyhow::Context;
use clap::Parser;
use optram::PipelineConfig;
use std::path::PathBuf;

/// Retrieve and validate OPTRAM soil moisture for a scene corpus
#[derive(Parser, Debug)]
#[command(name = "optram", version, about)]
struct Args {
    /// JSON run configuration
    config: PathBuf,

    /// Override the output directory of the configuration
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Override the maximum accepted cloud cover (percent)
    #[arg(long)]
    max_cloud_cover: Option<f64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    if let Some(dir) = args.output_dir {
        config.output_dir = Some(dir);
    }
    if let Some(max) = args.max_cloud_cover {
        config.max_cloud_cover = max;
    }

    let report = optram::run(&config)?;

    println!(
        "{} scenes processed, {} failed, {} rejected by cloud cover",
        report.scenes_processed.len(),
        report.failures.len(),
        report.scenes_rejected.len()
    );
    if let Some(c) = &report.calibration {
        println!("calibration: theta = {:.4} * W + {:.4}", c.a, c.b);
    }
    if let Some(m) = &report.metrics {
        println!(
            "validation ({} pairs): RMSE {:.4}  MAE {:.4}  R2 {:.4}",
            m.paired, m.rmse, m.mae, m.r_squared
        );
    }

    Ok(())
}

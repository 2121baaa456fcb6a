use gravsim::network::transport;
use gravsim::{bench_gravity, bench_step, bench_step_curve};
use gravsim::{AuthoritativeServer, ScenarioConfig};

use anyhow::{Context, Result};
use clap::Parser;

use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(about = "Authoritative N-body gravity server")]
struct Args {
    /// Scenario file, looked up under `scenarios/` unless it is an existing path
    #[arg(short, default_value = "solar_system.yaml")]
    file_name: String,

    /// Override the bind address from the scenario
    #[arg(long)]
    bind: Option<String>,

    /// Run the solver benchmarks instead of serving
    #[arg(long)]
    bench: bool,

    /// Print the ms-per-tick curve as CSV instead of serving
    #[arg(long)]
    bench_curve: bool,
}

fn scenario_path(file_name: &str) -> PathBuf {
    let direct = PathBuf::from(file_name);
    if direct.is_file() {
        return direct;
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(file_name)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.bench || args.bench_curve {
        if args.bench {
            bench_gravity();
            bench_step();
        }
        if args.bench_curve {
            bench_step_curve();
        }
        return Ok(());
    }

    let path = scenario_path(&args.file_name);
    let mut scenario_cfg =
        ScenarioConfig::load(&path).with_context(|| format!("failed to load scenario {}", path.display()))?;
    if let Some(bind) = args.bind {
        scenario_cfg.server.bind = bind;
    }

    let bind = scenario_cfg.server.bind.clone();
    let server = AuthoritativeServer::from_scenario(&scenario_cfg, Instant::now())?;
    transport::run(server, &bind).await?;

    Ok(())
}

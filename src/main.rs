// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use acoustic_fwi::config::RunConfig;
use acoustic_fwi::io;
use acoustic_fwi::objective::{simulate, FwiProblem, Objective};
use acoustic_fwi::optimize::invert;
use acoustic_fwi::scheduler::{ProgressInfo, ShotScheduler};
use acoustic_fwi::{ShotGather, TimeAxis, VelocityModel};

#[derive(Parser)]
#[command(name = "acoustic-fwi", about = "2D acoustic full waveform inversion")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Simulate observed gathers through the true model
    Forward(RunArgs),
    /// Write the misfit gradient at the starting model
    Gradient(RunArgs),
    /// Run the inversion and write the recovered model
    Invert(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// YAML run file
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Output directory (overrides the run file)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Number of worker threads (overrides the run file)
    #[arg(long)]
    threads: Option<usize>,

    /// Output format for arrays: npy, mat or json (json applies to gathers;
    /// models and gradients fall back to npy)
    #[arg(long, default_value = "npy")]
    format: String,

    /// Log shot progress (see --progress-interval)
    #[arg(long)]
    progress: bool,

    /// Progress reporting interval in milliseconds (used with --progress)
    #[arg(long, default_value = "500")]
    progress_interval: u64,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

struct Run {
    cfg: RunConfig,
    output: PathBuf,
    format: String,
    progress: Option<Duration>,
}

impl Run {
    fn prepare(args: &RunArgs) -> Result<Self> {
        let mut cfg = RunConfig::load(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        if let Some(threads) = args.threads {
            cfg.threads = Some(threads);
        }
        if let Some(output) = &args.output {
            cfg.output = output.clone();
        }
        cfg.validate()?;

        if !matches!(args.format.as_str(), "npy" | "mat" | "json") {
            bail!("--format must be npy, mat or json, got '{}'", args.format);
        }
        std::fs::create_dir_all(&cfg.output)
            .with_context(|| format!("creating {}", cfg.output.display()))?;

        Ok(Run {
            output: cfg.output.clone(),
            cfg,
            format: args.format.clone(),
            progress: args
                .progress
                .then(|| Duration::from_millis(args.progress_interval)),
        })
    }

    fn scheduler(&self) -> ShotScheduler {
        let mut scheduler = ShotScheduler::new();
        if let Some(threads) = self.cfg.threads {
            scheduler = scheduler.with_threads(threads);
        }
        if let Some(interval) = self.progress {
            scheduler = scheduler
                .with_progress_interval(interval)
                .with_progress(Box::new(|p: ProgressInfo| {
                    info!(
                        elapsed = format!("{:.1}s", p.elapsed.as_secs_f64()),
                        completed = p.shots_completed,
                        pending = p.pending,
                        in_flight = p.in_flight,
                        "shots"
                    );
                }));
        }
        scheduler
    }

    fn path(&self, stem: &str, array_only: bool) -> PathBuf {
        let ext = if array_only && self.format == "json" {
            "npy"
        } else {
            self.format.as_str()
        };
        self.output.join(format!("{}.{}", stem, ext))
    }

    fn save_model(&self, model: &VelocityModel, stem: &str) -> Result<()> {
        let path = self.path(stem, true);
        io::save_model(model, &path).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "wrote model");
        Ok(())
    }

    /// Observed data from the run file, or simulated through the true model.
    fn problem(&self, truth: &VelocityModel, time: TimeAxis) -> Result<FwiProblem> {
        let wavelet = self.cfg.source.wavelet.sample(&time);
        let sources = self.cfg.sources();
        let receivers = self.cfg.receivers.resolve();

        let problem = if self.cfg.observed.gathers.is_empty() {
            info!(shots = sources.len(), "simulating observed data");
            let acquisition = self.cfg.acquisition();
            let observed = simulate(truth, &acquisition, &wavelet, time, &self.scheduler())?;
            FwiProblem::new(acquisition, observed, wavelet, time)?
        } else {
            let gathers = self
                .cfg
                .observed
                .gathers
                .iter()
                .map(|p| {
                    io::load_gather(p, time, &receivers)
                        .with_context(|| format!("reading {}", p.display()))
                })
                .collect::<Result<Vec<ShotGather>>>()?;
            FwiProblem::from_gathers(&sources, &gathers, wavelet, time)?
        };
        Ok(problem.with_scheduler(self.scheduler()))
    }
}

fn run_forward(args: &RunArgs) -> Result<()> {
    let run = Run::prepare(args)?;
    let truth = run.cfg.true_model()?;
    let time = run.cfg.time_axis(&truth)?;
    let wavelet = run.cfg.source.wavelet.sample(&time);
    let acquisition = run.cfg.acquisition();
    info!(
        shots = acquisition.num_shots(),
        nt = time.num(),
        dt = time.step(),
        "forward modelling"
    );

    let data = simulate(&truth, &acquisition, &wavelet, time, &run.scheduler())?;
    for (s, (shot, d)) in acquisition.shots().iter().zip(data).enumerate() {
        let gather = ShotGather::new(time, shot.receivers.clone(), d)?;
        let path = run.path(&format!("shot_{:03}", s), false);
        io::save_gather(&gather, &path).with_context(|| format!("writing {}", path.display()))?;
    }
    run.save_model(&truth, "model_true")?;
    Ok(())
}

fn run_gradient(args: &RunArgs) -> Result<()> {
    let run = Run::prepare(args)?;
    let truth = run.cfg.true_model()?;
    let time = run.cfg.time_axis(&truth)?;
    let start = run.cfg.initial_model(&truth)?;
    let problem = run.problem(&truth, time)?;

    let eval = problem.evaluate(&start, true)?;
    info!(misfit = eval.misfit, "evaluated starting model");
    let Some(gradient) = eval.gradient else {
        bail!("objective returned no gradient");
    };

    let path = run.path("gradient", true);
    io::save_array(&gradient, &path, "gradient")
        .with_context(|| format!("writing {}", path.display()))?;
    run.save_model(&start, "model_initial")?;
    Ok(())
}

fn run_invert(args: &RunArgs) -> Result<()> {
    let run = Run::prepare(args)?;
    let truth = run.cfg.true_model()?;
    let time = run.cfg.time_axis(&truth)?;
    let start = run.cfg.initial_model(&truth)?;
    let problem = run.problem(&truth, time)?;
    let mut optimizer = run.cfg.inversion.optimizer.build()?;

    run.save_model(&start, "model_initial")?;
    let result = invert(
        &problem,
        start,
        optimizer.as_mut(),
        &run.cfg.inversion.options(),
        |_, _| {},
    )?;

    run.save_model(&result.model, "model_final")?;
    let history = serde_json::json!({
        "stop": format!("{:?}", result.stop),
        "final_misfit": result.final_misfit,
        "iterations": result.history,
    });
    let path = run.output.join("history.json");
    write_json(&path, &history)?;
    Ok(())
}

fn write_json(path: &Path, value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "wrote history");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Command::Forward(args) => run_forward(args),
        Command::Gradient(args) => run_gradient(args),
        Command::Invert(args) => run_invert(args),
    }
}

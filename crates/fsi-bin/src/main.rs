//! Thin driver binary: loads a `SimulatorConfig`, builds the topology and a
//! `FlowSimulator` around one of the reference kernels, and runs it for a
//! fixed number of steps, logging per-step diagnostics.

use std::path::PathBuf;
use std::sync::Once;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

use fsi_config::{ConfigOverrides, PrecisionSetting};
use fsi_kernels::{DiffusionFlux3D, OutplaneFieldCurl2D};
use fsi_sim::FlowSimulator;
use fsi_topology::{CartesianTopology, Precision};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "fsi-bin", version, about = "Distributed FSI flow simulator")]
struct Args {
    /// Path to a TOML configuration file (falls back to built-in defaults).
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Number of steps to run.
    #[arg(long = "steps", default_value_t = 10)]
    steps: u64,

    /// Override the grid size from the command line, e.g. `--grid-size 64,64`.
    #[arg(long = "grid-size", value_delimiter = ',')]
    grid_size: Option<Vec<usize>>,

    /// Override the ghost width from the command line.
    #[arg(long = "ghost-size")]
    ghost_size: Option<usize>,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self) {
        let log_dir = std::path::Path::new(".");
        let log_path = log_dir.join("fsi-bin.log");
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let file_appender = tracing_appender::rolling::never(log_dir, "fsi-bin.log");
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(nb_writer)
            .try_init()
        {
            Ok(_) => self.log_guard = Some(guard),
            Err(_err) => {
                // Global subscriber already installed (e.g. under a test harness).
            }
        }
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let universe = mpi::initialize().context("failed to initialize MPI environment")?;

    let mut config = fsi_config::load(args.config.as_deref())
        .context("failed to load simulator configuration")?;
    config.apply_overrides(&ConfigOverrides {
        grid_size: args.grid_size.clone(),
        ghost_size: args.ghost_size,
        precision: None,
    });

    let precision = match config.precision {
        PrecisionSetting::Single => Precision::Single,
        PrecisionSetting::Double => Precision::Double,
    };

    let topology = CartesianTopology::new(
        &universe,
        &config.grid_size,
        Some(&config.rank_distribution),
        &config.periodic_flag,
        precision,
    )
    .context("failed to construct the Cartesian process topology")?;

    let (events, event_rx) = fsi_events::channel();
    let grid_spacing = config.grid_spacing();
    let x_range_lower: Vec<f64> = config.x_range.iter().map(|&[lo, _]| lo).collect();

    let rank = topology.rank();
    let master_rank = config.master_rank;
    let is_master = topology.is_master(master_rank);

    info!(
        rank,
        grid_size = ?config.grid_size,
        dim = topology.grid_dim(),
        "starting simulation"
    );

    match topology.grid_dim() {
        2 => {
            let kernel = OutplaneFieldCurl2D::new(grid_spacing[0]);
            let ghost_width = config.effective_ghost_width(&[kernel_support(&kernel)]);
            let mut sim = FlowSimulator::new(
                &topology,
                master_rank,
                kernel,
                ghost_width,
                config.full_exchange,
                config.cfl,
                false,
                2,
                1,
                grid_spacing,
                x_range_lower,
                events,
            )
            .context("failed to construct the 2D flow simulator")?;
            run_steps(&mut sim, args.steps, is_master);
        }
        3 => {
            let kernel = DiffusionFlux3D::new(config.kinematic_viscosity, grid_spacing[0]);
            let ghost_width = config.effective_ghost_width(&[kernel_support(&kernel)]);
            let mut sim = FlowSimulator::new(
                &topology,
                master_rank,
                kernel,
                ghost_width,
                config.full_exchange,
                config.cfl,
                true,
                1,
                1,
                grid_spacing,
                x_range_lower,
                events,
            )
            .context("failed to construct the 3D flow simulator")?;
            run_steps(&mut sim, args.steps, is_master);
        }
        dim => anyhow::bail!("unsupported grid dimension {dim}"),
    }

    drain_events(event_rx, is_master);
    Ok(())
}

fn kernel_support<K: fsi_stencil::StencilKernel<f64>>(kernel: &K) -> usize {
    kernel.kernel_support()
}

fn run_steps<K>(sim: &mut FlowSimulator<'_, K>, steps: u64, is_master: bool)
where
    K: fsi_stencil::StencilKernel<f64> + Clone,
{
    for _ in 0..steps {
        match sim.step() {
            Ok(report) if is_master => {
                info!(
                    step = report.step,
                    max_abs_output = report.max_abs_output,
                    l2_grid_deviation = report.l2_grid_deviation,
                    "step completed"
                );
            }
            Ok(_) => {}
            Err(err) => {
                error!(?err, "step failed");
                break;
            }
        }
    }
}

fn drain_events(rx: std::sync::mpsc::Receiver<fsi_events::Event>, is_master: bool) {
    while let Ok(event) = rx.try_recv() {
        if is_master {
            tracing::debug!(?event, "drained diagnostic event");
        }
    }
}

fn main() -> Result<()> {
    let mut startup = AppStartup::new();
    startup.configure_logging();
    AppStartup::install_panic_hook();

    match run() {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(?err, "fatal error");
            std::process::exit(1);
        }
    }
}

//! Command-line driver for the transient BDF integrator.
//!
//! Ships two toy circuits (`rc` and `pulse-rc`) to exercise the integrator
//! end to end without a netlist front end. A real deployment would plug a
//! device-model loader and a sparse nonlinear solver into
//! `txint_solver::TransientDriver` in place of these.

mod demo_circuit;
mod newton;

use anyhow::Result;
use clap::{Parser, Subcommand};

use demo_circuit::{PulsedRc, RcDecay};
use newton::DenseNewtonSolver;
use txint_solver::{TimeIntegrationConfig, TransientDriver, TransientSpan};

#[derive(Parser)]
#[command(name = "txint", about = "Variable-order BDF transient integrator demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Relative tolerance for local truncation error control.
    #[arg(long, default_value_t = 1e-3, global = true)]
    rel_tol: f64,

    /// Absolute tolerance for local truncation error control.
    #[arg(long, default_value_t = 1e-9, global = true)]
    abs_tol: f64,

    /// Maximum BDF order (1-5).
    #[arg(long, default_value_t = 5, global = true)]
    max_order: usize,

    /// Stop time.
    #[arg(long, default_value_t = 5.0, global = true)]
    tstop: f64,
}

#[derive(Subcommand)]
enum Command {
    /// RC discharge from an initial voltage, no forcing.
    Rc {
        #[arg(long, default_value_t = 1.0)]
        resistance: f64,
        #[arg(long, default_value_t = 1.0)]
        capacitance: f64,
        #[arg(long, default_value_t = 1.0)]
        initial_voltage: f64,
    },
    /// RC charged by a step source at a fixed edge time.
    PulseRc {
        #[arg(long, default_value_t = 1.0)]
        resistance: f64,
        #[arg(long, default_value_t = 1.0)]
        capacitance: f64,
        #[arg(long, default_value_t = 1.0)]
        edge_time: f64,
        #[arg(long, default_value_t = 5.0)]
        high: f64,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = TimeIntegrationConfig::default()
        .with_tolerances(cli.rel_tol, cli.abs_tol)
        .with_order_bounds(1, cli.max_order);
    let span = TransientSpan::new(0.0, cli.tstop)?;

    match cli.command {
        Command::Rc {
            resistance,
            capacitance,
            initial_voltage,
        } => {
            let mut loader = RcDecay {
                resistance,
                capacitance,
                initial_voltage,
            };
            run(config, span, &mut loader)?;
        }
        Command::PulseRc {
            resistance,
            capacitance,
            edge_time,
            high,
        } => {
            let mut loader = PulsedRc::new(resistance, capacitance, edge_time, high);
            run(config, span, &mut loader)?;
        }
    }
    Ok(())
}

fn run<L>(config: TimeIntegrationConfig, span: TransientSpan, loader: &mut L) -> Result<()>
where
    L: txint_solver::Loader<Jacobian = nalgebra::DMatrix<f64>>,
{
    let mut solver = DenseNewtonSolver::new(20, 1e-10);
    let mut driver = TransientDriver::new(config, span, loader)?;

    println!("{:>16}{:>16}", "time", "v");

    loop {
        let summary = driver.run(loader, &mut solver, 200_000)?;
        let v = driver.last_solution().as_slice()[0];
        println!(
            "{:>16.6e}{:>16.6e} ({:?}, {} of {} steps accepted)",
            summary.final_time, v, summary.stop_reason, summary.steps_accepted, summary.steps_attempted
        );
        if summary.stop_reason == txint_solver::StopReason::ReachedStopTime {
            break;
        }
        if summary.stop_reason == txint_solver::StopReason::StepBudgetExhausted {
            anyhow::bail!("step budget exhausted before reaching tstop");
        }
    }
    Ok(())
}

use clap::{Args, Parser, Subcommand, ValueEnum};
use rstsr_ccd::prelude::*;
use rstsr_ccd::*;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct CliParser {
    #[clap(subcommand)]
    command: Command,

    #[clap(short, long, global = true, help = "Print per-step timings")]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliSingularPolicy {
    Error,
    Passthrough,
}

#[derive(Args, Debug)]
struct CliSolverArgs {
    #[clap(long = "tol", default_value_t = 1.0e-4, help = "Convergence threshold of the energy difference")]
    conv_tol_e: f64,

    #[clap(long = "max-cycle", default_value_t = 100, help = "Maximum number of amplitude updates")]
    max_cycle: usize,

    #[clap(long, help = "Accelerate amplitude updates with DIIS")]
    diis: bool,

    #[clap(long = "singular", value_enum, default_value = "error", help = "Treatment of vanishing denominators")]
    singular_policy: CliSingularPolicy,

    #[clap(long = "max-time", help = "Wall-clock budget in seconds")]
    max_time: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[clap(name = "solve", about = "Run CCD on h and u read from npy files")]
    Solve {
        #[clap(long = "h", help = "Path to the npy file of the one-body matrix")]
        h_file: String,

        #[clap(long = "u", help = "Path to the npy file of the antisymmetrized two-body tensor")]
        u_file: String,

        #[clap(long, help = "Number of occupied orbitals")]
        nocc: usize,

        #[clap(flatten)]
        solver: CliSolverArgs,
    },

    #[clap(name = "pairing", about = "Run CCD on the pairing model")]
    Pairing {
        #[clap(long, default_value_t = 4, help = "Number of doubly degenerate levels")]
        levels: usize,

        #[clap(long, default_value_t = 2, help = "Number of pairs")]
        pairs: usize,

        #[clap(long, default_value_t = 1.0, help = "Level spacing")]
        spacing: f64,

        #[clap(long, default_value_t = 0.5, allow_negative_numbers = true, help = "Pairing strength")]
        g: f64,

        #[clap(flatten)]
        solver: CliSolverArgs,
    },
}

impl CliSolverArgs {
    fn to_config(&self) -> CCDConfig {
        let singular_policy = match self.singular_policy {
            CliSingularPolicy::Error => SingularPolicy::Error,
            CliSingularPolicy::Passthrough => SingularPolicy::Passthrough,
        };
        CCDConfig {
            max_cycle: self.max_cycle,
            conv_tol_e: self.conv_tol_e,
            singular_policy,
            diis: self.diis.then(DIISIncoreFlags::default),
            max_time: self.max_time.map(Duration::from_secs_f64),
            ..Default::default()
        }
    }
}

fn run(command: Command) -> CCDResult<()> {
    let (mol_info, solver) = match command {
        Command::Solve { h_file, u_file, nocc, solver } => {
            let h = util::tensor_from_npy(&h_file)?;
            let u = util::tensor_from_npy(&u_file)?;
            let violation = util::check_antisymmetry(&u);
            if violation > 1.0e-10 {
                tracing::warn!("u violates antisymmetry by {violation:.3e}; results are not meaningful.");
            }
            (CCDInfo { h, u, nocc }, solver)
        },
        Command::Pairing { levels, pairs, spacing, g, solver } => {
            (pairing::pairing_model(levels, pairs, spacing, g), solver)
        },
    };

    let time = std::time::Instant::now();
    let (ccd_results, _) = ccd::ccd_iteration(&mol_info, &solver.to_config())?;
    println!("CCD Total Energy: {}", ccd_results.e_tot);
    println!("Elapsed time for CCD: {:.2?}", time.elapsed());
    Ok(())
}

fn main() -> ExitCode {
    let args = CliParser::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(last) = err.last_results() {
                eprintln!("Last energy after {} iterations: {}", last.niter, last.e_tot);
            }
            eprintln!("error: {err}");
            ExitCode::FAILURE
        },
    }
}

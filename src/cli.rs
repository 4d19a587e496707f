use std::path::PathBuf;

use argh::FromArgs;
use thiserror::Error;
use tracing as trc;

use crate::config::Config;

mod cmd;

/// An error that indicates that the program should exit with the given code
#[derive(Error, Debug)]
#[error("Program exited {0}")]
struct Exit(i32);

#[derive(FromArgs)]
/// Render comparison charts from load-testing benchmark results.
struct Args {
    /// path to a JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    command: cmd::Command,
}

/// Parse the command line, turning `--help` and usage errors into an [`Exit`]
fn parse_args() -> eyre::Result<Args> {
    let strings: Vec<String> = std::env::args().collect();
    let (program, rest) = match strings.split_first() {
        Some((program, rest)) => (program.as_str(), rest),
        None => ("bench_impact_charts", &[][..]),
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();

    Args::from_args(&[program], &rest).map_err(|early_exit| {
        if early_exit.status.is_ok() {
            println!("{}", early_exit.output);
            Exit(0).into()
        } else {
            eprintln!("{}", early_exit.output);
            Exit(2).into()
        }
    })
}

/// Start program logic
fn start() -> eyre::Result<()> {
    let args = trc::debug_span!("Parsing commandline args").in_scope(parse_args)?;
    let mut config = Config::load(args.config.as_deref())?;

    args.command.apply(&mut config);
    trc::debug!(?config, "Loaded configuration");

    match args.command {
        cmd::Command::Impact(_) => cmd::impact(&config.impact),
        cmd::Command::Resources(_) => cmd::resources(&config.resources),
    }
}

/// Run the ClI
pub fn run() {
    // Install tracing for logs
    install_tracing();
    // Install color error printing
    color_eyre::install().expect("Could not install error handler");

    // Start the application and capture errors
    match start() {
        // Do nothing for happy runs!
        Ok(()) => (),
        // Handle errors
        Err(report) => {
            // If the error is an exit code
            if let Some(e) = report.downcast_ref::<Exit>() {
                let code = e.0;

                // The message has already been printed by the argument parser
                std::process::exit(code);
            // If the error is any other kind of error print it and exit 1
            } else {
                trc::error!("{:?}", report);
                std::process::exit(1);
            }
        }
    }
}

fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, fmt::format::FmtSpan, EnvFilter};

    // Build the tracing layers
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_span_events(FmtSpan::FULL);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Add all of the layers to the subscriber and initialize it
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

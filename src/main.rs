//! txscope - interactive transaction propagation shell
//!
//! This is the main entry point for the txscope command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use txscope::config::ManagerConfig;
use txscope::shell::{Repl, Session};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut config_path: Option<PathBuf> = None;
    let mut verbose = false;
    let mut execute: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-e" | "--execute" => {
                i += 1;
                if i < args.len() {
                    execute = Some(args[i].clone());
                }
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("txscope v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    init_tracing(verbose);

    let config = match config_path {
        Some(path) => match ManagerConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => ManagerConfig::default(),
    };

    let session = Session::new(config);

    // Execute a batch or run the REPL.
    let result = match execute {
        Some(batch) => execute_batch(session, &batch),
        None => Repl::new(session).run().map_err(Into::into),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "txscope=debug" } else { "txscope=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("txscope - transaction propagation shell");
    println!();
    println!("Usage: txscope [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH      Load manager configuration from a JSON file");
    println!("  -e, --execute STMTS    Execute ';'-separated statements and exit");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Examples:");
    println!("  txscope                                       Start the REPL");
    println!("  txscope -e 'begin; begin requires_new; rollback; commit'");
    println!("  RUST_LOG=txscope=trace txscope                 Trace every physical call");
}

fn execute_batch(mut session: Session, batch: &str) -> Result<(), Box<dyn std::error::Error>> {
    let lines = session.execute_batch(batch)?;
    for line in lines {
        println!("{}", line);
    }
    for event in session.take_events() {
        println!("  {}", serde_json::to_string(&event)?);
    }
    Ok(())
}

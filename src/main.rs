//! txscope - propagation scenario runner
//!
//! This is the command-line entry point: it runs the named member-join and
//! scope scenarios against the in-memory backend and reports the outcome.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use txscope::demo::{find_scenario, ScenarioReport, SCENARIOS};
use txscope::transaction::CoordinatorConfig;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut config_path: Option<PathBuf> = None;
    let mut verbose = false;
    let mut json = false;
    let mut selected: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-s" | "--scenario" => {
                i += 1;
                if i < args.len() {
                    selected.push(args[i].clone());
                }
            }
            "-c" | "--config" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "--json" => {
                json = true;
            }
            "-l" | "--list" => {
                print_scenarios();
                return ExitCode::SUCCESS;
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
                // Treat as scenario name if no flag.
                if !arg.starts_with('-') {
                    selected.push(arg.to_string());
                } else {
                    eprintln!("Unknown option: {}", arg);
                    return ExitCode::FAILURE;
                }
            }
        }
        i += 1;
    }

    init_logging(verbose);

    let config = match config_path {
        Some(path) => match CoordinatorConfig::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => CoordinatorConfig::default(),
    };

    let scenarios = if selected.is_empty() {
        SCENARIOS.iter().collect::<Vec<_>>()
    } else {
        let mut found = Vec::with_capacity(selected.len());
        for name in &selected {
            match find_scenario(name) {
                Some(s) => found.push(s),
                None => {
                    eprintln!("Unknown scenario: {} (use --list)", name);
                    return ExitCode::FAILURE;
                }
            }
        }
        found
    };

    let reports: Vec<ScenarioReport> = scenarios.iter().map(|s| s.run(&config)).collect();

    if json {
        match serde_json::to_string_pretty(&reports) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    if reports.iter().all(ScenarioReport::passed) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "txscope=debug" } else { "txscope=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_help() {
    println!("txscope - transaction propagation scenarios");
    println!();
    println!("Usage: txscope [OPTIONS] [SCENARIO...]");
    println!();
    println!("Options:");
    println!("  -s, --scenario NAME    Run only the named scenario (repeatable)");
    println!("  -c, --config PATH      Load coordinator config from a JSON file");
    println!("  -l, --list             List available scenarios");
    println!("  -v, --verbose          Enable debug logging");
    println!("      --json             Print reports as JSON");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Examples:");
    println!("  txscope                              Run every scenario");
    println!("  txscope inner_rollback               Run one scenario");
    println!("  RUST_LOG=txscope=debug txscope -s recover_exception_success");
}

fn print_scenarios() {
    for scenario in SCENARIOS {
        println!("{:<30} {}", scenario.name, scenario.description);
    }
}

fn print_report(report: &ScenarioReport) {
    let status = if report.passed() { "ok" } else { "FAILED" };
    println!("{} ... {}", report.name, status);

    for check in &report.checks {
        let mark = if check.passed { "+" } else { "x" };
        println!("  [{}] {}", mark, check.description);
    }
    if let Some(ref err) = report.error {
        println!("  error: {}", err);
    }
    for tx in &report.transactions {
        println!("  tx {} {} ({} ms)", tx.tx_id, tx.state, tx.elapsed_ms());
    }
}

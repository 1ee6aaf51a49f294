//! txnest - nested transaction demo
//!
//! Bootstraps the user directory, then runs nested and result-returning
//! transactions against it.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use txnest::config::DataSourceConfig;
use txnest::pool::{ConnectionError, DataSource};
use txnest::schema::{initialize_database, SchemaInitializer};
use txnest::users::{self, User};
use txnest::{StatementError, TransactionRunner};

const DEFAULT_CONFIG: &str = include_str!("../resources/datasource.json");

struct Options {
    config: Option<PathBuf>,
    schema: Option<PathBuf>,
    fail: bool,
    verbose: bool,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let mut options = Options {
        config: None,
        schema: None,
        fail: false,
        verbose: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => options.config = Some(PathBuf::from(path)),
                    None => {
                        eprintln!("Missing value for {}", args[i - 1]);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "-s" | "--schema" => {
                i += 1;
                match args.get(i) {
                    Some(path) => options.schema = Some(PathBuf::from(path)),
                    None => {
                        eprintln!("Missing value for {}", args[i - 1]);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "--fail" => options.fail = true,
            "-v" | "--verbose" => options.verbose = true,
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("txnest v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    init_tracing(options.verbose);

    match run_demo(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_help() {
    println!("txnest - nested transactions over a pooled in-memory store");
    println!();
    println!("Usage: txnest [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config PATH      Data source settings (JSON, default: bundled)");
    println!("  -s, --schema PATH      Schema script to apply (default: bundled)");
    println!("      --fail             Fail inside the nested transaction to show the rollback");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("RUST_LOG overrides the log filter.");
}

fn run_demo(options: &Options) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &options.config {
        Some(path) => DataSourceConfig::from_file(path)?,
        None => DataSourceConfig::from_json(DEFAULT_CONFIG)?,
    };
    let initializer = match &options.schema {
        Some(path) => SchemaInitializer::from_file(path)?,
        None => SchemaInitializer::bundled(),
    };

    let runner = initialize_database(config, &initializer)?;

    match insert_users(&runner, options.fail) {
        Ok(()) => info!("users inserted"),
        Err(e) => error!(
            error = %e,
            cause = ?std::error::Error::source(&e).map(ToString::to_string),
            retryable = e.as_connection().is_some_and(ConnectionError::is_retryable),
            "nested transaction rolled back"
        ),
    }

    let updated = runner.run_in_transaction_with_result(|tx| {
        let mut count = users::update_email(tx, "john_doe", "john.doe@gmail.com")?;
        count += users::update_email(tx, "jane_doe", "jane.doe@gmail.com")?;
        Ok(count)
    })?;
    println!("Updated {} user(s)", updated);

    let all = runner.run(users::select_users)?;
    print_users(&all);
    Ok(())
}

fn insert_users(runner: &TransactionRunner<DataSource>, fail: bool) -> txnest::TransactionResult<()> {
    runner.run_in_transaction(|outer| {
        outer.run_in_transaction(|inner| {
            users::insert_user(inner, "john_doe", "john.doe@example.com")?;
            users::insert_user(inner, "jane_doe", "jane.doe@example.com")?;
            if fail {
                return Err(StatementError::msg("Simulated exception during statement execution"));
            }
            Ok(())
        })?;
        users::insert_user(outer, "jake_doe", "jake.doe@example.com")?;
        Ok(())
    })
}

fn print_users(all: &[User]) {
    println!("{:<4} {:<12} {}", "id", "username", "email");
    println!("{}", "-".repeat(40));
    for user in all {
        println!("{:<4} {:<12} {}", user.id, user.username, user.email);
    }
    println!("({} rows)", all.len());
}

//! cardinal-storage command-line interface.
//!
//! Loads a storage configuration, opens the engine and reports on it.

use std::path::PathBuf;
use std::process::ExitCode;

use cardinal_storage::config::StorageConfig;
use cardinal_storage::factory::StorageEngines;
use cardinal_storage::logging::init_tracing;

enum Command {
    Health,
    Config,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("storage.json");
    let mut verbose = false;
    let mut command = Command::Health;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" | "--config" => {
                i += 1;
                match args.get(i) {
                    Some(path) => config_path = PathBuf::from(path),
                    None => {
                        eprintln!("Missing value for {}", args[i - 1]);
                        return ExitCode::FAILURE;
                    }
                }
            }
            "-v" | "--verbose" => verbose = true,
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("cardinal-storage v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            "health" => command = Command::Health,
            "config" => command = Command::Config,
            arg => {
                eprintln!("Unknown argument: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    if let Err(e) = init_tracing(verbose) {
        eprintln!("Cannot initialise logging: {}", e);
    }

    let config = match StorageConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Config => print_config(&config),
        Command::Health => run_health(&config),
    }
}

fn print_help() {
    println!("cardinal-storage - storage engine diagnostics");
    println!();
    println!("Usage: cardinal-storage [OPTIONS] [COMMAND]");
    println!();
    println!("Commands:");
    println!("  health                 Open the engine and ping the backend (default)");
    println!("  config                 Print the resolved configuration, password masked");
    println!();
    println!("Options:");
    println!("  -c, --config PATH      JSON configuration file (default: storage.json)");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
}

fn print_config(config: &StorageConfig) -> ExitCode {
    match serde_json::to_string_pretty(&config.redacted()) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_health(config: &StorageConfig) -> ExitCode {
    let engine = match StorageEngines::create(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error opening storage engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let status = engine.health_status();
    engine.close();
    match serde_json::to_string_pretty(&status) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("healthy: {} ({})", status.healthy, status.message),
    }

    if status.healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

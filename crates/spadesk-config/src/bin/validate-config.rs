//! Config validation CLI tool
//!
//! Validates a spadeskd configuration file and reports any errors.

use spadesk_api::ServiceCategory;
use spadesk_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a spadeskd configuration file.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match spadesk_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", spadesk_config::CURRENT_CONFIG_VERSION);
            println!(
                "  Remote: {}",
                settings
                    .remote
                    .as_ref()
                    .map(|r| r.url.as_str())
                    .unwrap_or("none (local only)")
            );
            println!(
                "  Business day starts: {:02}:{:02}",
                settings.daemon.day_starts_at.hour, settings.daemon.day_starts_at.minute
            );
            println!("  Services: {}", settings.catalog.services.len());
            println!("  Rooms: {}", settings.catalog.rooms.len());
            println!("  Roster: {}", settings.catalog.roster.len());

            if !settings.catalog.services.is_empty() {
                println!();
                println!("Services:");
                for service in &settings.catalog.services {
                    let category = match service.category {
                        ServiceCategory::Single => "single",
                        ServiceCategory::Double => "double",
                        ServiceCategory::Couple => "couple",
                    };
                    println!(
                        "  - {} [{}, {} min]: {} (payout {}, shop {})",
                        service.id,
                        category,
                        service.duration_minutes,
                        service.price,
                        service.lady_payout,
                        service.shop_revenue
                    );
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                spadesk_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                spadesk_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                spadesk_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                spadesk_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        spadesk_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

//! `partition-probe`: run one delete-by-partition-key verification scenario.
//!
//! Exit codes: 0 consistent, 1 anomaly detected, 2 failed, 64 usage or config
//! error.

use clap::Parser;
use log::info;
use partition_probe_core::{
    default_log_level, init_logging, run_scenario_with_config, ConsistencyLevel, PlatformInfo,
    ProbeConfig, ScenarioOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_USAGE: u8 = 64;

#[derive(Parser, Debug)]
#[command(
    name = "partition-probe",
    version,
    about = "Verify that delete-by-partition-key leaves no visible rows"
)]
struct Cli {
    /// JSON config file; `PROBE_*` variables and flags override it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replica endpoint (`file:<dir>` or `memory:<name>`); repeatable.
    #[arg(long = "endpoint", value_name = "ENDPOINT")]
    endpoints: Vec<String>,

    #[arg(long)]
    keyspace: Option<String>,

    /// ONE, TWO, THREE, QUORUM or ALL.
    #[arg(long, value_name = "LEVEL")]
    consistency: Option<ConsistencyLevel>,

    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,

    /// Rows seeded before the delete.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    seed_rows: u16,

    #[arg(long, default_value = "test-org")]
    key_prefix: String,

    /// Use a fixed partition key instead of a generated one.
    #[arg(long)]
    partition_key: Option<String>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Absolute directory for rolling log files; logging is off when unset.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print platform information and exit.
    #[arg(long)]
    platform: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(message) => {
            eprintln!("partition-probe: {message}");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn run(cli: Cli) -> Result<u8, String> {
    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    if cli.platform {
        let platform = PlatformInfo::current();
        if cli.json {
            let json = serde_json::to_string_pretty(&platform).map_err(|err| err.to_string())?;
            println!("{json}");
        } else {
            println!(
                "platform: {platform} family={} cpus={} build={} version={}",
                platform.family,
                platform.available_parallelism,
                platform.build_mode,
                platform.crate_version
            );
        }
        return Ok(0);
    }

    let config = resolve_config(&cli).map_err(|err| err.to_string())?;
    info!(
        "event=cli_run module=cli status=start endpoints={} consistency={}",
        config.endpoints.len(),
        config.consistency
    );

    let options = ScenarioOptions {
        seed_rows: usize::from(cli.seed_rows),
        key_prefix: cli.key_prefix.clone(),
        partition_key: cli.partition_key.clone(),
    };
    let report = run_scenario_with_config(config, &options);

    if cli.json {
        println!("{}", report.to_json().map_err(|err| err.to_string())?);
    } else {
        print!("{report}");
    }
    Ok(u8::try_from(report.exit_code()).unwrap_or(2))
}

/// Defaults, then config file, then environment, then flags.
fn resolve_config(cli: &Cli) -> Result<ProbeConfig, partition_probe_core::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => ProbeConfig::load_file(path)?,
        None => ProbeConfig::default(),
    };
    config.apply_process_env()?;

    if !cli.endpoints.is_empty() {
        config.endpoints = cli.endpoints.clone();
    }
    if let Some(keyspace) = &cli.keyspace {
        config.keyspace = keyspace.clone();
    }
    if let Some(consistency) = cli.consistency {
        config.consistency = consistency;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(connect_timeout_ms) = cli.connect_timeout_ms {
        config.connect_timeout_ms = connect_timeout_ms;
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::{resolve_config, Cli};
    use clap::Parser;
    use partition_probe_core::ConsistencyLevel;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "partition-probe",
            "--endpoint",
            "memory:a",
            "--endpoint",
            "memory:b",
            "--consistency",
            "all",
            "--timeout-ms",
            "500",
        ]);
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.endpoints, vec!["memory:a", "memory:b"]);
        assert_eq!(config.consistency, ConsistencyLevel::All);
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(cli.seed_rows, 3);
    }

    #[test]
    fn zero_seed_rows_is_rejected() {
        assert!(Cli::try_parse_from(["partition-probe", "--seed-rows", "0"]).is_err());
    }

    #[test]
    fn invalid_keyspace_fails_validation() {
        let cli = Cli::parse_from(["partition-probe", "--keyspace", "9lives"]);
        assert!(resolve_config(&cli).is_err());
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Helmbroker Control CLI
//!
//! Operator tool for inspecting broker state on a host.
//!
//! Usage:
//!   helmbroker-ctl <command> [args]
//!
//! Commands:
//!   catalog                                    Print the addon catalog
//!   instance <instance_id>                     Print an instance record
//!   binding <instance_id>                      Print an instance binding
//!   verify <service_id> <plan_id> <params>     Check parameters against a plan
//!   args <instance_id> <params>                Print helm arguments for an upgrade
//!   list-instances                             List instance ids

use anyhow::Context;
use helmbroker::parameters::ParameterSet;
use helmbroker::{Broker, Config};
use std::process::ExitCode;
use tracing::warn;

const EXIT_USAGE: u8 = 2;

fn print_usage() {
    eprintln!(
        r#"Usage: helmbroker-ctl <command> [args]

Inspect helmbroker instance state.

COMMANDS:
    catalog                                 Print the addon catalog
    instance <instance_id>                  Print an instance record
    binding <instance_id>                   Print an instance binding
    verify <service_id> <plan_id> <params>  Check parameters against a plan
    args <instance_id> <params>             Print helm arguments for an upgrade
    list-instances                          List instance ids

<params> is a JSON object, e.g. '{{"replicas": 3}}'.

ENVIRONMENT:
    HELMBROKER_ROOT                 Base directory (default: /etc/helmbroker)
    HELMBROKER_INSTANCES_DIR        Instance storage root
    HELMBROKER_ADDONS_DIR           Addon catalog root
    HELMBROKER_LOCK_BACKEND         file or redis (default: file)
    RUST_LOG                        Log filter (default: helmbroker=info)

EXIT CODES:
    0   success
    1   error, or parameters rejected
    2   usage error
"#
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    Catalog,
    Instance {
        instance_id: String,
    },
    Binding {
        instance_id: String,
    },
    Verify {
        service_id: String,
        plan_id: String,
        params: String,
    },
    Args {
        instance_id: String,
        params: String,
    },
    ListInstances,
    Help,
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    let arg = |i: usize, what: &str| -> Result<String, String> {
        args.get(i).cloned().ok_or_else(|| format!("{} required", what))
    };

    let command = match args[1].as_str() {
        "help" | "--help" | "-h" => Command::Help,
        "catalog" => Command::Catalog,
        "list-instances" => Command::ListInstances,
        "instance" => Command::Instance {
            instance_id: arg(2, "Instance ID")?,
        },
        "binding" => Command::Binding {
            instance_id: arg(2, "Instance ID")?,
        },
        "verify" => Command::Verify {
            service_id: arg(2, "Service ID")?,
            plan_id: arg(3, "Plan ID")?,
            params: arg(4, "Parameters JSON")?,
        },
        "args" => Command::Args {
            instance_id: arg(2, "Instance ID")?,
            params: arg(3, "Parameters JSON")?,
        },
        cmd => return Err(format!("Unknown command: {}", cmd)),
    };
    Ok(command)
}

fn parse_params(raw: &str) -> anyhow::Result<ParameterSet> {
    serde_json::from_str(raw).context("parameters must be a JSON object")
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", helmbroker::store::to_canonical_json(value)?);
    Ok(())
}

/// Returns whether the command succeeded from the operator's point of view.
async fn execute_command(broker: &Broker, cmd: Command) -> anyhow::Result<bool> {
    match cmd {
        Command::Catalog => {
            let catalog = broker.catalog().await?;
            let mut entries = serde_json::Map::new();
            for (key, entry) in catalog.iter() {
                entries.insert(key.to_string(), serde_json::to_value(entry)?);
            }
            print_json(&entries)?;
        }
        Command::Instance { instance_id } => {
            print_json(&broker.fetch_instance(&instance_id).await?)?;
        }
        Command::Binding { instance_id } => {
            print_json(&broker.store().load_binding(&instance_id).await?)?;
        }
        Command::Verify {
            service_id,
            plan_id,
            params,
        } => {
            let params = parse_params(&params)?;
            let report = broker
                .verify_parameters(&service_id, &plan_id, &params)
                .await?;
            print_json(&report)?;
            if !report.is_valid() {
                eprintln!("{}", report);
                return Ok(false);
            }
        }
        Command::Args {
            instance_id,
            params,
        } => {
            let params = parse_params(&params)?;
            for token in broker.preview_args(&instance_id, &params).await? {
                println!("{}", token);
            }
        }
        Command::ListInstances => {
            for id in broker.store().list_instances().await? {
                println!("{}", id);
            }
        }
        Command::Help => print_usage(),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helmbroker=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let args: Vec<String> = std::env::args().collect();
    let cmd = match parse_args_from_vec(&args) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(EXIT_USAGE);
        }
    };
    if cmd == Command::Help {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let broker = match Broker::builder(config).build().await {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("Failed to initialize broker: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match execute_command(&broker, cmd).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

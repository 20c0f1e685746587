// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! USP agent daemon.
//!
//! # Usage
//!
//! ```bash
//! # Run the agent with the default database
//! uspd
//!
//! # Custom database, WAN interface and verbose logging
//! uspd -f /var/lib/usp.db -i wan0 -vv
//!
//! # Factory reset parameters from a JSON file
//! uspd --factory-reset-params /etc/usp/defaults.json
//!
//! # Talk to a running agent
//! uspd -c get Device.DeviceInfo.
//! uspd -c set Device.LocalAgent.MTP.1.Enable true
//! uspd -c stop
//! ```

use clap::Parser;
use rusp_agent::config::{CLI_UNIX_DOMAIN_FILE, DEFAULT_DATABASE_FILE, DEFAULT_WAN_IFNAME};
use rusp_agent::{cli, Agent, AgentConfig};
use std::process::ExitCode;

/// USP (TR-369) agent for customer-premises equipment.
#[derive(Parser, Debug)]
#[command(name = "uspd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Parameter database file.
    #[arg(short = 'f', long, default_value = DEFAULT_DATABASE_FILE)]
    db_file: String,

    /// Unix domain socket for the local CLI.
    #[arg(long, default_value = CLI_UNIX_DOMAIN_FILE)]
    cli_socket: String,

    /// WAN interface; its MAC address forms the Endpoint-ID serial.
    #[arg(short = 'i', long, default_value = DEFAULT_WAN_IFNAME)]
    interface: String,

    /// Factory reset parameter list (JSON) applied to a fresh database.
    #[arg(long)]
    factory_reset_params: Option<String>,

    /// Pre-built factory reset database copied into place when none
    /// exists.
    #[arg(long)]
    factory_reset_db: Option<String>,

    /// Disable sorting of instance enumerations in responses (for very
    /// large tables on slow devices).
    #[arg(long)]
    no_sort_instances: bool,

    /// Run a CLI command against a running daemon and exit.
    #[arg(short = 'c', long, num_args = 1.., value_name = "COMMAND")]
    command: Option<Vec<String>>,

    /// Increase log verbosity (-v info is default, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // Client mode: forward one command to the running daemon.
    if let Some(command) = &args.command {
        let line = command.join(" ");
        let code = cli::run_client(&args.cli_socket, &line);
        return ExitCode::from(code as u8);
    }

    let config = AgentConfig {
        database_file: args.db_file,
        cli_socket: args.cli_socket,
        wan_ifname: args.interface,
        factory_reset_db: args.factory_reset_db,
        factory_reset_params: args.factory_reset_params,
        sort_instances: !args.no_sort_instances,
    };

    match Agent::new(config).run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("[AGENT] fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}

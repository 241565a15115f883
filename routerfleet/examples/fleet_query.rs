//! Discover routers in an address range and query them.
//!
//! Every address in the range is probed for its identity. The routers that
//! answer are then asked for each requested path, and the resulting table is
//! printed as tab-separated values.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example fleet_query -- --range 192.168.0.1-20 --password secret \
//!     --path status/product_info/product_name --path "status/wan/devices/mdm*/status"
//! ```

use std::env;
use std::time::Duration;

use routerfleet::{Fleet, Inventory};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let fleet = Fleet::builder()
        .default_username(&args.user)
        .discovery_timeout(Duration::from_secs(args.timeout))
        .build()?;

    println!("Discovering {}...", args.range);
    let discovered = fleet
        .discover(&args.range, &args.user, &args.password, Some(args.port))
        .await?;

    let inventory = Inventory::new();
    let found = inventory.upsert_discovered(&discovered).await;
    for entry in &discovered {
        let state = if entry.is_online() { "OK" } else { "No response" };
        println!("--- {} ({}) ---", entry.target.address, state);
        if let Some(info) = entry.outcome.success() {
            for (key, value) in [
                ("hostname", &info.hostname),
                ("mac", &info.mac_address),
                ("serial_number", &info.serial_number),
                ("product_name", &info.product_name),
                ("ncos_version", &info.ncos_version),
            ] {
                if !value.is_empty() {
                    println!("  {}: {}", key, value);
                }
            }
        }
    }

    if found == 0 {
        eprintln!("No response from any routers. Check IPs, credentials, and network.");
        std::process::exit(1);
    }
    if args.paths.is_empty() {
        return Ok(());
    }

    let indices: Vec<usize> = (0..inventory.len().await).collect();
    let targets = inventory.select(&indices).await?;

    println!("\nQuerying {} router(s)...", targets.len());
    let report = fleet.dispatch_read(&targets, &args.paths).await?;
    inventory.merge_read(&report).await;

    println!("{}", report.columns.iter().collect::<Vec<_>>().join("\t"));
    for row in report.table() {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| match cell {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }

    // Identity and the stored columns again, in one pass.
    let paths = inventory.api_paths().await;
    let refreshed = fleet.refresh_info_with_paths(&targets, &paths).await?;
    println!("\nRefreshed {} router(s)", inventory.merge_refreshed(&refreshed).await);

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    range: String,
    port: u16,
    user: String,
    password: String,
    paths: Vec<String>,
    timeout: u64,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut range = String::new();
        let mut port = 8080u16;
        let mut user = "admin".to_string();
        let mut password = String::new();
        let mut paths = Vec::new();
        let mut timeout = 2u64;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--range" | "-r" => {
                    i += 1;
                    if i < args.len() {
                        range = args[i].clone();
                    }
                }
                "--port" | "-p" => {
                    i += 1;
                    if i < args.len() {
                        port = args[i].parse().unwrap_or(8080);
                    }
                }
                "--user" | "-u" => {
                    i += 1;
                    if i < args.len() {
                        user = args[i].clone();
                    }
                }
                "--password" | "-P" => {
                    i += 1;
                    if i < args.len() {
                        password = args[i].clone();
                    }
                }
                "--path" => {
                    i += 1;
                    if i < args.len() {
                        paths.extend(routerfleet::dispatch::parse_path_list(&args[i]));
                    }
                }
                "--timeout" | "-t" => {
                    i += 1;
                    if i < args.len() {
                        timeout = args[i].parse().unwrap_or(2);
                    }
                }
                "--help" => {
                    Self::print_help();
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {}", args[i]);
                }
            }
            i += 1;
        }

        Self {
            range,
            port,
            user,
            password,
            paths,
            timeout,
        }
    }

    fn print_help() {
        println!(
            r#"routerfleet fleet_query example

USAGE:
    cargo run --example fleet_query -- [OPTIONS]

OPTIONS:
    -r, --range <RANGE>      Addresses: CIDR, a.b.c.d-e, or a list
    -p, --port <PORT>        HTTP management port [default: 8080]
    -u, --user <USER>        Username [default: admin]
    -P, --password <PASS>    Password for the router API
    --path <PATHS>           Path(s) to read, may repeat; wildcards allowed
    -t, --timeout <SECS>     Discovery probe timeout [default: 2]
    --help                   Print this help message

EXAMPLES:
    # Find routers on a /28
    cargo run --example fleet_query -- --range 10.0.0.0/28 --password secret

    # Read modem status from every router found
    cargo run --example fleet_query -- --range 10.0.0.1-10 --password secret \
        --path "status/wan/devices/mdm*/status/connection_state"
"#
        );
    }
}

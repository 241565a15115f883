//! Push a file to several routers and print the deployment transcript.
//!
//! SDK apps go over SCP to `/app_upload`; licenses, firmware and
//! configuration files are uploaded through the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example push_app -- --host 192.168.0.1 --host 192.168.0.2 \
//!     --password secret --file my_app.tar.gz
//!
//! cargo run --example push_app -- --host 192.168.0.1 --password secret \
//!     --kind ncos --file firmware.bin
//! ```

use std::env;
use std::path::PathBuf;

use routerfleet::{DeploymentKind, DispatchResult, Fleet, OperationDescriptor, SshSettings, Target};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (set RUST_LOG=debug for verbose output)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let Some(file) = args.file.clone() else {
        eprintln!("Error: Must provide --file");
        std::process::exit(1);
    };
    if args.hosts.is_empty() {
        eprintln!("Error: Must provide at least one --host");
        std::process::exit(1);
    }

    let targets: Vec<Target> = args
        .hosts
        .iter()
        .map(|host| Target::new(host).credentials(&args.user, &args.password))
        .collect();

    let operation = match args.kind {
        DeploymentKind::SdkApp => OperationDescriptor::FilePush {
            local_file: file,
            ssh_port: args.ssh_port,
        },
        kind => OperationDescriptor::HttpUpload {
            kind,
            local_file: file,
        },
    };

    println!("Deploying to {} router(s)...", targets.len());
    let builder = Fleet::builder().probe_before_push(args.probe);
    let result = if args.native {
        builder
            .build_native_ssh(SshSettings::default())?
            .dispatch(&targets, &operation)
            .await?
    } else {
        builder.build()?.dispatch(&targets, &operation).await?
    };

    if let DispatchResult::Push(report) = result {
        println!("{}", "-".repeat(50));
        for line in report.transcript() {
            println!("{}", line);
        }
        println!("{}", "-".repeat(50));

        let failures = report.failure_count();
        if failures > 0 {
            eprintln!("{} of {} deployment(s) failed", failures, report.records.len());
            std::process::exit(1);
        }
        println!("Done!");
    }

    Ok(())
}

/// Simple argument parser (avoiding external dependencies)
struct Args {
    hosts: Vec<String>,
    user: String,
    password: String,
    file: Option<PathBuf>,
    kind: DeploymentKind,
    ssh_port: u16,
    native: bool,
    probe: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = env::args().collect();
        let mut hosts = Vec::new();
        let mut user = "admin".to_string();
        let mut password = String::new();
        let mut file = None;
        let mut kind = DeploymentKind::SdkApp;
        let mut ssh_port = routerfleet::dispatch::DEFAULT_SSH_PORT;
        let mut native = false;
        let mut probe = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--host" | "-h" => {
                    i += 1;
                    if i < args.len() {
                        hosts.push(args[i].clone());
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
                "--file" | "-f" => {
                    i += 1;
                    if i < args.len() {
                        file = Some(PathBuf::from(&args[i]));
                    }
                }
                "--kind" | "-k" => {
                    i += 1;
                    if i < args.len() {
                        match args[i].parse() {
                            Ok(parsed) => kind = parsed,
                            Err(e) => {
                                eprintln!("Error: {}", e);
                                std::process::exit(1);
                            }
                        }
                    }
                }
                "--ssh-port" => {
                    i += 1;
                    if i < args.len() {
                        ssh_port = args[i].parse().unwrap_or(ssh_port);
                    }
                }
                "--native" => native = true,
                "--probe" => probe = true,
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
            hosts,
            user,
            password,
            file,
            kind,
            ssh_port,
            native,
            probe,
        }
    }

    fn print_help() {
        println!(
            r#"routerfleet push_app example

USAGE:
    cargo run --example push_app -- [OPTIONS]

OPTIONS:
    -h, --host <HOST>        Router address, may repeat
    -u, --user <USER>        Username [default: admin]
    -P, --password <PASS>    Password
    -f, --file <PATH>        File to deploy
    -k, --kind <KIND>        sdk_apps, ncos, licenses or configuration [default: sdk_apps]
    --ssh-port <PORT>        SSH port for SDK app pushes [default: 22]
    --native                 Use the built-in SSH client instead of sshpass/pscp
    --probe                  Check the HTTP API before each SCP push
    --help                   Print this help message
"#
        );
    }
}

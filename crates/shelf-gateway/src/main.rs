// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shelf Gateway CLI
//!
//! Command-line front for the forwarding gateway.
//!
//! # Usage
//!
//! ```bash
//! # Forward a query to an HTTP service
//! shelf-gateway --config gateway.toml forward book '{ books { id } }'
//!
//! # Call a queue service through a local broker stand-in
//! shelf-gateway --memory-broker forward patron patron --vars '{"id":"1"}'
//!
//! # Print the first 5 relayed books
//! shelf-gateway subscribe --limit 5
//!
//! # Generate / check configuration
//! shelf-gateway gen-config -o gateway.toml
//! shelf-gateway validate -c gateway.toml
//! ```

use clap::{Parser, Subcommand};
use serde_json::json;
use shelf_gateway::{
    AmqpConnector, CallStatsSnapshot, Connector, Gateway, GatewayConfig, MemoryBroker,
    OutgoingRequest, ServiceConfig, Variables,
};
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Shelf GraphQL Gateway
#[derive(Parser, Debug)]
#[command(name = "shelf-gateway")]
#[command(about = "Shelf GraphQL Gateway - HTTP, queue RPC and subscription forwarding")]
#[command(version)]
struct Args {
    /// Configuration file path (defaults to the built-in example)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the AMQP broker URI
    #[arg(long, conflicts_with = "memory_broker")]
    broker_uri: Option<String>,

    /// Serve queue services from an in-process echo broker
    #[arg(long)]
    memory_broker: bool,

    /// Log level (trace, debug, info, warn, error); defaults to the config's
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward one operation to a service
    Forward {
        /// Service name
        service: String,

        /// Query text (HTTP services) or resolver label (queue services)
        operation: String,

        /// Variables as a JSON object
        #[arg(long)]
        vars: Option<String>,
    },

    /// Relay the configured subscription to stdout
    Subscribe {
        /// Stop after this many events
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "gateway.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let command = match args.command {
        Some(Commands::GenConfig { output }) => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            return cmd_gen_config(output);
        }
        Some(Commands::Validate { config }) => {
            init_logging(args.log_level.as_deref().unwrap_or("info"));
            return cmd_validate(config);
        }
        other => other,
    };

    let mut config = match args.config {
        Some(ref path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::example(),
    };
    init_logging(config.effective_log_level(args.log_level.as_deref()));
    if let Some(uri) = args.broker_uri {
        config.broker_uri = Some(uri);
    }

    if args.memory_broker {
        config.broker_uri = Some("memory://".into());
        let broker = MemoryBroker::new();
        let responders = spawn_echo_responders(&broker, &config).await?;
        let gateway = Gateway::new(config, broker)?;
        let result = run(&gateway, command).await;
        for responder in responders {
            responder.abort();
        }
        result
    } else {
        let uri = config.broker_uri.clone().unwrap_or_default();
        let gateway = Gateway::new(config, AmqpConnector::new(uri))?;
        run(&gateway, command).await
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run<C: Connector>(
    gateway: &Gateway<C>,
    command: Option<Commands>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Some(Commands::Forward {
            service,
            operation,
            vars,
        }) => cmd_forward(gateway, &service, operation, vars).await,
        Some(Commands::Subscribe { limit }) => cmd_subscribe(gateway, limit).await,
        _ => {
            print_summary(gateway.config());
            Ok(())
        }
    }
}

async fn cmd_forward<C: Connector>(
    gateway: &Gateway<C>,
    service: &str,
    operation: String,
    vars: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let variables: Variables = match vars {
        Some(ref text) => serde_json::from_str(text)?,
        None => Variables::new(),
    };
    let request = OutgoingRequest::with_variables(operation, variables);

    match gateway.forward(service, &request).await {
        Ok(body) => {
            println!("{}", String::from_utf8_lossy(&body));
            if matches!(gateway.config().service(service), Some(ServiceConfig::Queue { .. })) {
                print_stats(&gateway.rpc_stats());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Forward to {} failed ({:?}): {}", service, e.kind(), e);
            std::process::exit(1);
        }
    }
}

async fn cmd_subscribe<C: Connector>(
    gateway: &Gateway<C>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = gateway.subscription_channel();
    let handle = gateway.subscribe_book_added(tx).await?;

    println!("Relaying subscription (Ctrl+C to stop)...");
    println!();

    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                handle.cancel();
                break;
            }
            book = rx.recv() => match book {
                Some(book) => {
                    received += 1;
                    println!("{}", serde_json::to_string(&book)?);
                    if limit.is_some_and(|limit| received >= limit) {
                        handle.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let outcome = handle.join().await;
    println!("Relay stopped after {} event(s): {:?}", received, outcome);
    Ok(())
}

/// Answer every queue service with its resolver label and variables.
async fn spawn_echo_responders(
    broker: &MemoryBroker,
    config: &GatewayConfig,
) -> Result<Vec<JoinHandle<()>>, Box<dyn std::error::Error>> {
    let mut responders = Vec::new();
    for service in &config.services {
        if let ServiceConfig::Queue { queue, .. } = service {
            let handle = broker
                .spawn_responder(queue, |request| {
                    let body: serde_json::Value = serde_json::from_slice(&request.body).ok()?;
                    let resolver = body["requestedResolver"].as_str().unwrap_or_default();
                    let reply = json!({ "data": { resolver: body["variables"] } });
                    serde_json::to_vec(&reply).ok()
                })
                .await?;
            responders.push(handle);
        }
    }
    Ok(responders)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig {
        name: "library-gateway".into(),
        ..GatewayConfig::example()
    };

    let toml_str = toml::to_string_pretty(&config)?;

    // Add comments
    let content = format!(
        r#"# Shelf Gateway Configuration
# Generated by shelf-gateway gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match GatewayConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            print_summary(&config);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_summary(config: &GatewayConfig) {
    println!("Gateway: {}", config.name);
    println!("Services: {}", config.services.len());
    for (i, service) in config.services.iter().enumerate() {
        let transport = match service {
            ServiceConfig::Http { .. } => "http",
            ServiceConfig::Queue { .. } => "queue",
        };
        println!(
            "  [{}] {} -> {} ({})",
            i,
            service.name(),
            service.target(),
            transport
        );
    }
    match &config.subscription {
        Some(sub) => println!("Subscription: {} at {}", sub.entity, sub.url),
        None => println!("Subscription: none"),
    }
}

fn print_stats(stats: &CallStatsSnapshot) {
    println!("--- RPC Statistics ---");
    println!(
        "  {} calls, {} replies, {} timeouts, {} failures, {} discarded",
        stats.calls, stats.replies, stats.timeouts, stats.failures, stats.discarded
    );
}

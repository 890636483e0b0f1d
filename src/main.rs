use clap::{Parser, ValueEnum};
use serde_json::Value;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use rawnode::api::{ControllerUpdate, JobSubmission};
use rawnode::config::NodeConfig;
use rawnode::node::NodeServer;
use rawnode::scheduler::JobKind;
use rawnode::shutdown::install_shutdown_handler;
use rawnode::strategy::StrategyRegistry;

#[derive(Parser, Debug)]
#[command(name = "rawnode")]
#[command(version)]
#[command(about = "Compute node that stages mass-spectrometry raw data and runs controller jobs")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a node
    Server(ServerArgs),

    /// Submit jobs to a running node
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },

    /// Point a running node at a controller, or detach it
    Controller {
        #[command(flatten)]
        client: ClientArgs,

        /// Controller base URL; omit to detach
        url: Option<String>,
    },
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// TOML settings file (listen_port, data_root, work_dir, chunk_size, ...)
    #[arg(long, short = 's')]
    settings: Option<PathBuf>,

    /// Node ID
    #[arg(long)]
    node_id: Option<u64>,

    /// Host to bind the intake API to
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port for the intake API
    #[arg(long)]
    port: Option<u16>,

    /// Base directory for relative raw data paths
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Directory for working copies
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Staging chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Controller base URL to report to
    #[arg(long)]
    controller: Option<String>,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Node address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:7070")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Stage a raw data file on the node
    Open {
        task_id: u64,
        job_id: u64,
        /// Path of the raw data file, relative to the node's data root
        path: PathBuf,
    },
    /// Release a staged raw data file
    Close {
        task_id: u64,
        job_id: u64,
        /// Write filtered changes back to the original file
        #[arg(long)]
        save: bool,
    },
    /// Sum every intensity of a staged raw data file
    TotalSignal { task_id: u64, job_id: u64 },
    /// Submit any job type from a JSON file
    Submit {
        /// File holding a job submission body
        file: PathBuf,
    },
    /// Show what the node's worker is doing
    Status,
}

// =============================================================================
// Server Implementation
// =============================================================================

fn server_config(args: ServerArgs) -> Result<NodeConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.settings {
        Some(path) => NodeConfig::from_settings_file(path)?,
        None => NodeConfig::from_env()?,
    };

    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
    }
    if let Some(host) = args.host {
        config.listen_addr.set_ip(host);
    }
    if let Some(port) = args.port {
        config.listen_addr.set_port(port);
    }
    if let Some(data_root) = args.data_root {
        config.data_root = data_root;
    }
    if let Some(work_dir) = args.work_dir {
        config.work_dir = work_dir;
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    if args.controller.is_some() {
        config.controller_url = args.controller;
    }
    Ok(config)
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = server_config(args)?;
    tracing::info!(
        node_id = config.node_id,
        listen_addr = %config.listen_addr,
        data_root = %config.data_root.display(),
        work_dir = %config.work_dir.display(),
        "Starting rawnode"
    );

    let node = Arc::new(NodeServer::start(config, StrategyRegistry::with_builtins())?);
    let shutdown = install_shutdown_handler();
    node.clone().run(shutdown).await?;

    // Let the worker finish whatever is still queued and report it.
    match Arc::try_unwrap(node) {
        Ok(node) => node.shutdown().await,
        Err(_) => tracing::warn!("Node still referenced at shutdown, not waiting for worker"),
    }
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

fn endpoint(client: &ClientArgs, path: &str) -> String {
    format!("{}{}", client.addr.trim_end_matches('/'), path)
}

async fn submit(
    client: &ClientArgs,
    submission: &JobSubmission,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = reqwest::Client::new()
        .post(endpoint(client, "/api/jobs"))
        .json(submission)
        .send()
        .await?;
    let status = response.status();
    let body: Value = response.json().await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Table => {
            if status.is_success() {
                println!("Job {} queued (task {})", submission.job_id, submission.task_id);
            } else {
                let error = body["error"].as_str().unwrap_or("unknown error");
                println!("Job {} rejected: {}", submission.job_id, error);
            }
        }
    }
    if !status.is_success() {
        return Err(format!("node answered {}", status).into());
    }
    Ok(())
}

async fn handle_status(client: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let body: Value = reqwest::Client::new()
        .get(endpoint(client, "/api/status"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Table => {
            let worker = &body["worker"];
            println!("Node Status");
            println!("{}", "=".repeat(40));
            println!("Node:           {}", body["node_id"]);
            println!("Worker:         {}", worker["state"].as_str().unwrap_or("unknown"));
            if let Some(job) = worker["current_job"].as_object() {
                println!(
                    "Current job:    {} (task {}, {})",
                    job["job_id"],
                    job["task_id"],
                    job["job_type"].as_str().unwrap_or("?")
                );
            }
            println!("Queued jobs:    {}", body["queued_jobs"]);
            println!("Jobs processed: {}", worker["jobs_processed"]);
            println!("Controller set: {}", body["controller_set"]);
            println!("Open raw data:  {}", worker["open_raw_data"]);
        }
    }
    Ok(())
}

async fn handle_controller(
    client: &ClientArgs,
    url: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = reqwest::Client::new()
        .put(endpoint(client, "/api/controller"))
        .json(&ControllerUpdate { url })
        .send()
        .await?;
    let status = response.status();
    let body: Value = response.json().await?;

    match client.output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&body)?),
        OutputFormat::Table => match body["error"].as_str() {
            Some(error) => println!("Controller update rejected: {}", error),
            None => println!("Controller set: {}", body["controller_set"]),
        },
    }
    if !status.is_success() {
        return Err(format!("node answered {}", status).into());
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => {
            run_server(server_args).await?;
        }
        Commands::Job { client, command } => {
            let submission = match command {
                JobCommands::Open {
                    task_id,
                    job_id,
                    path,
                } => JobSubmission {
                    task_id,
                    job_id,
                    kind: JobKind::OpenRawData {
                        original_path: path,
                    },
                },
                JobCommands::Close {
                    task_id,
                    job_id,
                    save,
                } => JobSubmission {
                    task_id,
                    job_id,
                    kind: JobKind::CloseRawData { save_changes: save },
                },
                JobCommands::TotalSignal { task_id, job_id } => JobSubmission {
                    task_id,
                    job_id,
                    kind: JobKind::CalcTotalRawSignal,
                },
                JobCommands::Submit { file } => {
                    let text = tokio::fs::read_to_string(&file).await?;
                    serde_json::from_str(&text)?
                }
                JobCommands::Status => {
                    return handle_status(&client).await;
                }
            };
            submit(&client, &submission).await?;
        }
        Commands::Controller { client, url } => {
            handle_controller(&client, url).await?;
        }
    }

    Ok(())
}

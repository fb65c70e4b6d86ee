//
// main.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! rkclient
//!
//! Talks to a running Jupyter kernel directly over ZeroMQ, given its
//! connection file.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use rkclient::connection_file::ConnectionFile;
use rkclient::jupyter_messages::JupyterMsg;
use rkclient::kernel_connection::{ConnectionOptions, KernelConnection};
use rkclient::wire_message_header::make_message_id;
use rkshared::jupyter_content::{ExecuteRequest, InputRequest};
use rkshared::jupyter_message::{JupyterChannel, JupyterMessage, PartialMessage};
use rkshared::kernel_status::ExecutionState;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The kernel's connection file
    #[arg(short, long, value_name = "PATH")]
    connection_file: PathBuf,

    /// The log level to use. Valid values are "trace", "debug", "info",
    /// "warn", and "error". If not specified, the default log level is "info",
    /// or the value of `RUST_LOG` if set.
    #[arg(short, long)]
    log_level: Option<String>,

    /// A file to write logs to, in addition to the terminal
    #[arg(long)]
    log_file: Option<String>,

    /// Seconds to wait for a reply to each request; waits indefinitely if
    /// not given
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// The username to put in message headers
    #[arg(short, long)]
    username: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get kernel info
    Info,

    /// Execute code and print its output
    Execute {
        /// The code to execute
        #[arg(short, long)]
        code: String,
    },

    /// Interrupt the kernel
    Interrupt,

    /// Shut down the kernel
    Shutdown {
        /// Ask the kernel to restart after shutting down
        #[arg(short, long)]
        restart: bool,
    },

    /// Print everything the kernel publishes on iopub
    Listen {
        /// Also monitor (and print) the kernel's heartbeat
        #[arg(long)]
        heartbeat: bool,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args);

    if let Err(err) = run(args).await {
        log::error!("{:#}", err);
        std::process::exit(1);
    }
}

fn init_logging(args: &Args) {
    let log_level = match args.log_level {
        Some(ref level) => level.to_string(),
        None => std::env::var("RUST_LOG").unwrap_or_else(|_| String::from("info")),
    };

    // Match the log level to a `LevelFilter`
    let log_level = match log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}'; using 'info'", log_level);
            LevelFilter::Info
        }
    };

    let term_logger = TermLogger::new(
        log_level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
    let result = match args.log_file {
        Some(ref log_file) => match File::create(log_file) {
            Ok(file) => CombinedLogger::init(vec![
                term_logger,
                WriteLogger::new(log_level, Config::default(), file),
            ]),
            Err(err) => {
                eprintln!("Failed to create log file {}: {}", log_file, err);
                std::process::exit(1);
            }
        },
        None => CombinedLogger::init(vec![term_logger]),
    };

    // Consider it a fatal error if we can't initialize logging
    if let Err(err) = result {
        eprintln!("Failed to initialize logging: {}", err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let connection_file = ConnectionFile::from_file(&args.connection_file)?;

    let mut options = ConnectionOptions {
        request_timeout: args.timeout.map(Duration::from_secs),
        ..Default::default()
    };
    if let Some(username) = args.username {
        options.username = username;
    }
    if let Commands::Listen { heartbeat: true } = args.command {
        options.heartbeat_interval = Some(Duration::from_secs(1));
    }

    let connection = KernelConnection::connect(connection_file.info, options)
        .await
        .context("Failed to connect to kernel")?;

    let result = match args.command {
        Commands::Info => {
            let info = connection.kernel_info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Commands::Execute { code } => execute(&connection, &code).await,
        Commands::Interrupt => {
            let reply = connection.interrupt().await?;
            println!("{}", serde_json::to_string_pretty(&reply.content)?);
            Ok(())
        }
        Commands::Shutdown { restart } => {
            let reply = connection.shutdown(restart).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
        Commands::Listen { heartbeat } => listen(&connection, heartbeat).await,
    };

    connection.dispose();
    result
}

/// Run code and print its output until the kernel is idle again and the
/// execute_reply has arrived.
async fn execute(connection: &KernelConnection, code: &str) -> anyhow::Result<()> {
    // Subscribe before sending so no output is missed
    let mut iopub = connection.subscribe_iopub();
    let stdin_requests = connection.stdin_requests();

    let msg_id = make_message_id();
    let mut request = ExecuteRequest::new(code);
    request.allow_stdin = true;
    let partial = PartialMessage::from_content(&request)?.with_msg_id(&msg_id);

    let send = connection.send(partial, JupyterChannel::Shell);
    tokio::pin!(send);

    let mut reply: Option<JupyterMessage> = None;
    let mut idle = false;
    while reply.is_none() || !idle {
        tokio::select! {
            result = &mut send, if reply.is_none() => {
                let message = result?.context("No execute_reply received")?;
                reply = Some(message);
            },
            event = iopub.recv() => {
                match event {
                    Ok(Ok(message)) => {
                        if message.parent_msg_id() == Some(msg_id.as_str()) {
                            idle |= print_output(message);
                        }
                    }
                    Ok(Err(err)) => log::warn!("Skipping invalid iopub message: {}", err),
                    Err(RecvError::Lagged(count)) => {
                        log::warn!("Missed {} iopub messages", count)
                    }
                    Err(RecvError::Closed) => break,
                }
            },
            request = stdin_requests.recv() => {
                let request = request.context("The stdin channel closed")?;
                answer_input(connection, request).await?;
            },
        }
    }

    if let Some(reply) = reply {
        log::debug!("execute_reply: {}", reply.content);
        if reply.content["status"] != "ok" {
            anyhow::bail!("Execution finished with status {}", reply.content["status"]);
        }
    }
    Ok(())
}

/// Print one iopub message belonging to our execution. Returns true once the
/// kernel reports itself idle.
fn print_output(message: JupyterMessage) -> bool {
    match message.header.msg_type.as_str() {
        "execute_result" | "display_data" => {
            if let Some(text) = message.content["data"]["text/plain"].as_str() {
                println!("{}", text);
            }
            return false;
        }
        _ => {}
    }

    match JupyterMsg::from(message) {
        JupyterMsg::Status(status) => return status.execution_state == ExecutionState::Idle,
        JupyterMsg::Stream(stream) => {
            if stream.name == "stderr" {
                eprint!("{}", stream.text);
            } else {
                print!("{}", stream.text);
            }
        }
        JupyterMsg::Error(error) => {
            for line in error.traceback {
                eprintln!("{}", line);
            }
            eprintln!("{}: {}", error.ename, error.evalue);
        }
        _ => {}
    }
    false
}

async fn answer_input(connection: &KernelConnection, request: JupyterMessage) -> anyhow::Result<()> {
    let prompt = match JupyterMsg::from(request.clone()) {
        JupyterMsg::InputRequest(InputRequest { prompt, .. }) => prompt,
        _ => {
            log::debug!("Ignoring stdin message {}", request.header.msg_type);
            return Ok(());
        }
    };

    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read input")?;

    let value = line.trim_end_matches(['\r', '\n']);
    connection.input_reply(value, &request.header).await?;
    Ok(())
}

/// Print iopub traffic (and heartbeat changes) until interrupted.
async fn listen(connection: &KernelConnection, heartbeat: bool) -> anyhow::Result<()> {
    let mut iopub = connection.subscribe_iopub();
    let mut heartbeat_status = connection.heartbeat_status();
    let mut watch_heartbeat = heartbeat;

    loop {
        tokio::select! {
            event = iopub.recv() => {
                match event {
                    Ok(Ok(message)) => println!("{}", serde_json::to_string_pretty(&message)?),
                    Ok(Err(err)) => log::warn!("Invalid iopub message: {}", err),
                    Err(RecvError::Lagged(count)) => {
                        log::warn!("Missed {} iopub messages", count)
                    }
                    Err(RecvError::Closed) => break,
                }
            },
            changed = heartbeat_status.changed(), if watch_heartbeat => {
                match changed {
                    Ok(_) => println!("heartbeat: {}", *heartbeat_status.borrow()),
                    // The monitor stopped
                    Err(_) => watch_heartbeat = false,
                }
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted; disconnecting");
                break;
            },
        }
    }
    Ok(())
}

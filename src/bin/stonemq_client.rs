use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::runtime;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tracing::{error, info};

use stonemq_client::{setup_tracing, AppResult, Client, ClientConfig, InboundMessage};

#[derive(Parser)]
#[command(version, about = "Talk to a pub/sub server from the command line")]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<PathBuf>,
    /// directory for the rolling log file
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// print the effective configuration and exit
    PrintConfig,
    /// print the server's INFO
    Info,
    /// publish one message
    Pub { subject: String, payload: String },
    /// print messages published to a subject
    Sub {
        subject: String,
        #[arg(short, long)]
        queue: Option<String>,
        /// exit after this many messages
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// send a request and print the reply
    Request { subject: String, payload: String },
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn print_message(message: &InboundMessage) {
    println!(
        "[{}] sid={} reply_to={} {}",
        message.subject,
        message.sid,
        message.reply_to.as_deref().unwrap_or("-"),
        String::from_utf8_lossy(&message.payload)
    );
}

async fn run(config: ClientConfig, command: Command) -> AppResult<()> {
    let (notify_shutdown, _) = broadcast::channel(1);
    let client = Client::connect_with_shutdown(&config, &notify_shutdown).await?;

    match command {
        // printed in main without connecting
        Command::PrintConfig => {}
        Command::Info => {
            let info = client.get_info().await?;
            println!("{:#?}", info);
        }
        Command::Pub { subject, payload } => {
            client.publish(&subject, payload.into_bytes()).await?;
        }
        Command::Sub {
            subject,
            queue,
            count,
        } => {
            let mut messages = client.subscriber().await?;
            let sid = client.subscribe(&subject, queue.as_deref()).await?;
            info!("subscribed to {} with sid {}", subject, sid);
            let mut received = 0;
            loop {
                tokio::select! {
                    message = messages.next() => {
                        let Some(message) = message else { break };
                        print_message(&message);
                        received += 1;
                        if count.is_some_and(|count| received >= count) {
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("get shutdown signal");
                        break;
                    }
                }
            }
        }
        Command::Request { subject, payload } => {
            let reply = tokio::select! {
                reply = client.request(&subject, payload.into_bytes()) => reply?,
                _ = tokio::signal::ctrl_c() => {
                    info!("get shutdown signal");
                    let _ = notify_shutdown.send(());
                    client.closed().await;
                    return Ok(());
                }
            };
            print_message(&reply);
        }
    }

    client.shutdown().await
}

fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    let _guard = setup_tracing(&commandline.log_dir, log_filter(commandline.verbose))?;

    let config = match &commandline.conf {
        Some(path) => ClientConfig::set_up_config(path)?,
        None => ClientConfig::default(),
    };

    if let Command::PrintConfig = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let result = rt.block_on(run(config, commandline.command));
    if let Err(err) = &result {
        error!("{}", err);
    }
    result
}

// proctalk/proctalk-cli/src/main.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

use clap::{Parser, Subcommand};
use std::sync::Arc;

use proctalk::config::DEFAULT_PORT;
use proctalk::{Message, MessageType, Protocol, RemoteClient, Value};

/// proctalk CLI: start, list and stop processes on a proctalk server
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host name or address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the server answers
    Ping,
    /// List processes running on the server host
    List {
        /// Only processes launched through proctalk
        #[arg(long)]
        managed: bool,
    },
    /// Launch a process on the server host
    Start {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Working directory of the new process
        #[arg(long)]
        cwd: Option<String>,
        /// Ask the server to close the session after launching
        #[arg(long)]
        end_session: bool,
    },
    /// Kill a process launched through proctalk
    Kill { id: u64 },
    /// Restart a process launched through proctalk
    Restart { id: u64 },
    /// Stop the server
    Stop,
}

fn fail(reply: &Message) -> ! {
    eprintln!("Error: {}", reply.text(0).unwrap_or("unexpected reply"));
    std::process::exit(1);
}

fn print_rows(reply: &Message) {
    for entry in reply.payload() {
        match entry.as_array() {
            Some(fields) => {
                let cells: Vec<String> = fields.iter().map(Value::to_string).collect();
                println!("{}", cells.join("\t"));
            }
            None => println!("{}", entry),
        }
    }
}

async fn handle_command(client: &mut RemoteClient, cmd: Commands) -> anyhow::Result<()> {
    let request = match cmd {
        Commands::Ping => Message::chit_chat("ping"),
        Commands::List { managed: true } => Message::list_managed_processes(),
        Commands::List { managed: false } => Message::list_processes(),
        Commands::Start {
            program,
            args,
            cwd,
            end_session,
        } => Message::start_process(program, args, cwd, end_session),
        Commands::Kill { id } => Message::kill_process(id),
        Commands::Restart { id } => Message::restart_process(id),
        Commands::Stop => Message::stop_server(),
    };

    let reply = client.send_message(&request).await?;
    match reply.message_type() {
        MessageType::ProcessList => print_rows(&reply),
        MessageType::ChitChat => println!("pong"),
        MessageType::Ack => println!("{}", Value::Array(reply.into_payload())),
        _ => fail(&reply),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut client = RemoteClient::new(Arc::new(Protocol::process_control()?));
    let greeting = client.connect(&cli.host, cli.port).await?;
    if let Some(refused) = greeting.iter().find(|m| m.is_invalid()) {
        fail(refused);
    }

    handle_command(&mut client, cli.command).await?;
    client.close().await;
    Ok(())
}

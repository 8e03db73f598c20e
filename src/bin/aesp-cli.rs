//! `aesp-cli`: a thin front-end over the CLI text protocol (C5).
//!
//! Discovers the newest live `/tmp/attic-*.sock`, sends one command line,
//! prints the response, and exits with the contract spec.md §6 defines:
//! - `0` on an `OK:` response
//! - `1` on a protocol/connection error (no socket, handshake failed, I/O)
//! - `2` on a usage/parse error in the command line itself
//! - `3` on an `ERR:` response from the emulator process

use aesp::cli::{discover_socket, Command, Inbound};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "aesp-cli", about = "Send one command to a running AESP emulator")]
struct Args {
    /// Command words, e.g. `status` or `mem read 0x0600 16`.
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let line = args.command.join(" ");

    let command = match Command::parse(&line) {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(2);
        }
    };

    let mut stream = match discover_socket().await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let request = format!("CMD:{}\n", command.encode());
    if let Err(e) = stream.write_all(request.as_bytes()).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    let mut reader = BufReader::new(&mut stream);
    let mut response_line = String::new();
    if let Err(e) = reader.read_line(&mut response_line).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    match Inbound::parse(response_line.trim_end()) {
        Ok(Inbound::Ok { body }) => {
            println!("{}", body.join("\n"));
            std::process::exit(0);
        }
        Ok(Inbound::Err { message }) => {
            eprintln!("ERR:{message}");
            std::process::exit(3);
        }
        Ok(Inbound::Event { name, body }) => {
            eprintln!("unexpected event before response: {name} {}", body.join(" "));
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

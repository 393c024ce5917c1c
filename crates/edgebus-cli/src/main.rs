//! # Edgebus CLI
//!
//! Command-line utilities for building and inspecting wire frames.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use edgebus_proto::Message;
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => {
            if args.len() < 4 {
                eprintln!("Usage: edgebus encode <source> <body> [sequence_id]");
                std::process::exit(1);
            }
            let source = &args[2];
            let body = args[3].as_bytes().to_vec();
            let sequence_id = match args.get(4) {
                Some(raw) => raw.parse().context("Invalid sequence id")?,
                None => 0,
            };
            let frame = Message::data(source, sequence_id, body).encode();
            println!("{}", URL_SAFE_NO_PAD.encode(frame));
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: edgebus decode <encoded>");
                std::process::exit(1);
            }
            let bytes = URL_SAFE_NO_PAD
                .decode(&args[2])
                .context("Failed to decode base64")?;
            let message = Message::decode(&bytes).context("Failed to decode frame")?;
            println!("control:     {:?}", message.control);
            println!("sequence_id: {}", message.sequence_id);
            println!("source:      {}", message.source);
            println!("body:        {}", String::from_utf8_lossy(&message.body));
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"Edgebus CLI

USAGE:
    edgebus <COMMAND> [OPTIONS]

COMMANDS:
    encode <source> <body> [seq]  Build a data frame, print base64url (no padding)
    decode <encoded>              Decode a base64url frame and print its fields
    help                          Show this help message

EXAMPLES:
    edgebus encode "gate:door1" "OPEN" 2019
    edgebus decode "7QEB..."
"#
    );
}

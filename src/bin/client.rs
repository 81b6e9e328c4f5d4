//! Terminal chat client
//!
//! ```text
//! /rooms          list rooms
//! /create NAME    create a room
//! /join NAME      join a room
//! /leave NAME     leave a room
//! /quit           exit
//! anything else   chat to the current room
//! ```

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tracing_subscriber::EnvFilter;

use room_chat::codec;
use room_chat::{Message, MessageKind, ProtocolError};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8081";

/// One line of user input
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Send(Message),
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let stream = TcpStream::connect(&addr).await?;
    println!("Connected to {}", addr);

    let (mut reader, mut writer) = stream.into_split();

    // Receive task (socket -> stdout)
    let receive_task = tokio::spawn(async move {
        loop {
            match codec::decode(&mut reader).await {
                Ok(Some(msg)) => print_message(&msg),
                Ok(None) => {
                    println!("Disconnected from server");
                    break;
                }
                Err(e) => {
                    eprintln!("Error decoding message: {}", e);
                    break;
                }
            }
        }
    });

    // Send loop (stdin -> socket)
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_input(&line) {
            Ok(Some(Input::Quit)) => {
                println!("Quitting...");
                break;
            }
            Ok(Some(Input::Send(msg))) => {
                if let Err(e) = codec::write_message(&mut writer, &msg).await {
                    eprintln!("Error sending message: {}", e);
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => eprintln!("Cannot send: {}", e),
        }
    }

    receive_task.abort();
    Ok(())
}

/// Turn a line into a message; blank lines produce nothing
fn parse_input(line: &str) -> Result<Option<Input>, ProtocolError> {
    let text = line.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let (command, argument) = match text.split_once(' ') {
        Some((command, argument)) => (command, argument.trim()),
        None => (text, ""),
    };

    let msg = match command {
        "/quit" => return Ok(Some(Input::Quit)),
        "/rooms" => Message::empty(MessageKind::ListRooms),
        "/create" => Message::new(MessageKind::CreateRoom, argument)?,
        "/join" => Message::new(MessageKind::JoinRoom, argument)?,
        "/leave" => Message::new(MessageKind::Leave, argument)?,
        _ => Message::new(MessageKind::Chat, text)?,
    };
    Ok(Some(Input::Send(msg)))
}

fn print_message(msg: &Message) {
    match msg.kind() {
        MessageKind::ListRooms => {
            if msg.content().is_empty() {
                println!("No rooms yet");
            }
            for name in msg.text().lines() {
                println!("  - {}", name);
            }
        }
        MessageKind::Chat => println!("> {}", msg.text()),
        other => println!("[{:?}] {}", other, msg.text()),
    }
}

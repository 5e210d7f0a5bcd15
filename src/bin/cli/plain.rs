use osmium_stomp::{ConnError, Connection, Headers, MessageData, ServerError};
use std::io::{self, BufRead, Write};
use tokio::sync::mpsc;
use tracing::debug;

use super::args::Cli;
use super::commands::{self, Command, CommandResult};
use super::exit_codes;

/// Run the interactive prompt until `quit`, Ctrl-C, or end of input.
pub async fn run(cli: &Cli) -> Result<(), (String, u8)> {
    let broker = cli.broker();
    let address = broker.address();
    println!("Connecting to {}...", address);

    let conn = Connection::connect_tcp(&address, broker.connect_headers())
        .await
        .map_err(|e| format_connection_error(&e, &address))?;
    println!(
        "Connected (protocol {}, server {}).",
        conn.protocol(),
        conn.server().unwrap_or("unknown")
    );

    for dest in &cli.subscribe {
        subscribe_destination(&conn, dest).await?;
    }

    tokio::spawn(print_connection_frames(conn.clone()));

    if let (Some(body), Some(dest)) = (&cli.send, &cli.destination) {
        match conn.send(Headers::new().add("destination", dest), body).await {
            Ok(()) => println!("Sent {} bytes to {}", body.len(), dest),
            Err(e) => eprintln!("Send error: {}", e),
        }
    }

    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.blocking_send(l).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    println!();
    commands::print_help();
    println!();

    loop {
        prompt();
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
            line = line_rx.recv() => match line {
                Some(l) => l,
                None => break,
            },
        };
        if !conn.is_connected() {
            eprintln!("Connection lost.");
            break;
        }

        let command = match commands::parse(&line) {
            Ok(c) => c,
            Err(msg) => {
                eprintln!("{}", msg);
                continue;
            }
        };
        if let Command::Subscribe(dest) = &command {
            if let Err((msg, _)) = subscribe_destination(&conn, dest).await {
                eprintln!("{}", msg);
            }
            continue;
        }
        match commands::execute(command, &conn).await {
            CommandResult::Ok => {}
            CommandResult::Quit => break,
            CommandResult::Info(msg) => println!("{}", msg),
            CommandResult::Error(msg) => eprintln!("{}", msg),
        }
    }

    if cli.summary {
        println!("{}", commands::stats_line(&conn));
    }
    if conn.is_connected() {
        println!("Disconnecting...");
        if let Err(e) = conn.disconnect(Headers::new()).await {
            eprintln!("Disconnect: {}", e);
        }
    }
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

/// Subscribe and spawn a task printing that subscription's messages.
async fn subscribe_destination(conn: &Connection, dest: &str) -> Result<(), (String, u8)> {
    let mut sub = conn
        .subscribe(Headers::new().add("destination", dest))
        .await
        .map_err(|e| {
            (
                format!("Failed to subscribe to '{}': {}", dest, e),
                exit_codes::PROTOCOL_ERROR,
            )
        })?;
    println!("Subscribed to {} (id {})", dest, sub.id());

    let dest = dest.to_string();
    tokio::spawn(async move {
        while let Some(md) = sub.recv().await {
            print_message(&dest, &md);
        }
        debug!(destination = %dest, "subscription ended");
    });
    Ok(())
}

/// ERROR and RECEIPT frames, and the reader's final error.
async fn print_connection_frames(conn: Connection) {
    while let Some(md) = conn.next_message().await {
        match md.error {
            Some(e) if e.is_eof() => eprintln!("\n[broker closed the connection]"),
            Some(e) => eprintln!("\n[connection error] {}", e),
            None if md.message.command == "ERROR" => {
                let err = ServerError::from_frame(md.message);
                eprintln!("\n[BROKER ERROR] {}", err);
                for (k, v) in err.frame.headers.pairs() {
                    eprintln!("  {}: {}", k, v);
                }
            }
            None => println!("\n[{}] {}", md.message.command, md.message.headers),
        }
        prompt();
    }
}

fn print_message(dest: &str, md: &MessageData) {
    let frame = &md.message;
    println!("\n[{}] MESSAGE received:", dest);
    for (k, v) in frame.headers.pairs() {
        println!("  {}: {}", k, v);
    }
    if !frame.body.is_empty() {
        match std::str::from_utf8(&frame.body) {
            Ok(s) => println!("  Body: {}", s),
            Err(_) => println!("  Body: ({} bytes, binary)", frame.body.len()),
        }
    }
    prompt();
}

/// Map a connect failure to a message and exit code.
fn format_connection_error(err: &ConnError, address: &str) -> (String, u8) {
    match err {
        ConnError::Io(io_err) => {
            let message = match io_err.kind() {
                io::ErrorKind::ConnectionRefused => format!("Connection refused: {}", address),
                io::ErrorKind::TimedOut => format!("Connection timed out: {}", address),
                _ => format!("Connection failed: {}", io_err),
            };
            (message, exit_codes::NETWORK_ERROR)
        }
        ConnError::ServerRejected(server_err) => {
            let mut message = format!("Authentication failed: {}", server_err.message);
            if let Some(body) = &server_err.body {
                message.push_str(&format!(" ({})", body));
            }
            (message, exit_codes::AUTH_ERROR)
        }
        other => (format!("Connect failed: {}", other), exit_codes::PROTOCOL_ERROR),
    }
}

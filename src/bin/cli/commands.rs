use osmium_stomp::{Connection, Headers};

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Send { destination: String, body: String },
    Subscribe(String),
    Unsubscribe(String),
    Begin(String),
    Commit(String),
    Abort(String),
    Stats,
    Help,
    Quit,
    Empty,
}

/// Result of executing a command
pub enum CommandResult {
    Ok,
    /// Command requests exit
    Quit,
    Info(String),
    Error(String),
}

/// Parse a prompt line.
pub fn parse(line: &str) -> Result<Command, String> {
    let parts: Vec<&str> = line.trim().splitn(3, ' ').collect();
    let arg = |i: usize, usage: &str| {
        parts
            .get(i)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .ok_or_else(|| format!("Usage: {}", usage))
    };
    match parts[0] {
        "" => Ok(Command::Empty),
        "quit" | "exit" | "q" => Ok(Command::Quit),
        "help" | "?" => Ok(Command::Help),
        "stats" => Ok(Command::Stats),
        "send" => Ok(Command::Send {
            destination: arg(1, "send <destination> <message>")?,
            body: arg(2, "send <destination> <message>")?,
        }),
        "sub" | "subscribe" => Ok(Command::Subscribe(arg(1, "sub <destination>")?)),
        "unsub" | "unsubscribe" => Ok(Command::Unsubscribe(arg(1, "unsub <id>")?)),
        "begin" => Ok(Command::Begin(arg(1, "begin <transaction>")?)),
        "commit" => Ok(Command::Commit(arg(1, "commit <transaction>")?)),
        "abort" => Ok(Command::Abort(arg(1, "abort <transaction>")?)),
        other => Err(format!(
            "Unknown command: {}. Type 'help' for commands.",
            other
        )),
    }
}

/// Run every command that only needs the connection. Subscribe is
/// handled by the caller, which owns the message printers.
pub async fn execute(command: Command, conn: &Connection) -> CommandResult {
    let outcome = match command {
        Command::Empty | Command::Subscribe(_) => return CommandResult::Ok,
        Command::Quit => return CommandResult::Quit,
        Command::Help => {
            print_help();
            return CommandResult::Ok;
        }
        Command::Stats => {
            return CommandResult::Info(stats_line(conn));
        }
        Command::Send { destination, body } => {
            conn.send(Headers::new().add("destination", destination), &body)
                .await
        }
        Command::Unsubscribe(id) => conn.unsubscribe(Headers::new().add("id", id)).await,
        Command::Begin(tx) => conn.begin(Headers::new().add("transaction", tx)).await,
        Command::Commit(tx) => conn.commit(Headers::new().add("transaction", tx)).await,
        Command::Abort(tx) => conn.abort(Headers::new().add("transaction", tx)).await,
    };
    match outcome {
        Ok(()) => CommandResult::Ok,
        Err(e) => CommandResult::Error(format!("Error: {}", e)),
    }
}

pub fn stats_line(conn: &Connection) -> String {
    let s = conn.stats();
    let mut line = format!(
        "protocol {} | frames in/out {}/{} | bytes in/out {}/{}",
        conn.protocol(),
        s.frames_read,
        s.frames_written,
        s.bytes_read,
        s.bytes_written
    );
    if let Some(hb) = conn.heartbeat_stats() {
        line.push_str(&format!(
            " | heart-beats sent/received/missed {}/{}/{}{}",
            hb.sent,
            hb.received,
            hb.missed,
            if hb.stale { " (stale)" } else { "" }
        ));
    }
    line
}

pub fn print_help() {
    println!("Commands:");
    println!("  send <destination> <message>  - Send a message");
    println!("  sub <destination>             - Subscribe to a destination");
    println!("  unsub <id>                    - Unsubscribe by subscription id");
    println!("  begin|commit|abort <tx>       - Transaction control");
    println!("  stats                         - Show connection statistics");
    println!("  quit                          - Disconnect and exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_spaces_in_body() {
        assert_eq!(
            parse("send /queue/a hello there").unwrap(),
            Command::Send {
                destination: "/queue/a".into(),
                body: "hello there".into()
            }
        );
    }

    #[test]
    fn missing_arguments_show_usage() {
        assert_eq!(parse("send /queue/a").unwrap_err(), "Usage: send <destination> <message>");
        assert!(parse("begin").unwrap_err().starts_with("Usage"));
    }

    #[test]
    fn aliases_and_blank_lines() {
        assert_eq!(parse("  ").unwrap(), Command::Empty);
        assert_eq!(parse("q").unwrap(), Command::Quit);
        assert_eq!(parse("subscribe /t").unwrap(), Command::Subscribe("/t".into()));
        assert!(parse("publish x").is_err());
    }
}

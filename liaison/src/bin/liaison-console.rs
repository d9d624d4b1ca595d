use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use liaison::logging::init_logging;
use liaison::{ApiClient, ClientConfig, ContentType, Message, SessionRuntime, SessionSnapshot, TracingSink};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

const HELP: &str = "\
commands:
  /open <chat-id>     switch to a conversation
  /more               load older messages
  /retry <temp-id>    resend a failed message
  /image <path>       upload an image and send it
  /list               show conversations
  /quit               leave
anything else is sent as a message";

#[tokio::main]
async fn main() {
    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let _guard = init_logging(config.log_dir.as_deref());

    let api = match ApiClient::from_config(&config) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            error!(error = %e, "Failed to create REST client");
            std::process::exit(1);
        }
    };
    let handle = match SessionRuntime::spawn(config, api, Arc::new(TracingSink)) {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "Failed to start session");
            std::process::exit(1);
        }
    };

    println!("{}", HELP);

    let mut snapshots = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = ConsoleView::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                let sent = match parse_line(&line) {
                    Input::Quit => break,
                    Input::Help => {
                        println!("{}", HELP);
                        Ok(())
                    }
                    Input::List => {
                        view.print_conversations(&handle.snapshot());
                        Ok(())
                    }
                    Input::Open(id) => handle.open(id),
                    Input::More => handle.load_older(),
                    Input::Retry(temp_id) => handle.retry(temp_id),
                    Input::Image(path) => match tokio::fs::read(&path).await {
                        Ok(bytes) => {
                            let filename = path
                                .file_name()
                                .map(|n| n.to_string_lossy().into_owned())
                                .unwrap_or_else(|| "image".to_string());
                            handle.send_image(bytes, filename)
                        }
                        Err(e) => {
                            println!("! cannot read {}: {}", path.display(), e);
                            Ok(())
                        }
                    },
                    Input::Text(text) => handle
                        .input(text.clone())
                        .and_then(|_| handle.send_text(text)),
                    Input::Empty => Ok(()),
                };
                if let Err(e) = sent {
                    error!(error = %e, "Session is not running");
                    break;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                view.render(&snapshot);
            }
        }
    }

    handle.shutdown().await;
}

#[derive(Debug, PartialEq)]
enum Input {
    Open(String),
    More,
    Retry(String),
    Image(PathBuf),
    List,
    Help,
    Quit,
    Text(String),
    Empty,
}

fn parse_line(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.strip_prefix('/') else {
        return if line.trim().is_empty() {
            Input::Empty
        } else {
            Input::Text(line.to_string())
        };
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("open", id) if !id.is_empty() => Input::Open(id.to_string()),
        ("more", _) => Input::More,
        ("retry", id) if !id.is_empty() => Input::Retry(id.to_string()),
        ("image", path) if !path.is_empty() => Input::Image(PathBuf::from(path)),
        ("list", _) => Input::List,
        ("quit", _) | ("exit", _) => Input::Quit,
        _ => Input::Help,
    }
}

/// Prints what changed between snapshots.
#[derive(Default)]
struct ConsoleView {
    room: Option<String>,
    shown: HashMap<String, (bool, bool)>,
    typing: bool,
    connected: bool,
    auth_failed: bool,
}

impl ConsoleView {
    fn render(&mut self, snapshot: &SessionSnapshot) {
        if snapshot.connected != self.connected {
            self.connected = snapshot.connected;
            println!(
                "* {}",
                if self.connected { "connected" } else { "disconnected" }
            );
        }
        if snapshot.auth_failed && !self.auth_failed {
            self.auth_failed = true;
            println!("* credential rejected, check LIAISON_TOKEN");
        }
        if snapshot.active_room != self.room {
            self.room = snapshot.active_room.clone();
            self.shown.clear();
            if let Some(room) = &self.room {
                println!("== {} ==", room);
            }
        }

        for msg in &snapshot.messages {
            let state = (msg.is_optimistic, msg.failed);
            if self.shown.get(&msg.id) == Some(&state) {
                continue;
            }
            println!("{}", format_message(msg));
            self.shown.insert(msg.id.clone(), state);
        }

        let typing = snapshot.remote_typing;
        if typing != self.typing {
            self.typing = typing;
            if typing {
                match snapshot.typing_user.as_deref() {
                    Some(user) => println!("  ... {} is typing", user),
                    None => println!("  ... typing"),
                }
            }
        }
    }

    fn print_conversations(&self, snapshot: &SessionSnapshot) {
        for conversation in &snapshot.conversations {
            let marker = if Some(&conversation.id) == snapshot.active_room.as_ref() {
                '>'
            } else {
                ' '
            };
            println!(
                "{} {} {} ({} unread) {}",
                marker,
                conversation.id,
                conversation
                    .counterpart_name
                    .as_deref()
                    .unwrap_or(&conversation.counterpart_id),
                conversation.unread_count,
                conversation.last_message.as_deref().unwrap_or("")
            );
        }
        println!("total unread: {}", snapshot.total_unread);
    }
}

fn format_message(msg: &Message) -> String {
    let status = match (msg.is_optimistic, msg.failed) {
        (true, true) => format!(" [failed, /retry {}]", msg.id),
        (true, false) => " [sending]".to_string(),
        _ => String::new(),
    };
    let content = match msg.content_type {
        ContentType::Text => msg.content.clone(),
        ContentType::Image => format!("[image] {}", msg.content),
        ContentType::Gift => format!("[gift] {}", msg.content),
    };
    format!("{}: {}{}", msg.sender_id, content, status)
}

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use chrono::Local;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use parley_api::{ApiClient, Attachment, Draft};
use parley_chat::{ChatDriver, Timeline, ViewSnapshot};
use parley_gateway::{Gateway, GatewayConfig};
use parley_types::models::{ConversationTarget, MessageId, UserId};

use crate::render;

#[derive(Debug, PartialEq)]
enum Input {
    Empty,
    Quit,
    Send(String),
    File(PathBuf),
    Delete(MessageId),
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Send(line.to_string());
    };

    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };
    match cmd {
        "quit" | "q" => Input::Quit,
        "delete" => match arg.parse() {
            Ok(id) => Input::Delete(id),
            Err(_) => Input::Invalid("usage: /delete <message id>".into()),
        },
        "file" if !arg.is_empty() => Input::File(PathBuf::from(arg)),
        "file" => Input::Invalid("usage: /file <path>".into()),
        _ => Input::Invalid(format!("unknown command /{}", cmd)),
    }
}

/// Tracks what has already been printed so each snapshot only adds lines.
#[derive(Default)]
struct Printer {
    me: Option<UserId>,
    shown: HashSet<MessageId>,
    connected: Option<bool>,
    error: Option<String>,
}

impl Printer {
    fn history(&mut self, snapshot: &ViewSnapshot) {
        let mut timeline = Timeline::new();
        timeline.extend(snapshot.messages.iter().cloned());
        for line in render::timeline_lines(&timeline, self.me) {
            println!("{}", line);
        }
        self.shown.extend(snapshot.messages.iter().map(|m| m.id));
        self.update(snapshot);
    }

    fn update(&mut self, snapshot: &ViewSnapshot) {
        for message in &snapshot.messages {
            if self.shown.insert(message.id) {
                println!("{}", render::message_line(message, self.me, &Local));
            }
        }
        self.shown.retain(|id| snapshot.messages.iter().any(|m| m.id == *id));

        if self.connected != Some(snapshot.connected) {
            if snapshot.connected {
                println!("(live)");
            } else if self.connected.is_some() {
                println!("(connection lost, reconnecting)");
            }
            self.connected = Some(snapshot.connected);
        }

        if snapshot.error != self.error {
            if let Some(error) = &snapshot.error {
                eprintln!("! {}", error);
            }
            self.error = snapshot.error.clone();
        }
    }
}

pub async fn run(api: &ApiClient, ws_url: &str, target: ConversationTarget) -> Result<()> {
    let gateway = Gateway::new(GatewayConfig::new(ws_url)?, api.clone());
    let (mut handle, task) = ChatDriver::spawn(api.clone(), gateway);

    let key = target.key();
    handle.select(target.clone())?;
    let snapshot = handle
        .wait_for(|s| s.key() == Some(key) && !s.loading)
        .await?;

    let mut printer = Printer {
        me: api.session().user_id(),
        ..Printer::default()
    };
    println!("Conversation with {}", target.display_name());
    printer.history(&snapshot);
    println!("Type to send. /file <path> attaches, /delete <id> deletes, /quit leaves.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Send(text) => handle.send(Draft::text(text))?,
                    Input::File(path) => match Attachment::from_path(&path).await {
                        Ok(file) => handle.send(Draft { text: None, file: Some(file) })?,
                        Err(e) => eprintln!("! {}", e),
                    },
                    Input::Delete(id) => handle.delete(id)?,
                    Input::Invalid(hint) => eprintln!("! {}", hint),
                }
            }
            snapshot = handle.changed() => {
                printer.update(&snapshot?);
            }
        }
    }

    debug!("Leaving conversation {}", key);
    drop(handle);
    task.await?;
    Ok(())
}

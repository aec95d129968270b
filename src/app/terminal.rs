use std::time::Duration;
use log::{info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::Receiver;
use uuid::Uuid;

use crate::device::types::{Command, PeripheralAddress};
use crate::error::AppRunError;
use crate::session::Session;
use crate::session::types::SessionEvent;

pub const HELP: &str = "Commands: on, off, connect, disconnect, status, quit";

/// What the terminal dials when the user asks to (re)connect.
#[derive(Debug, Clone)]
pub struct Target {
    pub peripheral: PeripheralAddress,
    pub service: Uuid,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(Command),
    Connect,
    Disconnect,
    Status,
    Help,
    Quit,
}

pub fn parse_action(line: &str) -> Option<Action> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Ok(command) = line.parse::<Command>() {
        return Some(Action::Send(command));
    }

    let action = match line.to_ascii_lowercase().as_str() {
        "connect" => Action::Connect,
        "disconnect" => Action::Disconnect,
        "status" => Action::Status,
        "quit" | "exit" => Action::Quit,
        _ => Action::Help,
    };
    Some(action)
}

/// The text shown for an event, None if the event is not shown.
pub fn render(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::Connected { peripheral, .. } => Some(format!("Connected to {}", peripheral)),
        // the terminal view puts every chunk on its own line
        SessionEvent::Inbound(message) => Some(message.text.trim_end_matches('\n').to_string()),
        // already printed by the writer's caller
        SessionEvent::Status(_) => None,
        SessionEvent::ReaderStopped { reason, .. } => Some(format!("Disconnected ({}). Type \"connect\" to reconnect.", reason)),
    }
}

pub async fn connect(session: &Session, target: &Target) {
    println!("Connecting to {}...", target.peripheral);

    if let Err(err) = session.connect(&target.peripheral, target.service, target.timeout).await {
        warn!("Failed to connect: {}", err);
        println!("Failed to connect to {}: {}", target.peripheral.name(), err);
    }
}

pub async fn run_terminal(session: &Session, events: &mut Receiver<SessionEvent>, target: &Target) -> Result<(), AppRunError> {
    let mut lines = BufReader::new(stdin()).lines();
    println!("{}", HELP);

    'mainloop: loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break 'mainloop;
                };

                match parse_action(&line) {
                    None => {},
                    Some(Action::Send(command)) => match session.send(command) {
                        Ok(event) => println!("{}", event.status_line()),
                        Err(err) => println!("Error sending command: {}", err),
                    },
                    Some(Action::Connect) => connect(session, target).await,
                    Some(Action::Disconnect) => {
                        session.disconnect().await;
                        println!("Disconnected");
                    },
                    Some(Action::Status) => println!("{:?}", session.state()),
                    Some(Action::Help) => println!("{}", HELP),
                    Some(Action::Quit) => break 'mainloop,
                }
            },
            Some(event) = events.recv() => {
                if let Some(text) = render(&event) {
                    println!("{}", text);
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::InboundMessage;

    #[test]
    fn parses_actions() {
        assert_eq!(parse_action("on"), Some(Action::Send(Command::On)));
        assert_eq!(parse_action("OFF\n"), Some(Action::Send(Command::Off)));
        assert_eq!(parse_action("connect"), Some(Action::Connect));
        assert_eq!(parse_action("exit"), Some(Action::Quit));
        assert_eq!(parse_action("dance"), Some(Action::Help));
        assert_eq!(parse_action("   "), None);
    }

    #[test]
    fn renders_inbound_text_one_chunk_per_line() {
        let event = SessionEvent::Inbound(InboundMessage::decode(1, 0, b"temp=25\n"));
        assert_eq!(render(&event).as_deref(), Some("temp=25"));

        let event = SessionEvent::ReaderStopped { connection_id: 1, reason: "memory link closed".to_string() };
        assert!(render(&event).unwrap().contains("memory link closed"));
    }
}

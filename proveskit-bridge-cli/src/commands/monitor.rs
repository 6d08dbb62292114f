//! Interactive monitor command implementation.
//!
//! Device lines go to stdout; connection status and hints go to stderr.
//! Typed lines are sent to the board, except meta commands starting with `:`.

use anyhow::{Context, Result};
use console::style;
use proveskit_bridge::{DeviceEvent, Manager, ManagerConfig, Session, SessionCommand, clean_line};
use std::io::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{Input, input_channel};

const HELP: &str = "\
Meta commands:
  :repl              enter the board's REPL (Ctrl-C + keep-alive)
  :exit              leave the REPL (Ctrl-D + keep-alive)
  :connect [PATH]    subscribe to the board, or open PATH now
  :disconnect        close the link
  :status            show connection state
  :list              list candidate boards
  :history           print recent device output
  :help              show this help
  :quit              leave the monitor";

/// What one typed line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Command(SessionCommand),
    History,
    Help,
    Quit,
    Unknown(String),
}

fn parse_action(line: &str) -> Action {
    let Some(meta) = line.strip_prefix(':') else {
        return Action::Command(SessionCommand::SendCommand {
            text: line.to_string(),
        });
    };

    let mut words = meta.split_whitespace();
    let name = words
        .next()
        .unwrap_or_default();
    match name {
        "repl" => Action::Command(SessionCommand::EnterRepl),
        "exit" => Action::Command(SessionCommand::ExitRepl),
        "connect" => Action::Command(SessionCommand::ConnectDevice {
            path: words
                .next()
                .map(str::to_string),
        }),
        "disconnect" => Action::Command(SessionCommand::DisconnectDevice),
        "status" => Action::Command(SessionCommand::CheckDeviceStatus),
        "list" => Action::Command(SessionCommand::ListDevices),
        "history" => Action::History,
        "help" | "?" => Action::Help,
        "quit" | "q" => Action::Quit,
        _ => Action::Unknown(name.to_string()),
    }
}

/// Wall-clock `[HH:MM:SS.mmm]` (UTC) for `since_epoch`.
fn timestamp_prefix(since_epoch: Duration) -> String {
    let total_secs = since_epoch.as_secs();
    let millis = since_epoch.subsec_millis();
    let hours = (total_secs / 3600) % 24;
    let minutes = (total_secs / 60) % 60;
    let seconds = total_secs % 60;
    format!("[{hours:02}:{minutes:02}:{seconds:02}.{millis:03}]")
}

fn format_line(line: &str, timestamp: bool) -> String {
    let text = clean_line(line);
    if !timestamp {
        return text;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{} {text}", style(timestamp_prefix(now)).dim())
}

fn print_status(message: &str) {
    eprintln!("{} {message}", style("»").cyan().bold());
}

fn show_event(
    out: &mut impl Write,
    event: &DeviceEvent,
    session: &Session,
    timestamp: bool,
) -> Result<()> {
    match event {
        DeviceEvent::TerminalData { line } => {
            writeln!(out, "{}", format_line(line, timestamp))?;
            out.flush()?;
        },
        DeviceEvent::DeviceConnected { path, .. } => {
            print_status(&format!("Connected to {}", style(path).green().bold()));
            // The monitor always follows the board.
            if !session.is_registered() {
                session.handle(SessionCommand::ConnectDevice { path: None });
            }
        },
        DeviceEvent::DeviceDisconnected => {
            print_status(&style("Disconnected, waiting for board...").yellow().to_string());
        },
        DeviceEvent::DeviceList { paths } => {
            if paths.is_empty() {
                print_status("No PROVESKit boards found");
            }
            for path in paths {
                print_status(&format!("Found {}", style(path).cyan()));
            }
        },
    }
    Ok(())
}

/// Monitor command implementation.
pub(crate) fn cmd_monitor(config: ManagerConfig, timestamp: bool) -> Result<()> {
    let (inputs, sink) = input_channel()?;
    let mut manager = Manager::start(config).context("failed to start device manager")?;
    let session = manager.attach(sink);

    print_status("Waiting for PROVESKit board... (:help for commands, Ctrl-C to quit)");
    if manager.state().is_connected() {
        session.handle(SessionCommand::CheckDeviceStatus);
    }

    let mut out = io::stdout().lock();
    for input in &inputs {
        match input {
            Input::Event(event) => {
                show_event(&mut out, &event, &session, timestamp)
                    .context("failed to write to stdout")?;
            },
            Input::Line(line) => match parse_action(&line) {
                Action::Command(command) => {
                    if command.device_command().is_some() && !session.is_registered() {
                        print_status(&style("No board connected, input dropped").dim().to_string());
                    }
                    session.handle(command);
                },
                Action::History => {
                    for line in manager.history() {
                        writeln!(out, "{}", clean_line(&line))?;
                    }
                    out.flush()?;
                },
                Action::Help => eprintln!("{}", style(HELP).dim()),
                Action::Quit => break,
                Action::Unknown(name) => {
                    print_status(&format!("Unknown command :{name} (try :help)"));
                },
            },
            Input::Eof | Input::Interrupted => break,
        }
    }

    drop(session);
    manager.shutdown();
    print_status("Bye");
    Ok(())
}

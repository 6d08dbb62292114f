//! `bridge`: one session over stdio as JSON lines.
//!
//! Each stdin line is a command object such as
//! `{"command":"send-command","text":"ping"}`; each stdout line is an event
//! object such as `{"event":"terminal-data","line":"pong"}`. Logs stay on
//! stderr.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use proveskit_bridge::{DeviceEvent, Manager, ManagerConfig, SessionCommand};
use std::io::{self, Write};

use super::{Input, input_channel};

/// Parse one inbound line. Blank lines yield `None`.
fn parse_command(line: &str) -> Option<serde_json::Result<SessionCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

fn write_event(out: &mut impl Write, event: &DeviceEvent) -> Result<()> {
    serde_json::to_writer(&mut *out, event)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Bridge command implementation.
pub(crate) fn cmd_bridge(config: ManagerConfig) -> Result<()> {
    let (inputs, sink) = input_channel()?;
    let mut manager = Manager::start(config).context("failed to start device manager")?;
    let session = manager.attach(sink);
    info!("Bridge ready ({})", session.id());

    let mut out = io::stdout().lock();
    for input in &inputs {
        match input {
            Input::Line(line) => match parse_command(&line) {
                Some(Ok(command)) => {
                    debug!("{} <- {command:?}", session.id());
                    session.handle(command);
                },
                Some(Err(e)) => warn!("Ignoring malformed command {line:?}: {e}"),
                None => {},
            },
            Input::Event(event) => {
                write_event(&mut out, &event).context("failed to write to stdout")?;
            },
            Input::Eof => {
                debug!("stdin closed, shutting down");
                break;
            },
            Input::Interrupted => {
                debug!("Interrupted, shutting down");
                break;
            },
        }
    }

    manager.shutdown();
    // Events raised by the shutdown itself.
    for input in inputs.try_iter() {
        if let Input::Event(event) = input {
            write_event(&mut out, &event).context("failed to write to stdout")?;
        }
    }
    drop(session);

    Ok(())
}

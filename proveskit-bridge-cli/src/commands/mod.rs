//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod bridge;
pub(crate) mod monitor;
pub(crate) mod ports;
pub(crate) mod status;

use anyhow::{Context, Result};
use log::{debug, warn};
use proveskit_bridge::{DeviceEvent, SessionSink};
use std::io::{self, BufRead as _};
use std::sync::{Arc, mpsc};
use std::thread;

/// Everything a long-running command reacts to, on one channel.
pub(crate) enum Input {
    /// One line read from stdin, without its terminator.
    Line(String),
    /// An event for our session.
    Event(DeviceEvent),
    /// stdin reached EOF or failed.
    Eof,
    /// Ctrl-C.
    Interrupted,
}

/// Session sink that forwards events into the [`Input`] channel.
struct InputSink(mpsc::Sender<Input>);

impl SessionSink for InputSink {
    fn deliver(&self, event: &DeviceEvent) -> bool {
        self.0
            .send(Input::Event(event.clone()))
            .is_ok()
    }
}

/// Input channel fed by stdin, Ctrl-C and the returned session sink.
pub(crate) fn input_channel() -> Result<(mpsc::Receiver<Input>, Arc<dyn SessionSink>)> {
    let (tx, rx) = mpsc::channel();

    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(Input::Interrupted);
    })
    .context("failed to install Ctrl-C handler")?;

    let stdin_tx = tx.clone();
    // Detached: a blocked stdin read cannot be cancelled.
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in io::stdin()
                .lock()
                .lines()
            {
                match line {
                    Ok(line) => {
                        if stdin_tx
                            .send(Input::Line(line))
                            .is_err()
                        {
                            return;
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read stdin: {e}");
                        break;
                    },
                }
            }
            debug!("stdin closed");
            let _ = stdin_tx.send(Input::Eof);
        })
        .context("failed to start stdin reader")?;

    Ok((rx, Arc::new(InputSink(tx))))
}

//! `status`: one-shot discovery.

use console::style;
use proveskit_bridge::{DeviceCandidate, DeviceFilter, NativeBackend, discover_with};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct StatusReport {
    attached: bool,
    path: Option<String>,
    candidates: Vec<DeviceCandidate>,
}

impl StatusReport {
    fn new(candidates: Vec<DeviceCandidate>) -> Self {
        Self {
            attached: !candidates.is_empty(),
            path: candidates
                .first()
                .map(|c| c.path.clone()),
            candidates,
        }
    }
}

/// Status command implementation.
///
/// Reports the port the bridge would connect to right now.
pub(crate) fn cmd_status(filter: &DeviceFilter, json: bool) -> anyhow::Result<()> {
    let report = StatusReport::new(discover_with(&NativeBackend, filter));

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    match &report.path {
        Some(path) => {
            eprintln!(
                "{} PROVESKit board at {}",
                style("✓").green(),
                style(path).cyan().bold()
            );
            for other in report.candidates.iter().skip(1) {
                eprintln!(
                    "  {} also found {} (ignored)",
                    style("•").dim(),
                    style(&other.path).cyan()
                );
            }
        },
        None => eprintln!("{} No PROVESKit board attached", style("✗").red()),
    }

    Ok(())
}

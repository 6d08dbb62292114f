//! `list-ports`: enumerate serial ports and mark board candidates.

use console::style;
use proveskit_bridge::{DetectedPort, DeviceFilter, detect_ports};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct PortEntry<'a> {
    name: &'a str,
    device: &'static str,
    known: bool,
    candidate: bool,
    vid: Option<u16>,
    pid: Option<u16>,
    manufacturer: Option<&'a str>,
    product: Option<&'a str>,
    serial: Option<&'a str>,
}

fn entries<'a>(ports: &'a [DetectedPort], filter: &DeviceFilter, all: bool) -> Vec<PortEntry<'a>> {
    ports
        .iter()
        .map(|p| PortEntry {
            name: &p.name,
            device: p.device.name(),
            known: p.device.is_known(),
            candidate: filter.matches(p),
            vid: p.vid,
            pid: p.pid,
            manufacturer: p.manufacturer.as_deref(),
            product: p.product.as_deref(),
            serial: p.serial.as_deref(),
        })
        .filter(|e| all || e.candidate)
        .collect()
}

/// List ports command implementation.
///
/// Without `all`, only ports matching `filter` are shown.
pub(crate) fn cmd_list_ports(filter: &DeviceFilter, json: bool, all: bool) -> anyhow::Result<()> {
    let detected = detect_ports();
    let mut listed = entries(&detected, filter, all);
    listed.sort_by(|a, b| a.name.cmp(b.name));

    if json {
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports").bold().underlined());

    if listed.is_empty() {
        let hint = if all {
            "No serial ports found"
        } else {
            "No PROVESKit boards found (use --all to show every port)"
        };
        eprintln!("  {}", style(hint).dim());
        return Ok(());
    }

    for port in &listed {
        let device_type = if port.known {
            format!(" [{}]", style(port.device).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        let bullet = if port.candidate {
            style("→").green().bold()
        } else {
            style("•").dim()
        };

        eprintln!(
            "  {} {}{}{}{}",
            bullet,
            style(port.name).cyan(),
            device_type,
            vid_pid,
            product
        );
    }

    Ok(())
}

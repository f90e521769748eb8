//! Serial port discovery for autopilot boards.
//!
//! A simple lookup: enumerate local serial devices and pick the first whose
//! description, manufacturer, or product matches a known autopilot keyword,
//! falling back to the first available port. Consumed by the connection
//! manager only when `connect()` is called without an explicit address.

use log::{info, warn};
use serialport::SerialPortType;

/// Substrings identifying PX4-compatible USB serial devices.
const PX4_KEYWORDS: &[&str] = &[
    "px4",
    "pixhawk",
    "mavlink",
    "autopilot",
    "flight controller",
    "ardupilot",
    "qgroundcontrol",
    "usb serial",
    "ftdi",
    "cp210",
    "fmu",
];

/// Description of one detected serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

/// Enumerate all local serial ports with whatever metadata the OS exposes.
pub fn detect_ports() -> Vec<PortInfo> {
    let ports = match serialport::available_ports() {
        Ok(p) => p,
        Err(e) => {
            warn!("serial port enumeration failed: {}", e);
            return Vec::new();
        }
    };

    ports
        .into_iter()
        .map(|p| match p.port_type {
            SerialPortType::UsbPort(usb) => {
                let description = match (&usb.product, &usb.manufacturer) {
                    (Some(prod), Some(man)) => format!("{} ({})", prod, man),
                    (Some(prod), None) => prod.clone(),
                    (None, Some(man)) => man.clone(),
                    (None, None) => "USB serial device".to_string(),
                };
                PortInfo {
                    name: p.port_name,
                    description,
                    manufacturer: usb.manufacturer,
                    product: usb.product,
                    serial_number: usb.serial_number,
                    vid: Some(usb.vid),
                    pid: Some(usb.pid),
                }
            }
            other => PortInfo {
                name: p.port_name,
                description: format!("{:?}", other),
                manufacturer: None,
                product: None,
                serial_number: None,
                vid: None,
                pid: None,
            },
        })
        .collect()
}

/// Best-guess autopilot port: keyword match first, then the first available
/// port, then `None` when nothing is attached.
pub fn find_candidate() -> Option<String> {
    let ports = detect_ports();

    for port in &ports {
        let haystack = format!(
            "{} {} {}",
            port.description.to_lowercase(),
            port.manufacturer.as_deref().unwrap_or("").to_lowercase(),
            port.product.as_deref().unwrap_or("").to_lowercase(),
        );
        if PX4_KEYWORDS.iter().any(|k| haystack.contains(k)) {
            info!("autopilot port candidate: {} ({})", port.name, port.description);
            return Some(port.name.clone());
        }
    }

    if let Some(first) = ports.first() {
        warn!(
            "no autopilot-looking port detected, falling back to first available: {}",
            first.name
        );
        return Some(first.name.clone());
    }

    None
}

/// Multi-line rendering of one port for the CLI `ports` listing.
pub fn format_port(port: &PortInfo) -> String {
    let mut out = format!("{}\n  description: {}", port.name, port.description);
    if let Some(ref m) = port.manufacturer {
        out.push_str(&format!("\n  manufacturer: {}", m));
    }
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        out.push_str(&format!("\n  usb id: {:04x}:{:04x}", vid, pid));
    }
    if let Some(ref s) = port.serial_number {
        out.push_str(&format!("\n  serial: {}", s));
    }
    out
}

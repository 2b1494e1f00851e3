//! Serial port enumeration

use serialport::SerialPortType;
use thiserror::Error;

/// Registry error types
#[derive(Error, Debug)]
pub enum RegistryError {
    /// OS-level port enumeration failed
    #[error("Port enumeration failed: {0}")]
    Enumeration(String),
}

/// Immutable snapshot of one attached serial device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// OS-level device name (e.g., COM3, /dev/ttyUSB0)
    pub system_name: String,
    /// Human-readable device description
    pub description: String,
}

impl PortDescriptor {
    /// Combined label for port selectors, e.g. `COM3 - Arduino Uno`
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.system_name, self.description)
    }
}

/// List currently attached serial devices.
///
/// Returns an empty list (not an error) when no device is attached. The OS
/// enumeration order is preserved. Has no side effects and is safe to call
/// while a session holds one of the listed devices open.
pub fn list_ports() -> Result<Vec<PortDescriptor>, RegistryError> {
    let ports =
        serialport::available_ports().map_err(|e| RegistryError::Enumeration(e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|info| PortDescriptor {
            system_name: info.port_name,
            description: describe(&info.port_type),
        })
        .collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => usb
            .product
            .clone()
            .unwrap_or_else(|| "USB serial device".to_string()),
        SerialPortType::BluetoothPort => "Bluetooth serial device".to_string(),
        SerialPortType::PciPort => "PCI serial device".to_string(),
        SerialPortType::Unknown => "Serial device".to_string(),
    }
}

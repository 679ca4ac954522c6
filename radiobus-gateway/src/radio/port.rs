//! Serial port discovery.

use serde::Serialize;
use tokio_serial::SerialPortType;

use super::LinkError;

/// A serial port and the hardware id used to pick it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// OS device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub name: String,
    /// Descriptive hardware id, e.g. `USB VID:PID=0403:6001 SER=A9X8TQ2B`.
    pub hardware_id: String,
}

/// Source of candidate serial ports.
pub trait PortResolver: Send + Sync {
    /// Every port currently present.
    fn available(&self) -> Result<Vec<PortInfo>, LinkError>;

    /// First port whose hardware id contains `pattern`, case-insensitively.
    fn resolve(&self, pattern: &str) -> Result<PortInfo, LinkError> {
        let needle = pattern.to_uppercase();
        self.available()?
            .into_iter()
            .find(|port| port.hardware_id.to_uppercase().contains(&needle))
            .ok_or_else(|| LinkError::NotFound(pattern.to_string()))
    }
}

/// Resolver backed by the operating system's port enumeration.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortResolver;

fn hardware_id(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut id = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
            if let Some(serial) = &usb.serial_number {
                id.push_str(&format!(" SER={serial}"));
            }
            if let Some(product) = &usb.product {
                id.push_str(&format!(" {product}"));
            }
            id
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "BLUETOOTH".to_string(),
        SerialPortType::Unknown => "n/a".to_string(),
    }
}

impl PortResolver for SerialPortResolver {
    fn available(&self) -> Result<Vec<PortInfo>, LinkError> {
        let ports = tokio_serial::available_ports()
            .map_err(|e| LinkError::Io(std::io::Error::other(e.to_string())))?;

        Ok(ports
            .into_iter()
            .map(|port| PortInfo {
                hardware_id: hardware_id(&port.port_type),
                name: port.port_name,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPorts(Vec<PortInfo>);

    impl PortResolver for FixedPorts {
        fn available(&self) -> Result<Vec<PortInfo>, LinkError> {
            Ok(self.0.clone())
        }
    }

    fn ports() -> FixedPorts {
        FixedPorts(vec![
            PortInfo {
                name: "/dev/ttyS0".into(),
                hardware_id: "PCI".into(),
            },
            PortInfo {
                name: "/dev/ttyUSB0".into(),
                hardware_id: "USB VID:PID=0403:6001 SER=A9X8TQ2B".into(),
            },
        ])
    }

    #[test]
    fn test_resolve_by_serial_number() {
        let port = ports().resolve("a9x8tq2b").unwrap();
        assert_eq!(port.name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_resolve_not_found() {
        assert!(matches!(
            ports().resolve("FFFFFFFF"),
            Err(LinkError::NotFound(p)) if p == "FFFFFFFF"
        ));
    }

    #[test]
    fn test_non_usb_hardware_id() {
        assert_eq!(hardware_id(&SerialPortType::PciPort), "PCI");
        assert_eq!(hardware_id(&SerialPortType::Unknown), "n/a");
    }
}

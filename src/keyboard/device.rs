//! Input device discovery and opening
//!
//! Keyboards are enumerated from `/proc/bus/input/devices`, which lists one
//! block per device separated by blank lines:
//!
//! ```text
//! I: Bus=0003 Vendor=046d Product=c31c Version=0110
//! N: Name="Logitech USB Keyboard"
//! U: Uniq=
//! H: Handlers=sysrq kbd leds event3
//! ```

use super::source::{EventSource, DEFAULT_POLL_INTERVAL};
use crate::error::LagError;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Kernel device listing
pub const PROC_DEVICES: &str = "/proc/bus/input/devices";

// include/uapi/linux/input.h
pub const BUS_USB: u16 = 0x03;
pub const BUS_BLUETOOTH: u16 = 0x05;

/// Something that can be opened as a stream of input events
pub trait InputDevice {
    type Stream: Read;

    /// Human readable device name
    fn name(&self) -> &str;

    /// Open a fresh, non-blocking event stream for this device
    fn open(&self) -> Result<EventSource<Self::Stream>, LagError>;
}

/// Transport the device is attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Usb,
    Bluetooth,
    Other(u16),
}

impl Default for BusType {
    fn default() -> Self {
        BusType::Other(0)
    }
}

impl From<u16> for BusType {
    fn from(raw: u16) -> Self {
        match raw {
            BUS_USB => BusType::Usb,
            BUS_BLUETOOTH => BusType::Bluetooth,
            other => BusType::Other(other),
        }
    }
}

/// One entry of the kernel input device listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceHandle {
    pub bus: BusType,
    /// Four hex digits, lower case as printed by the kernel
    pub vendor: String,
    pub product: String,
    pub name: String,
    pub unique_id: String,
    pub handlers: Vec<String>,
    /// Take an exclusive grab (EVIOCGRAB) on the node while it is open
    pub grab: bool,
    pub poll_interval: Option<Duration>,
}

impl DeviceHandle {
    /// `vendor:product`, as accepted by `lsusb -d`
    pub fn id(&self) -> String {
        format!("{}:{}", self.vendor, self.product)
    }

    /// Path of the event node, e.g. `/dev/input/event3`
    pub fn path(&self) -> Option<PathBuf> {
        self.handlers
            .iter()
            .find(|h| h.starts_with("event"))
            .map(|h| Path::new("/dev/input").join(h))
    }

    /// Whether the kernel exposes this device through the keyboard handler
    pub fn is_keyboard(&self) -> bool {
        self.handlers.iter().any(|h| h == "kbd")
    }

    /// Host polling interval in milliseconds, when it can be determined.
    ///
    /// USB devices are looked up with `lsusb -v`; other buses report `None`.
    pub fn polling_interval_ms(&self) -> Option<u32> {
        match self.bus {
            BusType::Usb => usb_interval(&self.id()),
            _ => None,
        }
    }

    /// Short description of the transport, e.g. `USB (1000 Hz)`
    pub fn interface(&self) -> String {
        match self.bus {
            BusType::Usb => match self.polling_interval_ms() {
                Some(ms) if ms > 0 => format!("USB ({} Hz)", 1000 / ms),
                _ => "USB".to_string(),
            },
            BusType::Bluetooth => "Bluetooth".to_string(),
            _ => String::new(),
        }
    }
}

impl InputDevice for DeviceHandle {
    type Stream = File;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<EventSource<File>, LagError> {
        let path = self.path().ok_or_else(|| {
            LagError::resource(
                &self.name,
                io::Error::new(io::ErrorKind::NotFound, "device has no event handler"),
            )
        })?;

        let file = open_event_node(&path, self.grab)
            .map_err(|e| LagError::resource(path.display().to_string(), e))?;
        log::debug!("Opened {} ({})", path.display(), self.name);

        Ok(EventSource::new(self.name.clone(), file)
            .with_poll_interval(self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL)))
    }
}

#[cfg(target_os = "linux")]
nix::ioctl_write_int!(eviocgrab, b'E', 0x90);

#[cfg(target_os = "linux")]
fn open_event_node(path: &Path, grab: bool) -> io::Result<File> {
    use nix::libc;
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;

    if grab {
        // The kernel drops the grab when the descriptor is closed
        unsafe { eviocgrab(file.as_raw_fd(), 1) }.map_err(io::Error::from)?;
    }

    Ok(file)
}

#[cfg(not(target_os = "linux"))]
fn open_event_node(_path: &Path, _grab: bool) -> io::Result<File> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "evdev devices are only available on Linux",
    ))
}

/// Parse the text of `/proc/bus/input/devices`
pub fn parse_devices(text: &str) -> Vec<DeviceHandle> {
    text.split("\n\n")
        .filter(|block| !block.trim().is_empty())
        .map(parse_device)
        .collect()
}

fn parse_device(block: &str) -> DeviceHandle {
    let mut device = DeviceHandle::default();

    for line in block.lines() {
        let Some((key, data)) = line.split_once(": ") else {
            continue;
        };

        match key {
            "I" => {
                for field in data.split_whitespace() {
                    match field.split_once('=') {
                        Some(("Bus", v)) => {
                            device.bus = u16::from_str_radix(v, 16).map(BusType::from).unwrap_or_default()
                        }
                        Some(("Vendor", v)) => device.vendor = v.to_lowercase(),
                        Some(("Product", v)) => device.product = v.to_lowercase(),
                        _ => {}
                    }
                }
            }
            "N" => {
                if let Some(name) = data.strip_prefix("Name=") {
                    device.name = name.trim().trim_matches('"').trim().to_string();
                }
            }
            "U" => {
                if let Some(uniq) = data.strip_prefix("Uniq=") {
                    device.unique_id = uniq.trim().to_string();
                }
            }
            "H" => {
                if let Some(handlers) = data.strip_prefix("Handlers=") {
                    device.handlers = handlers.split_whitespace().map(str::to_string).collect();
                }
            }
            _ => {}
        }
    }

    device
}

/// Keyboards backed by real hardware (virtual devices report vendor 0000)
pub fn keyboards(devices: Vec<DeviceHandle>) -> Vec<DeviceHandle> {
    devices
        .into_iter()
        .filter(|d| d.is_keyboard() && d.vendor != "0000")
        .collect()
}

/// Enumerate connected keyboards.
///
/// Returns an empty list when the kernel listing is unavailable.
pub fn find_keyboards() -> Vec<DeviceHandle> {
    match fs::read_to_string(PROC_DEVICES) {
        Ok(text) => keyboards(parse_devices(&text)),
        Err(e) => {
            log::warn!("Cannot read {}: {}", PROC_DEVICES, e);
            Vec::new()
        }
    }
}

/// Extract `bInterval` from `lsusb -v` output
pub fn parse_usb_interval(text: &str) -> Option<u32> {
    text.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(char::is_whitespace)?;
        if key == "bInterval" {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn usb_interval(id: &str) -> Option<u32> {
    let output = match Command::new("lsusb").args(["-vd", id]).output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            log::debug!("lsusb -vd {} exited with {}", id, output.status);
            return None;
        }
        Err(e) => {
            log::debug!("Cannot run lsusb: {}", e);
            return None;
        }
    };

    parse_usb_interval(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"I: Bus=0019 Vendor=0000 Product=0001 Version=0000
N: Name="Power Button"
P: Phys=PNP0C0C/button/input0
S: Sysfs=/devices/LNXSYSTM:00/LNXPWRBN:00/input/input0
U: Uniq=
H: Handlers=kbd event0
B: PROP=0
B: EV=3

I: Bus=0003 Vendor=046D Product=C31C Version=0110
N: Name="Logitech USB Keyboard"
P: Phys=usb-0000:00:14.0-1/input0
U: Uniq=
H: Handlers=sysrq kbd leds event3
B: EV=120013

I: Bus=0005 Vendor=05ac Product=0256 Version=0001
N: Name="Magic Keyboard"
U: Uniq=a4:83:e7:00:11:22
H: Handlers=sysrq kbd event5

I: Bus=0003 Vendor=046d Product=c077 Version=0111
N: Name="Logitech USB Optical Mouse"
H: Handlers=mouse0 event4
"#;

    #[test]
    fn parses_all_blocks() {
        let devices = parse_devices(SAMPLE);
        assert_eq!(devices.len(), 4);

        let kbd = &devices[1];
        assert_eq!(kbd.bus, BusType::Usb);
        assert_eq!(kbd.vendor, "046d");
        assert_eq!(kbd.product, "c31c");
        assert_eq!(kbd.id(), "046d:c31c");
        assert_eq!(kbd.name, "Logitech USB Keyboard");
        assert_eq!(kbd.handlers, vec!["sysrq", "kbd", "leds", "event3"]);
        assert_eq!(kbd.path(), Some(PathBuf::from("/dev/input/event3")));
    }

    #[test]
    fn parses_bluetooth_unique_id() {
        let devices = parse_devices(SAMPLE);
        let bt = &devices[2];
        assert_eq!(bt.bus, BusType::Bluetooth);
        assert_eq!(bt.unique_id, "a4:83:e7:00:11:22");
    }

    #[test]
    fn keyboards_skip_virtual_and_non_keyboard_devices() {
        let kbds = keyboards(parse_devices(SAMPLE));
        let names: Vec<&str> = kbds.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Logitech USB Keyboard", "Magic Keyboard"]);
    }

    #[test]
    fn device_without_event_handler_has_no_path() {
        let device = DeviceHandle {
            handlers: vec!["kbd".to_string()],
            ..Default::default()
        };
        assert_eq!(device.path(), None);
        assert!(matches!(device.open(), Err(LagError::Resource { .. })));
    }

    #[test]
    fn missing_node_is_resource_error() {
        let device = DeviceHandle {
            name: "Ghost".to_string(),
            handlers: vec!["event999".to_string()],
            ..Default::default()
        };
        match device.open() {
            Err(LagError::Resource { what, .. }) => assert_eq!(what, "/dev/input/event999"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("event999 should not exist"),
        }
    }

    #[test]
    fn bus_type_from_raw() {
        assert_eq!(BusType::from(0x03), BusType::Usb);
        assert_eq!(BusType::from(0x05), BusType::Bluetooth);
        assert_eq!(BusType::from(0x19), BusType::Other(0x19));
    }

    #[test]
    fn parses_lsusb_interval() {
        let text = "\
Bus 001 Device 004: ID 046d:c31c Logitech, Inc. Keyboard K120
  Endpoint Descriptor:
        bLength                 7
        bEndpointAddress     0x81  EP 1 IN
        wMaxPacketSize     0x0008  1x 8 bytes
        bInterval              10
";
        assert_eq!(parse_usb_interval(text), Some(10));
        assert_eq!(parse_usb_interval("no endpoints here"), None);
    }

    #[test]
    fn interface_labels() {
        let bt = DeviceHandle {
            bus: BusType::Bluetooth,
            ..Default::default()
        };
        assert_eq!(bt.interface(), "Bluetooth");

        let other = DeviceHandle {
            bus: BusType::Other(0x19),
            ..Default::default()
        };
        assert_eq!(other.interface(), "");
    }
}

//! GPIO output through the legacy sysfs interface (`/sys/class/gpio`)

use super::TriggerPin;
use crate::error::LagError;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

/// udev may take a moment to fix permissions on a freshly exported pin
const EXPORT_RETRIES: u32 = 20;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Parse a pin label such as `GPIO21`, `gpio21` or `21`
pub fn parse_pin_number(label: &str) -> Option<u32> {
    let trimmed = label.trim();
    let digits = trimmed
        .strip_prefix("GPIO")
        .or_else(|| trimmed.strip_prefix("gpio"))
        .unwrap_or(trimmed);
    digits.parse().ok()
}

/// A GPIO line configured as an output through sysfs
pub struct SysfsPin {
    label: String,
    number: u32,
    root: PathBuf,
    value: File,
    exported_here: bool,
}

impl SysfsPin {
    /// Open `label` under `root`, exporting it first if needed, and drive it low
    pub fn open_at(root: &Path, label: &str) -> Result<Self, LagError> {
        let number = parse_pin_number(label).ok_or_else(|| {
            LagError::resource(
                label,
                io::Error::new(io::ErrorKind::InvalidInput, "not a GPIO number"),
            )
        })?;
        let label = format!("GPIO{}", number);
        let pin_dir = root.join(format!("gpio{}", number));

        let mut exported_here = false;
        if !pin_dir.exists() {
            fs::write(root.join("export"), number.to_string())
                .map_err(|e| LagError::resource(&label, e))?;
            exported_here = true;
            log::debug!("Exported {}", label);
        }

        // Only a pin exported just now can be waiting on udev
        let retries = if exported_here { EXPORT_RETRIES } else { 0 };
        let value = retry_while_denied(retries, EXPORT_RETRY_DELAY, || configure_output(&pin_dir))
            .map_err(|e| LagError::resource(&label, e))?;

        log::info!("Using {} as trigger", label);
        Ok(Self {
            label,
            number,
            root: root.to_path_buf(),
            value,
            exported_here,
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    fn write_value(&self, level: &[u8]) -> io::Result<()> {
        self.value.write_at(level, 0).map(|_| ())
    }
}

/// Run `op`, retrying up to `retries` times while it fails with `PermissionDenied`
fn retry_while_denied<T>(
    retries: u32,
    delay: Duration,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && attempt < retries => {
                attempt += 1;
                thread::sleep(delay);
            }
            result => return result,
        }
    }
}

fn configure_output(pin_dir: &Path) -> io::Result<File> {
    // "low" sets the direction to output with the line already deasserted
    fs::write(pin_dir.join("direction"), "low")?;
    OpenOptions::new().write(true).open(pin_dir.join("value"))
}

impl TriggerPin for SysfsPin {
    fn assert(&mut self) -> io::Result<()> {
        self.write_value(b"1")
    }

    fn deassert(&mut self) -> io::Result<()> {
        self.write_value(b"0")
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if let Err(e) = self.deassert() {
            log::warn!("Failed to drive {} low: {}", self.label, e);
        }
        if self.exported_here {
            if let Err(e) = fs::write(self.root.join("unexport"), self.number.to_string()) {
                log::warn!("Failed to unexport {}: {}", self.label, e);
            }
        }
    }
}

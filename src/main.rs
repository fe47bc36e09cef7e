//! Keyboard Lag - GPIO-triggered keyboard latency tester
//!
//! Lists keyboards, finds the one wired to the trigger, and runs latency
//! trials writing one CSV row per sample.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keyboard_lag::{
    config::Config,
    keyboard::{device, DeviceHandle},
    measure::{learn_trigger_key, scan_keyboards, Measurement, Sample},
    report::{CsvWriter, LatencySummary, RunReport},
    trigger::{Clock, SysfsPin, Trigger},
    LagError,
};

#[derive(Parser, Debug)]
#[command(name = "keyboard-lag", version, about = "Test keyboard latency")]
struct Cli {
    /// List attached keyboards
    #[arg(long)]
    list: bool,

    /// Scan to find which keyboard is instrumented
    #[arg(long)]
    scan: bool,

    /// Trigger GPIO (default: GPIO21)
    #[arg(short, long)]
    gpio: Option<String>,

    /// Number of iterations (default: 100)
    #[arg(short = 'n')]
    iterations: Option<usize>,

    /// Minimum delay in milliseconds (default: 50)
    #[arg(long)]
    tmin: Option<u64>,

    /// Maximum delay in milliseconds (default: 1000)
    #[arg(long)]
    tmax: Option<u64>,

    /// Per-event timeout in milliseconds (default: 3000)
    #[arg(long)]
    timeout: Option<u64>,

    /// Key code to watch for instead of learning it
    #[arg(short = 'k', long)]
    key_code: Option<u16>,

    /// Output CSV path (default: stdout)
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Also write a JSON report with summary statistics
    #[arg(long)]
    json: Option<PathBuf>,

    /// Config file (default: platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Grab the keyboard so trigger presses don't reach other programs
    #[arg(long)]
    grab: bool,

    /// Use device at index from --list
    #[arg(short, long, group = "device")]
    index: Option<usize>,

    /// Use device with matching ID (vendor:product)
    #[arg(short = 'd', long, group = "device")]
    id: Option<String>,

    /// Use keyboard with matching name
    #[arg(long, group = "device")]
    name: Option<String>,
}

impl Cli {
    /// Command line flags win over the config file
    fn apply(&self, config: &mut Config) {
        if let Some(gpio) = &self.gpio {
            config.trigger.gpio = gpio.clone();
        }
        if let Some(n) = self.iterations {
            config.run.iterations = n;
        }
        if let Some(ms) = self.tmin {
            config.run.min_delay_ms = ms;
        }
        if let Some(ms) = self.tmax {
            config.run.max_delay_ms = ms;
        }
        if let Some(ms) = self.timeout {
            config.run.timeout_ms = ms;
        }
        if self.key_code.is_some() {
            config.run.key_code = self.key_code;
        }
        if self.grab {
            config.device.grab = true;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            log::warn!("Using default config: {}", e);
            Config::default()
        }),
    };
    cli.apply(&mut config);
    config.validate()?;

    let devices: Vec<DeviceHandle> = device::find_keyboards()
        .into_iter()
        .map(|mut dev| {
            dev.grab = config.device.grab;
            dev.poll_interval = Some(config.poll_interval());
            dev
        })
        .collect();

    if devices.is_empty() {
        println!("No keyboards detected");
        return Ok(());
    }

    if cli.list {
        list_keyboards(&devices);
        return Ok(());
    }

    let pin = SysfsPin::open_at(&config.trigger.sysfs_root, &config.trigger.gpio)
        .context("Failed to set up trigger GPIO")?;
    let mut trigger = Trigger::new(pin);

    if cli.scan {
        return scan(&mut trigger, &devices, &config);
    }

    let device = select_keyboard(&devices, &cli)?;
    run(&mut trigger, device, &config, &cli)
}

fn list_keyboards(devices: &[DeviceHandle]) {
    let rows: Vec<[String; 5]> = devices
        .iter()
        .enumerate()
        .map(|(i, dev)| {
            [
                i.to_string(),
                dev.name.clone(),
                dev.id(),
                dev.path().map(|p| p.display().to_string()).unwrap_or_default(),
                dev.interface(),
            ]
        })
        .collect();

    let headers = ["", "Name", "ID", "Path", "Interface"];
    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let print_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        println!("{}", line.join("  ").trim_end());
    };

    print_row(&headers);
    let rules: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    print_row(&rules.iter().map(String::as_str).collect::<Vec<_>>());
    for row in &rows {
        print_row(&row.iter().map(String::as_str).collect::<Vec<_>>());
    }
}

fn scan(trigger: &mut Trigger<SysfsPin>, devices: &[DeviceHandle], config: &Config) -> Result<()> {
    match scan_keyboards(trigger, devices, config.settle(), config.scan_timeout())? {
        Some(hit) => {
            println!("Keyboard responded with key code {}. Run test with", hit.key_code);
            println!("--index={}", hit.index);
        }
        None => println!("Timed out waiting for triggered key"),
    }
    Ok(())
}

fn select_keyboard<'a>(devices: &'a [DeviceHandle], cli: &Cli) -> Result<&'a DeviceHandle> {
    fn iequals(a: &str, b: &str) -> bool {
        a.to_lowercase() == b.to_lowercase()
    }

    if let Some(index) = cli.index {
        return devices
            .get(index)
            .ok_or_else(|| anyhow!("Invalid index {}", index));
    }

    if let Some(id) = &cli.id {
        return devices
            .iter()
            .find(|dev| iequals(&dev.id(), id))
            .ok_or_else(|| anyhow!("No keyboard with ID {}", id));
    }

    if let Some(name) = &cli.name {
        return devices
            .iter()
            .find(|dev| iequals(&dev.name, name))
            .ok_or_else(|| anyhow!("No keyboard with name {}", name));
    }

    devices.first().ok_or_else(|| anyhow!("No keyboards detected"))
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn run(
    trigger: &mut Trigger<SysfsPin>,
    device: &DeviceHandle,
    config: &Config,
    cli: &Cli,
) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    trigger.release()?;
    trigger.clock().sleep(config.settle());

    let mut settings = config.run_settings();
    let key_code = match settings.key_code {
        Some(code) => code,
        None => match learn_trigger_key(trigger, device, settings.timeout) {
            Ok(code) => {
                trigger.clock().sleep(settings.settle);
                code
            }
            Err(e) if e.is_timeout() => bail!("Timed out waiting for triggered key"),
            Err(e) => return Err(e).context("Failed to learn trigger key"),
        },
    };
    settings.key_code = Some(key_code);

    eprintln!("Running latency test with");
    eprintln!("  trigger    = {}", trigger.label());
    eprintln!("  device     = {}", device.name);
    eprintln!("  key code   = {}", key_code);
    eprintln!("  iterations = {}", settings.iterations);
    eprintln!("  min delay  = {:.0} ms", settings.min_delay * 1000.0);
    eprintln!("  max delay  = {:.0} ms", settings.max_delay * 1000.0);
    eprintln!();

    let mut csv = CsvWriter::new(open_output(cli.out.as_deref())?)?;
    let label = trigger.label().to_string();
    let mut samples: Vec<Sample> = Vec::with_capacity(settings.iterations);
    let mut failure: Option<LagError> = None;

    for result in Measurement::new(trigger, device, settings.clone()).with_cancel(cancel) {
        match result {
            Ok(sample) => {
                csv.write_sample(&sample)?;
                samples.push(sample);
            }
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    if let Some(summary) = LatencySummary::from_samples(&samples) {
        log::info!(
            "{} samples: mean {:.2} ms, min {:.2} ms, max {:.2} ms ({})",
            summary.count,
            summary.mean_ms,
            summary.min_ms,
            summary.max_ms,
            summary.rating()
        );
    }

    if let Some(path) = &cli.json {
        let mut report = RunReport::new(&label, &device.name, Some(key_code), settings, samples);
        if let Some(e) = &failure {
            report = report.with_error(e);
        }
        report
            .export_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    match failure {
        None => Ok(()),
        Some(LagError::Interrupted) => {
            eprintln!("Interrupted");
            Ok(())
        }
        Some(e) if e.is_timeout() => bail!("Timed out waiting for triggered key"),
        Some(e) => Err(e.into()),
    }
}

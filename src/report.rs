//! Result output: CSV rows as samples arrive and a JSON summary at the end

use crate::measure::{RunSettings, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

/// Header line of the CSV output
pub const CSV_HEADER: &str = "Latency (ms), +/- (ms)";

/// Writes one CSV row per sample, flushing each so partial runs survive
pub struct CsvWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvWriter<W> {
    /// Wrap `out` and write the header
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{}", CSV_HEADER)?;
        out.flush()?;
        Ok(Self { out })
    }

    /// The +/- column is half the trigger uncertainty spread
    pub fn write_sample(&mut self, sample: &Sample) -> io::Result<()> {
        writeln!(
            self.out,
            "{:3.2}, {:3.2}",
            sample.latency_ms(),
            sample.half_width_ms()
        )?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Summary statistics over a run, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub median_ms: f64,
    /// Population standard deviation; `None` with fewer than two samples
    pub std_dev_ms: Option<f64>,
    /// Mean of the +/- column
    pub mean_half_width_ms: f64,
}

impl LatencySummary {
    /// Returns `None` for an empty run
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len();
        let mut latencies: Vec<f64> = samples.iter().map(Sample::latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mean_ms = latencies.iter().sum::<f64>() / count as f64;
        let median_ms = if count % 2 == 1 {
            latencies[count / 2]
        } else {
            (latencies[count / 2 - 1] + latencies[count / 2]) / 2.0
        };
        let std_dev_ms = (count >= 2).then(|| {
            let variance = latencies
                .iter()
                .map(|&x| {
                    let diff = x - mean_ms;
                    diff * diff
                })
                .sum::<f64>()
                / count as f64;
            variance.sqrt()
        });

        Some(Self {
            count,
            mean_ms,
            min_ms: latencies[0],
            max_ms: latencies[count - 1],
            median_ms,
            std_dev_ms,
            mean_half_width_ms: samples.iter().map(Sample::half_width_ms).sum::<f64>() / count as f64,
        })
    }

    /// Rough rating of the mean latency
    pub fn rating(&self) -> &'static str {
        match self.mean_ms {
            ms if ms < 5.0 => "Excellent (<5ms)",
            ms if ms < 10.0 => "Great (<10ms)",
            ms if ms < 20.0 => "Good (<20ms)",
            ms if ms < 50.0 => "Acceptable (<50ms)",
            _ => "Poor (>50ms)",
        }
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: String,
    /// Application version
    pub version: String,
    /// Trigger pin label
    pub trigger: String,
    /// Device name
    pub device: String,
    pub key_code: Option<u16>,
}

/// Complete record of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: ReportMetadata,
    pub settings: RunSettings,
    pub summary: Option<LatencySummary>,
    pub samples: Vec<Sample>,
    /// Why the run stopped early, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(
        trigger: &str,
        device: &str,
        key_code: Option<u16>,
        settings: RunSettings,
        samples: Vec<Sample>,
    ) -> Self {
        let now: DateTime<Utc> = Utc::now();

        Self {
            metadata: ReportMetadata {
                generated_at: now.to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                trigger: trigger.to_string(),
                device: device.to_string(),
                key_code,
            },
            summary: LatencySummary::from_samples(&samples),
            settings,
            samples,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Export report to JSON file
    pub fn export_json(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Export report to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

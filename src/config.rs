use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// How the financial year appears inside an invoice number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum YearFormat {
    /// `2025-2026`
    Full,
    /// `2025-26`
    Split,
    /// `25-26`
    Short,
    /// `2025`
    StartYear,
}

impl YearFormat {
    pub fn label(&self, start_year: i32) -> String {
        let end_year = start_year + 1;
        match self {
            YearFormat::Full => format!("{start_year}-{end_year}"),
            YearFormat::Split => format!("{start_year}-{:02}", end_year.rem_euclid(100)),
            YearFormat::Short => format!(
                "{:02}-{:02}",
                start_year.rem_euclid(100),
                end_year.rem_euclid(100)
            ),
            YearFormat::StartYear => format!("{start_year}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceFormat {
    pub prefix: String,
    /// Start year of the financial year invoices are minted against.
    pub active_year: Option<i32>,
    pub year_format: YearFormat,
    /// Zero-padding width of the sequence part.
    pub sequence_width: usize,
}

impl Default for InvoiceFormat {
    fn default() -> Self {
        Self {
            prefix: "INV".into(),
            active_year: None,
            year_format: YearFormat::Split,
            sequence_width: 4,
        }
    }
}

impl InvoiceFormat {
    pub fn render(&self, year: i32, sequence: u64) -> String {
        format!(
            "{}/{}/{:0width$}",
            self.prefix,
            self.year_format.label(year),
            sequence,
            width = self.sequence_width
        )
    }
}

/// Property-wide settings. Live: read fresh by every operation that needs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub check_in_time: NaiveTime,
    pub check_out_time: NaiveTime,
    pub weekend_days: Vec<Weekday>,
    pub weekend_hike_percent: u32,
    pub housekeeping_buffer_hours: u32,
    /// When set, turnover tasks carry no expected end; staff close them by hand.
    pub manual_housekeeping_control: bool,
    pub invoice_format: InvoiceFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_in_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap_or_default(),
            check_out_time: NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default(),
            weekend_days: vec![Weekday::Sat, Weekday::Sun],
            weekend_hike_percent: 0,
            housekeeping_buffer_hours: 2,
            manual_housekeeping_control: false,
            invoice_format: InvoiceFormat::default(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl Settings {
    /// Load settings from a JSON file; missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn buffer_ms(&self) -> i64 {
        i64::from(self.housekeeping_buffer_hours) * crate::model::HOUR_MS
    }
}

/// Process-level knobs for the service binary, read from `ROOMTURN_*` env vars.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub settings_file: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub effect_timeout: Duration,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|s| s.parse::<u64>().ok());
        Self {
            data_dir: lookup("ROOMTURN_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            settings_file: lookup("ROOMTURN_SETTINGS_FILE").map(PathBuf::from),
            sweep_interval: Duration::from_secs(parsed("ROOMTURN_SWEEP_INTERVAL_SECS").unwrap_or(300)),
            compact_threshold: parsed("ROOMTURN_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: lookup("ROOMTURN_METRICS_PORT").and_then(|s| s.parse().ok()),
            effect_timeout: Duration::from_secs(parsed("ROOMTURN_EFFECT_TIMEOUT_SECS").unwrap_or(10)),
        }
    }
}

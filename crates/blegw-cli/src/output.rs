//! Console rendering and the CSV data file

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use tracing::warn;

use blegw_core::convert::format_timestamp;
use blegw_gateway::{IndicationRecord, Reporter};

/// Column names of the data file
pub const DATA_FILE_HEADER: [&str; 4] = ["ts", "did", "hdl", "data"];

/// Append-only CSV of assembled indications
pub struct DataFile {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl DataFile {
    /// Open for appending; the header is written only to a new or empty file
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open data file: {}", path.display()))?;
        let empty = file
            .metadata()
            .with_context(|| format!("Failed to stat data file: {}", path.display()))?
            .len()
            == 0;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if empty {
            writer.write_record(DATA_FILE_HEADER)?;
            writer.flush()?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &IndicationRecord) -> Result<()> {
        self.writer.write_record([
            format_timestamp(&record.timestamp),
            record.device_id.clone(),
            record.handle.to_string(),
            record.raw.clone(),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Reporter printing to the terminal, with a spinner while scanning
pub struct ConsoleReporter {
    spinner: Mutex<Option<ProgressBar>>,
    data_file: Mutex<Option<DataFile>>,
}

impl ConsoleReporter {
    pub fn new(data_file: Option<DataFile>) -> Self {
        Self {
            spinner: Mutex::new(None),
            data_file: Mutex::new(data_file),
        }
    }

    fn print(&self, line: String) {
        match self.spinner.lock().as_ref() {
            Some(spinner) => spinner.println(line),
            None => println!("{}", line),
        }
    }
}

/// Colour a status line by what it reports
fn style_line(line: &str) -> String {
    if line.starts_with("Error") || line.contains(" error") || line.contains(" fail") {
        line.red().to_string()
    } else if line.contains("retry") || line.contains("disconnect") {
        line.yellow().to_string()
    } else if line.contains(" ok:") || line.contains("Ready to Scan") || line.starts_with("Connected") {
        line.green().to_string()
    } else {
        line.to_string()
    }
}

impl Reporter for ConsoleReporter {
    fn scan_started(&self, gateway_id: &str) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!("[{gateway_id}] Scanning ..."));
        spinner.enable_steady_tick(Duration::from_millis(100));
        if let Some(previous) = self.spinner.lock().replace(spinner) {
            previous.finish_and_clear();
        }
    }

    fn scan_progress(&self, gateway_id: &str, devices: usize) {
        if let Some(spinner) = self.spinner.lock().as_ref() {
            spinner.set_message(format!(
                "[{gateway_id}] Scanning ...  Found {devices} Device(s)"
            ));
        }
    }

    fn scan_finished(&self, _gateway_id: &str) {
        if let Some(spinner) = self.spinner.lock().take() {
            spinner.finish();
        }
    }

    fn message(&self, line: &str) {
        self.print(style_line(line));
    }

    fn indication(&self, record: &IndicationRecord) {
        self.print(record.console_line().cyan().to_string());
        if let Some(file) = self.data_file.lock().as_mut() {
            if let Err(e) = file.append(record) {
                warn!(path = %file.path().display(), error = %e, "Failed to write data file");
            }
        }
    }

    fn close(&self) {
        if let Some(spinner) = self.spinner.lock().take() {
            spinner.finish_and_clear();
        }
        // dropping the writer flushes and closes the file
        self.data_file.lock().take();
    }
}

//! Report generation
//!
//! Hands a finished [`Run`] to an output format. The spreadsheet writer is
//! the default; the JSON writer exists for machine consumers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::{path::Path, sync::Arc};
use tokio::fs;

use crate::{
    config::{AppConfig, ReportFormat},
    core::{HostResult, Run},
    error::{Result, ScannerError},
    logging::ScanLogger,
};

#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write_report(&self, run: &Run, output_path: &Path) -> Result<()>;
}

pub fn create_report_writer(config: &AppConfig, log: &ScanLogger) -> Arc<dyn ReportWriter> {
    let log = log.component("reporting");
    match config.output.format {
        ReportFormat::Xlsx => Arc::new(XlsxReportWriter::new(log)),
        ReportFormat::Json => Arc::new(JsonReportWriter::new(log)),
    }
}

async fn ensure_parent(output_path: &Path, format: &str) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ScannerError::output(format, format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    Ok(())
}

const SHEET_NAME: &str = "Scan Results";
const HEADERS: [&str; 7] = ["IP", "Open Ports", "Services", "OS", "SMBv1", "Anonymous Share", "Weak TLS"];
const CHECK_COLUMNS: [&str; 3] = ["smbv1", "anonymous_share", "weak_tls"];

/// One worksheet, one row per host
#[derive(Debug, Clone)]
pub struct XlsxReportWriter {
    log: ScanLogger,
}

impl XlsxReportWriter {
    pub fn new(log: ScanLogger) -> Self {
        Self { log }
    }

    fn row(host: &HostResult) -> [String; 7] {
        let ports = host
            .open_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let services = host
            .services
            .iter()
            .map(|(port, service)| format!("{}: {}", port, service))
            .collect::<Vec<_>>()
            .join("; ");
        let check = |name: &str| match host.checks.get(name) {
            Some(true) => "Yes".to_string(),
            Some(false) => "No".to_string(),
            None => String::new(),
        };

        [
            host.ip.to_string(),
            ports,
            services,
            host.os.clone().unwrap_or_default(),
            check(CHECK_COLUMNS[0]),
            check(CHECK_COLUMNS[1]),
            check(CHECK_COLUMNS[2]),
        ]
    }

    fn render(run: &Run) -> Result<Vec<u8>> {
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME)?;

        for (col, title) in HEADERS.iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *title, &header)?;
        }

        for (index, host) in run.hosts().iter().enumerate() {
            let row = index as u32 + 1;
            for (col, value) in Self::row(host).iter().enumerate() {
                sheet.write_string(row, col as u16, value)?;
            }
        }
        sheet.autofit();

        Ok(workbook.save_to_buffer()?)
    }
}

#[async_trait]
impl ReportWriter for XlsxReportWriter {
    async fn write_report(&self, run: &Run, output_path: &Path) -> Result<()> {
        ensure_parent(output_path, "xlsx").await?;
        let bytes = Self::render(run)?;
        fs::write(output_path, bytes)
            .await
            .map_err(|e| ScannerError::output("xlsx", format!("Failed to write {}: {}", output_path.display(), e)))?;

        tracing::info!(parent: self.log.span(), format = "xlsx", hosts = run.len(), "Report generated: {}", output_path.display());
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    host_count: usize,
    hosts: &'a [HostResult],
}

/// Pretty-printed JSON document
#[derive(Debug, Clone)]
pub struct JsonReportWriter {
    log: ScanLogger,
}

impl JsonReportWriter {
    pub fn new(log: ScanLogger) -> Self {
        Self { log }
    }
}

#[async_trait]
impl ReportWriter for JsonReportWriter {
    async fn write_report(&self, run: &Run, output_path: &Path) -> Result<()> {
        ensure_parent(output_path, "json").await?;
        let report = JsonReport {
            generated_at: Utc::now(),
            host_count: run.len(),
            hosts: run.hosts(),
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| ScannerError::output("json", format!("JSON serialization failed: {}", e)))?;

        fs::write(output_path, json)
            .await
            .map_err(|e| ScannerError::output("json", format!("Failed to write {}: {}", output_path.display(), e)))?;

        tracing::info!(parent: self.log.span(), format = "json", hosts = run.len(), "Report generated: {}", output_path.display());
        Ok(())
    }
}

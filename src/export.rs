use crate::model::HistoryRecord;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unknown export format: {0}")]
    UnknownFormat(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("export destination must be a bare file name: {0}")]
    Destination(String),
    #[error("failed to encode export: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    /// Fixed-width plain-text report, the stand-in for a printable document.
    Document,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "md" | "markdown" => Ok(Self::Markdown),
            "pdf" | "txt" | "doc" | "document" => Ok(Self::Document),
            _ => Err(ExportError::UnknownFormat(tag.to_string())),
        }
    }
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
            Self::Document => "txt",
        }
    }
}

/// Tags that name a format this crate cannot produce and are written as a
/// plain-text document instead. Returns the extension actually used.
pub fn substituted_format(tag: &str) -> Option<&'static str> {
    tag.trim()
        .eq_ignore_ascii_case("pdf")
        .then(|| ExportFormat::Document.extension())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportRow<'a> {
    #[serde(rename = "totalRamMB")]
    total_ram_mb: u64,
    #[serde(rename = "usedRamMB")]
    used_ram_mb: u64,
    #[serde(rename = "freeRamMB")]
    free_ram_mb: u64,
    timestamp: &'a str,
}

pub fn default_file_name(format: ExportFormat) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("smcmap_stats_{millis}.{}", format.extension())
}

pub fn render(
    format: ExportFormat,
    records: &[HistoryRecord],
    window_minutes: u32,
) -> Result<String, ExportError> {
    let title = format!("SMCMAP System Statistics (Last {window_minutes} Minutes)");
    match format {
        ExportFormat::Json => {
            let rows: Vec<ExportRow<'_>> = records
                .iter()
                .map(|r| ExportRow {
                    total_ram_mb: r.total_ram_mb,
                    used_ram_mb: r.used_ram_mb,
                    free_ram_mb: r.free_ram_mb,
                    timestamp: &r.timestamp,
                })
                .collect();
            Ok(serde_json::to_string_pretty(&rows)?)
        }
        ExportFormat::Markdown => {
            let mut out = format!("# {title}\n\n");
            out.push_str("| Timestamp | Total RAM (MB) | Used RAM (MB) | Free RAM (MB) |\n");
            out.push_str("|---|---|---|---|\n");
            for r in records {
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    r.timestamp, r.total_ram_mb, r.used_ram_mb, r.free_ram_mb
                );
            }
            Ok(out)
        }
        ExportFormat::Document => {
            let generated = humantime::format_rfc3339_seconds(SystemTime::now());
            let mut out = format!("{title}\nGenerated: {generated}\n\n");
            let _ = writeln!(
                out,
                "{:<25} | {:<14} | {:<13} | {:<13}",
                "Timestamp", "Total RAM (MB)", "Used RAM (MB)", "Free RAM (MB)"
            );
            out.push_str(&"-".repeat(74));
            out.push('\n');
            for r in records {
                let _ = writeln!(
                    out,
                    "{:<25} | {:<14} | {:<13} | {:<13}",
                    r.timestamp, r.total_ram_mb, r.used_ram_mb, r.free_ram_mb
                );
            }
            Ok(out)
        }
    }
}

/// Where a report lands. A caller-chosen name is only accepted as a single
/// plain component and is always placed under `dir`.
pub fn resolve_destination(
    format: ExportFormat,
    dir: &Path,
    destination: Option<PathBuf>,
) -> Result<PathBuf, ExportError> {
    let Some(name) = destination else {
        return Ok(dir.join(default_file_name(format)));
    };
    let mut components = name.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file)), None) => Ok(dir.join(file)),
        _ => Err(ExportError::Destination(name.display().to_string())),
    }
}

/// Renders and writes the report. `destination` defaults to a timestamped
/// file under `dir`.
pub fn write_report(
    format: ExportFormat,
    records: &[HistoryRecord],
    window_minutes: u32,
    dir: &Path,
    destination: Option<PathBuf>,
) -> Result<PathBuf, ExportError> {
    let path = resolve_destination(format, dir, destination)?;
    let body = render(format, records, window_minutes)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::write(&path, body).map_err(|source| ExportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records() -> Vec<HistoryRecord> {
        vec![
            HistoryRecord {
                id: 1,
                total_ram_mb: 15259,
                used_ram_mb: 7629,
                free_ram_mb: 7629,
                timestamp: "2026-01-01 10:00:00".to_string(),
            },
            HistoryRecord {
                id: 2,
                total_ram_mb: 15259,
                used_ram_mb: 8000,
                free_ram_mb: 7259,
                timestamp: "2026-01-01 10:00:01".to_string(),
            },
        ]
    }

    #[test]
    fn format_tags_are_case_insensitive() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("Pdf".parse::<ExportFormat>().unwrap(), ExportFormat::Document);
        assert!(matches!(
            "xlsx".parse::<ExportFormat>(),
            Err(ExportError::UnknownFormat(_))
        ));
    }

    #[test]
    fn only_pdf_is_reported_as_substituted() {
        assert_eq!(substituted_format(" PDF "), Some("txt"));
        assert_eq!(substituted_format("txt"), None);
        assert_eq!(substituted_format("md"), None);
    }

    #[test]
    fn json_rows_use_mb_field_names() {
        let text = render(ExportFormat::Json, &records(), 3).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["totalRamMB"], 15259);
        assert_eq!(value[1]["usedRamMB"], 8000);
        assert_eq!(value[1]["timestamp"], "2026-01-01 10:00:01");
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn markdown_has_title_and_one_row_per_record() {
        let text = render(ExportFormat::Markdown, &records(), 3).unwrap();
        assert!(text.starts_with("# SMCMAP System Statistics (Last 3 Minutes)\n"));
        assert!(text.contains("| 2026-01-01 10:00:00 | 15259 | 7629 | 7629 |"));
        assert_eq!(text.lines().filter(|l| l.starts_with("| 2026")).count(), 2);
    }

    #[test]
    fn document_is_fixed_width() {
        let text = render(ExportFormat::Document, &records(), 3).unwrap();
        assert!(text.contains("Generated: "));
        let row = text
            .lines()
            .find(|l| l.starts_with("2026-01-01 10:00:01"))
            .unwrap();
        assert_eq!(row.find('|'), Some(26));
    }

    #[test]
    fn write_report_defaults_to_timestamped_name() {
        let tmp = TempDir::new().unwrap();
        let path = write_report(ExportFormat::Markdown, &records(), 3, tmp.path(), None).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("smcmap_stats_") && name.ends_with(".md"), "{name}");
        assert!(fs::read_to_string(&path).unwrap().contains("15259"));
    }

    #[test]
    fn write_report_honours_destination_name() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("out");
        let path = write_report(
            ExportFormat::Json,
            &records(),
            3,
            &dir,
            Some(PathBuf::from("report.json")),
        )
        .unwrap();
        assert_eq!(path, dir.join("report.json"));
        assert!(path.exists());
    }

    #[test]
    fn destination_outside_export_dir_rejected() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("out");
        let victim = tmp.path().join("victim.txt");
        fs::write(&victim, "keep").unwrap();

        for dest in [
            victim.clone(),
            PathBuf::from("../victim.txt"),
            PathBuf::from("nested/report.md"),
            PathBuf::from(".."),
            PathBuf::from(""),
        ] {
            let result = write_report(ExportFormat::Markdown, &records(), 3, &dir, Some(dest));
            assert!(matches!(result, Err(ExportError::Destination(_))), "{result:?}");
        }
        assert_eq!(fs::read_to_string(&victim).unwrap(), "keep");
        assert!(!dir.exists());
    }
}

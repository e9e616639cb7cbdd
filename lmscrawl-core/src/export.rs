//! In-memory serialization of a collected record set.

use std::fmt;
use std::fmt::Write as _;
use std::io::Cursor;
use std::str::FromStr;

use chrono::{DateTime, Local};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use thiserror::Error;

use crate::config::ExportSection;
use crate::events::RunEmitter;
use crate::record::Record;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no data to export")]
    Empty,
    #[error("unsupported format: {0}. Supported formats: csv, xlsx, json, xml")]
    UnsupportedFormat(String),
    #[error("{0} export unavailable in this build")]
    CapabilityUnavailable(ExportFormat),
    #[error("failed to encode json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode xml: {0}")]
    Xml(String),
    #[error("failed to encode xlsx: {0}")]
    Xlsx(String),
}

pub type ExportResult<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Xlsx,
    Json,
    Xml,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 4] = [
        ExportFormat::Csv,
        ExportFormat::Xlsx,
        ExportFormat::Json,
        ExportFormat::Xml,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Json => "json",
            ExportFormat::Xml => "xml",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Json => "application/json",
            ExportFormat::Xml => "application/xml",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            "json" => Ok(ExportFormat::Json),
            "xml" => Ok(ExportFormat::Xml),
            _ => Err(ExportError::UnsupportedFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub content: Vec<u8>,
    pub filename: String,
    pub media_type: &'static str,
    pub format: ExportFormat,
}

pub fn artifact_filename(
    record_set_id: &str,
    format: ExportFormat,
    timestamp: DateTime<Local>,
) -> String {
    format!(
        "exam_data_{}_{}.{}",
        record_set_id,
        timestamp.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

#[derive(Debug, Clone, Default)]
pub struct Exporter {
    labels: ExportSection,
}

impl Exporter {
    pub fn new(labels: ExportSection) -> Self {
        Self { labels }
    }

    /// Serializes `records`, logging the outcome. Any failure is reported as
    /// `None` with the reason in the run log.
    pub fn export(
        &self,
        records: &[Record],
        record_set_id: &str,
        format: &str,
        emitter: &RunEmitter,
    ) -> Option<ExportArtifact> {
        self.export_at(records, record_set_id, format, Local::now(), emitter)
    }

    pub fn export_at(
        &self,
        records: &[Record],
        record_set_id: &str,
        format: &str,
        timestamp: DateTime<Local>,
        emitter: &RunEmitter,
    ) -> Option<ExportArtifact> {
        if !records.is_empty() {
            emitter.log(format!(
                "Starting export: {} records, format: {}",
                records.len(),
                format
            ));
        }
        match self.try_export_at(records, record_set_id, format, timestamp) {
            Ok(artifact) => {
                emitter.log(format!(
                    "{} ready for download. Size: {} bytes",
                    artifact.filename,
                    artifact.content.len()
                ));
                Some(artifact)
            }
            Err(err) => {
                emitter.log(format!("Export skipped: {err}"));
                None
            }
        }
    }

    pub fn try_export_at(
        &self,
        records: &[Record],
        record_set_id: &str,
        format: &str,
        timestamp: DateTime<Local>,
    ) -> ExportResult<ExportArtifact> {
        if records.is_empty() {
            return Err(ExportError::Empty);
        }
        let format: ExportFormat = format.parse()?;
        let content = match format {
            ExportFormat::Csv => self.to_csv(records).into_bytes(),
            ExportFormat::Xlsx => self.to_xlsx(records)?,
            ExportFormat::Json => self.to_json(records)?,
            ExportFormat::Xml => to_xml(records)?,
        };
        Ok(ExportArtifact {
            content,
            filename: artifact_filename(record_set_id, format, timestamp),
            media_type: format.media_type(),
            format,
        })
    }

    /// UTF-8 with a byte-order mark so spreadsheet tools detect the encoding.
    fn to_csv(&self, records: &[Record]) -> String {
        let mut out = String::from('\u{feff}');
        let _ = writeln!(
            out,
            "{},{}",
            csv_field(&self.labels.name_column),
            csv_field(&self.labels.detail_column)
        );
        for record in records {
            let _ = writeln!(
                out,
                "{},{}",
                csv_field(&record.display_name),
                csv_field(&record.supplementary_text)
            );
        }
        out
    }

    fn to_json(&self, records: &[Record]) -> ExportResult<Vec<u8>> {
        let rows: Vec<LabelledRecord<'_>> = records
            .iter()
            .map(|record| LabelledRecord {
                labels: &self.labels,
                record,
            })
            .collect();
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        rows.serialize(&mut serializer)?;
        Ok(out)
    }

    #[cfg(feature = "xlsx")]
    fn to_xlsx(&self, records: &[Record]) -> ExportResult<Vec<u8>> {
        use rust_xlsxwriter::{Format, Workbook};

        let xlsx = |err: rust_xlsxwriter::XlsxError| ExportError::Xlsx(err.to_string());
        let mut workbook = Workbook::new();
        let header = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Sheet1").map_err(xlsx)?;
        sheet
            .write_string_with_format(0, 0, &self.labels.name_column, &header)
            .map_err(xlsx)?;
        sheet
            .write_string_with_format(0, 1, &self.labels.detail_column, &header)
            .map_err(xlsx)?;
        for (row, record) in (1u32..).zip(records) {
            sheet
                .write_string(row, 0, &record.display_name)
                .map_err(xlsx)?;
            sheet
                .write_string(row, 1, &record.supplementary_text)
                .map_err(xlsx)?;
        }
        workbook.save_to_buffer().map_err(xlsx)
    }

    #[cfg(not(feature = "xlsx"))]
    fn to_xlsx(&self, _records: &[Record]) -> ExportResult<Vec<u8>> {
        Err(ExportError::CapabilityUnavailable(ExportFormat::Xlsx))
    }
}

struct LabelledRecord<'a> {
    labels: &'a ExportSection,
    record: &'a Record,
}

impl Serialize for LabelledRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&self.labels.name_column, &self.record.display_name)?;
        map.serialize_entry(&self.labels.detail_column, &self.record.supplementary_text)?;
        map.end()
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn xml_error(err: impl fmt::Display) -> ExportError {
    ExportError::Xml(err.to_string())
}

fn to_xml(records: &[Record]) -> ExportResult<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Start(BytesStart::new("students")))
        .map_err(xml_error)?;
    for record in records {
        writer
            .write_event(Event::Start(BytesStart::new("student")))
            .map_err(xml_error)?;
        for (tag, value) in [
            ("name", record.display_name.as_str()),
            ("blog_link", record.supplementary_text.as_str()),
        ] {
            writer
                .write_event(Event::Start(BytesStart::new(tag)))
                .map_err(xml_error)?;
            writer
                .write_event(Event::Text(BytesText::new(value)))
                .map_err(xml_error)?;
            writer
                .write_event(Event::End(BytesEnd::new(tag)))
                .map_err(xml_error)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("student")))
            .map_err(xml_error)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("students")))
        .map_err(xml_error)?;

    let mut out = writer.into_inner().into_inner();
    out.push(b'\n');
    Ok(out)
}

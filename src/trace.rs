//! Per-build records for external diagnostics tooling.
//!
//! The cache never reads these back.

use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use tracing::{info, warn};

use crate::key::{SelectorId, ShaderPartKey, ShaderStage, VariantKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildKind {
    MainPart,
    Composed,
    Monolithic,
    Part,
}

/// One finished build.
#[derive(Debug, Clone, Serialize)]
pub struct CompileRecord<'a> {
    pub selector: Option<SelectorId>,
    pub label: Option<&'a str>,
    pub stage: Option<ShaderStage>,
    pub kind: BuildKind,
    pub key: Option<&'a VariantKey>,
    pub part: Option<&'a ShaderPartKey>,
    pub elapsed_us: u64,
    pub cache_hit: bool,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disassembly: Option<&'a str>,
}

pub trait TraceSink: Send + Sync {
    fn record(&self, record: &CompileRecord<'_>);

    /// Whether records may be delivered from background workers.
    fn accepts_async(&self) -> bool {
        true
    }
}

/// Emits each record as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, record: &CompileRecord<'_>) {
        info!(
            selector = ?record.selector,
            label = record.label.unwrap_or("-"),
            kind = ?record.kind,
            elapsed_us = record.elapsed_us,
            cache_hit = record.cache_hit,
            failed = record.failed,
            "shader build"
        );
    }
}

/// Writes one JSON object per record and line.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
    accepts_async: bool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            accepts_async: true,
        }
    }

    /// Restrict the sink to foreground builds.
    pub fn foreground_only(mut self) -> Self {
        self.accepts_async = false;
        self
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> TraceSink for JsonLinesSink<W> {
    fn record(&self, record: &CompileRecord<'_>) {
        let mut writer = self.writer.lock();
        let written = serde_json::to_writer(&mut *writer, record)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(err) = written {
            warn!("failed to write compile record: {err}");
        }
    }

    fn accepts_async(&self) -> bool {
        self.accepts_async
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_sink_writes_one_object_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        let key = VariantKey::new(ShaderStage::Fragment);
        for failed in [false, true] {
            sink.record(&CompileRecord {
                selector: Some(SelectorId(4)),
                label: Some("blit"),
                stage: Some(ShaderStage::Fragment),
                kind: BuildKind::Monolithic,
                key: Some(&key),
                part: None,
                elapsed_us: 12,
                cache_hit: false,
                failed,
                disassembly: None,
            });
        }

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["label"], "blit");
        assert_eq!(first["kind"], "monolithic");
        assert_eq!(first["failed"], false);
        assert!(first.get("disassembly").is_none());
    }

    #[test]
    fn foreground_only_sink_rejects_async() {
        assert!(JsonLinesSink::new(Vec::new()).accepts_async());
        assert!(!JsonLinesSink::new(Vec::new()).foreground_only().accepts_async());
    }
}

//! Debug-artifact persistence (§4.10): writes the output/timeline sidecars
//! on a clean pass, and the full debug bundle (both OCR payloads, both LLM
//! results, timeline) when a receipt needs manual review or hits a fatal
//! error.

use crate::timeline::TimelineReport;
use receipt_shared::config::Settings;
use serde_json::Value;
use std::io;
use std::path::Path;

pub struct ArtifactWriter<'a> {
    settings: &'a Settings,
}

impl<'a> ArtifactWriter<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Writes `{id}_output.json` and `{id}_timeline.json` to the output
    /// directory, for a receipt that reached a terminal `passed*` status.
    pub fn write_success(&self, receipt_id: &str, llm_result: &Value, timeline: &TimelineReport) -> io::Result<()> {
        let output = serde_json::json!({
            "receipt_id": receipt_id,
            "timestamp": receipt_shared::time::now_iso8601(),
            "data": llm_result,
        });
        write_json(&self.settings.output_dir.join(format!("{receipt_id}_output.json")), &output)?;
        write_json(&self.settings.output_dir.join(format!("{receipt_id}_timeline.json")), timeline)
    }

    /// Writes the full debug bundle to the debug directory, for a receipt
    /// that needs manual review.
    pub fn write_debug_bundle(
        &self,
        receipt_id: &str,
        ocr_primary: Option<&Value>,
        ocr_fallback: Option<&Value>,
        llm_primary: Option<&Value>,
        llm_fallback: Option<&Value>,
        timeline: &TimelineReport,
    ) -> io::Result<()> {
        self.write_debug_payloads(receipt_id, ocr_primary, ocr_fallback, llm_primary, llm_fallback)?;
        write_json(&self.settings.debug_dir.join(format!("{receipt_id}_timeline.json")), timeline)
    }

    fn write_debug_payloads(
        &self,
        receipt_id: &str,
        ocr_primary: Option<&Value>,
        ocr_fallback: Option<&Value>,
        llm_primary: Option<&Value>,
        llm_fallback: Option<&Value>,
    ) -> io::Result<()> {
        if let Some(value) = ocr_primary {
            write_json(&self.settings.debug_dir.join(format!("{receipt_id}_ocr_primary.json")), value)?;
        }
        if let Some(value) = ocr_fallback {
            write_json(&self.settings.debug_dir.join(format!("{receipt_id}_ocr_fallback.json")), value)?;
        }
        if let Some(value) = llm_primary {
            write_json(&self.settings.debug_dir.join(format!("{receipt_id}_llm_primary.json")), value)?;
        }
        if let Some(value) = llm_fallback {
            write_json(&self.settings.debug_dir.join(format!("{receipt_id}_llm_fallback.json")), value)?;
        }
        Ok(())
    }

    /// Writes `{id}_error.json` and `{id}_timeline.json` to the error
    /// directory, for a fatal (non-retryable) failure.
    pub fn write_error(&self, receipt_id: &str, error: &str, timeline: &TimelineReport) -> io::Result<()> {
        let error_data = serde_json::json!({
            "receipt_id": receipt_id,
            "timestamp": receipt_shared::time::now_iso8601(),
            "error": error,
            "timeline": timeline,
        });
        write_json(&self.settings.error_dir.join(format!("{receipt_id}_error.json")), &error_data)?;
        write_json(&self.settings.error_dir.join(format!("{receipt_id}_timeline.json")), timeline)
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TimelineRecorder;
    use std::path::PathBuf;

    fn settings_in(dir: &Path) -> Settings {
        Settings {
            output_dir: dir.join("output"),
            debug_dir: dir.join("debug"),
            error_dir: dir.join("error"),
            store_config_dir: PathBuf::new(),
            default_llm_model: "gpt-4o-mini".to_string(),
            rate_limit_max_requests: 15,
            rate_limit_window_seconds: 60,
            ocr_text_budget_chars: 2000,
            stage_timeout_ms: 30_000,
        }
    }

    #[test]
    fn test_write_success_creates_output_and_timeline_files() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        settings.ensure_output_dirs().unwrap();
        let writer = ArtifactWriter::new(&settings);
        let mut recorder = TimelineRecorder::new("r1");
        recorder.start("ocr_primary");
        recorder.end("ocr_primary");

        writer.write_success("r1", &serde_json::json!({"receipt": {}}), &recorder.to_report()).unwrap();

        assert!(settings.output_dir.join("r1_output.json").exists());
        assert!(settings.output_dir.join("r1_timeline.json").exists());
    }

    #[test]
    fn test_write_debug_bundle_skips_absent_payloads() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = settings_in(tmp.path());
        settings.ensure_output_dirs().unwrap();
        let writer = ArtifactWriter::new(&settings);
        let recorder = TimelineRecorder::new("r2");

        writer.write_debug_bundle("r2", Some(&serde_json::json!({"raw_text": "MILK"})), None, None, None, &recorder.to_report()).unwrap();

        assert!(settings.debug_dir.join("r2_ocr_primary.json").exists());
        assert!(!settings.debug_dir.join("r2_ocr_fallback.json").exists());
        assert!(settings.debug_dir.join("r2_timeline.json").exists());
    }
}

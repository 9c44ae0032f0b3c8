//! Per-stage timing sidecar (§4.10): wraps every workflow stage with
//! `start(name)`/`end(name)`, producing a millisecond duration per step.

use receipt_shared::time::now_iso8601;
use serde::Serialize;
use std::collections::HashMap;
use std::time::SystemTime;

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub step: String,
    pub timestamp: String,
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineReport {
    pub receipt_id: String,
    pub timeline: Vec<TimelineEntry>,
}

/// Records the start/end of each named stage a receipt passes through.
pub struct TimelineRecorder {
    receipt_id: String,
    entries: Vec<TimelineEntry>,
    start_times: HashMap<String, SystemTime>,
}

impl TimelineRecorder {
    pub fn new(receipt_id: impl Into<String>) -> Self {
        Self { receipt_id: receipt_id.into(), entries: Vec::new(), start_times: HashMap::new() }
    }

    pub fn start(&mut self, step: &str) {
        let now = SystemTime::now();
        self.start_times.insert(step.to_string(), now);
        self.entries.push(TimelineEntry { step: format!("{step}_start"), timestamp: now_iso8601(), duration_ms: None });
        tracing::debug!(step, "timeline: stage started");
    }

    pub fn end(&mut self, step: &str) {
        let now = SystemTime::now();
        let duration_ms = self.start_times.get(step).map(|start| receipt_shared::time::duration_ms(*start, now));
        self.entries.push(TimelineEntry { step: format!("{step}_end"), timestamp: now_iso8601(), duration_ms });
        tracing::debug!(step, ?duration_ms, "timeline: stage ended");
    }

    pub fn to_report(&self) -> TimelineReport {
        TimelineReport { receipt_id: self.receipt_id.clone(), timeline: self.entries.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_start_then_end_records_duration() {
        let mut recorder = TimelineRecorder::new("r1");
        recorder.start("ocr_primary");
        sleep(Duration::from_millis(1));
        recorder.end("ocr_primary");

        let report = recorder.to_report();
        assert_eq!(report.receipt_id, "r1");
        assert_eq!(report.timeline.len(), 2);
        assert_eq!(report.timeline[0].step, "ocr_primary_start");
        assert!(report.timeline[0].duration_ms.is_none());
        assert_eq!(report.timeline[1].step, "ocr_primary_end");
        assert!(report.timeline[1].duration_ms.unwrap() >= 0.0);
    }

    #[test]
    fn test_end_without_start_has_no_duration() {
        let mut recorder = TimelineRecorder::new("r1");
        recorder.end("never_started");
        assert!(recorder.to_report().timeline[0].duration_ms.is_none());
    }
}

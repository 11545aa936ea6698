// SPDX-License-Identifier: GPL-3.0-only

//! Accepts tracker-emitted events and produces periodic/final textual
//! summaries (§4.8).
//!
//! Events accumulate into two append-only sequences (a rolling period
//! buffer and a lifetime buffer), and the timeline formatter collapses
//! consecutive stationary events of the same class into a presence range,
//! and consecutive dynamic entries of the same class within 10s into a
//! single "N Xs were detected" line.

use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::info;

/// One tracker-observed event: a class entering, remaining stationary, or
/// exiting the frame (§3).
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    pub class_label: String,
    pub timestamp: SystemTime,
    pub is_stationary: bool,
    pub is_exit: bool,
}

/// Records detection events and renders periodic/final summaries over them.
pub struct EventRecorder {
    inner: Mutex<Inner>,
}

struct Inner {
    period_events: Vec<DetectionEvent>,
    period_start: SystemTime,
    lifetime_events: Vec<DetectionEvent>,
    program_start: SystemTime,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        let now = SystemTime::now();
        Self {
            inner: Mutex::new(Inner {
                period_events: Vec::new(),
                period_start: now,
                lifetime_events: Vec::new(),
                program_start: now,
            }),
        }
    }

    /// Appends one event into both the period and lifetime buffers (§4.8).
    pub fn record(&self, class_label: impl Into<String>, is_stationary: bool, is_exit: bool) {
        let event = DetectionEvent {
            class_label: class_label.into(),
            timestamp: SystemTime::now(),
            is_stationary,
            is_exit,
        };
        let mut inner = self.inner.lock().unwrap();
        inner.period_events.push(event.clone());
        inner.lifetime_events.push(event);
    }

    /// Emits a periodic summary over the period buffer and clears it.
    /// Returns the rendered text (also logged at info level), or `None` if
    /// there was nothing to report.
    pub fn print_periodic(&self) -> Option<String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.period_events.is_empty() {
            return None;
        }
        let period_end = SystemTime::now();
        let text = render_summary(
            "Detection Summary",
            inner.period_start,
            period_end,
            &inner.period_events,
            None,
        );
        inner.period_events.clear();
        inner.period_start = period_end;
        info!("{text}");
        Some(text)
    }

    /// Emits the lifetime summary; never clears the lifetime buffer (§4.8).
    pub fn print_final(&self) -> String {
        let inner = self.inner.lock().unwrap();
        let now = SystemTime::now();
        if inner.lifetime_events.is_empty() {
            let text = "No objects were detected during program runtime.".to_string();
            info!("{text}");
            return text;
        }
        let text = render_summary(
            "Final Detection Summary",
            inner.program_start,
            now,
            &inner.lifetime_events,
            Some(now),
        );
        info!("{text}");
        text
    }

    /// Emits a periodic summary if at least `interval_minutes` have elapsed
    /// since the period started (§4.8).
    pub fn check_and_emit(&self, interval_minutes: u64) -> Option<String> {
        let elapsed_minutes = {
            let inner = self.inner.lock().unwrap();
            SystemTime::now()
                .duration_since(inner.period_start)
                .map(|d| d.as_secs() / 60)
                .unwrap_or(0)
        };
        if elapsed_minutes >= interval_minutes {
            self.print_periodic()
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn period_event_count(&self) -> usize {
        self.inner.lock().unwrap().period_events.len()
    }

    #[cfg(test)]
    pub fn lifetime_event_count(&self) -> usize {
        self.inner.lock().unwrap().lifetime_events.len()
    }
}

fn pluralize(class_label: &str, count: usize) -> String {
    if count <= 1 {
        class_label.to_string()
    } else if class_label == "person" {
        "people".to_string()
    } else {
        format!("{class_label}s")
    }
}

fn hhmm(time: SystemTime) -> String {
    let dt: DateTime<Local> = time.into();
    dt.format("%H:%M").to_string()
}

fn render_summary(
    title: &str,
    period_start: SystemTime,
    period_end: SystemTime,
    events: &[DetectionEvent],
    runtime_end: Option<SystemTime>,
) -> String {
    use std::collections::BTreeMap;
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for e in events {
        *counts.entry(e.class_label.as_str()).or_insert(0) += 1;
    }

    let mut out = String::new();
    out.push_str(&format!("{title}: {}-{}\n", hhmm(period_start), hhmm(period_end)));
    if let Some(end) = runtime_end {
        let runtime = end.duration_since(period_start).unwrap_or_default();
        out.push_str(&format!("Program Runtime: {}\n", format_runtime(runtime)));
    }

    let counts_str: Vec<String> = counts
        .iter()
        .map(|(class, count)| format!("{count}x {}", pluralize(class, *count)))
        .collect();
    out.push_str(&counts_str.join(", "));
    out.push_str(" were detected.\n\nTimeline:\n");
    out.push_str(&render_timeline(events));
    out
}

fn format_runtime(runtime: std::time::Duration) -> String {
    let secs = runtime.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Builds the timeline section, collapsing runs as described in §4.8.
fn render_timeline(events: &[DetectionEvent]) -> String {
    let mut out = String::new();
    let mut i = 0;
    while i < events.len() {
        let event = &events[i];
        if event.is_exit {
            out.push_str(&format!("at {}, {} left\n", hhmm(event.timestamp), event.class_label));
            i += 1;
            continue;
        }
        if event.is_stationary {
            let mut j = i;
            while j + 1 < events.len()
                && events[j + 1].class_label == event.class_label
                && events[j + 1].is_stationary
                && !events[j + 1].is_exit
            {
                j += 1;
            }
            if j > i {
                out.push_str(&format!(
                    "from {}-{} {} was present\n",
                    hhmm(event.timestamp),
                    hhmm(events[j].timestamp),
                    event.class_label
                ));
            }
            i = j + 1;
            continue;
        }
        // Dynamic entry: collapse consecutive same-class entries within 10s.
        let mut end = i;
        while end + 1 < events.len()
            && events[end + 1].class_label == event.class_label
            && !events[end + 1].is_stationary
            && !events[end + 1].is_exit
            && events[end + 1]
                .timestamp
                .duration_since(event.timestamp)
                .map(|d| d.as_secs() < 10)
                .unwrap_or(false)
        {
            end += 1;
        }
        let count = end - i + 1;
        let phrase = if count == 1 {
            format!("a {} was detected", event.class_label)
        } else {
            format!("{count} {} were detected", pluralize(&event.class_label, count))
        };
        out.push_str(&format!("at {}, {phrase}\n", hhmm(event.timestamp)));
        i = end + 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn record_forms_a_total_order_and_periodic_clears() {
        let recorder = EventRecorder::new();
        recorder.record("person", false, false);
        recorder.record("cat", false, false);
        assert_eq!(recorder.period_event_count(), 2);
        assert_eq!(recorder.lifetime_event_count(), 2);
        recorder.print_periodic();
        assert_eq!(recorder.period_event_count(), 0);
        assert_eq!(recorder.lifetime_event_count(), 2);
    }

    #[test]
    fn final_summary_survives_periodic_clear() {
        let recorder = EventRecorder::new();
        recorder.record("dog", false, false);
        recorder.print_periodic();
        let text = recorder.print_final();
        assert!(text.contains("dog"));
    }

    #[test]
    fn check_and_emit_only_fires_after_interval() {
        let recorder = EventRecorder::new();
        recorder.record("person", false, false);
        assert!(recorder.check_and_emit(60).is_none());
        {
            let mut inner = recorder.inner.lock().unwrap();
            inner.period_start -= Duration::from_secs(61 * 60);
        }
        assert!(recorder.check_and_emit(60).is_some());
    }

    #[test]
    fn pluralization_matches_spec_rules() {
        assert_eq!(pluralize("person", 1), "person");
        assert_eq!(pluralize("person", 2), "people");
        assert_eq!(pluralize("car", 3), "cars");
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Per-object identity maintenance across frames (§4.3).
//!
//! The tracker is invoked once per processed frame, always from inside the
//! worker that owns that frame — never concurrently from two workers (§5) —
//! so its own lock exists only to let the orchestrator take a read snapshot
//! between frames, not to arbitrate between workers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::constants::{
    MATCH_RADIUS_PX, POSITION_HISTORY_LEN, STATIONARY_DISPLACEMENT_PX, STATIONARY_MIN_SAMPLES,
    TRACK_RETENTION_FRAMES,
};
use crate::detector::RawDetection;

/// A 2-D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Center {
    pub x: f64,
    pub y: f64,
}

impl Center {
    fn distance(&self, other: &Center) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// One detection, enriched with tracker-derived stationarity fields. The
/// detector fills `class_label`/`confidence`/box/`class_id`; the tracker
/// fills `is_stationary`/`stationary_duration_seconds` (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_label: String,
    pub class_id: i64,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub is_stationary: bool,
    pub stationary_duration_seconds: u64,
}

impl Detection {
    fn center(&self) -> Center {
        Center {
            x: self.x + self.w / 2.0,
            y: self.y + self.h / 2.0,
        }
    }
}

impl From<RawDetection> for Detection {
    fn from(raw: RawDetection) -> Self {
        Detection {
            class_label: raw.class_label,
            class_id: raw.class_id,
            confidence: raw.confidence,
            x: raw.x,
            y: raw.y,
            w: raw.w,
            h: raw.h,
            is_stationary: false,
            stationary_duration_seconds: 0,
        }
    }
}

/// Identity and history kept for one tracked object across frames (§3).
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub id: u64,
    pub class_label: String,
    pub center: Center,
    pub previous_center: Center,
    /// Ordered, oldest-first, length <= POSITION_HISTORY_LEN.
    pub position_history: VecDeque<Center>,
    pub present_in_last_frame: bool,
    pub frames_since_detection: u32,
    pub is_new: bool,
    pub is_stationary: bool,
    pub stationary_since: Option<Instant>,
    created_at: Instant,
}

impl TrackedObject {
    fn stationary_duration_seconds(&self, now: Instant) -> u64 {
        if self.is_stationary {
            match self.stationary_since {
                Some(since) => now.saturating_duration_since(since).as_secs(),
                None => 0,
            }
        } else {
            0
        }
    }
}

/// An object's identity left the frame; emitted at purge time so the event
/// recorder's summary output can report exits (open question in the design
/// notes resolved in favor of emission-at-purge, see DESIGN.md).
#[derive(Debug, Clone)]
pub struct ExitEvent {
    pub class_label: String,
}

/// Maintains the collection of [`TrackedObject`]s across frames.
pub struct Tracker {
    inner: Mutex<TrackerInner>,
}

struct TrackerInner {
    objects: Vec<TrackedObject>,
    next_id: u64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TrackerInner {
                objects: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Matches new detections against existing tracked objects, creates
    /// trackers for unmatched detections, and purges any object that has
    /// gone too long unmatched. Returns exit events for purged objects.
    ///
    /// Also attaches the matched tracker's `is_new`/`frames_since_detection`
    /// state to each input detection via the returned `Vec<Detection>`, and
    /// runs stationarity enrichment in the same critical section (§5: a
    /// single lock serializes `update + enrich` as one critical section per
    /// frame).
    pub fn update_and_enrich(
        &self,
        new_detections: Vec<Detection>,
        now: Instant,
    ) -> (Vec<Detection>, Vec<ExitEvent>) {
        let mut inner = self.inner.lock().unwrap();

        // Step 1: mark unmatched, age everyone, and clear `is_new` — it may
        // only be true during the one frame immediately following creation,
        // so an object that goes unmatched the very next frame must not keep
        // reporting itself as new.
        for obj in inner.objects.iter_mut() {
            obj.present_in_last_frame = false;
            obj.frames_since_detection += 1;
            obj.is_new = false;
        }

        let mut enriched = Vec::with_capacity(new_detections.len());
        let mut matched_new_this_frame: Vec<u64> = Vec::new();

        for mut det in new_detections {
            let center = det.center();
            let candidate_idx = Self::find_match(&inner.objects, &det.class_label, center);

            let obj_id = match candidate_idx {
                Some(idx) => {
                    let obj = &mut inner.objects[idx];
                    obj.previous_center = obj.center;
                    obj.center = center;
                    if obj.position_history.len() >= POSITION_HISTORY_LEN {
                        obj.position_history.pop_front();
                    }
                    obj.position_history.push_back(center);
                    obj.present_in_last_frame = true;
                    obj.frames_since_detection = 0;
                    obj.is_new = false;
                    obj.id
                }
                None => {
                    let id = inner.next_id;
                    inner.next_id += 1;
                    let mut history = VecDeque::with_capacity(POSITION_HISTORY_LEN);
                    history.push_back(center);
                    inner.objects.push(TrackedObject {
                        id,
                        class_label: det.class_label.clone(),
                        center,
                        previous_center: center,
                        position_history: history,
                        present_in_last_frame: true,
                        frames_since_detection: 0,
                        is_new: true,
                        is_stationary: false,
                        stationary_since: None,
                        created_at: now,
                    });
                    matched_new_this_frame.push(id);
                    id
                }
            };

            let obj = inner.objects.iter_mut().find(|o| o.id == obj_id).unwrap();
            Self::enrich_one(obj, now);
            det.is_stationary = obj.is_stationary;
            det.stationary_duration_seconds = obj.stationary_duration_seconds(now);
            enriched.push(det);
        }

        // Step 4: purge anything that's aged out, emitting exit events.
        let mut exits = Vec::new();
        inner.objects.retain(|obj| {
            if obj.frames_since_detection > TRACK_RETENTION_FRAMES {
                exits.push(ExitEvent {
                    class_label: obj.class_label.clone(),
                });
                false
            } else {
                true
            }
        });

        (enriched, exits)
    }

    /// Finds the best matching tracked object: same class, within
    /// MATCH_RADIUS, tie-broken by smallest `frames_since_detection`, then
    /// by oldest `created_at` (§4.3).
    fn find_match(objects: &[TrackedObject], class_label: &str, center: Center) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, obj) in objects.iter().enumerate() {
            if obj.class_label != class_label {
                continue;
            }
            let dist = obj.center.distance(&center);
            if dist > MATCH_RADIUS_PX {
                continue;
            }
            match best {
                None => best = Some((idx, dist)),
                Some((best_idx, best_dist)) => {
                    let better = dist < best_dist
                        || (dist == best_dist
                            && obj.frames_since_detection < objects[best_idx].frames_since_detection)
                        || (dist == best_dist
                            && obj.frames_since_detection == objects[best_idx].frames_since_detection
                            && obj.created_at < objects[best_idx].created_at);
                    if better {
                        best = Some((idx, dist));
                    }
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn enrich_one(obj: &mut TrackedObject, now: Instant) {
        let was_stationary = obj.is_stationary;
        let is_stationary = if obj.position_history.len() >= STATIONARY_MIN_SAMPLES {
            let points: Vec<Center> = obj.position_history.iter().copied().collect();
            let mut total = 0.0;
            for w in points.windows(2) {
                total += w[0].distance(&w[1]);
            }
            let avg = total / (points.len() - 1) as f64;
            avg <= STATIONARY_DISPLACEMENT_PX
        } else {
            false
        };

        if is_stationary && !was_stationary {
            obj.stationary_since = Some(now);
        } else if !is_stationary && was_stationary {
            obj.stationary_since = None;
        }
        obj.is_stationary = is_stationary;
    }

    /// True if any tracked object was created during the frame just
    /// processed (`is_new == true`, which holds only for that one frame),
    /// used by the orchestrator's burst-mode logic. See
    /// `has_new_tracker_this_frame` for the photo policy's equivalent check.
    pub fn has_new_object(&self) -> bool {
        self.inner.lock().unwrap().objects.iter().any(|o| o.is_new)
    }

    /// True if some tracked object was created or matched in the frame just
    /// processed (`is_new && frames_since_detection == 0`), the exact
    /// condition Photo Policy's "new tracker" rule tests (§4.4, point 4).
    pub fn has_new_tracker_this_frame(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .objects
            .iter()
            .any(|o| o.is_new && o.frames_since_detection == 0)
    }

    /// Snapshot of currently present class labels, for burst-mode's
    /// "new label not seen last iteration" check.
    pub fn present_class_labels(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|o| o.present_in_last_frame)
            .map(|o| o.class_label.clone())
            .collect()
    }

    /// True if every currently-present object is stationary (used to
    /// deactivate burst mode), and false if nothing is present at all —
    /// the orchestrator treats "no objects present" as its own
    /// deactivation condition (§4.7).
    pub fn all_present_are_stationary(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .iter()
            .filter(|o| o.present_in_last_frame)
            .all(|o| o.is_stationary)
    }

    pub fn any_present(&self) -> bool {
        self.inner
            .lock()
            .unwrap()
            .objects
            .iter()
            .any(|o| o.present_in_last_frame)
    }

    #[cfg(test)]
    pub fn object_count_for_class(&self, class_label: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|o| o.class_label == class_label)
            .count()
    }

    #[cfg(test)]
    pub fn position_history_len(&self, id: u64) -> usize {
        self.inner
            .lock()
            .unwrap()
            .objects
            .iter()
            .find(|o| o.id == id)
            .map(|o| o.position_history.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn max_frames_since_detection(&self) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .objects
            .iter()
            .map(|o| o.frames_since_detection)
            .max()
            .unwrap_or(0)
    }
}

/// Formats a stationary duration for photo labels: `for N sec` under a
/// minute, `for N min` otherwise (§4.4).
pub fn format_stationary_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("for {secs} sec")
    } else {
        format!("for {} min", secs / 60)
    }
}

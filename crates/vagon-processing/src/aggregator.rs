//! Composite number aggregation.
//!
//! The recognizer labels individual glyph groups ("0", "12"). Fragments
//! whose boxes lie within `umbral_agrupacion` pixels of each other form one
//! composite, read left to right (then top to bottom). A composite is as
//! confident as its weakest fragment. With a strict vocabulary each fragment
//! must be a known label; the joined number only has to look like one.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use vagon_core::models::{BoundingBox, DetectionEvent, DetectorSettings, Outcome};
use vagon_core::NumberVocabulary;

/// A candidate number assembled from one or more fragments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Composite {
    pub numero: String,
    pub confianza: f32,
    pub bounding_box: BoundingBox,
    /// Fragment labels in reading order
    pub fragments: Vec<String>,
    pub frame_index: u64,
}

fn reading_order(a: &DetectionEvent, b: &DetectionEvent) -> Ordering {
    a.bounding_box
        .x1
        .total_cmp(&b.bounding_box.x1)
        .then(a.bounding_box.y1.total_cmp(&b.bounding_box.y1))
}

/// Higher confidence wins, then the longer number, then the leftmost.
fn better(a: &Composite, b: &Composite) -> bool {
    match a.confianza.total_cmp(&b.confianza) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => match a.numero.len().cmp(&b.numero.len()) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a.bounding_box.x1 < b.bounding_box.x1,
        },
    }
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn build_composite(mut members: Vec<&DetectionEvent>) -> Option<Composite> {
    members.sort_by(|a, b| reading_order(a, b));
    let first = members.first()?;
    let mut bounding_box = first.bounding_box;
    let mut confianza = f32::INFINITY;
    let mut numero = String::new();
    let mut fragments = Vec::with_capacity(members.len());
    for event in &members {
        numero.push_str(&event.raw_number);
        fragments.push(event.raw_number.clone());
        confianza = confianza.min(event.confidence);
        bounding_box = bounding_box.union(&event.bounding_box);
    }
    Some(Composite {
        numero,
        confianza,
        bounding_box,
        fragments,
        frame_index: first.frame_index,
    })
}

#[derive(Debug, Clone)]
pub struct DetectionAggregator {
    vocabulary: Arc<NumberVocabulary>,
}

impl DetectionAggregator {
    pub fn new(vocabulary: Arc<NumberVocabulary>) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &NumberVocabulary {
        &self.vocabulary
    }

    /// Group fragments of one frame into composites, ordered by position.
    ///
    /// Grouping is single-linkage: two fragments share a composite when a
    /// chain of fragments connects them with every gap within the threshold.
    pub fn group(&self, events: &[DetectionEvent], settings: &DetectorSettings) -> Vec<Composite> {
        let n = events.len();
        let mut parent: Vec<usize> = (0..n).collect();

        if settings.usar_agrupacion {
            for i in 0..n {
                for j in (i + 1)..n {
                    if events[i].bounding_box.gap_to(&events[j].bounding_box)
                        <= settings.umbral_agrupacion
                    {
                        let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                        if ri != rj {
                            parent[rj] = ri;
                        }
                    }
                }
            }
        }

        let mut groups: Vec<Vec<&DetectionEvent>> = Vec::new();
        let mut root_slot: Vec<Option<usize>> = vec![None; n];
        for i in 0..n {
            let root = find(&mut parent, i);
            let slot = match root_slot[root] {
                Some(slot) => slot,
                None => {
                    groups.push(Vec::new());
                    root_slot[root] = Some(groups.len() - 1);
                    groups.len() - 1
                }
            };
            groups[slot].push(&events[i]);
        }

        let mut composites: Vec<Composite> =
            groups.into_iter().filter_map(build_composite).collect();
        composites.sort_by(|a, b| {
            a.bounding_box
                .x1
                .total_cmp(&b.bounding_box.x1)
                .then(a.bounding_box.y1.total_cmp(&b.bounding_box.y1))
        });
        composites
    }

    /// Whether a composite may become a record.
    pub fn accepts(&self, composite: &Composite, settings: &DetectorSettings) -> bool {
        composite.confianza >= settings.min_confidence
            && self
                .vocabulary
                .is_valid_composite(&composite.numero, &composite.fragments)
    }

    /// Best acceptable composite in one frame, if any.
    pub fn best_composite(
        &self,
        events: &[DetectionEvent],
        settings: &DetectorSettings,
    ) -> Option<Composite> {
        let mut best: Option<Composite> = None;
        for composite in self.group(events, settings) {
            if !self.accepts(&composite, settings) {
                continue;
            }
            if best.as_ref().is_none_or(|b| better(&composite, b)) {
                best = Some(composite);
            }
        }
        best
    }

    pub fn aggregate(&self, events: &[DetectionEvent], settings: &DetectorSettings) -> Outcome {
        match self.best_composite(events, settings) {
            Some(best) => Outcome::Accepted {
                numero: best.numero,
                confianza: best.confianza,
            },
            None => Outcome::ignored(),
        }
    }

    pub fn video(&self, settings: DetectorSettings) -> VideoAggregator {
        VideoAggregator {
            aggregator: self.clone(),
            settings,
            best: None,
            frames_seen: 0,
            frames_with_detections: 0,
            frames_failed: 0,
        }
    }
}

/// Tracks the single best accepted composite across all frames of a video.
#[derive(Debug, Clone)]
pub struct VideoAggregator {
    aggregator: DetectionAggregator,
    settings: DetectorSettings,
    best: Option<Composite>,
    frames_seen: u64,
    frames_with_detections: u64,
    frames_failed: u64,
}

impl VideoAggregator {
    /// Fold one frame in. Returns the frame's best composite and whether it
    /// replaced the running best.
    pub fn push_frame(&mut self, events: &[DetectionEvent]) -> (Option<Composite>, bool) {
        self.frames_seen += 1;
        if !events.is_empty() {
            self.frames_with_detections += 1;
        }
        let Some(candidate) = self.aggregator.best_composite(events, &self.settings) else {
            return (None, false);
        };
        let improved = self.best.as_ref().is_none_or(|b| better(&candidate, b));
        if improved {
            self.best = Some(candidate.clone());
        }
        (Some(candidate), improved)
    }

    /// A frame whose detection failed; it is skipped.
    pub fn push_failed_frame(&mut self) {
        self.frames_seen += 1;
        self.frames_failed += 1;
    }

    pub fn best(&self) -> Option<&Composite> {
        self.best.as_ref()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn frames_with_detections(&self) -> u64 {
        self.frames_with_detections
    }

    pub fn frames_failed(&self) -> u64 {
        self.frames_failed
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn finish(&self) -> Outcome {
        match &self.best {
            Some(best) => Outcome::Accepted {
                numero: best.numero.clone(),
                confianza: best.confianza,
            },
            None => Outcome::ignored(),
        }
    }
}

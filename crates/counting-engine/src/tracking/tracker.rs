//! Greedy nearest-centroid multi-object tracker for one camera.

use crate::frame::{BoundingBox, Detection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Matches costlier than this (pixels, after weighting) are rejected
    pub max_match_distance: f32,
    /// Cost multiplier when the detection label differs from the track's class
    pub class_mismatch_weight: f32,
    /// Consecutive unmatched frames a track survives
    pub max_missed_frames: u32,
    /// Centroid samples kept per track
    pub history_len: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_match_distance: 120.0,
            class_mismatch_weight: 1.5,
            max_missed_frames: 10,
            history_len: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    pub x: f32,
    pub y: f32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossingState {
    NotCrossed,
    Crossed,
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    count: u32,
    last_seen: u64,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u64,
    pub history: VecDeque<TrackPoint>,
    pub bbox: BoundingBox,
    pub crossing_state: CrossingState,
    pub missed_frames: u32,
    pub last_seen_frame: u64,
    votes: HashMap<String, Vote>,
    observations: u64,
}

impl Track {
    fn new(track_id: u64, detection: &Detection, frame_index: u64, timestamp: DateTime<Utc>) -> Self {
        let (x, y) = detection.centroid();
        let mut track = Self {
            track_id,
            history: VecDeque::new(),
            bbox: detection.bbox,
            crossing_state: CrossingState::NotCrossed,
            missed_frames: 0,
            last_seen_frame: frame_index,
            votes: HashMap::new(),
            observations: 0,
        };
        track.history.push_back(TrackPoint { x, y, timestamp });
        track.vote(&detection.label);
        track
    }

    fn vote(&mut self, label: &str) {
        self.observations += 1;
        let seen = self.observations;
        let vote = self.votes.entry(label.to_string()).or_insert(Vote {
            count: 0,
            last_seen: seen,
        });
        vote.count += 1;
        vote.last_seen = seen;
    }

    /// Majority label over every observation; ties go to the most recent
    pub fn class_label(&self) -> &str {
        self.votes
            .iter()
            .max_by_key(|(_, vote)| (vote.count, vote.last_seen))
            .map(|(label, _)| label.as_str())
            .unwrap_or("unknown")
    }

    pub fn last_position(&self) -> Option<&TrackPoint> {
        self.history.back()
    }

    /// Sample before the latest one
    pub fn previous_position(&self) -> Option<&TrackPoint> {
        self.history.len().checked_sub(2).and_then(|i| self.history.get(i))
    }

    pub fn has_crossed(&self) -> bool {
        self.crossing_state == CrossingState::Crossed
    }
}

/// Live track set of one camera.
#[derive(Debug)]
pub struct Tracker {
    config: TrackerConfig,
    tracks: BTreeMap<u64, Track>,
    next_id: u64,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Associate one frame's detections with the live tracks.
    ///
    /// Returns the ids of tracks that received a detection, in id order. New
    /// tracks are not included because they have no previous position yet.
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame_index: u64,
        timestamp: DateTime<Utc>,
    ) -> Vec<u64> {
        let mut candidates: Vec<(f32, u64, usize)> = Vec::new();
        for (track_id, track) in &self.tracks {
            let Some(last) = track.last_position() else {
                continue;
            };
            let class = track.class_label();
            for (index, detection) in detections.iter().enumerate() {
                let (x, y) = detection.centroid();
                let mut cost = ((x - last.x).powi(2) + (y - last.y).powi(2)).sqrt();
                if detection.label != class {
                    cost *= self.config.class_mismatch_weight;
                }
                if cost <= self.config.max_match_distance {
                    candidates.push((cost, *track_id, index));
                }
            }
        }

        candidates.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut assigned_tracks: HashMap<u64, usize> = HashMap::new();
        let mut assigned_detections = vec![false; detections.len()];
        for (_, track_id, index) in candidates {
            if assigned_tracks.contains_key(&track_id) || assigned_detections[index] {
                continue;
            }
            assigned_tracks.insert(track_id, index);
            assigned_detections[index] = true;
        }

        let history_len = self.config.history_len.max(2);
        let max_missed = self.config.max_missed_frames;
        let mut matched = Vec::with_capacity(assigned_tracks.len());

        self.tracks.retain(|track_id, track| match assigned_tracks.get(track_id) {
            Some(&index) => {
                let detection = &detections[index];
                let (x, y) = detection.centroid();
                track.history.push_back(TrackPoint { x, y, timestamp });
                while track.history.len() > history_len {
                    track.history.pop_front();
                }
                track.bbox = detection.bbox;
                track.vote(&detection.label);
                track.missed_frames = 0;
                track.last_seen_frame = frame_index;
                matched.push(*track_id);
                true
            }
            None => {
                track.missed_frames += 1;
                track.missed_frames <= max_missed
            }
        });

        for (index, detection) in detections.iter().enumerate() {
            if assigned_detections[index] {
                continue;
            }
            let track_id = self.next_id;
            self.next_id += 1;
            self.tracks
                .insert(track_id, Track::new(track_id, detection, frame_index, timestamp));
        }

        matched
    }

    pub fn get(&self, track_id: u64) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    pub fn get_mut(&mut self, track_id: u64) -> Option<&mut Track> {
        self.tracks.get_mut(&track_id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop every track. Ids keep increasing afterwards.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(cx: f32, cy: f32, label: &str) -> Detection {
        Detection::new(BoundingBox::centered(cx, cy, 20.0, 20.0), label, 0.9)
    }

    #[test]
    fn test_follows_moving_object() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let now = Utc::now();

        assert!(tracker.update(&[det(100.0, 100.0, "car")], 0, now).is_empty());
        assert_eq!(tracker.update(&[det(100.0, 130.0, "car")], 1, now), vec![1]);
        assert_eq!(tracker.update(&[det(100.0, 160.0, "car")], 2, now), vec![1]);

        let track = tracker.get(1).unwrap();
        assert_eq!(track.history.len(), 3);
        assert_eq!(track.last_position().unwrap().y, 160.0);
        assert_eq!(track.previous_position().unwrap().y, 130.0);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_far_detection_spawns_new_track() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let now = Utc::now();

        tracker.update(&[det(100.0, 100.0, "car")], 0, now);
        let matched = tracker.update(&[det(500.0, 500.0, "car")], 1, now);
        assert!(matched.is_empty());
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.get(1).unwrap().missed_frames, 1);
        assert!(tracker.get(2).is_some());
    }

    #[test]
    fn test_lower_cost_pair_wins() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let now = Utc::now();

        tracker.update(&[det(100.0, 100.0, "car")], 0, now);
        // Both within range; the closer one keeps the identity
        let matched = tracker.update(&[det(100.0, 150.0, "car"), det(100.0, 110.0, "car")], 1, now);
        assert_eq!(matched, vec![1]);
        assert_eq!(tracker.get(1).unwrap().last_position().unwrap().y, 110.0);
        assert_eq!(tracker.get(2).unwrap().last_position().unwrap().y, 150.0);
    }

    #[test]
    fn test_class_mismatch_weighting() {
        let config = TrackerConfig {
            max_match_distance: 50.0,
            ..Default::default()
        };
        let mut tracker = Tracker::new(config);
        let now = Utc::now();

        tracker.update(&[det(100.0, 100.0, "car")], 0, now);
        // 40px * 1.5 = 60 > 50: rejected for a different class
        let matched = tracker.update(&[det(100.0, 140.0, "truck")], 1, now);
        assert!(matched.is_empty());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_stale_tracks_evicted() {
        let config = TrackerConfig {
            max_missed_frames: 3,
            ..Default::default()
        };
        let mut tracker = Tracker::new(config);
        let now = Utc::now();

        tracker.update(&[det(100.0, 100.0, "car")], 0, now);
        for frame in 1..=3 {
            tracker.update(&[], frame, now);
            assert_eq!(tracker.len(), 1);
        }
        tracker.update(&[], 4, now);
        assert!(tracker.is_empty());

        // Same spot, new identity
        tracker.update(&[det(100.0, 100.0, "car")], 5, now);
        assert!(tracker.get(1).is_none());
        assert!(tracker.get(2).is_some());
    }

    #[test]
    fn test_history_is_bounded() {
        let config = TrackerConfig {
            history_len: 5,
            ..Default::default()
        };
        let mut tracker = Tracker::new(config);
        let now = Utc::now();

        for frame in 0..20u64 {
            tracker.update(&[det(100.0, 100.0 + frame as f32, "car")], frame, now);
        }
        let track = tracker.get(1).unwrap();
        assert_eq!(track.history.len(), 5);
        assert_eq!(track.history.front().unwrap().y, 115.0);
    }

    #[test]
    fn test_majority_vote_class() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let now = Utc::now();

        tracker.update(&[det(100.0, 100.0, "car")], 0, now);
        tracker.update(&[det(100.0, 105.0, "car")], 1, now);
        tracker.update(&[det(100.0, 110.0, "truck")], 2, now);
        assert_eq!(tracker.get(1).unwrap().class_label(), "car");

        tracker.update(&[det(100.0, 115.0, "truck")], 3, now);
        // 2-2 tie goes to the most recent label
        assert_eq!(tracker.get(1).unwrap().class_label(), "truck");
    }

    #[test]
    fn test_clear_keeps_ids_monotonic() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let now = Utc::now();

        tracker.update(&[det(10.0, 10.0, "car"), det(300.0, 300.0, "bus")], 0, now);
        tracker.clear();
        assert!(tracker.is_empty());

        tracker.update(&[det(10.0, 10.0, "car")], 1, now);
        assert_eq!(tracker.tracks().next().unwrap().track_id, 3);
    }
}

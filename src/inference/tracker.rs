//! Greedy IoU association giving detections persistent track ids

use std::cmp::Ordering;

use super::yolo::iou;
use super::Detection;

#[derive(Debug, Clone)]
struct Track {
    id: u64,
    bbox: [f32; 4],
    class_id: usize,
    /// Frames since last matched
    missed: u32,
}

#[derive(Debug)]
pub struct IouTracker {
    iou_threshold: f32,
    max_age: u32,
    next_id: u64,
    tracks: Vec<Track>,
}

impl IouTracker {
    pub fn new(iou_threshold: f32, max_age: u32) -> Self {
        Self {
            iou_threshold,
            max_age,
            next_id: 1,
            tracks: Vec::new(),
        }
    }

    pub fn active(&self) -> usize {
        self.tracks.len()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    /// Assign a track id to every detection of the current frame.
    ///
    /// Pairs of the same class are matched best IoU first; leftovers start new
    /// tracks, and tracks unmatched for more than `max_age` frames are dropped.
    pub fn update(&mut self, detections: &mut [Detection]) {
        let mut pairs = Vec::new();
        for (t, track) in self.tracks.iter().enumerate() {
            for (d, det) in detections.iter().enumerate() {
                if track.class_id != det.class_id {
                    continue;
                }
                let overlap = iou(&track.bbox, &det.bbox);
                if overlap >= self.iou_threshold {
                    pairs.push((overlap, t, d));
                }
            }
        }
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        for (_, t, d) in pairs {
            if track_used[t] || det_used[d] {
                continue;
            }
            track_used[t] = true;
            det_used[d] = true;

            let track = &mut self.tracks[t];
            track.bbox = detections[d].bbox;
            track.missed = 0;
            detections[d].track_id = Some(track.id);
        }

        for (track, used) in self.tracks.iter_mut().zip(&track_used) {
            if !used {
                track.missed += 1;
            }
        }
        let max_age = self.max_age;
        self.tracks.retain(|track| track.missed <= max_age);

        for (det, used) in detections.iter_mut().zip(det_used) {
            if used {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            det.track_id = Some(id);
            self.tracks.push(Track {
                id,
                bbox: det.bbox,
                class_id: det.class_id,
                missed: 0,
            });
        }
    }
}

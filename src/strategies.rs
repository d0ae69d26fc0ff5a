use crate::config::ModelName;
use crate::error::reason;
use crate::types::{Bbox, RawDetection};
use std::collections::{HashMap, VecDeque};

/// Tunables for the tracked-id helmet-voting scheme (§4.3.1/§4.3.2). Promoted
/// to config fields rather than module constants so each strategy can tune
/// them independently.
#[derive(Debug, Clone, Copy)]
pub struct HelmetVotingConfig {
    pub window: usize,
    pub min_observations: usize,
    pub min_person_area_px: f32,
}

impl Default for HelmetVotingConfig {
    fn default() -> Self {
        Self { window: 8, min_observations: 5, min_person_area_px: 2000.0 }
    }
}

/// Per-track rolling history of "has no helmet" observations, keyed by the
/// detector's track id. One instance per stream; garbage-collected on stop.
#[derive(Default)]
pub struct HelmetVoteStore {
    history: HashMap<u64, VecDeque<bool>>,
}

impl HelmetVoteStore {
    pub fn observe(&mut self, track_id: u64, no_helmet: bool, cfg: &HelmetVotingConfig) -> bool {
        let entry = self.history.entry(track_id).or_insert_with(|| VecDeque::with_capacity(cfg.window));
        if entry.len() == cfg.window {
            entry.pop_front();
        }
        entry.push_back(no_helmet);
        entry.iter().filter(|v| **v).count() >= cfg.min_observations
    }

    pub fn forget_stale(&mut self, seen_track_ids: &std::collections::HashSet<u64>) {
        self.history.retain(|id, _| seen_track_ids.contains(id));
    }
}

/// What a `ModelStrategy` hands back: reason tokens to merge into the frame's
/// status, plus boxes to draw with a label (box, label, whether it signifies
/// a violation so the overlay can pick a color).
pub struct StrategyOutput {
    pub reasons: Vec<String>,
    pub boxes: Vec<(Bbox, String, bool)>,
}

/// One rule set per detection model. Replaces the long `if model_name == …`
/// chain the source used with a capability each model implements directly.
pub trait ModelStrategy: Send + Sync {
    fn evaluate(
        &self,
        detections: &[RawDetection],
        votes: &mut HelmetVoteStore,
    ) -> StrategyOutput;
}

fn is_person(d: &RawDetection) -> bool {
    d.class_label == "person"
}

fn helmet_check(
    detections: &[RawDetection],
    votes: &mut HelmetVoteStore,
    cfg: &HelmetVotingConfig,
) -> (Vec<String>, Vec<(Bbox, String, bool)>) {
    let mut reasons = Vec::new();
    let mut boxes = Vec::new();
    let mut seen_ids = std::collections::HashSet::new();

    for person in detections.iter().filter(|d| is_person(d)) {
        if person.bbox.area() < cfg.min_person_area_px {
            continue;
        }
        let has_helmet = detections.iter().any(|d| d.class_label == "helmet" && overlaps(&d.bbox, &person.bbox));

        let label = if let Some(track_id) = person.track_id {
            seen_ids.insert(track_id);
            let flagged = votes.observe(track_id, !has_helmet, cfg);
            if flagged {
                reasons.push(reason::MISSING_HELMET.to_string());
                "no helmet".to_string()
            } else {
                "person".to_string()
            }
        } else if !has_helmet {
            reasons.push(reason::MISSING_HELMET.to_string());
            "no helmet".to_string()
        } else {
            "person".to_string()
        };

        let violation = label == "no helmet";
        boxes.push((person.bbox, label, violation));
    }

    votes.forget_stale(&seen_ids);
    (reasons, boxes)
}

fn overlaps(a: &Bbox, b: &Bbox) -> bool {
    a.x1 < b.x2 && a.x2 > b.x1 && a.y1 < b.y2 && a.y2 > b.y1
}

fn euclid(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

pub struct PpeStrategy {
    pub helmet_cfg: HelmetVotingConfig,
}

impl ModelStrategy for PpeStrategy {
    fn evaluate(&self, detections: &[RawDetection], votes: &mut HelmetVoteStore) -> StrategyOutput {
        let (reasons, boxes) = helmet_check(detections, votes, &self.helmet_cfg);
        StrategyOutput { reasons, boxes }
    }
}

pub struct LadderStrategy;

impl ModelStrategy for LadderStrategy {
    fn evaluate(&self, detections: &[RawDetection], _votes: &mut HelmetVoteStore) -> StrategyOutput {
        let mut reasons = Vec::new();
        let mut boxes = Vec::new();
        for d in detections.iter().filter(|d| d.class_label == "ladder") {
            let has_outrigger = detections
                .iter()
                .any(|o| o.class_label == "outrigger" && overlaps(&o.bbox, &d.bbox));
            if !has_outrigger {
                reasons.push(reason::LADDER_WITHOUT_OUTRIGGER.to_string());
                boxes.push((d.bbox, "no outrigger".to_string(), true));
            } else {
                boxes.push((d.bbox, "ladder".to_string(), false));
            }
        }
        StrategyOutput { reasons, boxes }
    }
}

pub struct ScaffoldingStrategy {
    pub helmet_cfg: HelmetVotingConfig,
}

impl ModelStrategy for ScaffoldingStrategy {
    fn evaluate(&self, detections: &[RawDetection], votes: &mut HelmetVoteStore) -> StrategyOutput {
        let (mut reasons, mut boxes) = helmet_check(detections, votes, &self.helmet_cfg);

        for d in detections.iter().filter(|d| d.class_label == "scaffold") {
            let has_guardrail = detections.iter().any(|o| o.class_label == "guardrail" && overlaps(&o.bbox, &d.bbox));
            if !has_guardrail {
                reasons.push(reason::SCAFFOLD_MISSING_GUARDRAIL.to_string());
            }
            let has_outrigger = detections.iter().any(|o| o.class_label == "outrigger" && overlaps(&o.bbox, &d.bbox));
            if !has_outrigger {
                reasons.push(reason::SCAFFOLD_NO_OUTRIGGER.to_string());
            }
            boxes.push((d.bbox, "scaffold".to_string(), !has_guardrail || !has_outrigger));
        }

        let persons: Vec<&RawDetection> = detections.iter().filter(|d| is_person(d)).collect();
        for i in 0..persons.len() {
            for j in (i + 1)..persons.len() {
                let a = persons[i].bbox;
                let b = persons[j].bbox;
                let horizontally_aligned = (a.center().0 - b.center().0).abs() < (a.width().max(b.width()) / 2.0);
                let vertically_stacked = a.y2 < b.y1 || b.y2 < a.y1;
                if horizontally_aligned && vertically_stacked {
                    reasons.push(reason::WORKERS_VERTICAL_OVERLAP.to_string());
                }
            }
        }

        StrategyOutput { reasons, boxes }
    }
}

pub type MobileScaffoldingStrategy = ScaffoldingStrategy;

pub struct CuttingWeldingStrategy;

impl ModelStrategy for CuttingWeldingStrategy {
    fn evaluate(&self, detections: &[RawDetection], _votes: &mut HelmetVoteStore) -> StrategyOutput {
        let mut reasons = Vec::new();
        let mut boxes = Vec::new();
        for d in detections.iter().filter(|d| d.class_label == "welding" || d.class_label == "cutting") {
            let has_extinguisher =
                detections.iter().any(|o| o.class_label == "fire_extinguisher" && overlaps(&o.bbox, &d.bbox));
            if !has_extinguisher {
                reasons.push(reason::MISSING_FIRE_EXTINGUISHER.to_string());
            }
            let has_net = detections.iter().any(|o| o.class_label == "fire_prevention_net" && overlaps(&o.bbox, &d.bbox));
            if !has_net {
                reasons.push(reason::MISSING_FIRE_PREVENTION_NET.to_string());
            }
            boxes.push((d.bbox, d.class_label.clone(), !has_extinguisher || !has_net));
        }
        StrategyOutput { reasons, boxes }
    }
}

pub struct FireStrategy;

impl ModelStrategy for FireStrategy {
    fn evaluate(&self, detections: &[RawDetection], _votes: &mut HelmetVoteStore) -> StrategyOutput {
        let mut reasons = Vec::new();
        let mut boxes = Vec::new();
        for d in detections {
            match d.class_label.as_str() {
                "fire" => {
                    reasons.push(reason::FIRE_DETECTED.to_string());
                    boxes.push((d.bbox, "fire".to_string(), true));
                }
                "smoke" => {
                    reasons.push(reason::SMOKE_DETECTED.to_string());
                    boxes.push((d.bbox, "smoke".to_string(), true));
                }
                _ => {}
            }
        }
        StrategyOutput { reasons, boxes }
    }
}

pub struct HeavyEquipmentStrategy {
    pub helmet_cfg: HelmetVotingConfig,
    /// Minimum separation, in world units, below which a person is considered
    /// too close to moving equipment. Projection from pixels to world units is
    /// the Hazard-Zone Tracker's homography, applied by the caller before this
    /// strategy runs; this strategy only compares already-projected centers.
    pub min_separation_m: f32,
}

impl ModelStrategy for HeavyEquipmentStrategy {
    fn evaluate(&self, detections: &[RawDetection], votes: &mut HelmetVoteStore) -> StrategyOutput {
        let (mut reasons, mut boxes) = helmet_check(detections, votes, &self.helmet_cfg);

        let vehicles: Vec<&RawDetection> = detections
            .iter()
            .filter(|d| matches!(d.class_label.as_str(), "excavator" | "forklift" | "crane" | "truck"))
            .collect();
        for vehicle in &vehicles {
            boxes.push((vehicle.bbox, vehicle.class_label.clone(), false));
        }

        for person in detections.iter().filter(|d| is_person(d)) {
            for vehicle in &vehicles {
                if euclid(person.bbox.bottom_center(), vehicle.bbox.bottom_center()) < self.min_separation_m {
                    reasons.push(reason::PROXIMITY_VIOLATION.to_string());
                }
            }
        }

        StrategyOutput { reasons, boxes }
    }
}

pub fn strategy_for(model: ModelName) -> Box<dyn ModelStrategy> {
    let helmet_cfg = HelmetVotingConfig::default();
    match model {
        ModelName::Ppe => Box::new(PpeStrategy { helmet_cfg }),
        ModelName::Ladder => Box::new(LadderStrategy),
        ModelName::Scaffolding => Box::new(ScaffoldingStrategy { helmet_cfg }),
        ModelName::MobileScaffolding => Box::new(MobileScaffoldingStrategy { helmet_cfg }),
        ModelName::CuttingWelding => Box::new(CuttingWeldingStrategy),
        ModelName::Fire => Box::new(FireStrategy),
        ModelName::HeavyEquipment => Box::new(HeavyEquipmentStrategy { helmet_cfg, min_separation_m: 2.0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(track_id: u64, bbox: Bbox) -> RawDetection {
        RawDetection { class_label: "person".to_string(), bbox, confidence: 0.9, track_id: Some(track_id) }
    }

    #[test]
    fn helmet_violation_requires_majority_of_window() {
        let cfg = HelmetVotingConfig { window: 4, min_observations: 3, min_person_area_px: 0.0 };
        let mut votes = HelmetVoteStore::default();
        let bbox = Bbox { x1: 0.0, y1: 0.0, x2: 100.0, y2: 100.0 };

        assert!(!votes.observe(1, true, &cfg));
        assert!(!votes.observe(1, true, &cfg));
        assert!(votes.observe(1, true, &cfg));
        let _ = bbox;
    }

    #[test]
    fn tiny_person_box_is_exempt_from_helmet_check() {
        let strategy = PpeStrategy { helmet_cfg: HelmetVotingConfig::default() };
        let mut votes = HelmetVoteStore::default();
        let tiny = person(1, Bbox { x1: 0.0, y1: 0.0, x2: 5.0, y2: 5.0 });
        let out = strategy.evaluate(&[tiny], &mut votes);
        assert!(out.reasons.is_empty());
    }

    #[test]
    fn fire_strategy_flags_fire_and_smoke() {
        let strategy = FireStrategy;
        let mut votes = HelmetVoteStore::default();
        let dets = vec![
            RawDetection { class_label: "fire".to_string(), bbox: Bbox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }, confidence: 0.8, track_id: None },
            RawDetection { class_label: "smoke".to_string(), bbox: Bbox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 }, confidence: 0.8, track_id: None },
        ];
        let out = strategy.evaluate(&dets, &mut votes);
        assert_eq!(out.reasons.len(), 2);
    }

    #[test]
    fn stacked_workers_flag_vertical_overlap() {
        let strategy = ScaffoldingStrategy { helmet_cfg: HelmetVotingConfig { min_person_area_px: 0.0, ..Default::default() } };
        let mut votes = HelmetVoteStore::default();
        let dets = vec![
            person(1, Bbox { x1: 0.0, y1: 0.0, x2: 50.0, y2: 50.0 }),
            person(2, Bbox { x1: 5.0, y1: 60.0, x2: 55.0, y2: 110.0 }),
        ];
        let out = strategy.evaluate(&dets, &mut votes);
        assert!(out.reasons.contains(&reason::WORKERS_VERTICAL_OVERLAP.to_string()));
    }
}

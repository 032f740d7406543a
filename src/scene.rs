//! The live scene: every tracked hand and object, and the targeting relations between them.
//!
//! All pipeline stages funnel their results through [`Scene`]; entities are never mutated from
//! anywhere else. Hands and objects live in separate namespaces keyed by label, so each label
//! maps to at most one entity per namespace.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
    sync::Arc,
};

use ndarray::Array2;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::{
    config::SceneConfig,
    entity::{EntityInput, Hand, ObjectGeometry, Origin, RigidObject},
    error::{Error, Result},
    geometry::Pose,
    targeting::{ClosingSpeedPolicy, TargetPolicy},
    trajectory::Trajectory,
    types::{BoundingBox, Color, HandResult, ObjectPoseEstimation, TargetInfo, Timestamp},
};

/// Scene shared between pipeline stages. Each stage holds the lock only for one mutation call.
pub type SharedScene = Arc<Mutex<Scene>>;

pub struct Scene {
    name: String,
    config: SceneConfig,
    hands: HashMap<String, Hand>,
    objects: HashMap<String, RigidObject>,
    geometry: HashMap<String, Arc<ObjectGeometry>>,
    policy: Arc<dyn TargetPolicy>,
    hands_discovered: usize,
    objects_discovered: usize,
    clock: Timestamp,
}

impl Scene {
    pub fn new(name: impl Into<String>, config: SceneConfig) -> Self {
        Self {
            name: name.into(),
            config,
            hands: HashMap::new(),
            objects: HashMap::new(),
            geometry: HashMap::new(),
            policy: Arc::new(ClosingSpeedPolicy::default()),
            hands_discovered: 0,
            objects_discovered: 0,
            clock: Timestamp::NEG_INFINITY,
        }
    }

    pub fn with_policy<P: TargetPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn into_shared(self) -> SharedScene {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// Registers surface geometry for an object label. Objects discovered afterwards measure
    /// distances against their surface instead of their origin.
    pub fn register_geometry(&mut self, label: impl Into<String>, geometry: ObjectGeometry) {
        self.geometry.insert(label.into(), Arc::new(geometry));
    }

    /// Applies one cycle of pose estimations.
    ///
    /// Unseen labels create an object, known labels update it, and detected objects missing from
    /// this cycle keep their last known pose, propagated to `timestamp`. Malformed estimations are
    /// logged and skipped; unknown datasets or labels and invalid track configuration are returned
    /// as errors since they mean the run is misconfigured.
    pub fn update_objects(
        &mut self,
        estimations: &[ObjectPoseEstimation],
        timestamp: Timestamp,
    ) -> Result<()> {
        self.advance_clock(timestamp);
        let mut measured = HashSet::new();
        for estimation in estimations {
            if let Some(object) = self.objects.get_mut(&estimation.label) {
                if object.update(estimation, timestamp) {
                    measured.insert(estimation.label.as_str());
                }
                continue;
            }

            let built = RigidObject::new(
                EntityInput::FromDetection(estimation.clone()),
                &estimation.label,
                &estimation.dataset,
                timestamp,
                self.objects_discovered,
                &self.config.objects,
            );
            match built {
                Ok(object) => {
                    measured.insert(estimation.label.as_str());
                    self.insert_object(object);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => log::warn!("skipping new object: {err}"),
            }
        }

        for (label, object) in &mut self.objects {
            if object.origin() == Origin::Detection && !measured.contains(label.as_str()) {
                if let Err(err) = object.propagate(timestamp) {
                    log::debug!("not propagating object {label}: {err}");
                }
            }
        }
        Ok(())
    }

    /// Applies one cycle of hand detections, symmetric to [`Scene::update_objects`].
    pub fn update_hands(&mut self, results: &[HandResult], timestamp: Timestamp) -> Result<()> {
        self.advance_clock(timestamp);
        let mut measured = HashSet::new();
        for result in results {
            if let Some(hand) = self.hands.get_mut(&result.label) {
                if hand.update(result, timestamp) {
                    measured.insert(result.label.as_str());
                }
                continue;
            }

            let built = Hand::new(
                EntityInput::FromDetection(result.clone()),
                &result.label,
                timestamp,
                self.hands_discovered,
                &self.config.hands,
            );
            match built {
                Ok(hand) => {
                    measured.insert(result.label.as_str());
                    self.hands_discovered += 1;
                    self.hands.insert(result.label.clone(), hand);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => log::warn!("skipping new hand: {err}"),
            }
        }

        for (label, hand) in &mut self.hands {
            if hand.origin() == Origin::Detection && !measured.contains(label.as_str()) {
                if let Err(err) = hand.propagate(timestamp) {
                    log::debug!("not propagating hand {label}: {err}");
                }
            }
        }
        Ok(())
    }

    /// Adds an object replayed from a recorded trajectory.
    pub fn add_object_from_trajectory(
        &mut self,
        label: &str,
        dataset: &str,
        trajectory: Trajectory,
    ) -> Result<()> {
        let object = RigidObject::new(
            EntityInput::FromTrajectory(trajectory),
            label,
            dataset,
            self.clock,
            self.objects_discovered,
            &self.config.objects,
        )?;
        self.insert_object(object);
        Ok(())
    }

    /// Adds a hand replayed from a recorded trajectory.
    pub fn add_hand_from_trajectory(
        &mut self,
        label: &str,
        trajectory: Trajectory,
    ) -> Result<()> {
        let hand = Hand::new(
            EntityInput::FromTrajectory(trajectory),
            label,
            self.clock,
            self.hands_discovered,
            &self.config.hands,
        )?;
        self.hands_discovered += 1;
        self.hands.insert(label.to_owned(), hand);
        Ok(())
    }

    /// Advances every replayed entity by one recorded sample.
    ///
    /// Returns `Ok(false)` once every replayed entity is exhausted.
    pub fn step_replay(&mut self) -> Result<bool> {
        let mut advanced = false;
        for hand in self.hands.values_mut().filter(|h| h.origin() == Origin::Trajectory) {
            match hand.update_from_trajectory(None) {
                Ok(()) => advanced = true,
                Err(Error::ExhaustedSequence { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        for object in self
            .objects
            .values_mut()
            .filter(|o| o.origin() == Origin::Trajectory)
        {
            match object.update_from_trajectory(None) {
                Ok(()) => advanced = true,
                Err(Error::ExhaustedSequence { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(advanced)
    }

    fn insert_object(&mut self, object: RigidObject) {
        let object = match self.geometry.get(object.label()) {
            Some(geometry) => object.with_geometry(geometry.clone()),
            None => object,
        };
        self.objects_discovered += 1;
        self.objects.insert(object.label().to_owned(), object);
    }

    fn advance_clock(&mut self, timestamp: Timestamp) {
        self.clock = self.clock.max(timestamp);
    }

    /// Runs one aggregation cycle: evicts stale entities, then recomputes targeting.
    pub fn refresh(&mut self) {
        self.evict_stale();
        self.reason_targets();
    }

    /// Removes entities that have not been measured within the grace period. Targeting that
    /// referenced a removed hand is cleared so no back-reference outlives its hand.
    pub fn evict_stale(&mut self) -> usize {
        let Some(grace) = self.config.grace_period_ms else {
            return 0;
        };
        let clock = self.clock;
        let is_live = |origin: Origin, last: Timestamp| {
            origin == Origin::Trajectory || clock - last <= grace
        };

        let mut removed_hands = Vec::new();
        self.hands.retain(|label, hand| {
            let keep = is_live(hand.origin(), hand.last_measured());
            if !keep {
                log::info!("hand {label} lost, removing");
                removed_hands.push(label.clone());
            }
            keep
        });

        let before = self.objects.len();
        self.objects.retain(|label, object| {
            let keep = is_live(object.origin(), object.last_measured());
            if !keep {
                log::info!("object {} ({label}) lost, removing", object.name());
            }
            keep
        });
        let removed_objects = before - self.objects.len();

        for label in &removed_hands {
            for object in self.objects.values_mut() {
                object.forget_hand(label);
            }
        }
        for hand in self.hands.values_mut() {
            let target_gone = hand
                .target()
                .counterpart
                .as_ref()
                .is_some_and(|label| !self.objects.contains_key(label));
            if target_gone {
                hand.set_target_info(false, None, None);
            }
        }

        removed_hands.len() + removed_objects
    }

    /// Picks, for every hand, the object it will reach first.
    ///
    /// Targeting from the previous cycle is cleared first. A hand targets the object with the
    /// smallest finite time-to-impact under the configured threshold, ties going to the
    /// lexically smaller label. When several hands pick the same object, the object records the
    /// hand that reaches it first.
    pub fn reason_targets(&mut self) {
        for hand in self.hands.values_mut() {
            hand.set_target_info(false, None, None);
        }
        for object in self.objects.values_mut() {
            object.set_target_info(false, None, None);
        }

        let threshold = self.config.target_threshold_ms;
        let policy = &*self.policy;
        let objects = &self.objects;

        let evaluations: Vec<(String, Vec<(String, f64, Option<TargetInfo>)>)> = self
            .hands
            .par_iter()
            .map(|(hand_label, hand)| {
                let per_object = objects
                    .iter()
                    .map(|(object_label, object)| {
                        let proximity = object.distance_to(hand);
                        let info = policy.evaluate(hand, object, &proximity).filter(|info| {
                            info.time_to_impact.is_finite()
                                && info.time_to_impact >= 0.0
                                && info.time_to_impact < threshold
                        });
                        (object_label.clone(), proximity.distance, info)
                    })
                    .collect();
                (hand_label.clone(), per_object)
            })
            .collect();

        let mut choices: Vec<(String, String, TargetInfo)> = Vec::new();
        for (hand_label, per_object) in &evaluations {
            for (object_label, distance, _) in per_object {
                if let Some(object) = self.objects.get_mut(object_label) {
                    object.record_distance(hand_label, *distance);
                }
            }
            let best = per_object
                .iter()
                .filter_map(|(label, _, info)| info.map(|info| (label, info)))
                .min_by(|a, b| {
                    a.1.time_to_impact
                        .total_cmp(&b.1.time_to_impact)
                        .then_with(|| a.0.cmp(b.0))
                });
            if let Some((object_label, info)) = best {
                choices.push((hand_label.clone(), object_label.clone(), info));
            }
        }

        choices.sort_by(|a, b| {
            a.2.time_to_impact
                .total_cmp(&b.2.time_to_impact)
                .then_with(|| a.0.cmp(&b.0))
        });
        for (hand_label, object_label, info) in &choices {
            if let Some(hand) = self.hands.get_mut(hand_label) {
                hand.set_target_info(true, Some(object_label.as_str()), Some(*info));
            }
            if let Some(object) = self.objects.get_mut(object_label) {
                if !object.is_targeted() {
                    log::debug!(
                        "{} targeted by {hand_label} ({})",
                        object.name(),
                        info.display_text()
                    );
                    object.set_target_info(true, Some(hand_label.as_str()), Some(*info));
                }
            }
        }

        let hand_colors: HashMap<&str, Color> = self
            .hands
            .iter()
            .map(|(label, hand)| (label.as_str(), hand.text_color()))
            .collect();
        for object in self.objects.values_mut() {
            let color = object
                .target()
                .counterpart
                .as_deref()
                .and_then(|label| hand_colors.get(label).copied());
            object.refresh_display(color);
        }
    }

    pub fn hand(&self, label: &str) -> Option<&Hand> {
        self.hands.get(label)
    }

    pub fn object(&self, label: &str) -> Option<&RigidObject> {
        self.objects.get(label)
    }

    pub fn hands(&self) -> impl Iterator<Item = &Hand> {
        self.hands.values()
    }

    pub fn objects(&self) -> impl Iterator<Item = &RigidObject> {
        self.objects.values()
    }

    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    /// Read-only copy of the scene for rendering. Replayed objects are not drawn.
    pub fn snapshot(&self) -> SceneSnapshot {
        let mut hands: Vec<HandView> = self
            .hands
            .values()
            .map(|hand| HandView {
                label: hand.label().to_owned(),
                pose: *hand.pose(),
                bbox: hand.display().bbox,
                color: hand.display().color,
                thickness: hand.display().thickness,
                target: hand.target().counterpart.clone(),
                target_info: hand.target().info,
            })
            .collect();
        hands.sort_by(|a, b| a.label.cmp(&b.label));

        let mut objects: Vec<ObjectView> = self
            .objects
            .values()
            .filter(|object| object.origin() == Origin::Detection)
            .map(|object| ObjectView {
                label: object.label().to_owned(),
                name: object.name().to_owned(),
                pose: *object.pose(),
                render_box: object.render_box(),
                color: object.display().color,
                thickness: object.display().thickness,
                is_targeted: object.is_targeted(),
                targeter: object.target().counterpart.clone(),
                target_info: object.target().info,
                distances: object.distances().clone(),
            })
            .collect();
        objects.sort_by(|a, b| a.label.cmp(&b.label));

        SceneSnapshot {
            timestamp: self.clock,
            hands,
            objects,
        }
    }

    /// Trajectory tables of every hand, keyed by label.
    pub fn hands_data(&self) -> BTreeMap<String, Array2<f64>> {
        self.hands
            .iter()
            .map(|(label, hand)| (label.clone(), hand.trajectory().to_array()))
            .collect()
    }

    /// Trajectory tables of every object, keyed by label.
    pub fn objects_data(&self) -> BTreeMap<String, Array2<f64>> {
        self.objects
            .iter()
            .map(|(label, object)| (label.clone(), object.trajectory().to_array()))
            .collect()
    }

    /// Writes one CSV per entity into `dir`, named `<scene>_hand_<label>.csv` and
    /// `<scene>_object_<label>.csv`.
    pub fn export_csv(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let prefix = self.name.replace(char::is_whitespace, "_");
        let mut written = 0;
        for (label, hand) in &self.hands {
            hand.trajectory()
                .save(dir.join(format!("{prefix}_hand_{label}.csv")))?;
            written += 1;
        }
        for (label, object) in &self.objects {
            object
                .trajectory()
                .save(dir.join(format!("{prefix}_object_{label}.csv")))?;
            written += 1;
        }
        log::info!("exported {written} trajectories to {}", dir.display());
        Ok(written)
    }
}

#[derive(Clone, Debug)]
pub struct HandView {
    pub label: String,
    pub pose: Pose,
    pub bbox: Option<BoundingBox>,
    pub color: Color,
    pub thickness: u32,
    pub target: Option<String>,
    pub target_info: Option<TargetInfo>,
}

#[derive(Clone, Debug)]
pub struct ObjectView {
    pub label: String,
    pub name: String,
    pub pose: Pose,
    pub render_box: Option<BoundingBox>,
    pub color: Color,
    pub thickness: u32,
    pub is_targeted: bool,
    pub targeter: Option<String>,
    pub target_info: Option<TargetInfo>,
    pub distances: BTreeMap<String, f64>,
}

/// What the render sink receives: an immutable copy, detached from the live scene.
#[derive(Clone, Debug, Default)]
pub struct SceneSnapshot {
    pub timestamp: Timestamp,
    pub hands: Vec<HandView>,
    pub objects: Vec<ObjectView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::TrackConfig, geometry::Ingestion};

    fn config() -> SceneConfig {
        SceneConfig::default()
            .with_objects(TrackConfig::default().with_ingestion(Ingestion::IDENTITY))
    }

    fn estimation(label: &str, x: f64) -> ObjectPoseEstimation {
        ObjectPoseEstimation {
            label: label.into(),
            pose: Some(Pose::from_position(x, 0.0, 0.0)),
            score: Some(0.8),
            render_box: BoundingBox::new(0.0, 0.0, 5.0, 5.0),
            dataset: "ycbv".into(),
        }
    }

    fn hand(label: &str, x: f64) -> HandResult {
        HandResult {
            label: label.into(),
            pose: Some(Pose::from_position(x, 0.0, 0.0)),
            landmarks: None,
            bbox: None,
        }
    }

    #[test]
    fn discovery_creates_one_entity_per_label() {
        let mut scene = Scene::new("test", config());
        scene.update_objects(&[estimation("obj_000005", 0.0)], 0.0).unwrap();
        scene.update_objects(&[estimation("obj_000005", 1.0)], 10.0).unwrap();
        scene
            .update_objects(
                &[estimation("obj_000005", 2.0), estimation("obj_000004", 0.0)],
                20.0,
            )
            .unwrap();

        assert_eq!(scene.objects().count(), 2);
        assert_eq!(scene.object("obj_000005").unwrap().trajectory().len(), 3);
        assert_eq!(scene.object("obj_000004").unwrap().trajectory().len(), 1);
    }

    #[test]
    fn missing_labels_keep_last_state() {
        let mut scene = Scene::new("test", config());
        scene.update_objects(&[estimation("obj_000005", 3.0)], 0.0).unwrap();
        scene.update_objects(&[], 100.0).unwrap();
        let object = scene.object("obj_000005").unwrap();
        assert_eq!(object.state().raw().position.x, 3.0);
    }

    #[test]
    fn missing_labels_are_propagated_but_still_evicted() {
        let mut scene = Scene::new("test", config().with_grace_period(Some(500.0)));
        scene.update_objects(&[estimation("obj_000005", 3.0)], 0.0).unwrap();
        scene.update_hands(&[hand("right", 1.0)], 0.0).unwrap();
        scene.update_objects(&[estimation("obj_000004", 0.0)], 300.0).unwrap();
        scene.update_hands(&[], 300.0).unwrap();

        let object = scene.object("obj_000005").unwrap();
        let last = object.trajectory().last().unwrap();
        assert!(last.extrapolated);
        assert_eq!((last.timestamp, last.x), (300.0, 3.0));
        assert_eq!(object.last_timestamp(), 300.0);
        assert_eq!(object.last_measured(), 0.0);
        assert!(!scene.object("obj_000004").unwrap().trajectory().last().unwrap().extrapolated);
        assert!(scene.hand("right").unwrap().trajectory().last().unwrap().extrapolated);

        scene.update_objects(&[estimation("obj_000004", 0.0)], 600.0).unwrap();
        scene.update_hands(&[], 600.0).unwrap();
        assert_eq!(scene.object("obj_000005").unwrap().trajectory().len(), 3);
        assert_eq!(scene.evict_stale(), 2);
        assert!(scene.object("obj_000005").is_none());
        assert!(scene.hand("right").is_none());
        assert!(scene.object("obj_000004").is_some());
    }

    #[test]
    fn zero_filter_cutoff_is_reported_not_panicked() {
        let config = config().with_hands(TrackConfig::default().with_filter_cutoff(0.0));
        let mut scene = Scene::new("test", config);
        let err = scene.update_hands(&[hand("right", 0.0)], 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
        assert!(scene.hands().next().is_none());
    }

    #[test]
    fn unknown_label_is_fatal_but_bad_payload_is_not() {
        let mut scene = Scene::new("test", config());
        let mut bad = estimation("obj_000005", 0.0);
        bad.pose = None;
        scene.update_objects(&[bad], 0.0).unwrap();
        assert_eq!(scene.objects().count(), 0);

        let err = scene
            .update_objects(&[estimation("obj_000099", 0.0)], 0.0)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownLabel { .. }));
    }

    #[test]
    fn stale_entities_are_evicted_and_unlinked() {
        let mut scene = Scene::new("test", config().with_grace_period(Some(500.0)));
        scene.update_hands(&[hand("right", 0.0)], 0.0).unwrap();
        scene.update_objects(&[estimation("obj_000005", 100.0)], 0.0).unwrap();
        scene.update_hands(&[hand("right", 50.0)], 100.0).unwrap();
        scene.refresh();
        assert!(scene.object("obj_000005").unwrap().is_targeted());

        scene.update_objects(&[estimation("obj_000005", 100.0)], 1000.0).unwrap();
        assert_eq!(scene.evict_stale(), 1);
        assert!(scene.hand("right").is_none());
        let object = scene.object("obj_000005").unwrap();
        assert!(!object.is_targeted());
        assert!(object.target().counterpart.is_none());
    }

    #[test]
    fn ties_go_to_smaller_label() {
        let mut scene = Scene::new("test", config());
        scene.update_hands(&[hand("right", 0.0)], 0.0).unwrap();
        scene
            .update_objects(
                &[estimation("obj_000005", 100.0), estimation("obj_000004", 100.0)],
                0.0,
            )
            .unwrap();
        scene.update_hands(&[hand("right", 20.0)], 100.0).unwrap();
        scene.refresh();

        assert_eq!(
            scene.hand("right").unwrap().target().counterpart.as_deref(),
            Some("obj_000004")
        );
        assert!(scene.object("obj_000004").unwrap().is_targeted());
        assert!(!scene.object("obj_000005").unwrap().is_targeted());
    }

    #[test]
    fn snapshot_is_sorted_and_detached() {
        let mut scene = Scene::new("test", config());
        scene
            .update_objects(
                &[estimation("obj_000005", 0.0), estimation("obj_000002", 0.0)],
                0.0,
            )
            .unwrap();
        let snapshot = scene.snapshot();
        scene.update_objects(&[estimation("obj_000005", 9.0)], 10.0).unwrap();

        let labels: Vec<&str> = snapshot.objects.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["obj_000002", "obj_000005"]);
        assert_eq!(snapshot.objects[1].pose.position.x, 0.0);
        assert_eq!(snapshot.objects[0].name, "cheez'it");
    }

    #[test]
    fn replayed_entities_step_until_exhausted() {
        let mut trajectory = Trajectory::new();
        for i in 0..2 {
            trajectory
                .append(i as f64, &Pose::from_position(i as f64, 0.0, 0.0), false)
                .unwrap();
        }
        let mut scene = Scene::new("replay", config());
        scene
            .add_object_from_trajectory("obj_000002", "ycbv", trajectory)
            .unwrap();

        assert!(scene.step_replay().unwrap());
        assert!(scene.step_replay().unwrap());
        assert!(!scene.step_replay().unwrap());
        assert_eq!(scene.object("obj_000002").unwrap().state().raw().position.x, 1.0);
        assert!(scene.snapshot().objects.is_empty());
        assert_eq!(scene.objects_data()["obj_000002"].nrows(), 2);
    }
}

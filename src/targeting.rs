//! Grasp-intent policies: time-to-impact estimation and grip classification.
//!
//! The scene only relies on the [`TargetPolicy`] contract: given a hand, an object and their
//! current proximity, return a [`TargetInfo`] when the hand is closing in, `None` otherwise.

use crate::{
    entity::{Hand, Proximity, RigidObject},
    types::{Grip, TargetInfo},
};

pub trait GripClassifier: Send + Sync {
    fn classify(&self, hand: &Hand, object: &RigidObject) -> Grip;
}

pub trait TargetPolicy: Send + Sync {
    fn evaluate(&self, hand: &Hand, object: &RigidObject, proximity: &Proximity)
    -> Option<TargetInfo>;
}

/// Classifies by object size: small objects are pinched, larger ones grasped with the palm.
#[derive(Clone, Copy, Debug)]
pub struct ExtentGripClassifier {
    pub pinch_below_mm: f64,
}

impl Default for ExtentGripClassifier {
    fn default() -> Self {
        Self {
            pinch_below_mm: 80.0,
        }
    }
}

impl GripClassifier for ExtentGripClassifier {
    fn classify(&self, _hand: &Hand, object: &RigidObject) -> Grip {
        match object.geometry() {
            Some(geometry) if geometry.extent() < self.pinch_below_mm => Grip::Pinch,
            Some(_) => Grip::Palmar,
            None => Grip::Unknown,
        }
    }
}

/// Time-to-impact from the hand's filtered velocity projected on the direction to the object.
#[derive(Clone, Copy, Debug)]
pub struct ClosingSpeedPolicy<G = ExtentGripClassifier> {
    grip: G,
    /// Closing speeds at or below this (mm/ms) are treated as no approach.
    min_closing_speed: f64,
}

impl Default for ClosingSpeedPolicy {
    fn default() -> Self {
        Self::new(ExtentGripClassifier::default())
    }
}

impl<G: GripClassifier> ClosingSpeedPolicy<G> {
    pub fn new(grip: G) -> Self {
        Self {
            grip,
            min_closing_speed: 1e-3,
        }
    }

    pub fn with_min_closing_speed(self, min_closing_speed: f64) -> Self {
        Self {
            min_closing_speed,
            ..self
        }
    }
}

impl<G: GripClassifier> TargetPolicy for ClosingSpeedPolicy<G> {
    fn evaluate(
        &self,
        hand: &Hand,
        object: &RigidObject,
        proximity: &Proximity,
    ) -> Option<TargetInfo> {
        let velocity = hand.velocity()?;
        let aim = proximity
            .nearest
            .map(|p| p.coords)
            .unwrap_or_else(|| object.position());
        let offset = aim - hand.position();

        let time_to_impact = if proximity.distance <= f64::EPSILON {
            0.0
        } else {
            let direction = offset.try_normalize(f64::EPSILON)?;
            let closing_speed = velocity.dot(&direction);
            if closing_speed <= self.min_closing_speed {
                return None;
            }
            proximity.distance / closing_speed
        };

        time_to_impact.is_finite().then(|| TargetInfo {
            grip: self.grip.classify(hand, object),
            time_to_impact,
        })
    }
}

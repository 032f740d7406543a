use crate::geometry::Pose;

/// Milliseconds on the frame source's clock.
pub type Timestamp = f64;

#[derive(Clone, Debug)]
pub struct Frame {
    pub color: Vec<u8>,
    pub depth: Option<Vec<u16>>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Timestamp,
}

impl Frame {
    /// A frame without pixel data, used by synthetic sources and tests.
    pub fn empty(width: u32, height: u32, timestamp: Timestamp) -> Self {
        Self {
            color: Vec::new(),
            depth: None,
            width,
            height,
            timestamp,
        }
    }
}

/// Axis-aligned box in image pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub corner1: (f32, f32),
    pub corner2: (f32, f32),
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            corner1: (x0.min(x1), y0.min(y1)),
            corner2: (x0.max(x1), y0.max(y1)),
        }
    }

    pub fn width(&self) -> f32 {
        self.corner2.0 - self.corner1.0
    }

    pub fn height(&self) -> f32 {
        self.corner2.1 - self.corner1.1
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.corner1.0 + self.corner2.0) / 2.0,
            (self.corner1.1 + self.corner2.1) / 2.0,
        )
    }
}

/// Output of the hand detector for one hand.
#[derive(Clone, Debug)]
pub struct HandResult {
    pub label: String,
    pub pose: Option<Pose>,
    pub landmarks: Option<Vec<[f64; 3]>>,
    pub bbox: Option<BoundingBox>,
}

/// Output of the 2D object detector.
#[derive(Clone, Debug)]
pub struct Detection {
    pub label: String,
    pub bbox: BoundingBox,
    pub score: f32,
}

/// Output of the object pose estimator.
///
/// `pose` and `score` are optional because estimators forward partially filled results when
/// tracking degrades; entities reject such payloads.
#[derive(Clone, Debug)]
pub struct ObjectPoseEstimation {
    pub label: String,
    pub pose: Option<Pose>,
    pub score: Option<f32>,
    pub render_box: BoundingBox,
    pub dataset: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const ORANGE: Color = Color::rgb(255, 165, 0);
    pub const PURPLE: Color = Color::rgb(128, 0, 128);
    pub const PINK: Color = Color::rgb(255, 192, 203);
    pub const BROWN: Color = Color::rgb(165, 42, 42);
    pub const GREY: Color = Color::rgb(128, 128, 128);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const CYAN: Color = Color::rgb(0, 255, 255);
}

/// Grip predicted for a hand approaching an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Grip {
    Pinch,
    Palmar,
    Unknown,
}

impl Grip {
    pub fn label(&self) -> &'static str {
        match self {
            Grip::Pinch => "PINCH",
            Grip::Palmar => "PALMAR",
            Grip::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetInfo {
    pub grip: Grip,
    /// Predicted milliseconds until the hand reaches the object.
    pub time_to_impact: f64,
}

impl TargetInfo {
    pub fn display_text(&self) -> String {
        format!(
            "tbi: {:.0}ms, grip: {}",
            self.time_to_impact,
            self.grip.label()
        )
    }
}

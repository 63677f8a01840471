//! Engine and tag configuration.
//!
//! Defaults reproduce the fixed constants of the lookup workflow. Every
//! struct deserializes with `#[serde(default)]`, so a JSON settings file only
//! needs the keys it overrides.

use bl_core::Color;
use serde::{Deserialize, Serialize};

// ─── Sync engine ─────────────────────────────────────────────────────────

/// How a position-driver value is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// Added to the instance's current position on every update.
    #[default]
    Relative,
    /// Replaces the instance's position.
    Absolute,
}

/// Substrings that classify a parameter name as a scale or position driver.
/// Matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverKeywords {
    pub scale: Vec<String>,
    pub position: Vec<String>,
}

impl Default for DriverKeywords {
    fn default() -> Self {
        Self {
            scale: vec!["scale".into(), "缩放".into(), "比例".into()],
            position: vec![
                "position".into(),
                "offset".into(),
                "位置".into(),
                "偏移".into(),
            ],
        }
    }
}

/// Configuration for `SyncEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lower clamp for scale-driver values. Default: **0.1**.
    pub scale_min: f64,

    /// Upper clamp for scale-driver values. Default: **10.0**.
    pub scale_max: f64,

    /// Default: **relative** (cumulative offset).
    pub position_mode: PositionMode,

    pub keywords: DriverKeywords,

    /// Frame interval for `smooth_update_graphics`. Zero disables
    /// interpolation. Default: **16 ms**.
    pub smooth_frame_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scale_min: 0.1,
            scale_max: 10.0,
            position_mode: PositionMode::Relative,
            keywords: DriverKeywords::default(),
            smooth_frame_ms: 16,
        }
    }
}

impl SyncConfig {
    /// Parse a JSON settings object; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ─── Tags ────────────────────────────────────────────────────────────────

/// Appearance and placement of annotation tag labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagStyle {
    /// Dedicated, non-plottable layer created on first use.
    pub layer: String,
    pub x_offset: f64,
    pub action_y_offset: f64,
    pub parameter_y_offset: f64,
    pub lookup_y_offset: f64,
    pub text_height: f64,
    pub color: Color,
}

impl Default for TagStyle {
    fn default() -> Self {
        Self {
            layer: "LOOKUP_TAGS".to_string(),
            x_offset: 10.0,
            action_y_offset: 15.0,
            parameter_y_offset: 20.0,
            lookup_y_offset: 25.0,
            text_height: 2.5,
            color: Color::YELLOW,
        }
    }
}

impl TagStyle {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

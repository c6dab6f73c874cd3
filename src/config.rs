//! Config module.
//! Fixed file names, port, and the color-range thresholds the scanner uses.
//! Thresholds can be overridden from a JSON file (serde). The file is an
//! overlay: a channel, row limit, or whole range it leaves out keeps its
//! built-in value, and a channel it does give replaces that channel's bounds.

use anyhow::{Context, Result};
use image::Rgb;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_SHEET_PATH: &str = "SpriteSheet.png";
pub const DEFAULT_COORDS_PATH: &str = "coords.json";
pub const DEFAULT_PORT: u16 = 8889;
pub const SUBMIT_ROUTE: &str = "/submit";
/// Largest submission body the capture server buffers.
pub const MAX_SUBMISSION_BYTES: usize = 2 * 1024 * 1024;

/// Exclusive bounds on a single 8-bit channel. `None` leaves that side open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBound {
    pub above: Option<u8>,
    pub below: Option<u8>,
}

impl ChannelBound {
    pub const fn above(min: u8) -> Self {
        Self {
            above: Some(min),
            below: None,
        }
    }

    pub const fn below(max: u8) -> Self {
        Self {
            above: None,
            below: Some(max),
        }
    }

    pub const fn between(min: u8, max: u8) -> Self {
        Self {
            above: Some(min),
            below: Some(max),
        }
    }

    pub fn admits(&self, value: u8) -> bool {
        self.above.is_none_or(|min| value > min) && self.below.is_none_or(|max| value < max)
    }
}

/// A box in RGB space, optionally restricted to rows strictly below `after_row`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ColorRange {
    pub red: ChannelBound,
    pub green: ChannelBound,
    pub blue: ChannelBound,
    pub after_row: Option<u32>,
}

impl ColorRange {
    /// Mario's red: R>180, G<100, B<100 anywhere on the sheet.
    pub const RED: ColorRange = ColorRange {
        red: ChannelBound::above(180),
        green: ChannelBound::below(100),
        blue: ChannelBound::below(100),
        after_row: None,
    };

    /// Orange-brown brick/ground tiles, which sit below row 200.
    pub const GROUND: ColorRange = ColorRange {
        red: ChannelBound::between(150, 220),
        green: ChannelBound::between(50, 150),
        blue: ChannelBound::below(80),
        after_row: Some(200),
    };

    pub fn admits_row(&self, y: u32) -> bool {
        self.after_row.is_none_or(|row| y > row)
    }

    pub fn matches(&self, y: u32, pixel: &Rgb<u8>) -> bool {
        let [r, g, b] = pixel.0;
        self.admits_row(y) && self.red.admits(r) && self.green.admits(g) && self.blue.admits(b)
    }

    fn overlaid(self, patch: RangeOverride) -> Self {
        Self {
            red: patch.red.unwrap_or(self.red),
            green: patch.green.unwrap_or(self.green),
            blue: patch.blue.unwrap_or(self.blue),
            after_row: patch.after_row.or(self.after_row),
        }
    }
}

/// One range as written in a thresholds file; absent fields mean "keep the built-in".
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RangeOverride {
    red: Option<ChannelBound>,
    green: Option<ChannelBound>,
    blue: Option<ChannelBound>,
    after_row: Option<u32>,
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ThresholdsFile {
    red: Option<RangeOverride>,
    ground: Option<RangeOverride>,
}

impl From<ThresholdsFile> for ScanThresholds {
    fn from(file: ThresholdsFile) -> Self {
        let defaults = ScanThresholds::default();
        Self {
            red: file.red.map_or(defaults.red, |patch| defaults.red.overlaid(patch)),
            ground: file
                .ground
                .map_or(defaults.ground, |patch| defaults.ground.overlaid(patch)),
        }
    }
}

/// The two color probes the scanner runs after the checkerboard pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ThresholdsFile")]
pub struct ScanThresholds {
    pub red: ColorRange,
    pub ground: ColorRange,
}

impl Default for ScanThresholds {
    fn default() -> Self {
        Self {
            red: ColorRange::RED,
            ground: ColorRange::GROUND,
        }
    }
}

impl ScanThresholds {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read thresholds file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse thresholds file {}", path.display()))
    }
}

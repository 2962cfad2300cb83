//! Flood-risk classification relative to a water level.

/// Band of a sample relative to the water level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThresholdBand {
    /// More than one unit below the level.
    Deep,
    /// Within one unit below the level.
    AtRisk,
    /// At the level or less than half a unit above it.
    Marginal,
    /// Half a unit or more above the level; not rendered.
    Safe,
}

impl ThresholdBand {
    /// RGBA color used in threshold mode.
    pub fn color(self) -> [u8; 4] {
        match self {
            ThresholdBand::Deep => [0, 0, 255, 255],
            ThresholdBand::AtRisk => [255, 0, 0, 255],
            ThresholdBand::Marginal => [255, 255, 0, 255],
            ThresholdBand::Safe => [0, 0, 0, 0],
        }
    }
}

/// Band boundaries for one water level, narrowed to sample precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdLevels {
    deep_below: f32,
    at_risk_below: f32,
    marginal_below: f32,
}

impl ThresholdLevels {
    /// Boundaries `level - 1`, `level` and `level + 0.5`.
    pub fn new(level: f64) -> Self {
        Self {
            deep_below: (level - 1.0) as f32,
            at_risk_below: level as f32,
            marginal_below: (level + 0.5) as f32,
        }
    }

    /// Classify one sample. NaN is always `Safe`.
    pub fn classify(&self, value: f32) -> ThresholdBand {
        if value < self.deep_below {
            ThresholdBand::Deep
        } else if value < self.at_risk_below {
            ThresholdBand::AtRisk
        } else if value < self.marginal_below {
            ThresholdBand::Marginal
        } else {
            ThresholdBand::Safe
        }
    }
}

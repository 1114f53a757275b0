//! Compresses note-on velocity dynamics.
//!
//! Works like an audio compressor transplanted to velocity: values above a threshold are scaled
//! down by a ratio, optionally through a soft knee, then makeup gain and output caps are applied.
//! The math runs in normalized 0.0-1.0 space so the curve shapes match their audio counterparts.

use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::{U7, Velocity};

use crate::configuration::CycleConfig;

/// Width of the soft knee transition zone, in velocity units.
const SOFT_KNEE_WIDTH: f32 = 12.0;

const NORM: f32 = 1.0 / 127.0;
const DENORM: f32 = 127.0;

/// Compression ratio, expressed as input:output slope above the threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ratio {
    /// No compression.
    OneToOne,
    /// Gentle.
    TwoToOne,
    /// Moderate.
    ThreeToOne,
    /// Classic compression.
    #[default]
    FourToOne,
    /// Strong.
    SixToOne,
    /// Very strong.
    EightToOne,
    /// Near limiting.
    TenToOne,
    /// Limiter; velocities are pinned to the threshold.
    Limit,
}

impl CycleConfig for Ratio {}

impl Ratio {
    fn value(&self) -> f32 {
        match self {
            Self::OneToOne => 1.0,
            Self::TwoToOne => 2.0,
            Self::ThreeToOne => 3.0,
            Self::FourToOne => 4.0,
            Self::SixToOne => 6.0,
            Self::EightToOne => 8.0,
            Self::TenToOne => 10.0,
            Self::Limit => 1000.0,
        }
    }

    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OneToOne => "1:1",
            Self::TwoToOne => "2:1",
            Self::ThreeToOne => "3:1",
            Self::FourToOne => "4:1",
            Self::SixToOne => "6:1",
            Self::EightToOne => "8:1",
            Self::TenToOne => "10:1",
            Self::Limit => "∞:1",
        }
    }
}

/// How abruptly compression engages at the threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Knee {
    /// Full ratio the moment the threshold is crossed.
    #[default]
    Hard,
    /// Quadratic blend into the ratio across a zone above the threshold.
    Soft,
}

impl CycleConfig for Knee {}

impl Knee {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hard => "Hard",
            Self::Soft => "Soft",
        }
    }
}

/// Per-track velocity compressor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VelocityCompressor {
    enabled: bool,
    /// Velocity above which compression engages, 1-127.
    threshold: u8,
    ratio: Ratio,
    /// Added after compression, -20 to +40 velocity units.
    makeup_gain: i8,
    knee: Knee,
    /// Output floor, 1-127.
    min_velocity: u8,
    /// Output ceiling, 1-127.
    max_velocity: u8,
}

impl Default for VelocityCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl VelocityCompressor {
    /// Constructs a compressor with factory defaults: disabled, threshold 80, ratio 4:1, hard
    /// knee, no makeup gain, full 1-127 output range.
    pub fn new() -> Self {
        Self {
            enabled: false,
            threshold: 80,
            ratio: Ratio::FourToOne,
            makeup_gain: 0,
            knee: Knee::Hard,
            min_velocity: 1,
            max_velocity: 127,
        }
    }

    /// Runs a note-on velocity through the compression curve. Pass-through when disabled.
    ///
    /// Zero velocity never reaches this: a zero-velocity note on is a release and is handled
    /// before the compressor.
    pub fn process(&self, velocity: Velocity) -> Velocity {
        if !self.enabled {
            return velocity;
        }

        let input = f32::from(u8::from(velocity).clamp(1, 127)) * NORM;
        let threshold = f32::from(self.threshold) * NORM;

        let mut compressed = compress(input, threshold, self.ratio.value(), self.knee);
        compressed += f32::from(self.makeup_gain) * NORM;

        // caps applied in sequence so a floor above the ceiling resolves to the ceiling
        let output = denormalize(compressed)
            .max(self.min_velocity)
            .min(self.max_velocity);
        U7::from_u8_lossy(output)
    }

    /// How many velocity units the curve removes from `velocity`, before makeup gain. Drives the
    /// gain reduction meter. Zero when disabled or at/below the threshold.
    pub fn gain_reduction(&self, velocity: Velocity) -> u8 {
        let raw = u8::from(velocity);
        if !self.enabled || raw <= self.threshold {
            return 0;
        }

        let input = f32::from(raw) * NORM;
        let threshold = f32::from(self.threshold) * NORM;
        let compressed = compress(input, threshold, self.ratio.value(), self.knee);

        ((input - compressed) * DENORM + 0.5) as u8
    }

    /// Getter.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Setter.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Getter.
    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    /// Sets the threshold, clamped to 1-127.
    pub fn set_threshold(&mut self, threshold: u8) {
        self.threshold = threshold.clamp(1, 127);
    }

    /// Getter.
    pub fn ratio(&self) -> Ratio {
        self.ratio
    }

    /// Setter.
    pub fn set_ratio(&mut self, ratio: Ratio) {
        self.ratio = ratio;
    }

    /// Getter.
    pub fn makeup_gain(&self) -> i8 {
        self.makeup_gain
    }

    /// Sets the makeup gain, clamped to -20..=40.
    pub fn set_makeup_gain(&mut self, gain: i8) {
        self.makeup_gain = gain.clamp(-20, 40);
    }

    /// Getter.
    pub fn knee(&self) -> Knee {
        self.knee
    }

    /// Setter.
    pub fn set_knee(&mut self, knee: Knee) {
        self.knee = knee;
    }

    /// Getter.
    pub fn min_velocity(&self) -> u8 {
        self.min_velocity
    }

    /// Sets the output floor, clamped to 1-127.
    pub fn set_min_velocity(&mut self, min: u8) {
        self.min_velocity = min.clamp(1, 127);
    }

    /// Getter.
    pub fn max_velocity(&self) -> u8 {
        self.max_velocity
    }

    /// Sets the output ceiling, clamped to 1-127.
    pub fn set_max_velocity(&mut self, max: u8) {
        self.max_velocity = max.clamp(1, 127);
    }

    /// Restores factory defaults.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// The compression curve in normalized space. At or below the threshold the input passes
/// unchanged; above it the overshoot is divided by the ratio, with the soft knee blending in
/// quadratically across its zone.
fn compress(input: f32, threshold: f32, ratio: f32, knee: Knee) -> f32 {
    if input <= threshold {
        return input;
    }

    let overshoot = input - threshold;
    let full = threshold + overshoot / ratio;

    match knee {
        Knee::Hard => full,
        Knee::Soft => {
            let knee_width = SOFT_KNEE_WIDTH * NORM;
            let knee_start = threshold - knee_width / 2.0;
            let knee_end = threshold + knee_width / 2.0;

            if input < knee_end {
                let position = (input - knee_start) / knee_width;
                let blend = position * position;
                input + blend * (full - input)
            } else {
                full
            }
        }
    }
}

fn denormalize(value: f32) -> u8 {
    let clamped = value.clamp(0.0, 1.0);
    ((clamped * DENORM + 0.5) as u8).clamp(1, 127)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressing() -> VelocityCompressor {
        let mut compressor = VelocityCompressor::new();
        compressor.set_enabled(true);
        compressor
    }

    fn process(compressor: &VelocityCompressor, velocity: u8) -> u8 {
        u8::from(compressor.process(U7::from_u8_lossy(velocity)))
    }

    #[test]
    fn factory_defaults() {
        let compressor = VelocityCompressor::new();

        assert!(!compressor.is_enabled());
        assert_eq!(80, compressor.threshold(), "Expected left but got right");
        assert_eq!(Ratio::FourToOne, compressor.ratio(), "Expected left but got right");
        assert_eq!(0, compressor.makeup_gain(), "Expected left but got right");
        assert_eq!(Knee::Hard, compressor.knee(), "Expected left but got right");
        assert_eq!(1, compressor.min_velocity(), "Expected left but got right");
        assert_eq!(127, compressor.max_velocity(), "Expected left but got right");
    }

    #[test]
    fn disabled_passes_through() {
        let compressor = VelocityCompressor::new();
        assert_eq!(100, process(&compressor, 100), "Expected left but got right");
    }

    #[test]
    fn below_threshold_is_untouched() {
        let compressor = compressing();

        assert_eq!(60, process(&compressor, 60), "Expected left but got right");
        assert_eq!(80, process(&compressor, 80), "Expected left but got right");
    }

    #[test]
    fn hard_knee_divides_the_overshoot() {
        let compressor = compressing();

        // 20 over the threshold at 4:1 leaves 5 over
        assert_eq!(85, process(&compressor, 100), "Expected left but got right");
    }

    #[test]
    fn limiter_pins_to_the_threshold() {
        let mut compressor = compressing();
        compressor.set_ratio(Ratio::Limit);

        assert_eq!(80, process(&compressor, 127), "Expected left but got right");
    }

    #[test]
    fn soft_knee_compresses_less_inside_the_zone() {
        let mut hard = compressing();
        let mut soft = compressing();
        hard.set_knee(Knee::Hard);
        soft.set_knee(Knee::Soft);

        // inside the 12-unit knee zone around 80
        assert_eq!(81, process(&hard, 83), "Expected left but got right");
        assert_eq!(82, process(&soft, 83), "Expected left but got right");

        // beyond the zone both apply the full ratio
        assert_eq!(process(&hard, 100), process(&soft, 100), "Expected left but got right");
    }

    #[test]
    fn makeup_gain_lifts_the_output() {
        let mut compressor = compressing();
        compressor.set_makeup_gain(10);

        assert_eq!(95, process(&compressor, 100), "Expected left but got right");
    }

    #[test]
    fn makeup_gain_saturates_at_full_scale() {
        let mut compressor = compressing();
        compressor.set_ratio(Ratio::OneToOne);
        compressor.set_makeup_gain(40);

        assert_eq!(127, process(&compressor, 127), "Expected left but got right");
    }

    #[test]
    fn output_caps_bound_the_result() {
        let mut compressor = compressing();
        compressor.set_min_velocity(40);
        compressor.set_max_velocity(100);

        assert_eq!(40, process(&compressor, 10), "Expected left but got right");

        compressor.set_makeup_gain(40);
        assert_eq!(100, process(&compressor, 127), "Expected left but got right");
    }

    #[test]
    fn gain_reduction_reports_the_curve_delta() {
        let compressor = compressing();

        assert_eq!(15, compressor.gain_reduction(U7::from_u8_lossy(100)), "Expected left but got right");
        assert_eq!(0, compressor.gain_reduction(U7::from_u8_lossy(80)), "Expected left but got right");

        let disabled = VelocityCompressor::new();
        assert_eq!(0, disabled.gain_reduction(U7::from_u8_lossy(100)), "Expected left but got right");
    }

    #[test]
    fn setter_clamps_are_observable() {
        let mut compressor = VelocityCompressor::new();

        compressor.set_threshold(0);
        assert_eq!(1, compressor.threshold(), "Expected left but got right");

        compressor.set_makeup_gain(-100);
        assert_eq!(-20, compressor.makeup_gain(), "Expected left but got right");
        compressor.set_makeup_gain(100);
        assert_eq!(40, compressor.makeup_gain(), "Expected left but got right");

        compressor.set_min_velocity(0);
        assert_eq!(1, compressor.min_velocity(), "Expected left but got right");
    }

    #[test]
    fn reset_restores_defaults() {
        let mut compressor = compressing();
        compressor.set_threshold(30);
        compressor.set_ratio(Ratio::Limit);

        compressor.reset();
        assert_eq!(VelocityCompressor::new(), compressor, "Expected left but got right");
    }

    #[test]
    fn settings_cycle_for_the_menu() {
        assert_eq!(Ratio::SixToOne, Ratio::FourToOne.cycle(), "Expected left but got right");
        assert_eq!(Ratio::OneToOne, Ratio::Limit.cycle(), "Expected left but got right");
        assert_eq!(Knee::Soft, Knee::Hard.cycle(), "Expected left but got right");
        assert_eq!("∞:1", Ratio::Limit.label(), "Expected left but got right");
    }
}

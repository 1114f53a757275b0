//! Smooths continuous controller streams.
//!
//! Hardware controllers produce jumpy, stepped CC data; this effect runs an exponential moving
//! average per CC number with separate attack (rising) and release (falling) behavior, plus an
//! optional slew rate limit. [`CcSmoother::process`] smooths the value of an incoming message
//! in place; [`CcSmoother::tick_1ms`], driven from a 1 ms timer task, keeps gliding toward the
//! target between messages and pushes intermediate values through a [`CcSink`] only when the
//! rounded output actually changes.

use embassy_time::Duration;
use libm::{expf, fabsf};
use num_derive::{FromPrimitive, ToPrimitive};
use wmidi::{Channel, ControlFunction, ControlValue, U7};

use crate::configuration::CycleConfig;

/// Number of controller numbers tracked per instance.
pub const CC_COUNT: usize = 128;

const MIN_TIME: Duration = Duration::from_millis(1);
const MAX_TIME: Duration = Duration::from_millis(1000);

/// Idle CCs stop being smoothed after this many milliseconds without an update.
const IDLE_CUTOFF_MS: u32 = 1000;

/// How aggressively values glide toward their target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// No smoothing; values pass through.
    Off,
    /// Fast response.
    Light,
    /// Balanced.
    #[default]
    Medium,
    /// Slow and smooth.
    Heavy,
    /// Smoothing derived from the custom amount and the attack/release times.
    Custom,
}

impl CycleConfig for Mode {}

impl Mode {
    /// Display name for the controller's OLED menu.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Light => "Light",
            Self::Medium => "Medium",
            Self::Heavy => "Heavy",
            Self::Custom => "Custom",
        }
    }
}

struct Preset {
    attack: Duration,
    release: Duration,
    /// Fixed EMA coefficient; only [`Mode::Custom`] derives one from the time constants.
    alpha: f32,
}

fn preset(mode: Mode) -> Preset {
    match mode {
        Mode::Off => Preset {
            attack: Duration::from_millis(1),
            release: Duration::from_millis(1),
            alpha: 1.0,
        },
        Mode::Light => Preset {
            attack: Duration::from_millis(20),
            release: Duration::from_millis(30),
            alpha: 0.7,
        },
        Mode::Medium => Preset {
            attack: Duration::from_millis(50),
            release: Duration::from_millis(100),
            alpha: 0.4,
        },
        Mode::Heavy => Preset {
            attack: Duration::from_millis(100),
            release: Duration::from_millis(200),
            alpha: 0.2,
        },
        Mode::Custom => Preset {
            attack: Duration::from_millis(50),
            release: Duration::from_millis(100),
            alpha: 0.5,
        },
    }
}

/// Receives smoothed controller values produced between input messages.
pub trait CcSink {
    /// Deliver one smoothed value. Called from [`CcSmoother::tick_1ms`] only when the rounded
    /// output differs from the last value delivered for this CC.
    fn emit(&mut self, cc: ControlFunction, value: ControlValue, channel: Channel);
}

/// Smoothing state for one controller number.
#[derive(Clone, Copy, Debug)]
struct CcState {
    enabled: bool,
    /// Float so sub-integer glide progress survives between ticks.
    current: f32,
    target: f32,
    /// For change detection.
    last_output: u8,
    /// Channel of the most recent input message; smoothed output is addressed to it.
    channel: Channel,
    last_update: u32,
}

impl CcState {
    const fn new() -> Self {
        Self {
            enabled: true,
            current: 0.0,
            target: 0.0,
            last_output: 0,
            channel: Channel::Ch1,
            last_update: 0,
        }
    }

    /// Jumps the state to its target, discarding glide progress.
    fn settle(&mut self) {
        self.current = self.target;
        self.last_output = round_u7(self.target);
    }
}

/// Per-track CC smoothing engine.
#[derive(Clone, Debug)]
pub struct CcSmoother {
    enabled: bool,
    mode: Mode,
    /// 0-100; only consulted in [`Mode::Custom`].
    custom_amount: u8,
    attack: Duration,
    release: Duration,
    /// Maximum output change per millisecond; 127 disables the limit.
    slew_limit: u8,
    states: [CcState; CC_COUNT],
    /// Millisecond counter advanced by [`Self::tick_1ms`].
    ticks: u32,
}

impl Default for CcSmoother {
    fn default() -> Self {
        Self::new()
    }
}

impl CcSmoother {
    /// Constructs a smoother with factory defaults: disabled, Medium mode, every CC number
    /// enabled, no slew limiting.
    pub fn new() -> Self {
        Self {
            enabled: false,
            mode: Mode::Medium,
            custom_amount: 50,
            attack: Duration::from_millis(50),
            release: Duration::from_millis(100),
            slew_limit: 127,
            states: [CcState::new(); CC_COUNT],
            ticks: 0,
        }
    }

    /// Smooths an incoming CC message, returning the value to send in its place. Pass-through when
    /// the track or this CC number is disabled, or in [`Mode::Off`].
    pub fn process(
        &mut self,
        cc: ControlFunction,
        value: ControlValue,
        channel: Channel,
    ) -> ControlValue {
        let number = usize::from(u8::from(cc));

        if !self.enabled || !self.states[number].enabled || self.mode == Mode::Off {
            return value;
        }

        let (mode, custom_amount, attack, release, slew_limit) = (
            self.mode,
            self.custom_amount,
            self.attack,
            self.release,
            self.slew_limit,
        );
        let ticks = self.ticks;

        let state = &mut self.states[number];
        let raw = u8::from(value);
        state.target = f32::from(raw);
        state.channel = channel;
        state.last_update = ticks;

        // first nonzero value snaps instead of gliding up from silence
        if state.current == 0.0 && state.last_output == 0 && raw > 0 {
            state.current = state.target;
        }

        smooth(state, mode, custom_amount, attack, release, slew_limit, 1.0);

        let output = round_u7(state.current);
        state.last_output = output;
        U7::from_u8_lossy(output)
    }

    /// Advances every enabled CC one millisecond toward its target. Values whose rounded output
    /// changed are delivered through `sink`; CCs idle for over a second are left alone.
    pub fn tick_1ms<S: CcSink>(&mut self, sink: &mut S) {
        self.ticks = self.ticks.wrapping_add(1);
        if !self.enabled {
            return;
        }

        let (mode, custom_amount, attack, release, slew_limit) = (
            self.mode,
            self.custom_amount,
            self.attack,
            self.release,
            self.slew_limit,
        );
        let ticks = self.ticks;

        for (number, state) in self.states.iter_mut().enumerate() {
            if !state.enabled {
                continue;
            }
            if ticks.wrapping_sub(state.last_update) > IDLE_CUTOFF_MS {
                continue;
            }
            if fabsf(state.target - state.current) < 0.1 {
                continue;
            }

            smooth(state, mode, custom_amount, attack, release, slew_limit, 1.0);

            let output = round_u7(state.current);
            if output != state.last_output {
                sink.emit(
                    ControlFunction(U7::from_u8_lossy(number as u8)),
                    U7::from_u8_lossy(output),
                    state.channel,
                );
                state.last_output = output;
            }
        }
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
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Sets the smoothing mode. Every mode except Custom also installs its preset attack and
    /// release times.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode != Mode::Custom {
            let preset = preset(mode);
            self.attack = preset.attack;
            self.release = preset.release;
        }
    }

    /// Getter.
    pub fn custom_amount(&self) -> u8 {
        self.custom_amount
    }

    /// Sets the Custom-mode smoothing amount, clamped to 100.
    pub fn set_custom_amount(&mut self, amount: u8) {
        self.custom_amount = amount.min(100);
    }

    /// Getter.
    pub fn attack(&self) -> Duration {
        self.attack
    }

    /// Sets the attack (rising) time constant, clamped to 1-1000 ms.
    pub fn set_attack(&mut self, attack: Duration) {
        self.attack = clamp_time(attack);
    }

    /// Getter.
    pub fn release(&self) -> Duration {
        self.release
    }

    /// Sets the release (falling) time constant, clamped to 1-1000 ms.
    pub fn set_release(&mut self, release: Duration) {
        self.release = clamp_time(release);
    }

    /// Getter.
    pub fn slew_limit(&self) -> u8 {
        self.slew_limit
    }

    /// Sets the maximum change per millisecond, clamped to 1-127. 127 disables the limit.
    pub fn set_slew_limit(&mut self, limit: u8) {
        self.slew_limit = limit.clamp(1, 127);
    }

    /// Returns whether `cc` participates in smoothing.
    pub fn is_cc_enabled(&self, cc: ControlFunction) -> bool {
        self.states[usize::from(u8::from(cc))].enabled
    }

    /// Includes or excludes a single CC number from smoothing.
    pub fn set_cc_enabled(&mut self, cc: ControlFunction, enabled: bool) {
        self.states[usize::from(u8::from(cc))].enabled = enabled;
    }

    /// The last value output for `cc`.
    pub fn current_value(&self, cc: ControlFunction) -> ControlValue {
        U7::from_u8_lossy(self.states[usize::from(u8::from(cc))].last_output)
    }

    /// Jumps every CC to its target, abandoning in-flight glides. Settings are kept.
    pub fn reset(&mut self) {
        for state in self.states.iter_mut() {
            state.settle();
        }
    }

    /// [`Self::reset`] for a single CC number.
    pub fn reset_cc(&mut self, cc: ControlFunction) {
        self.states[usize::from(u8::from(cc))].settle();
    }
}

/// One EMA step. The coefficient comes from the mode preset, except in Custom mode where it is
/// derived from the active time constant scaled by the custom amount.
fn smooth(
    state: &mut CcState,
    mode: Mode,
    custom_amount: u8,
    attack: Duration,
    release: Duration,
    slew_limit: u8,
    dt_ms: f32,
) {
    if dt_ms < 0.1 {
        return;
    }

    let diff = state.target - state.current;
    let time_constant = if diff > 0.0 {
        attack
    } else if diff < 0.0 {
        release
    } else {
        return;
    };

    let alpha = match mode {
        Mode::Off => 1.0,
        Mode::Custom => {
            // amount 0 -> 5x faster than the time constant, 100 -> as configured
            let scale = 1.0 + (f32::from(100 - custom_amount) / 100.0) * 4.0;
            coefficient((time_constant.as_millis() as f32 / scale) as u16)
        }
        _ => preset(mode).alpha,
    };

    let mut next = alpha * state.target + (1.0 - alpha) * state.current;

    if slew_limit < 127 {
        let max_change = f32::from(slew_limit) * dt_ms;
        let change = next - state.current;
        if change > max_change {
            next = state.current + max_change;
        } else if change < -max_change {
            next = state.current - max_change;
        }
    }

    state.current = next;
}

/// EMA coefficient for a time constant at the 1 ms update rate: alpha = 1 - e^(-1/tau).
fn coefficient(time_ms: u16) -> f32 {
    let tau = f32::from(time_ms.max(1));
    (1.0 - expf(-1.0 / tau)).clamp(0.001, 1.0)
}

fn round_u7(value: f32) -> u8 {
    ((value + 0.5) as u8).min(127)
}

fn clamp_time(time: Duration) -> Duration {
    if time < MIN_TIME {
        MIN_TIME
    } else if time > MAX_TIME {
        MAX_TIME
    } else {
        time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinyvec::ArrayVec;

    const MOD_WHEEL: ControlFunction = ControlFunction::MODULATION_WHEEL;

    #[derive(Default)]
    struct RecordingSink {
        events: ArrayVec<[(u8, u8, u8); 256]>,
    }

    impl CcSink for RecordingSink {
        fn emit(&mut self, cc: ControlFunction, value: ControlValue, channel: Channel) {
            self.events
                .push((u8::from(cc), u8::from(value), channel.number()));
        }
    }

    fn smoothing() -> CcSmoother {
        let mut smoother = CcSmoother::new();
        smoother.set_enabled(true);
        smoother
    }

    fn process(smoother: &mut CcSmoother, value: u8) -> u8 {
        u8::from(smoother.process(MOD_WHEEL, U7::from_u8_lossy(value), Channel::Ch3))
    }

    #[test]
    fn factory_defaults() {
        let smoother = CcSmoother::new();

        assert!(!smoother.is_enabled());
        assert_eq!(Mode::Medium, smoother.mode(), "Expected left but got right");
        assert_eq!(
            Duration::from_millis(50),
            smoother.attack(),
            "Expected left but got right"
        );
        assert_eq!(
            Duration::from_millis(100),
            smoother.release(),
            "Expected left but got right"
        );
        assert_eq!(127, smoother.slew_limit(), "Expected left but got right");
        assert!(smoother.is_cc_enabled(MOD_WHEEL));
    }

    #[test]
    fn disabled_track_passes_through() {
        let mut smoother = CcSmoother::new();
        assert_eq!(100, process(&mut smoother, 100), "Expected left but got right");
    }

    #[test]
    fn mode_off_passes_through() {
        let mut smoother = smoothing();
        smoother.set_mode(Mode::Off);
        assert_eq!(100, process(&mut smoother, 100), "Expected left but got right");
    }

    #[test]
    fn disabled_cc_passes_through_while_others_smooth() {
        let mut smoother = smoothing();
        smoother.set_cc_enabled(MOD_WHEEL, false);

        assert_eq!(100, process(&mut smoother, 100), "Expected left but got right");
        assert!(!smoother.is_cc_enabled(MOD_WHEEL));
    }

    #[test]
    fn first_nonzero_value_snaps_to_target() {
        let mut smoother = smoothing();
        assert_eq!(100, process(&mut smoother, 100), "Expected left but got right");
    }

    #[test]
    fn later_values_glide() {
        let mut smoother = smoothing();
        process(&mut smoother, 100);

        // Medium alpha is 0.4: 0.4 * 50 + 0.6 * 100 = 80
        assert_eq!(80, process(&mut smoother, 50), "Expected left but got right");
    }

    #[test]
    fn ticks_converge_on_the_target() {
        let mut smoother = smoothing();
        let mut sink = RecordingSink::default();

        process(&mut smoother, 100);
        process(&mut smoother, 30);

        for _ in 0..50 {
            smoother.tick_1ms(&mut sink);
        }

        assert_eq!(
            30,
            u8::from(smoother.current_value(MOD_WHEEL)),
            "Expected left but got right"
        );
        // once settled, further ticks are silent
        let settled = sink.events.len();
        smoother.tick_1ms(&mut sink);
        assert_eq!(settled, sink.events.len(), "Expected left but got right");
    }

    #[test]
    fn ticks_emit_only_on_change() {
        let mut smoother = smoothing();
        let mut sink = RecordingSink::default();

        process(&mut smoother, 100);
        process(&mut smoother, 50); // smoothed to 80

        smoother.tick_1ms(&mut sink);

        // 0.4 * 50 + 0.6 * 80 = 68, addressed to the channel seen in process()
        assert_eq!(
            Some(&(u8::from(MOD_WHEEL), 68, 3)),
            sink.events.first(),
            "Expected left but got right"
        );

        for window in sink.events.as_slice().windows(2) {
            assert_ne!(window[0].1, window[1].1, "Expected consecutive emissions to differ");
        }
    }

    #[test]
    fn slew_limit_caps_the_step() {
        let mut smoother = smoothing();
        smoother.set_slew_limit(1);

        process(&mut smoother, 100);

        // the EMA wants to drop 20, the slew limit allows 1 per ms
        assert_eq!(99, process(&mut smoother, 50), "Expected left but got right");
    }

    #[test]
    fn idle_ccs_stop_gliding() {
        let mut smoother = smoothing();
        smoother.set_mode(Mode::Custom);
        smoother.set_custom_amount(100);
        smoother.set_attack(Duration::from_millis(1000));
        let mut sink = RecordingSink::default();

        process(&mut smoother, 1);
        process(&mut smoother, 127);

        for _ in 0..2000 {
            smoother.tick_1ms(&mut sink);
        }
        let frozen = u8::from(smoother.current_value(MOD_WHEEL));
        assert!(frozen < 127, "Expected the glide to freeze before the target");

        for _ in 0..100 {
            smoother.tick_1ms(&mut sink);
        }
        assert_eq!(
            frozen,
            u8::from(smoother.current_value(MOD_WHEEL)),
            "Expected left but got right"
        );
    }

    #[test]
    fn presets_follow_the_mode() {
        let mut smoother = smoothing();

        smoother.set_mode(Mode::Heavy);
        assert_eq!(
            Duration::from_millis(100),
            smoother.attack(),
            "Expected left but got right"
        );
        assert_eq!(
            Duration::from_millis(200),
            smoother.release(),
            "Expected left but got right"
        );

        // Custom keeps whatever times are configured
        smoother.set_mode(Mode::Custom);
        assert_eq!(
            Duration::from_millis(100),
            smoother.attack(),
            "Expected left but got right"
        );
    }

    #[test]
    fn setter_clamps_are_observable() {
        let mut smoother = CcSmoother::new();

        smoother.set_attack(Duration::from_millis(5000));
        assert_eq!(
            Duration::from_millis(1000),
            smoother.attack(),
            "Expected left but got right"
        );

        smoother.set_release(Duration::from_millis(0));
        assert_eq!(
            Duration::from_millis(1),
            smoother.release(),
            "Expected left but got right"
        );

        smoother.set_slew_limit(0);
        assert_eq!(1, smoother.slew_limit(), "Expected left but got right");

        smoother.set_custom_amount(200);
        assert_eq!(100, smoother.custom_amount(), "Expected left but got right");
    }

    #[test]
    fn reset_settles_in_flight_glides() {
        let mut smoother = smoothing();

        process(&mut smoother, 100);
        process(&mut smoother, 50); // gliding at 80

        smoother.reset_cc(MOD_WHEEL);
        assert_eq!(
            50,
            u8::from(smoother.current_value(MOD_WHEEL)),
            "Expected left but got right"
        );
    }
}

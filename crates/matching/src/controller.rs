//! Window size and precision control for the matching loop.
//!
//! Transitions are pure: the executor feeds in what the engine did and
//! applies the returned state. Precision is raised before the window grows;
//! the window shrinks before precision drops.

use std::time::Duration;

use grafo_core::config::MatchingConfig;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerConfig {
    pub initial_window_hours: u32,
    pub min_window_hours: u32,
    pub max_window_hours: u32,
    pub window_step_hours: u32,
    pub initial_precision: u32,
    pub max_precision: u32,
    pub precision_step: u32,
    /// Chunks faster than this grow the work per call, slower ones shrink it.
    pub time_threshold: Duration,
    /// Pause after a rejected call.
    pub backoff: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_window_hours: 12,
            min_window_hours: 1,
            max_window_hours: 24,
            window_step_hours: 6,
            initial_precision: 30,
            max_precision: 30,
            precision_step: 2,
            time_threshold: Duration::from_secs(30),
            backoff: Duration::from_secs(5),
        }
    }
}

impl ControllerConfig {
    pub fn from_matching_config(config: &MatchingConfig) -> Self {
        Self {
            initial_window_hours: config.initial_window_hours,
            min_window_hours: config.min_window_hours.max(1),
            max_window_hours: config.max_window_hours,
            window_step_hours: config.window_step_hours.max(1),
            initial_precision: config.initial_precision,
            max_precision: config.max_precision,
            precision_step: config.precision_step.max(1),
            time_threshold: Duration::from_secs_f64(config.time_threshold_secs.max(0.0)),
            backoff: Duration::from_secs(config.backoff_secs),
        }
    }

    pub fn initial_state(&self) -> ControllerState {
        ControllerState {
            window_hours: self
                .initial_window_hours
                .clamp(self.min_window_hours, self.max_window_hours),
            precision: self.initial_precision.min(self.max_precision),
        }
    }
}

/// Current chunk size and accuracy threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControllerState {
    pub window_hours: u32,
    /// Largest ping accuracy (metres) admitted. 0 means the chunk is given up.
    pub precision: u32,
}

/// What to do after the engine rejected a chunk as too expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultResponse {
    pub next: ControllerState,
    /// Precision ran out: log the chunk as skipped and move past it.
    pub skip_chunk: bool,
}

impl ControllerState {
    pub fn is_exhausted(&self) -> bool {
        self.precision == 0
    }

    /// A chunk finished in `elapsed`.
    pub fn after_success(self, config: &ControllerConfig, elapsed: Duration) -> Self {
        let mut next = self;
        if elapsed < config.time_threshold {
            if next.precision < config.max_precision {
                next.precision = (next.precision + config.precision_step).min(config.max_precision);
            } else if next.window_hours < config.max_window_hours {
                next.window_hours = (next.window_hours + config.window_step_hours).min(config.max_window_hours);
            }
        } else if elapsed > config.time_threshold {
            if next.window_hours > config.min_window_hours {
                next.window_hours = next
                    .window_hours
                    .saturating_sub(config.window_step_hours)
                    .max(config.min_window_hours);
            } else {
                next.precision = next.precision.saturating_sub(config.precision_step);
            }
        }
        next
    }

    /// The engine refused the chunk.
    pub fn after_fault(self, config: &ControllerConfig) -> FaultResponse {
        let mut next = self;
        if next.window_hours > config.min_window_hours {
            next.window_hours = config.min_window_hours;
        } else {
            next.precision = next.precision.saturating_sub(config.precision_step);
        }

        if next.is_exhausted() {
            FaultResponse {
                next: next.after_skip(config),
                skip_chunk: true,
            }
        } else {
            FaultResponse {
                next,
                skip_chunk: false,
            }
        }
    }

    /// State for the chunk after a skipped one.
    pub fn after_skip(self, config: &ControllerConfig) -> Self {
        Self {
            precision: config.precision_step.min(config.max_precision),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Duration {
        Duration::from_secs(1)
    }

    fn slow() -> Duration {
        Duration::from_secs(90)
    }

    #[test]
    fn precision_caps_before_window_grows() {
        let config = ControllerConfig::default();
        let state = ControllerState {
            window_hours: 12,
            precision: 26,
        };
        let state = state.after_success(&config, fast());
        assert_eq!((state.window_hours, state.precision), (12, 28));
        let state = state.after_success(&config, fast());
        assert_eq!((state.window_hours, state.precision), (12, 30));
        let state = state.after_success(&config, fast());
        assert_eq!((state.window_hours, state.precision), (18, 30));
        let state = state.after_success(&config, fast()).after_success(&config, fast());
        assert_eq!(state.window_hours, 24);
    }

    #[test]
    fn slow_chunks_shrink_window_then_precision() {
        let config = ControllerConfig::default();
        let mut state = config.initial_state();
        state = state.after_success(&config, slow());
        assert_eq!(state.window_hours, 6);
        state = state.after_success(&config, slow());
        assert_eq!(state.window_hours, 1);
        state = state.after_success(&config, slow());
        assert_eq!((state.window_hours, state.precision), (1, 28));
    }

    #[test]
    fn threshold_itself_changes_nothing() {
        let config = ControllerConfig::default();
        let state = config.initial_state();
        assert_eq!(state.after_success(&config, config.time_threshold), state);
    }

    #[test]
    fn fault_drops_to_floor_then_steps_precision() {
        let config = ControllerConfig::default();
        let first = config.initial_state().after_fault(&config);
        assert!(!first.skip_chunk);
        assert_eq!(first.next.window_hours, 1);
        assert_eq!(first.next.precision, 30);

        let second = first.next.after_fault(&config);
        assert_eq!(second.next.precision, 28);
    }

    #[test]
    fn faults_terminate_in_a_skip() {
        let config = ControllerConfig::default();
        let mut state = config.initial_state();
        let mut faults = 0;
        loop {
            let response = state.after_fault(&config);
            faults += 1;
            state = response.next;
            assert!(state.window_hours >= config.min_window_hours);
            if response.skip_chunk {
                break;
            }
            assert!(faults < 100);
        }
        // One fault to reach the floor, fifteen to exhaust precision.
        assert_eq!(faults, 16);
        assert_eq!(state.precision, config.precision_step);
    }

    #[test]
    fn initial_state_respects_bounds() {
        let config = ControllerConfig {
            initial_window_hours: 48,
            initial_precision: 50,
            ..ControllerConfig::default()
        };
        let state = config.initial_state();
        assert_eq!((state.window_hours, state.precision), (24, 30));
    }

    /// Deterministic mix of engine outcomes.
    struct Outcomes(u64);

    impl Outcomes {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
            (self.0 >> 33) % 10
        }
    }

    #[test]
    fn mixed_outcomes_always_reach_the_end() {
        let config = ControllerConfig::default();
        let hours = 24 * 30;
        // Every attempt either advances or is a fault; at most one fault to
        // reach the window floor plus one per precision step precede an advance.
        let max_faults_per_chunk = 1 + config.max_precision.div_ceil(config.precision_step) as usize;
        let bound = hours * (max_faults_per_chunk + 1);

        for seed in [1, 7, 42, 1234, 99_991] {
            let mut outcomes = Outcomes(seed);
            let mut state = config.initial_state();
            let mut t = 0usize;
            let mut attempts = 0usize;

            while t < hours {
                attempts += 1;
                assert!(attempts <= bound, "seed {seed} stalled at hour {t}");
                let chunk_end = (t + state.window_hours as usize).min(hours);

                if state.is_exhausted() {
                    state = state.after_skip(&config);
                    t = chunk_end;
                } else {
                    match outcomes.next() {
                        0..=3 => {
                            state = state.after_success(&config, fast());
                            t = chunk_end;
                        }
                        4..=6 => {
                            state = state.after_success(&config, slow());
                            t = chunk_end;
                        }
                        _ => {
                            let response = state.after_fault(&config);
                            if response.skip_chunk {
                                t = chunk_end;
                            }
                            state = response.next;
                        }
                    }
                }

                assert!(state.window_hours >= config.min_window_hours);
                assert!(state.window_hours <= config.max_window_hours);
                assert!(state.precision <= config.max_precision);
            }
            assert_eq!(t, hours);
        }
    }
}

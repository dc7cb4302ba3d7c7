//! Circuit breaker state machine with a rolling sampling window

use crate::config::{duration_secs, CircuitBreakerSettings};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// One trial call is allowed to test recovery
    HalfOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub sampling_duration: Duration,
    pub minimum_throughput: u32,
    pub break_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            sampling_duration: duration_secs(settings.sampling_duration_seconds, 0.0),
            minimum_throughput: settings.minimum_throughput,
            break_duration: duration_secs(settings.break_duration_seconds, 0.0),
        }
    }
}

/// Decision taken before a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed, normal call
    Allowed,
    /// Half-open trial; its outcome decides the next state
    Trial,
    /// Fail fast
    Rejected,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    /// (completed at, failed) for calls inside the sampling window
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            samples: VecDeque::new(),
            opened_at: None,
            trial_in_flight: false,
        }
    }

    /// Decide whether a call may proceed, moving Open to HalfOpen once the
    /// cool-down has elapsed
    pub fn try_acquire(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                if self.cooldown_elapsed(now) {
                    self.state = CircuitState::HalfOpen;
                    self.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    Admission::Rejected
                } else {
                    self.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    pub fn record_success(&mut self, admission: Admission, now: Instant) {
        match admission {
            Admission::Trial => self.close(),
            Admission::Allowed if self.state == CircuitState::Closed => {
                self.push_sample(now, false);
            }
            _ => {}
        }
    }

    pub fn record_failure(&mut self, admission: Admission, now: Instant) {
        match admission {
            Admission::Trial => self.open(now),
            Admission::Allowed if self.state == CircuitState::Closed => {
                self.push_sample(now, true);
                if self.should_open() {
                    self.open(now);
                }
            }
            _ => {}
        }
    }

    /// Give back a trial slot whose call never produced an outcome (e.g. cancelled)
    pub fn release(&mut self, admission: Admission) {
        if admission == Admission::Trial && self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    /// State as observed at `now`, without mutating.
    ///
    /// An open circuit whose cool-down has elapsed reports HalfOpen.
    pub fn state_at(&self, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open if self.cooldown_elapsed(now) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Failures currently inside the sampling window
    pub fn failure_count(&self) -> usize {
        self.samples.iter().filter(|(_, failed)| *failed).count()
    }

    fn push_sample(&mut self, now: Instant, failed: bool) {
        self.samples.push_back((now, failed));
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > self.config.sampling_duration {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn should_open(&self) -> bool {
        self.samples.len() >= self.config.minimum_throughput as usize
            && self.failure_count() >= self.config.failure_threshold as usize
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        self.opened_at
            .map(|at| now.saturating_duration_since(at) >= self.config.break_duration)
            .unwrap_or(true)
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
        self.samples.clear();
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.trial_in_flight = false;
        self.samples.clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, throughput: u32, break_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            sampling_duration: Duration::from_secs(60),
            minimum_throughput: throughput,
            break_duration: Duration::from_millis(break_ms),
        })
    }

    #[test]
    fn test_circuit_breaker_opens() {
        let mut cb = breaker(3, 3, 1000);
        let now = Instant::now();

        for _ in 0..2 {
            let admission = cb.try_acquire(now);
            cb.record_failure(admission, now);
            assert_eq!(cb.state_at(now), CircuitState::Closed);
        }

        let admission = cb.try_acquire(now);
        cb.record_failure(admission, now);
        assert_eq!(cb.state_at(now), CircuitState::Open);
        assert_eq!(cb.try_acquire(now), Admission::Rejected);
    }

    #[test]
    fn test_minimum_throughput_floor() {
        let mut cb = breaker(1, 3, 1000);
        let now = Instant::now();

        let admission = cb.try_acquire(now);
        cb.record_failure(admission, now);
        assert_eq!(cb.state_at(now), CircuitState::Closed);

        let admission = cb.try_acquire(now);
        cb.record_success(admission, now);
        assert_eq!(cb.state_at(now), CircuitState::Closed);

        let admission = cb.try_acquire(now);
        cb.record_failure(admission, now);
        assert_eq!(cb.state_at(now), CircuitState::Open);
    }

    #[test]
    fn test_samples_outside_window_are_forgotten() {
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            sampling_duration: Duration::from_secs(10),
            minimum_throughput: 1,
            break_duration: Duration::from_secs(1),
        });
        let start = Instant::now();

        let admission = cb.try_acquire(start);
        cb.record_failure(admission, start);

        let later = start + Duration::from_secs(11);
        let admission = cb.try_acquire(later);
        cb.record_failure(admission, later);

        assert_eq!(cb.failure_count(), 1);
        assert_eq!(cb.state_at(later), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_trial_closes_on_success() {
        let mut cb = breaker(2, 2, 10);
        let start = Instant::now();
        for _ in 0..2 {
            let admission = cb.try_acquire(start);
            cb.record_failure(admission, start);
        }
        assert_eq!(cb.state_at(start), CircuitState::Open);

        let later = start + Duration::from_millis(20);
        assert_eq!(cb.state_at(later), CircuitState::HalfOpen);

        let trial = cb.try_acquire(later);
        assert_eq!(trial, Admission::Trial);
        // only one trial at a time
        assert_eq!(cb.try_acquire(later), Admission::Rejected);

        cb.record_success(trial, later);
        assert_eq!(cb.state_at(later), CircuitState::Closed);
        assert_eq!(cb.try_acquire(later), Admission::Allowed);
    }

    #[test]
    fn test_half_open_trial_failure_reopens() {
        let mut cb = breaker(1, 1, 10);
        let start = Instant::now();
        let admission = cb.try_acquire(start);
        cb.record_failure(admission, start);

        let later = start + Duration::from_millis(20);
        let trial = cb.try_acquire(later);
        cb.record_failure(trial, later);

        assert_eq!(cb.state_at(later), CircuitState::Open);
        assert_eq!(cb.try_acquire(later), Admission::Rejected);
    }

    #[test]
    fn test_released_trial_can_be_retaken() {
        let mut cb = breaker(1, 1, 0);
        let now = Instant::now();
        let admission = cb.try_acquire(now);
        cb.record_failure(admission, now);

        let trial = cb.try_acquire(now);
        assert_eq!(trial, Admission::Trial);
        cb.release(trial);
        assert_eq!(cb.try_acquire(now), Admission::Trial);
    }

    #[test]
    fn test_success_from_stale_admission_is_ignored() {
        let mut cb = breaker(1, 1, 1000);
        let now = Instant::now();
        let stale = cb.try_acquire(now);
        let admission = cb.try_acquire(now);
        cb.record_failure(admission, now);
        assert_eq!(cb.state_at(now), CircuitState::Open);

        cb.record_success(stale, now);
        assert_eq!(cb.state_at(now), CircuitState::Open);
    }
}

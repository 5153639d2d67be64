//! Execution guards: per-strategy circuit breakers and a global action rate limiter

use crate::planner::Strategy;
use meshheal_core::ExecutorConfig;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Actions flow normally
    Closed {
        /// Consecutive failures
        failures: u32,
    },
    /// Actions are refused until the cooldown passes
    Open {
        /// When the breaker tripped
        opened_at: Instant,
    },
    /// Trial actions are allowed
    HalfOpen {
        /// Consecutive trial successes
        successes: u32,
    },
}

/// Consecutive-failure circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_threshold: u32,
    success_threshold: u32,
    open_for: Duration,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(failure_threshold: u32, success_threshold: u32, open_for: Duration) -> Self {
        Self {
            state: CircuitState::Closed { failures: 0 },
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_for,
        }
    }

    /// Current state, after applying any elapsed cooldown
    pub fn state(&mut self) -> CircuitState {
        if let CircuitState::Open { opened_at } = self.state {
            if opened_at.elapsed() >= self.open_for {
                debug!("Circuit cooldown elapsed; half-open");
                self.state = CircuitState::HalfOpen { successes: 0 };
            }
        }
        self.state
    }

    /// Whether an action may proceed
    pub fn allow(&mut self) -> bool {
        !matches!(self.state(), CircuitState::Open { .. })
    }

    /// Record a successful action
    pub fn record_success(&mut self) {
        self.state = match self.state() {
            CircuitState::HalfOpen { successes } if successes + 1 >= self.success_threshold => {
                debug!("Circuit closed");
                CircuitState::Closed { failures: 0 }
            }
            CircuitState::HalfOpen { successes } => CircuitState::HalfOpen {
                successes: successes + 1,
            },
            CircuitState::Closed { .. } => CircuitState::Closed { failures: 0 },
            open @ CircuitState::Open { .. } => open,
        };
    }

    /// Record a failed action
    pub fn record_failure(&mut self) {
        self.state = match self.state() {
            CircuitState::Closed { failures } if failures + 1 < self.failure_threshold => {
                CircuitState::Closed {
                    failures: failures + 1,
                }
            }
            CircuitState::Open { opened_at } => CircuitState::Open { opened_at },
            _ => CircuitState::Open {
                opened_at: Instant::now(),
            },
        };
    }
}

/// One breaker per strategy
#[derive(Debug)]
pub struct StrategyBreakers {
    breakers: HashMap<Strategy, CircuitBreaker>,
    template: CircuitBreaker,
}

impl StrategyBreakers {
    /// Breakers configured from executor settings
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            breakers: HashMap::new(),
            template: CircuitBreaker::new(
                config.breaker_failure_threshold,
                config.breaker_success_threshold,
                Duration::from_secs(config.breaker_open_secs),
            ),
        }
    }

    fn breaker(&mut self, strategy: Strategy) -> &mut CircuitBreaker {
        self.breakers
            .entry(strategy)
            .or_insert_with(|| self.template.clone())
    }

    /// Whether the strategy may run
    pub fn allow(&mut self, strategy: Strategy) -> bool {
        self.breaker(strategy).allow()
    }

    /// Feed an execution result into the strategy's breaker
    pub fn record(&mut self, strategy: Strategy, success: bool) {
        let breaker = self.breaker(strategy);
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
            if matches!(breaker.state(), CircuitState::Open { .. }) {
                warn!(strategy = %strategy, "Circuit open for strategy");
            }
        }
    }

    /// Current state of a strategy's breaker
    pub fn state(&mut self, strategy: Strategy) -> CircuitState {
        self.breaker(strategy).state()
    }
}

/// Sliding-window limit on actions started
#[derive(Debug)]
pub struct RateLimiter {
    started: VecDeque<Instant>,
    max_actions: usize,
    window: Duration,
}

impl RateLimiter {
    /// Allow `max_actions` per `window`
    pub fn new(max_actions: usize, window: Duration) -> Self {
        Self {
            started: VecDeque::new(),
            max_actions: max_actions.max(1),
            window,
        }
    }

    /// Limiter configured from executor settings
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            config.rate_limit_actions,
            Duration::from_secs(config.rate_limit_window_secs),
        )
    }

    /// Take a slot if one is free
    pub fn try_acquire(&mut self) -> bool {
        let now = Instant::now();
        while self
            .started
            .front()
            .map(|t| now.duration_since(*t) >= self.window)
            .unwrap_or(false)
        {
            self.started.pop_front();
        }
        if self.started.len() >= self.max_actions {
            return false;
        }
        self.started.push_back(now);
        true
    }

    /// Slots used in the current window
    pub fn in_window(&self) -> usize {
        self.started.len()
    }
}

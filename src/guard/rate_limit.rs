//! Per-client fixed-window rate limiting.
//!
//! Each endpoint scope carries its own set of nested windows (for example
//! 5 per minute and 50 per hour). A request is admitted only if it fits in
//! every window. The check and the increment happen under one lock, so a
//! rejected request is counted against no window at all.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::{RateLimitConfig, RateWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    Predict,
    Reload,
}

impl LimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitScope::Predict => "predict",
            LimitScope::Reload => "reload_models",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub window: RateWindow,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    count: u32,
}

impl WindowState {
    fn expired(&self, window: &RateWindow, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= window.period
    }
}

pub struct RateLimiter {
    policies: HashMap<LimitScope, Vec<RateWindow>>,
    clients: Mutex<HashMap<(LimitScope, IpAddr), Vec<WindowState>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let policies = HashMap::from([
            (LimitScope::Predict, config.predict.clone()),
            (LimitScope::Reload, config.reload.clone()),
        ]);
        Self {
            policies,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, scope: LimitScope, client: IpAddr) -> Result<(), Rejection> {
        self.check_at(scope, client, Instant::now())
    }

    pub fn check_at(&self, scope: LimitScope, client: IpAddr, now: Instant) -> Result<(), Rejection> {
        let windows = match self.policies.get(&scope) {
            Some(windows) if !windows.is_empty() => windows,
            _ => return Ok(()),
        };

        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let states = clients.entry((scope, client)).or_insert_with(|| {
            windows
                .iter()
                .map(|_| WindowState { started: now, count: 0 })
                .collect()
        });

        for (window, state) in windows.iter().zip(states.iter_mut()) {
            if state.expired(window, now) {
                *state = WindowState { started: now, count: 0 };
            }
        }

        // The client has to wait for the latest-resetting full window.
        let blocking = windows
            .iter()
            .zip(states.iter())
            .filter(|(window, state)| state.count >= window.limit)
            .map(|(window, state)| Rejection {
                window: *window,
                retry_after: window
                    .period
                    .saturating_sub(now.saturating_duration_since(state.started)),
            })
            .max_by_key(|rejection| rejection.retry_after);
        if let Some(rejection) = blocking {
            return Err(rejection);
        }

        for state in states.iter_mut() {
            state.count += 1;
        }
        Ok(())
    }

    /// Drops clients whose windows have all expired. Returns how many went.
    pub fn prune(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let before = clients.len();
        clients.retain(|(scope, _), states| {
            let Some(windows) = self.policies.get(scope) else {
                return false;
            };
            windows
                .iter()
                .zip(states.iter())
                .any(|(window, state)| !state.expired(window, now))
        });
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

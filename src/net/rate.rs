// src/net/rate.rs

//! Per-upstream request budgeting over a rolling hour or a calendar day.
//!
//! The pipeline checks the window before each external call; at quota the
//! call is skipped for the cycle, never queued. Every attempted call is
//! recorded afterwards (success or failure) so the window advances.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::error::{FetchError, Result};
use crate::sources::{Quota, QuotaWindow};

/// Rolling-window call counter keyed per upstream API.
#[derive(Default)]
pub struct RateLimiter {
    calls: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls already inside the quota window.
    pub fn used(&self, key: &str, window: QuotaWindow, now: DateTime<Utc>) -> u32 {
        let mut calls = self.calls.lock().expect("limiter lock");
        let Some(entries) = calls.get_mut(key) else {
            return 0;
        };
        prune(entries, now);
        entries
            .iter()
            .filter(|t| in_window(**t, window, now))
            .count() as u32
    }

    /// Gate: error when the window is already at quota.
    pub fn check(
        &self,
        key: &str,
        quota: &Quota,
        authenticated: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let limit = quota.effective_limit(authenticated);
        let used = self.used(key, quota.window, now);
        if used >= limit {
            return Err(FetchError::RateLimited {
                key: key.to_string(),
                used,
                quota: limit,
            });
        }
        Ok(())
    }

    /// Record one attempted call, success or failure.
    pub fn record(&self, key: &str, now: DateTime<Utc>) {
        let mut calls = self.calls.lock().expect("limiter lock");
        let entries = calls.entry(key.to_string()).or_default();
        entries.push_back(now);
        prune(entries, now);
    }

    /// Convenience wrapper: gate then record in one step.
    pub fn check_and_record(
        &self,
        key: &str,
        quota: &Quota,
        authenticated: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check(key, quota, authenticated, now)?;
        self.record(key, now);
        Ok(())
    }
}

/// Oldest records that can no longer count against any window shape.
fn prune(entries: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let horizon = now - Duration::hours(25);
    while let Some(front) = entries.front() {
        if *front < horizon {
            entries.pop_front();
        } else {
            break;
        }
    }
}

fn in_window(t: DateTime<Utc>, window: QuotaWindow, now: DateTime<Utc>) -> bool {
    match window {
        QuotaWindow::RollingHour => now - t < Duration::hours(1),
        QuotaWindow::CalendarDay => t.date_naive() == now.date_naive(),
    }
}

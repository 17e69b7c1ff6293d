//-
// Copyright (c) 2026, Mailstead developers
//
// This file is part of Mailstead.
//
// Mailstead is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailstead is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailstead. If not, see <http://www.gnu.org/licenses/>.

//! The clock used by the dirty-time heuristic.
//!
//! Maildir synchronization compares directory mtimes against "now" with a
//! clock-skew tolerance. Tests need to control "now" precisely, so the
//! notion of current time is a trait with one production implementation
//! and one fixed test implementation rather than direct `SystemTime`
//! calls sprinkled through the sync code.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current Unix time in whole seconds.
pub trait Clock {
    fn now(&self) -> i64;
}

/// The production clock, backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// A clock frozen at a settable instant.
#[cfg(test)]
pub struct FixedClock(pub std::cell::Cell<i64>);

#[cfg(test)]
impl FixedClock {
    pub fn at(now: i64) -> Self {
        FixedClock(std::cell::Cell::new(now))
    }

    pub fn advance(&self, secs: i64) {
        self.0.set(self.0.get() + secs);
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.get()
    }
}

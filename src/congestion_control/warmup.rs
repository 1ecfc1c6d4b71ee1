// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Warm-up gate for gain cycling.
//!
//! Gain cycling stays off for the first few `cong_control` calls so that the
//! initial probe-up gain holds while the first estimates settle.

use core::str::FromStr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Number of calls that keep the initial gain.
pub(super) const WARMUP_CALLS: u32 = 3;

/// Calls counted by every connection using `WarmupScope::Process`.
static PROCESS_WARMUP_CALLS: AtomicU32 = AtomicU32::new(0);

/// Which calls count towards the warm-up.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupScope {
    /// Every connection warms up on its own first calls.
    #[default]
    PerConnection,

    /// One counter is shared by all connections in the process, so only the
    /// first calls after process start are affected. Kept for deployments
    /// tuned against that behavior. The warm-up still lasts `WARMUP_CALLS`
    /// calls, so the first gain transition happens on the fourth call after
    /// process start, not the fifth.
    Process,
}

impl FromStr for WarmupScope {
    type Err = Error;

    fn from_str(scope: &str) -> Result<WarmupScope> {
        if scope.eq_ignore_ascii_case("per_connection") || scope.eq_ignore_ascii_case("connection")
        {
            Ok(WarmupScope::PerConnection)
        } else if scope.eq_ignore_ascii_case("process") {
            Ok(WarmupScope::Process)
        } else {
            Err(Error::InvalidConfig(format!("unknown warmup scope {}", scope)))
        }
    }
}

/// Call counter backing the warm-up gate.
#[derive(Debug)]
pub(super) struct Warmup {
    scope: WarmupScope,

    /// Calls seen by this connection. Unused for `WarmupScope::Process`.
    calls: u32,
}

impl Warmup {
    pub fn new(scope: WarmupScope) -> Self {
        Self { scope, calls: 0 }
    }

    /// Restart the warm-up. The process-wide counter is never rewound.
    pub fn reset(&mut self) {
        self.calls = 0;
    }

    /// Count one call and return whether the warm-up had already elapsed
    /// before it.
    pub fn tick(&mut self) -> bool {
        let prior = match self.scope {
            WarmupScope::PerConnection => {
                let prior = self.calls;
                self.calls = prior.saturating_add(1);
                prior
            }
            WarmupScope::Process => {
                match PROCESS_WARMUP_CALLS.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                    Some(c.saturating_add(1))
                }) {
                    Ok(c) | Err(c) => c,
                }
            }
        };

        prior >= WARMUP_CALLS
    }
}

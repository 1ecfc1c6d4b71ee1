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

//! Caohejing is a bandwidth-probing TCP congestion control algorithm.
//!
//! On every delivery rate sample it estimates the path's bottleneck
//! bandwidth and minimum RTT, then derives a congestion window and a pacing
//! rate from their product and a gain that cycles between probing up and
//! draining down. Loss recovery is handled with packet conservation.
//!
//! The crate is only the decision core. The host transport supplies rate
//! samples and connection facts through [`TcpSock`], and drives the
//! algorithm through the [`CongestionOps`] callbacks.
//!
//! ## Get started
//!
//! ```
//! use caohejing::{Caohejing, CaohejingConfig, CongestionOps, RateSample, TcpSockState};
//!
//! let mut cc = Caohejing::new(CaohejingConfig::default());
//! let mut sk = TcpSockState::default();
//! let rs = RateSample {
//!     delivered: 10,
//!     interval_us: 1_000,
//!     rtt_us: 1_000,
//!     ..RateSample::default()
//! };
//!
//! let out = cc.cong_control(&mut sk, &rs);
//! assert_eq!(out.cwnd, sk.snd_cwnd);
//! ```

use serde::Deserialize;
use serde::Serialize;

pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::CaState;
pub use crate::congestion_control::Caohejing;
pub use crate::congestion_control::CongestionOps;
pub use crate::congestion_control::CongestionStats;
pub use crate::congestion_control::ControlOutput;
pub use crate::congestion_control::CyclePhase;
pub use crate::congestion_control::RateSample;
pub use crate::congestion_control::TcpSock;
pub use crate::congestion_control::TcpSockState;
pub use crate::congestion_control::WarmupScope;
pub use crate::congestion_control::BW_UNIT;
pub use crate::congestion_control::GAIN_UNIT;
pub use crate::error::Error;

/// A specialized [`Result`] type for caohejing operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// Default upper bound of a TSO batch in bytes: the GSO limit minus one and
/// the maximum TCP header.
const DEFAULT_GSO_MAX_BYTES: u64 = 65536 - 1 - 320;

/// Configurations about the Caohejing congestion controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaohejingConfig {
    /// Emit a diagnostic line for every rate sample.
    debug: bool,

    /// Hold the window to packet conservation while in loss recovery.
    conservation: bool,

    /// Which calls count towards the gain cycling warm-up.
    warmup_scope: WarmupScope,

    /// Upper bound of a TSO batch in bytes.
    gso_max_bytes: u64,
}

impl CaohejingConfig {
    /// Create default configuration.
    ///
    /// The configuration may be customized by calling related set methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON. Missing fields keep their defaults.
    ///
    /// ## Examples:
    ///
    /// ```
    /// let conf = caohejing::CaohejingConfig::from_json(r#"{"conservation": false}"#)?;
    /// assert!(!conf.conservation());
    /// # Ok::<(), caohejing::Error>(())
    /// ```
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Enable a diagnostic log line per rate sample.
    /// The default value is false.
    pub fn enable_debug(&mut self, v: bool) {
        self.debug = v;
    }

    /// Enable packet conservation during loss recovery.
    /// The default value is true.
    pub fn enable_conservation(&mut self, v: bool) {
        self.conservation = v;
    }

    /// Set the scope of the gain cycling warm-up.
    /// The default value is `WarmupScope::PerConnection`.
    pub fn set_warmup_scope(&mut self, v: WarmupScope) {
        self.warmup_scope = v;
    }

    /// Set the upper bound of a TSO batch in bytes. Zero is raised to one.
    /// The default value is `65215`.
    pub fn set_gso_max_bytes(&mut self, v: u64) {
        self.gso_max_bytes = v.max(1);
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn conservation(&self) -> bool {
        self.conservation
    }

    pub fn warmup_scope(&self) -> WarmupScope {
        self.warmup_scope
    }

    pub fn gso_max_bytes(&self) -> u64 {
        self.gso_max_bytes
    }
}

impl Default for CaohejingConfig {
    fn default() -> CaohejingConfig {
        CaohejingConfig {
            debug: false,
            conservation: true,
            warmup_scope: WarmupScope::PerConnection,
            gso_max_bytes: DEFAULT_GSO_MAX_BYTES,
        }
    }
}


#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

pub mod error;

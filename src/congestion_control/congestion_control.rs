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

use core::str::FromStr;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::EnumIter;

use crate::CaohejingConfig;
use crate::Error;
use crate::Result;
pub use caohejing::Caohejing;
pub use caohejing::CyclePhase;
pub use warmup::WarmupScope;

/// Fixed-point scale of gains: 8 fractional bits.
pub const GAIN_SCALE: u32 = 8;

/// Gain of 1.0.
pub const GAIN_UNIT: u32 = 1 << GAIN_SCALE;

/// Fixed-point scale of bandwidth, in packets per microsecond: 24 fractional
/// bits.
pub const BW_SCALE: u32 = 24;

/// Bandwidth of one packet per microsecond.
pub const BW_UNIT: u64 = 1 << BW_SCALE;

/// Loss recovery state of a connection, as tracked by the host.
///
/// States are ordered by severity, so `Recovery` and worse states compare
/// greater than or equal to `CaState::Recovery`.
#[repr(u8)]
#[derive(
    Eq, PartialEq, Ord, PartialOrd, Debug, Clone, Copy, Default, EnumIter, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CaState {
    /// Nothing bad has been observed recently.
    #[default]
    Open,

    /// Reordering or duplicate acknowledgements have been seen.
    Disorder,

    /// The window was reduced because of a local or explicit congestion
    /// signal.
    Cwr,

    /// Fast retransmit after a loss detected by acknowledgements.
    Recovery,

    /// Retransmission timeout fired, or loss was otherwise declared.
    Loss,
}

impl FromStr for CaState {
    type Err = Error;

    fn from_str(state: &str) -> Result<CaState> {
        if state.eq_ignore_ascii_case("open") {
            Ok(CaState::Open)
        } else if state.eq_ignore_ascii_case("disorder") {
            Ok(CaState::Disorder)
        } else if state.eq_ignore_ascii_case("cwr") {
            Ok(CaState::Cwr)
        } else if state.eq_ignore_ascii_case("recovery") {
            Ok(CaState::Recovery)
        } else if state.eq_ignore_ascii_case("loss") {
            Ok(CaState::Loss)
        } else {
            Err(Error::InvalidState(state.into()))
        }
    }
}

/// A delivery rate sample generated by the host on each ACK or ACK batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateSample {
    /// Packets delivered over the sampling interval.
    pub delivered: i32,

    /// Length of the sampling interval in microseconds. Non-positive when
    /// the sample is invalid.
    pub interval_us: i64,

    /// RTT of the most recently acknowledged packet in microseconds.
    /// Non-positive when unavailable.
    pub rtt_us: i64,

    /// Packets newly marked lost.
    pub losses: i32,

    /// Packets newly acknowledged or selectively acknowledged.
    pub acked_sacked: u32,

    /// The host's delivered counter when the acknowledged packet was sent.
    pub prior_delivered: u32,
}

/// The connection facts a congestion controller reads from, and writes back
/// to, its host transport.
pub trait TcpSock {
    /// Congestion window in packets.
    fn snd_cwnd(&self) -> u32;

    /// Install a new congestion window.
    fn set_snd_cwnd(&mut self, cwnd: u32);

    /// Slow start threshold in packets.
    fn snd_ssthresh(&self) -> u32;

    /// Upper bound of the congestion window.
    fn snd_cwnd_clamp(&self) -> u32;

    /// Packets currently in flight.
    fn packets_in_flight(&self) -> u32;

    /// Current maximum segment size in bytes.
    fn mss_cache(&self) -> u32;

    /// Total packets delivered (acknowledged) so far. Wraps around.
    fn delivered(&self) -> u32;

    /// Timestamp in microseconds at which `delivered` was last updated.
    fn delivered_mstamp(&self) -> u64;

    /// Current loss recovery state.
    fn ca_state(&self) -> CaState;

    /// Current pacing rate in bytes per second.
    fn pacing_rate(&self) -> u64;

    /// Install a new pacing rate.
    fn set_pacing_rate(&mut self, rate: u64);

    /// Upper bound of the pacing rate in bytes per second.
    fn max_pacing_rate(&self) -> u64;

    /// TSO batches hold about `2^-pacing_shift` seconds of data.
    fn pacing_shift(&self) -> u32 {
        10
    }
}

/// A plain snapshot of host connection state.
///
/// Used where no real transport is attached: tests, trace replay, benches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpSockState {
    pub snd_cwnd: u32,
    pub snd_ssthresh: u32,
    pub snd_cwnd_clamp: u32,
    pub packets_in_flight: u32,
    pub mss_cache: u32,
    pub delivered: u32,
    pub delivered_mstamp: u64,
    pub ca_state: CaState,
    pub pacing_rate: u64,
    pub max_pacing_rate: u64,
    pub pacing_shift: u32,
}

impl Default for TcpSockState {
    fn default() -> Self {
        Self {
            snd_cwnd: 10,
            snd_ssthresh: 0x7fff_ffff,
            snd_cwnd_clamp: u32::MAX,
            packets_in_flight: 0,
            mss_cache: 1460,
            delivered: 0,
            delivered_mstamp: 0,
            ca_state: CaState::Open,
            pacing_rate: 0,
            max_pacing_rate: u64::MAX,
            pacing_shift: 10,
        }
    }
}

impl TcpSock for TcpSockState {
    fn snd_cwnd(&self) -> u32 {
        self.snd_cwnd
    }

    fn set_snd_cwnd(&mut self, cwnd: u32) {
        self.snd_cwnd = cwnd;
    }

    fn snd_ssthresh(&self) -> u32 {
        self.snd_ssthresh
    }

    fn snd_cwnd_clamp(&self) -> u32 {
        self.snd_cwnd_clamp
    }

    fn packets_in_flight(&self) -> u32 {
        self.packets_in_flight
    }

    fn mss_cache(&self) -> u32 {
        self.mss_cache
    }

    fn delivered(&self) -> u32 {
        self.delivered
    }

    fn delivered_mstamp(&self) -> u64 {
        self.delivered_mstamp
    }

    fn ca_state(&self) -> CaState {
        self.ca_state
    }

    fn pacing_rate(&self) -> u64 {
        self.pacing_rate
    }

    fn set_pacing_rate(&mut self, rate: u64) {
        self.pacing_rate = rate;
    }

    fn max_pacing_rate(&self) -> u64 {
        self.max_pacing_rate
    }

    fn pacing_shift(&self) -> u32 {
        self.pacing_shift
    }
}

/// Decisions handed back to the host after each rate sample.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlOutput {
    /// Congestion window in packets.
    pub cwnd: u32,

    /// Pacing rate in bytes per second.
    pub pacing_rate: u64,

    /// Segments per TSO batch used for the window headroom.
    pub tso_segs_goal: u32,
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone)]
pub struct CongestionStats {
    /// Rate samples processed.
    pub rate_samples: u64,

    /// Rate samples whose interval was not positive.
    pub invalid_samples: u64,

    /// Bandwidth cycle windows started.
    pub cycle_boundaries: u64,

    /// Times the connection entered recovery.
    pub recovery_entries: u64,

    /// Times the connection left recovery.
    pub recovery_exits: u64,

    /// Loss state notifications.
    pub loss_events: u64,

    /// Packets reported lost by rate samples.
    pub packets_lost: u64,
}

/// Congestion control callbacks invoked by the host transport.
///
/// The host serializes calls per connection.
pub trait CongestionOps {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Reset all state to the values of a new connection.
    fn init(&mut self);

    /// Called when the host recomputes its slow start threshold after loss.
    fn ssthresh(&mut self, sk: &dyn TcpSock) -> u32;

    /// Congestion window to restore after a spurious loss signal.
    fn undo_cwnd(&self) -> u32;

    /// Loss recovery state change.
    fn set_state(&mut self, sk: &mut dyn TcpSock, new_state: CaState);

    /// Main per rate sample update.
    fn cong_control(&mut self, sk: &mut dyn TcpSock, rs: &RateSample) -> ControlOutput;

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller {}.", self.name())
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(conf: &CaohejingConfig) -> Box<dyn CongestionOps> {
    Box::new(Caohejing::new(conf.clone()))
}


mod caohejing;
mod minmax;
mod pacing;
mod warmup;

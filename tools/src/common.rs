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

use std::io::BufRead;

use log::debug;
use log::trace;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use serde::Deserialize;
use serde::Serialize;

use caohejing::build_congestion_controller;
use caohejing::CaState;
use caohejing::CaohejingConfig;
use caohejing::CongestionOps;
use caohejing::ControlOutput;
use caohejing::RateSample;
use caohejing::TcpSockState;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// One host callback recorded in a trace, stored as a JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// The connection was (re)initialized.
    Init,

    /// The host recomputed its slow start threshold.
    Ssthresh { sock: TcpSockState },

    /// The host changed its loss recovery state.
    SetState { sock: TcpSockState, state: CaState },

    /// A delivery rate sample was generated.
    Sample {
        sock: TcpSockState,
        sample: RateSample,
    },
}

/// Read a JSON lines trace. Blank lines and lines starting with `#` are
/// skipped.
pub fn read_trace<R: BufRead>(reader: R) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event = serde_json::from_str(line)
            .map_err(|e| format!("invalid trace line {}: {}", i + 1, e))?;
        events.push(event);
    }

    Ok(events)
}

/// Output line of a replay.
#[derive(Debug, Serialize)]
pub struct ReplayRecord {
    pub step: u64,

    #[serde(flatten)]
    pub output: ControlOutput,
}

/// Drives a congestion controller with recorded or synthetic host events.
///
/// The window and pacing rate decided by the controller are carried over to
/// the next event, so the replay runs closed loop.
pub struct Replayer {
    cc: Box<dyn CongestionOps>,
    sk: TcpSockState,
    started: bool,
}

impl Replayer {
    pub fn new(conf: &CaohejingConfig) -> Self {
        Self {
            cc: build_congestion_controller(conf),
            sk: TcpSockState::default(),
            started: false,
        }
    }

    pub fn controller(&self) -> &dyn CongestionOps {
        self.cc.as_ref()
    }

    pub fn sock(&self) -> &TcpSockState {
        &self.sk
    }

    pub fn sock_mut(&mut self) -> &mut TcpSockState {
        &mut self.sk
    }

    /// Replace the host snapshot, keeping the controller's own decisions.
    fn load_sock(&mut self, sock: &TcpSockState) {
        let (cwnd, pacing_rate) = (self.sk.snd_cwnd, self.sk.pacing_rate);
        self.sk = sock.clone();
        if self.started {
            self.sk.snd_cwnd = cwnd;
            self.sk.pacing_rate = pacing_rate;
        }
        self.started = true;
    }

    /// Apply one event. Returns the controller output for rate samples.
    pub fn apply(&mut self, event: &TraceEvent) -> Option<ControlOutput> {
        match event {
            TraceEvent::Init => {
                self.cc.init();
                None
            }
            TraceEvent::Ssthresh { sock } => {
                self.load_sock(sock);
                let ssthresh = self.cc.ssthresh(&self.sk);
                debug!("ssthresh {} cwnd {}", ssthresh, self.sk.snd_cwnd);
                None
            }
            TraceEvent::SetState { sock, state } => {
                self.load_sock(sock);
                self.sk.ca_state = *state;
                self.cc.set_state(&mut self.sk, *state);
                None
            }
            TraceEvent::Sample { sock, sample } => {
                self.load_sock(sock);
                Some(self.cc.cong_control(&mut self.sk, sample))
            }
        }
    }
}

/// A single-bottleneck path with a drop-tail buffer, generating the rate
/// samples a cwnd-limited sender would observe.
pub struct SyntheticPath {
    /// Bottleneck capacity in packets per millisecond.
    capacity: f64,

    /// Propagation round trip time in microseconds.
    base_rtt_us: u64,

    /// Bottleneck buffer in packets.
    buffer: u32,

    /// Relative jitter of the delivery rate.
    jitter: f64,

    /// Time between two ACK batches in microseconds.
    step_us: u64,

    rng: StdRng,
    now_us: u64,
    delivered: u32,

    /// Steps left before loss recovery completes.
    recovery_left: u64,
}

impl SyntheticPath {
    pub fn new(capacity_mbps: f64, mss: u32, base_rtt_ms: u64, buffer: u32, seed: u64) -> Self {
        Self {
            capacity: capacity_mbps * 1_000_000.0 / 8.0 / mss.max(1) as f64 / 1000.0,
            base_rtt_us: base_rtt_ms.max(1) * 1000,
            buffer,
            jitter: 0.05,
            step_us: 1000,
            rng: StdRng::seed_from_u64(seed),
            now_us: 0,
            delivered: 0,
            recovery_left: 0,
        }
    }

    /// Set the relative jitter of the delivery rate, within `[0, 1)`.
    pub fn set_jitter(&mut self, jitter: f64) {
        self.jitter = jitter.clamp(0.0, 0.99);
    }

    /// Bandwidth-delay product in packets.
    pub fn bdp(&self) -> u32 {
        (self.capacity * self.base_rtt_us as f64 / 1000.0) as u32
    }

    /// Advance one ACK batch. The host snapshot is updated in place and the
    /// resulting rate sample returned.
    pub fn step(&mut self, sk: &mut TcpSockState) -> RateSample {
        self.now_us += self.step_us;

        // The sender keeps a full window in flight.
        let mut in_flight = sk.snd_cwnd;
        let bdp = self.bdp();
        let losses = in_flight.saturating_sub(bdp.saturating_add(self.buffer));
        in_flight -= losses;

        let factor = if self.jitter > 0.0 {
            self.rng.gen_range(1.0 - self.jitter..1.0 + self.jitter)
        } else {
            1.0
        };
        let step_ms = self.step_us as f64 / 1000.0;
        let acked = in_flight.min((self.capacity * step_ms * factor).round() as u32);

        let queue = in_flight.saturating_sub(bdp);
        let queue_delay_us = (queue as f64 / self.capacity.max(f64::MIN_POSITIVE) * 1000.0) as u64;
        let rtt_us = self.base_rtt_us + queue_delay_us;

        let prior_delivered = self.delivered.wrapping_sub(in_flight - acked);
        self.delivered = self.delivered.wrapping_add(acked);

        if losses > 0 {
            self.recovery_left = rtt_us / self.step_us + 1;
        } else {
            self.recovery_left = self.recovery_left.saturating_sub(1);
        }

        sk.delivered = self.delivered;
        sk.delivered_mstamp = self.now_us;
        sk.packets_in_flight = in_flight - acked;
        sk.ca_state = if self.recovery_left > 0 {
            CaState::Recovery
        } else {
            CaState::Open
        };

        trace!(
            "path t={} in_flight={} acked={} losses={} rtt_us={}",
            self.now_us,
            in_flight,
            acked,
            losses,
            rtt_us
        );

        RateSample {
            delivered: acked as i32,
            interval_us: self.step_us as i64,
            rtt_us: rtt_us as i64,
            losses: losses as i32,
            acked_sacked: acked,
            prior_delivered,
        }
    }
}

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

//! Caohejing Congestion Control.
//!
//! Caohejing keeps a windowed max of the delivery rate and the minimum RTT
//! observed on the connection, and sizes both the congestion window and the
//! pacing rate from their product. Once per min RTT it compares the
//! bandwidth estimate with the one captured at the start of the previous
//! window and toggles between a probe-up gain of 5/4 and a drain-down gain
//! of 3/4. Keeping probe-up requires more than 5% growth, and leaving
//! drain-down requires more than a 5% drop, so noise does not flip the phase.
//!
//! While the host is in loss recovery the window follows packet
//! conservation: it never drops below what is in flight plus what was just
//! acknowledged.

use log::*;

use super::minmax::WindowedMax;
use super::pacing;
use super::warmup::Warmup;
use super::CaState;
use super::CongestionOps;
use super::CongestionStats;
use super::ControlOutput;
use super::RateSample;
use super::TcpSock;
use super::BW_SCALE;
use super::BW_UNIT;
use super::GAIN_SCALE;
use super::GAIN_UNIT;
use crate::CaohejingConfig;

/// Length of the bandwidth max filter window, in rounds.
const BW_FILTER_LEN: u32 = 10;

/// Gain while bandwidth keeps growing.
const PROBE_UP_GAIN: u32 = GAIN_UNIT * 5 / 4;

/// Gain once bandwidth has stopped growing.
const DRAIN_DOWN_GAIN: u32 = GAIN_UNIT * 3 / 4;

/// Min RTT before any valid RTT sample.
const MIN_RTT_UNKNOWN: u32 = 0x7fff_ffff;

/// Floor of the modelled congestion window, in packets.
const MIN_CWND: u32 = 2;

/// TSO batches of headroom added on top of the BDP.
const TSO_HEADROOM: u32 = 3;

/// Direction of the gain cycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum CyclePhase {
    /// Pace above the estimated bandwidth.
    #[default]
    ProbeUp,

    /// Pace below the estimated bandwidth.
    DrainDown,
}

/// Round counter driving the bandwidth filter.
///
/// A round ends when a packet sent after the previous round ended is
/// acknowledged.
#[derive(Debug, Default)]
struct RoundTripCounter {
    /// Rounds since the current bandwidth cycle window began.
    round_count: u32,

    /// Delivered count denoting the end of the current round.
    next_round_delivered: u32,
}

/// Wrap-safe comparison of 32-bit delivered counters.
fn before(seq1: u32, seq2: u32) -> bool {
    (seq1.wrapping_sub(seq2) as i32) < 0
}

/// Caohejing Congestion Control Algorithm.
#[derive(Debug)]
pub struct Caohejing {
    /// Configurable parameters.
    config: CaohejingConfig,

    /// Statistics.
    stats: CongestionStats,

    /// Current direction of the gain cycle.
    phase: CyclePhase,

    /// Multiplier applied to the bandwidth estimate, scaled by `GAIN_UNIT`.
    gain: u32,

    /// Smallest RTT seen since the connection started.
    min_rtt_us: u32,

    /// Counter of rounds.
    round: RoundTripCounter,

    /// Congestion window when the host last recomputed ssthresh.
    prior_cwnd: u32,

    /// Max filter of delivery rate samples, in `BW_UNIT` packets per
    /// microsecond.
    bw_filter: WindowedMax,

    /// Bandwidth captured when the current cycle window began.
    curr_bw: u64,

    /// Bandwidth captured when the previous cycle window began.
    last_bw: u64,

    /// Delivery timestamp at which the current cycle window began.
    cycle_mstamp: u64,

    /// Host loss state on the previous call.
    prev_ca_state: CaState,

    /// Host loss state on the current call.
    ca_state: CaState,

    /// Whether cwnd is held to packet conservation.
    packet_conservation: bool,

    /// Warm-up gate for gain cycling.
    warmup: Warmup,
}

impl Caohejing {
    pub fn new(config: CaohejingConfig) -> Self {
        let warmup = Warmup::new(config.warmup_scope);
        let mut c = Self {
            config,
            stats: Default::default(),
            phase: CyclePhase::ProbeUp,
            gain: PROBE_UP_GAIN,
            min_rtt_us: MIN_RTT_UNKNOWN,
            round: Default::default(),
            prior_cwnd: 0,
            bw_filter: WindowedMax::new(),
            curr_bw: 0,
            last_bw: 0,
            cycle_mstamp: 0,
            prev_ca_state: CaState::Open,
            ca_state: CaState::Open,
            packet_conservation: false,
            warmup,
        };
        c.init();

        c
    }

    /// Current gain cycle phase.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Current gain, scaled by 256.
    pub fn gain(&self) -> u32 {
        self.gain
    }

    /// Smallest RTT sample so far, or `0x7fffffff` if none.
    pub fn min_rtt_us(&self) -> u32 {
        self.min_rtt_us
    }

    /// Windowed max bandwidth in packets per microsecond scaled by 2^24.
    pub fn bandwidth(&self) -> u64 {
        self.bw_filter.get()
    }

    /// Rounds counted in the current cycle window.
    pub fn round_count(&self) -> u32 {
        self.round.round_count
    }

    /// Congestion window saved by the last `ssthresh()` call.
    pub fn prior_cwnd(&self) -> u32 {
        self.prior_cwnd
    }

    /// Whether cwnd is held to packet conservation.
    pub fn in_packet_conservation(&self) -> bool {
        self.packet_conservation
    }

    fn enter_probe_up(&mut self) {
        self.phase = CyclePhase::ProbeUp;
        self.gain = PROBE_UP_GAIN;
    }

    fn enter_drain_down(&mut self) {
        self.phase = CyclePhase::DrainDown;
        self.gain = DRAIN_DOWN_GAIN;
    }

    /// Advance the round counter once the acknowledged packet was sent after
    /// the current round began.
    fn update_round(&mut self, sk: &dyn TcpSock, rs: &RateSample) {
        if !before(rs.prior_delivered, self.round.next_round_delivered) {
            self.round.next_round_delivered = sk.delivered();
            self.round.round_count = self.round.round_count.wrapping_add(1);
        }
    }

    fn update_min_rtt(&mut self, rs: &RateSample) {
        if rs.rtt_us > 0 && rs.rtt_us <= self.min_rtt_us as i64 {
            self.min_rtt_us = rs.rtt_us as u32;
        }
    }

    /// Feed the sample's delivery rate into the max filter if it is a new
    /// max.
    fn update_bw(&mut self, rs: &RateSample) {
        if rs.interval_us <= 0 || rs.delivered < 0 {
            self.stats.invalid_samples = self.stats.invalid_samples.saturating_add(1);
            return;
        }

        let bw = (rs.delivered as u64 * BW_UNIT) / rs.interval_us as u64;
        if bw > self.bw_filter.get() {
            self.bw_filter
                .running_max(BW_FILTER_LEN, self.round.round_count, bw);
        }
    }

    /// Check whether a min RTT has elapsed since the cycle window began, and
    /// if so start a new one.
    fn is_next_cycle_phase(&mut self, sk: &dyn TcpSock) -> bool {
        let now = sk.delivered_mstamp();
        let is_full_length = now.saturating_sub(self.cycle_mstamp) > self.min_rtt_us as u64;

        if self.cycle_mstamp == 0 || is_full_length {
            self.cycle_mstamp = now;
            self.last_bw = self.curr_bw;
            self.curr_bw = self.bw_filter.get();
            self.stats.cycle_boundaries = self.stats.cycle_boundaries.saturating_add(1);
            return true;
        }

        false
    }

    /// Pick the gain for the current bandwidth estimate.
    fn update_gain(&mut self, bw: u64) {
        let bw = bw as u128;
        let last_bw = self.last_bw as u128;

        match self.phase {
            CyclePhase::ProbeUp => {
                // Still growing by more than 5%.
                if 20 * bw > 21 * last_bw {
                    self.enter_probe_up();
                } else {
                    self.enter_drain_down();
                }
            }
            CyclePhase::DrainDown => {
                // Dropped by more than 5%.
                if 19 * last_bw > 20 * bw {
                    self.enter_probe_up();
                } else {
                    self.enter_drain_down();
                }
            }
        }
    }

    /// Congestion window for the current model: the BDP scaled by gain, plus
    /// TSO headroom, rounded up to an even number of packets.
    fn target_cwnd(&self, bw: u64, tso_segs_goal: u32) -> u32 {
        let bdp = bw as u128 * self.min_rtt_us as u128;
        let scaled = bdp.saturating_mul(self.gain as u128) >> GAIN_SCALE;
        let cwnd = scaled.saturating_add(BW_UNIT as u128 - 1) >> BW_SCALE;
        let cwnd = u32::try_from(cwnd).unwrap_or(u32::MAX).max(MIN_CWND);

        let cwnd = cwnd.saturating_add(TSO_HEADROOM.saturating_mul(tso_segs_goal));
        cwnd.saturating_add(1) & !1
    }

    /// Apply losses and recovery state edges to the window, starting from
    /// the window the host had when the sample arrived.
    fn modulate_cwnd_for_recovery(&mut self, sk: &mut dyn TcpSock, rs: &RateSample, old_cwnd: u32) {
        let mut cwnd = old_cwnd;
        // Never below one packet, even with nothing in flight.
        let conserved = sk
            .packets_in_flight()
            .saturating_add(rs.acked_sacked)
            .max(1);

        if rs.losses > 0 {
            cwnd = (cwnd as i64 - rs.losses as i64).max(1) as u32;
        }

        if self.ca_state == CaState::Recovery && self.prev_ca_state != CaState::Recovery {
            // Hold in-flight data steady for a round.
            cwnd = conserved;
            self.round.next_round_delivered = sk.delivered();
            self.packet_conservation = true;
            self.stats.recovery_entries = self.stats.recovery_entries.saturating_add(1);
            trace!(
                "{} enter recovery, cwnd={} in_flight={}",
                self.name(),
                cwnd,
                sk.packets_in_flight()
            );
        } else if self.prev_ca_state >= CaState::Recovery && self.ca_state < CaState::Recovery {
            sk.set_snd_cwnd(self.prior_cwnd.max(conserved));
            self.enter_probe_up();
            self.packet_conservation = false;
            self.stats.recovery_exits = self.stats.recovery_exits.saturating_add(1);
            trace!(
                "{} exit recovery, cwnd={} prior_cwnd={}",
                self.name(),
                sk.snd_cwnd(),
                self.prior_cwnd
            );
        }

        if self.packet_conservation {
            self.enter_drain_down();
            sk.set_snd_cwnd(cwnd.max(conserved));
        }
    }
}

impl CongestionOps for Caohejing {
    fn name(&self) -> &str {
        "caohejing"
    }

    fn init(&mut self) {
        self.enter_probe_up();
        self.min_rtt_us = MIN_RTT_UNKNOWN;
        self.prev_ca_state = CaState::Open;
        self.ca_state = CaState::Open;
        self.packet_conservation = false;
        self.round = Default::default();
        self.curr_bw = 0;
        self.last_bw = 0;
        self.prior_cwnd = 0;
        self.bw_filter.reset(self.round.round_count, 0);
        self.cycle_mstamp = 0;
        self.warmup.reset();
    }

    fn ssthresh(&mut self, sk: &dyn TcpSock) -> u32 {
        self.prior_cwnd = sk.snd_cwnd();
        sk.snd_ssthresh()
    }

    fn undo_cwnd(&self) -> u32 {
        self.prior_cwnd.max(MIN_CWND)
    }

    fn set_state(&mut self, sk: &mut dyn TcpSock, new_state: CaState) {
        if new_state == CaState::Loss {
            // Restart conservatively after a timeout.
            sk.set_snd_cwnd(sk.packets_in_flight().saturating_add(1));
            self.stats.loss_events = self.stats.loss_events.saturating_add(1);
            trace!("{} loss, cwnd={}", self.name(), sk.snd_cwnd());
        }
    }

    fn cong_control(&mut self, sk: &mut dyn TcpSock, rs: &RateSample) -> ControlOutput {
        let old_cwnd = sk.snd_cwnd();
        self.ca_state = sk.ca_state();
        self.stats.rate_samples = self.stats.rate_samples.saturating_add(1);
        if rs.losses > 0 {
            self.stats.packets_lost = self.stats.packets_lost.saturating_add(rs.losses as u64);
        }

        // Update the path model.
        self.update_round(sk, rs);
        self.update_min_rtt(rs);
        self.update_bw(rs);

        let is_next = self.is_next_cycle_phase(sk);
        let bw = self.bw_filter.get();

        if self.warmup.tick() {
            self.update_gain(bw);
        }

        // Size the window from the model.
        let mss = sk.mss_cache();
        let tso_segs_goal = pacing::tso_segs_goal(
            sk.pacing_rate(),
            mss,
            sk.pacing_shift(),
            self.config.gso_max_bytes,
        );
        sk.set_snd_cwnd(self.target_cwnd(bw, tso_segs_goal));

        if is_next {
            // Each cycle window starts from a clean filter.
            self.round.round_count = 0;
            self.bw_filter.reset(self.round.round_count, 0);
        }

        if self.config.conservation {
            self.modulate_cwnd_for_recovery(sk, rs, old_cwnd);
        }

        self.prev_ca_state = self.ca_state;

        let pacing_rate = pacing::bw_to_pacing_rate(bw, mss, self.gain, sk.max_pacing_rate());
        sk.set_pacing_rate(pacing_rate);
        sk.set_snd_cwnd(sk.snd_cwnd().min(sk.snd_cwnd_clamp()));

        if self.config.debug {
            debug!(
                "{} phase={:?} ca_state={:?} bw={} last_bw={} cwnd={} min_rtt_us={} gain={}",
                self.name(),
                self.phase,
                self.ca_state,
                bw,
                self.last_bw,
                sk.snd_cwnd(),
                self.min_rtt_us,
                self.gain
            );
        }

        ControlOutput {
            cwnd: sk.snd_cwnd(),
            pacing_rate,
            tso_segs_goal,
        }
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::TcpSockState;
    use crate::congestion_control::WarmupScope;

    fn new_cc(conservation: bool) -> Caohejing {
        let mut conf = CaohejingConfig::default();
        conf.enable_conservation(conservation);
        conf.enable_debug(true);
        Caohejing::new(conf)
    }

    fn sample(delivered: i32, interval_us: i64, rtt_us: i64) -> RateSample {
        RateSample {
            delivered,
            interval_us,
            rtt_us,
            ..RateSample::default()
        }
    }

    fn assert_gain_matches_phase(cc: &Caohejing) {
        match cc.phase() {
            CyclePhase::ProbeUp => assert_eq!(cc.gain(), 320),
            CyclePhase::DrainDown => assert_eq!(cc.gain(), 192),
        }
    }

    #[test]
    fn caohejing_init() {
        let cc = new_cc(true);

        assert_eq!(cc.name(), "caohejing");
        assert_eq!(cc.phase(), CyclePhase::ProbeUp);
        assert_eq!(cc.gain(), PROBE_UP_GAIN);
        assert_eq!(cc.gain(), 320);
        assert_eq!(cc.min_rtt_us(), MIN_RTT_UNKNOWN);
        assert_eq!(cc.bandwidth(), 0);
        assert_eq!(cc.round_count(), 0);
        assert_eq!(cc.prior_cwnd(), 0);
        assert_eq!(cc.cycle_mstamp, 0);
        assert!(!cc.in_packet_conservation());
        assert_eq!(cc.undo_cwnd(), 2);
    }

    #[test]
    fn caohejing_reinit() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            delivered_mstamp: 1_000,
            snd_cwnd: 30,
            ..TcpSockState::default()
        };

        for _ in 0..10 {
            sk.delivered_mstamp += 5_000;
            cc.cong_control(&mut sk, &sample(10, 1_000, 1_000));
        }
        cc.ssthresh(&sk);
        assert_ne!(cc.min_rtt_us(), MIN_RTT_UNKNOWN);
        assert_eq!(cc.phase(), CyclePhase::DrainDown);

        cc.init();
        assert_eq!(cc.phase(), CyclePhase::ProbeUp);
        assert_eq!(cc.gain(), 320);
        assert_eq!(cc.min_rtt_us(), MIN_RTT_UNKNOWN);
        assert_eq!(cc.bandwidth(), 0);
        assert_eq!(cc.round_count(), 0);
        assert_eq!(cc.round.next_round_delivered, 0);
        assert_eq!(cc.prior_cwnd(), 0);
        assert_eq!((cc.curr_bw, cc.last_bw, cc.cycle_mstamp), (0, 0, 0));
    }

    #[test]
    fn sequence_before() {
        assert!(before(1, 2));
        assert!(!before(2, 2));
        assert!(!before(3, 2));

        // Across wrap around.
        assert!(before(u32::MAX, 0));
        assert!(!before(5, u32::MAX - 5));
    }

    #[test]
    fn min_rtt_non_increasing() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState::default();

        let rtts = [50_000, 40_000, 0, 45_000, -1, 30_000, 30_000, 90_000, 0];
        let mut last = cc.min_rtt_us();
        for rtt in rtts {
            sk.delivered_mstamp += 1_000;
            cc.cong_control(&mut sk, &sample(1, 1_000, rtt));
            assert!(cc.min_rtt_us() <= last);
            last = cc.min_rtt_us();
        }
        assert_eq!(cc.min_rtt_us(), 30_000);
    }

    #[test]
    fn zero_rtt_ignored() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState::default();

        cc.cong_control(&mut sk, &sample(1, 1_000, 0));
        assert_eq!(cc.min_rtt_us(), MIN_RTT_UNKNOWN);

        cc.cong_control(&mut sk, &sample(1, 1_000, 20_000));
        cc.cong_control(&mut sk, &sample(1, 1_000, 0));
        assert_eq!(cc.min_rtt_us(), 20_000);
    }

    #[test]
    fn invalid_interval_ignored() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            delivered_mstamp: 1_000,
            ..TcpSockState::default()
        };

        // First call opens a cycle window and resets the filter.
        cc.cong_control(&mut sk, &sample(10, 1_000, 100_000));

        sk.delivered_mstamp += 1_000;
        cc.cong_control(&mut sk, &sample(10, 1_000, 100_000));
        let bw = cc.bandwidth();
        assert_eq!(bw, 10 * BW_UNIT / 1_000);

        for interval_us in [0, -1, i64::MIN] {
            sk.delivered_mstamp += 1_000;
            cc.cong_control(&mut sk, &sample(1_000, interval_us, 100_000));
            assert_eq!(cc.bandwidth(), bw);
        }
        sk.delivered_mstamp += 1_000;
        cc.cong_control(&mut sk, &sample(-5, 1, 100_000));
        assert_eq!(cc.bandwidth(), bw);
        assert_eq!(cc.stats().invalid_samples, 4);
        assert_eq!(cc.stats().rate_samples, 6);
    }

    #[test]
    fn round_advances_on_delivered() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            delivered: 10,
            delivered_mstamp: 1_000,
            ..TcpSockState::default()
        };

        // Ends round 0, then the cycle window boundary restarts the count.
        cc.cong_control(&mut sk, &sample(1, 1_000, 10_000));
        assert_eq!(cc.round.next_round_delivered, 10);
        assert_eq!(cc.round_count(), 0);

        sk.delivered = 20;
        sk.delivered_mstamp = 2_000;
        let rs = RateSample {
            prior_delivered: 5,
            ..sample(1, 1_000, 10_000)
        };
        cc.cong_control(&mut sk, &rs);
        assert_eq!(cc.round_count(), 0);

        sk.delivered = 30;
        sk.delivered_mstamp = 3_000;
        let rs = RateSample {
            prior_delivered: 10,
            ..sample(1, 1_000, 10_000)
        };
        cc.cong_control(&mut sk, &rs);
        assert_eq!(cc.round_count(), 1);
        assert_eq!(cc.round.next_round_delivered, 30);

        sk.delivered = 40;
        sk.delivered_mstamp = 4_000;
        let rs = RateSample {
            prior_delivered: 12,
            ..sample(1, 1_000, 10_000)
        };
        cc.cong_control(&mut sk, &rs);
        assert_eq!(cc.round_count(), 1);
    }

    #[test]
    fn round_advances_across_wrap() {
        let mut cc = new_cc(true);
        cc.round.next_round_delivered = u32::MAX - 2;
        cc.cycle_mstamp = 1;
        cc.min_rtt_us = 1_000_000;

        let mut sk = TcpSockState {
            delivered: 7,
            delivered_mstamp: 10,
            ..TcpSockState::default()
        };
        let rs = RateSample {
            prior_delivered: 3,
            ..sample(1, 1_000, 0)
        };
        cc.cong_control(&mut sk, &rs);
        assert_eq!(cc.round_count(), 1);
        assert_eq!(cc.round.next_round_delivered, 7);
    }

    #[test]
    fn cycle_boundary_resets_filter() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            delivered_mstamp: 1_000,
            ..TcpSockState::default()
        };

        cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        assert_eq!(cc.curr_bw, 10 * BW_UNIT / 1_000);
        assert_eq!(cc.last_bw, 0);
        assert_eq!(cc.cycle_mstamp, 1_000);
        assert_eq!(cc.bandwidth(), 0);

        // Within the window: curr_bw and last_bw untouched.
        sk.delivered_mstamp = 11_000;
        cc.cong_control(&mut sk, &sample(20, 1_000, 10_000));
        assert_eq!(cc.bandwidth(), 20 * BW_UNIT / 1_000);
        assert_eq!(cc.curr_bw, 10 * BW_UNIT / 1_000);
        assert_eq!(cc.last_bw, 0);

        // More than a min RTT later.
        sk.delivered_mstamp = 11_001;
        cc.cong_control(&mut sk, &sample(15, 1_000, 10_000));
        assert_eq!(cc.last_bw, 10 * BW_UNIT / 1_000);
        assert_eq!(cc.curr_bw, 20 * BW_UNIT / 1_000);
        assert_eq!(cc.cycle_mstamp, 11_001);
        assert_eq!(cc.bandwidth(), 0);
        assert_eq!(cc.round_count(), 0);
        assert_eq!(cc.stats().cycle_boundaries, 2);
    }

    #[test]
    fn warmup_holds_gain() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState::default();

        // Every call crosses a cycle window with a flat bandwidth, which
        // would switch to drain-down right away without the warm-up.
        for _ in 0..3 {
            sk.delivered_mstamp += 100_000;
            cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
            assert_eq!(cc.phase(), CyclePhase::ProbeUp);
            assert_eq!(cc.gain(), 320);
        }

        sk.delivered_mstamp += 100_000;
        cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        assert_eq!(cc.phase(), CyclePhase::DrainDown);
        assert_eq!(cc.gain(), 192);
    }

    #[test]
    fn warmup_process_scope() {
        let mut conf = CaohejingConfig::default();
        conf.set_warmup_scope(WarmupScope::Process);

        // Exhaust the shared counter.
        let mut first = Caohejing::new(conf.clone());
        let mut sk = TcpSockState::default();
        for _ in 0..4 {
            sk.delivered_mstamp += 100_000;
            first.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        }

        // A new connection cycles gain from its second cycle window.
        let mut second = Caohejing::new(conf);
        let mut sk = TcpSockState::default();
        sk.delivered_mstamp += 100_000;
        second.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        sk.delivered_mstamp += 100_000;
        second.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        assert_eq!(second.phase(), CyclePhase::DrainDown);
    }

    #[test]
    fn constant_bandwidth_settles() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState::default();
        let mut phases = Vec::new();

        // One call per millisecond, cycle windows of 10ms.
        for _ in 0..100 {
            sk.delivered_mstamp += 1_000;
            cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
            assert_gain_matches_phase(&cc);
            phases.push(cc.phase());
        }

        let first_drain = phases
            .iter()
            .position(|p| *p == CyclePhase::DrainDown)
            .unwrap();
        assert!(phases[..first_drain].iter().all(|p| *p == CyclePhase::ProbeUp));
        assert!(phases[first_drain..]
            .iter()
            .all(|p| *p == CyclePhase::DrainDown));
    }

    #[test]
    fn gain_cycles_with_bandwidth() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState::default();

        // Every call crosses a cycle window.
        let mut step = |cc: &mut Caohejing, delivered: i32| {
            sk.delivered_mstamp += 100_000;
            cc.cong_control(&mut sk, &sample(delivered, 1_000, 10_000));
            assert_gain_matches_phase(cc);
            cc.phase()
        };

        for _ in 0..3 {
            step(&mut cc, 100);
        }

        // Growing by 10% keeps probing.
        assert_eq!(step(&mut cc, 110), CyclePhase::ProbeUp);
        assert_eq!(step(&mut cc, 121), CyclePhase::ProbeUp);

        // Growing by less than 5% drains.
        assert_eq!(step(&mut cc, 125), CyclePhase::DrainDown);

        // Small drops stay in drain-down.
        assert_eq!(step(&mut cc, 122), CyclePhase::DrainDown);

        // Dropping by more than 5% probes again.
        assert_eq!(step(&mut cc, 110), CyclePhase::ProbeUp);
    }

    #[test]
    fn cwnd_from_model() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState {
            delivered_mstamp: 1_000,
            ..TcpSockState::default()
        };

        // bw = 10 * 2^24 / 1000 = 167772, bdp = 167772 * 1000.
        // ceil(bdp * 320 / 256 / 2^24) = 13, plus 3 TSO segments of headroom,
        // rounded up to 16.
        let out = cc.cong_control(&mut sk, &sample(10, 1_000, 1_000));
        assert_eq!(out.tso_segs_goal, 1);
        assert_eq!(out.cwnd, 16);
        assert_eq!(sk.snd_cwnd, 16);

        let expected = pacing::rate_bytes_per_sec(167_772, 1460, 320);
        assert_eq!(out.pacing_rate, expected);
        assert_eq!(sk.pacing_rate, expected);
    }

    #[test]
    fn cwnd_even_and_floored() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState::default();

        let samples = [
            sample(0, 1_000, 10_000),
            sample(1, 1_000_000, 1),
            sample(3, 7_000, 123),
            sample(500, 1_000, 50_000),
            sample(1, 0, 10),
            sample(7, 333, 9_999),
        ];
        for (i, rs) in samples.iter().cycle().take(60).enumerate() {
            sk.delivered_mstamp += 700 * i as u64;
            sk.packets_in_flight = i as u32;
            let out = cc.cong_control(&mut sk, rs);
            assert!(out.cwnd >= 2);
            assert_eq!(out.cwnd % 2, 0);
        }
    }

    #[test]
    fn cwnd_without_rtt_saturates() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState::default();

        let out = cc.cong_control(&mut sk, &sample(1_000_000, 1, -1));
        assert_eq!(out.cwnd, u32::MAX - 1);
    }

    #[test]
    fn cwnd_and_pacing_clamped() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState {
            snd_cwnd_clamp: 9,
            max_pacing_rate: 1_000,
            ..TcpSockState::default()
        };

        // The clamp applies last, so an odd clamp yields an odd window.
        let out = cc.cong_control(&mut sk, &sample(100, 1_000, 100_000));
        assert_eq!(out.cwnd, 9);
        assert_eq!(out.pacing_rate, 1_000);
    }

    #[test]
    fn recovery_entry() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            snd_cwnd: 40,
            packets_in_flight: 10,
            ca_state: CaState::Recovery,
            delivered: 77,
            ..TcpSockState::default()
        };
        let rs = RateSample {
            acked_sacked: 2,
            ..sample(10, 1_000, 10_000)
        };

        let out = cc.cong_control(&mut sk, &rs);
        assert_eq!(out.cwnd, 12);
        assert!(cc.in_packet_conservation());
        assert_eq!(cc.phase(), CyclePhase::DrainDown);
        assert_eq!(cc.gain(), 192);
        assert_eq!(cc.round.next_round_delivered, 77);
        assert_eq!(cc.stats().recovery_entries, 1);
        assert_eq!(
            out.pacing_rate,
            pacing::rate_bytes_per_sec(10 * BW_UNIT / 1_000, 1460, 192)
        );
    }

    #[test]
    fn recovery_losses_reduce_cwnd() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            packets_in_flight: 10,
            ca_state: CaState::Recovery,
            ..TcpSockState::default()
        };
        let rs = RateSample {
            acked_sacked: 2,
            ..sample(10, 1_000, 10_000)
        };
        cc.cong_control(&mut sk, &rs);
        assert_eq!(sk.snd_cwnd, 12);

        // Still in recovery: losses shrink the window, bounded by what is
        // in flight plus acked.
        sk.packets_in_flight = 3;
        let rs = RateSample {
            losses: 5,
            acked_sacked: 1,
            ..sample(10, 1_000, 10_000)
        };
        let out = cc.cong_control(&mut sk, &rs);
        assert_eq!(out.cwnd, 7);

        sk.packets_in_flight = 0;
        let rs = RateSample {
            losses: 100,
            ..sample(10, 1_000, 10_000)
        };
        let out = cc.cong_control(&mut sk, &rs);
        assert_eq!(out.cwnd, 1);
        assert_eq!(cc.stats().packets_lost, 105);
        assert_eq!(cc.stats().recovery_entries, 1);
    }

    #[test]
    fn recovery_exit() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            snd_cwnd: 20,
            ..TcpSockState::default()
        };
        cc.ssthresh(&sk);
        assert_eq!(cc.prior_cwnd(), 20);

        sk.ca_state = CaState::Recovery;
        sk.packets_in_flight = 8;
        cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        assert!(cc.in_packet_conservation());

        sk.ca_state = CaState::Open;
        sk.packets_in_flight = 5;
        let rs = RateSample {
            acked_sacked: 1,
            ..sample(10, 1_000, 10_000)
        };
        let out = cc.cong_control(&mut sk, &rs);
        assert_eq!(out.cwnd, 20);
        assert_eq!(cc.phase(), CyclePhase::ProbeUp);
        assert_eq!(cc.gain(), 320);
        assert!(!cc.in_packet_conservation());
        assert_eq!(cc.stats().recovery_exits, 1);
    }

    #[test]
    fn recovery_exit_from_loss() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            ca_state: CaState::Loss,
            ..TcpSockState::default()
        };
        cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        assert!(!cc.in_packet_conservation());

        // Leaving a worse state than recovery also restores the window.
        sk.ca_state = CaState::Disorder;
        sk.packets_in_flight = 30;
        let rs = RateSample {
            acked_sacked: 4,
            ..sample(10, 1_000, 10_000)
        };
        let out = cc.cong_control(&mut sk, &rs);
        assert_eq!(out.cwnd, 34);
        assert_eq!(cc.stats().recovery_exits, 1);
    }

    #[test]
    fn recovery_empty_flight() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            ca_state: CaState::Recovery,
            ..TcpSockState::default()
        };

        // Nothing in flight or acked still leaves room for one packet.
        let out = cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        assert_eq!(out.cwnd, 1);

        sk.ca_state = CaState::Open;
        let out = cc.cong_control(&mut sk, &sample(10, 1_000, 10_000));
        assert_eq!(out.cwnd, 1);
        assert_eq!(cc.prior_cwnd(), 0);
    }

    #[test]
    fn conservation_disabled() {
        let mut cc = new_cc(false);
        let mut sk = TcpSockState {
            delivered_mstamp: 1_000,
            packets_in_flight: 10,
            ca_state: CaState::Recovery,
            ..TcpSockState::default()
        };
        let rs = RateSample {
            acked_sacked: 2,
            losses: 3,
            ..sample(10, 1_000, 1_000)
        };

        let out = cc.cong_control(&mut sk, &rs);
        assert_eq!(out.cwnd, 16);
        assert!(!cc.in_packet_conservation());
        assert_eq!(cc.phase(), CyclePhase::ProbeUp);
        assert_eq!(cc.stats().recovery_entries, 0);
    }

    #[test]
    fn set_state_loss() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            snd_cwnd: 50,
            packets_in_flight: 7,
            ..TcpSockState::default()
        };

        for state in [CaState::Open, CaState::Disorder, CaState::Cwr, CaState::Recovery] {
            cc.set_state(&mut sk, state);
            assert_eq!(sk.snd_cwnd, 50);
        }

        cc.set_state(&mut sk, CaState::Loss);
        assert_eq!(sk.snd_cwnd, 8);
        assert_eq!(cc.stats().loss_events, 1);
    }

    #[test]
    fn ssthresh_and_undo() {
        let mut cc = new_cc(true);
        let mut sk = TcpSockState {
            snd_cwnd: 24,
            snd_ssthresh: 17,
            ..TcpSockState::default()
        };

        assert_eq!(cc.ssthresh(&sk), 17);
        assert_eq!(cc.prior_cwnd(), 24);
        assert_eq!(cc.ssthresh(&sk), 17);
        assert_eq!(cc.prior_cwnd(), 24);
        assert_eq!(cc.undo_cwnd(), 24);

        sk.snd_cwnd = 1;
        cc.ssthresh(&sk);
        assert_eq!(cc.undo_cwnd(), 2);
    }
}

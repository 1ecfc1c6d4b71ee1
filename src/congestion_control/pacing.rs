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

//! Conversion of a fixed-point bandwidth estimate into a pacing rate, and of
//! a pacing rate into a segmentation offload batch size.

use super::BW_SCALE;
use super::GAIN_SCALE;

const USEC_PER_SEC: u64 = 1_000_000;

/// Pace below the estimated rate by this percentage to absorb bursts.
const PACING_MARGIN_PERCENT: u64 = 1;

/// Pacing rate threshold (bytes/sec) below which a single segment per TSO
/// batch is allowed. Default `1.2Mbps`.
const MIN_TSO_RATE: u64 = 1_200_000 >> 3;

/// Upper bound of the TSO segments goal.
const MAX_TSO_SEGS: u32 = 0x7f;

/// Convert `bw` (packets per microsecond, scaled by `BW_UNIT`) into bytes per
/// second, with `gain` scaled by `GAIN_UNIT`.
///
/// Intermediates are 128 bits wide and the result saturates at `u64::MAX`.
pub fn rate_bytes_per_sec(bw: u64, mss: u32, gain: u32) -> u64 {
    let mut rate = bw as u128;
    rate = rate.saturating_mul(mss as u128);
    rate = rate.saturating_mul(gain as u128);
    rate >>= GAIN_SCALE;
    rate = rate.saturating_mul((USEC_PER_SEC / 100 * (100 - PACING_MARGIN_PERCENT)) as u128);
    rate >>= BW_SCALE;

    u64::try_from(rate).unwrap_or(u64::MAX)
}

/// Pacing rate in bytes per second, bounded by the socket's maximum.
pub fn bw_to_pacing_rate(bw: u64, mss: u32, gain: u32, max_pacing_rate: u64) -> u64 {
    rate_bytes_per_sec(bw, mss, gain).min(max_pacing_rate)
}

/// Minimum number of segments per TSO batch at the given pacing rate.
pub fn min_tso_segs(pacing_rate: u64) -> u32 {
    if pacing_rate < MIN_TSO_RATE {
        1
    } else {
        2
    }
}

/// Number of segments the segmentation offload layer should batch, sized to
/// roughly `2^-pacing_shift` seconds of data at the current pacing rate.
pub fn tso_segs_goal(pacing_rate: u64, mss: u32, pacing_shift: u32, gso_max_bytes: u64) -> u32 {
    let bytes = pacing_rate
        .checked_shr(pacing_shift)
        .unwrap_or(0)
        .min(gso_max_bytes);
    let segs = (bytes / mss.max(1) as u64).max(min_tso_segs(pacing_rate) as u64);

    segs.min(MAX_TSO_SEGS as u64) as u32
}

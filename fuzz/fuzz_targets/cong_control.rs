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

#![no_main]

use lazy_static::lazy_static;
use libfuzzer_sys::fuzz_target;

use caohejing::CaState;
use caohejing::Caohejing;
use caohejing::CaohejingConfig;
use caohejing::CongestionOps;
use caohejing::RateSample;
use caohejing::TcpSockState;

lazy_static! {
    static ref CONSERVATION: CaohejingConfig = CaohejingConfig::new();
    static ref NO_CONSERVATION: CaohejingConfig = {
        let mut conf = CaohejingConfig::new();
        conf.enable_conservation(false);
        conf
    };
}

/// Bytes consumed by one host callback.
const EVENT_LEN: usize = 32;

fn u32_at(b: &[u8], i: usize) -> u32 {
    u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]])
}

fn ca_state(b: u8) -> CaState {
    match b % 5 {
        0 => CaState::Open,
        1 => CaState::Disorder,
        2 => CaState::Cwr,
        3 => CaState::Recovery,
        _ => CaState::Loss,
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let conservation = data[0] & 1 == 1;
    let conf = if conservation {
        &*CONSERVATION
    } else {
        &*NO_CONSERVATION
    };
    let mut cc = Caohejing::new(conf.clone());
    let mut sk = TcpSockState::default();

    for b in data[1..].chunks_exact(EVENT_LEN) {
        sk.ca_state = ca_state(b[0]);
        sk.packets_in_flight = u32_at(b, 1) >> (b[5] & 31);
        sk.delivered = sk.delivered.wrapping_add(u32_at(b, 6) & 0xffff);
        sk.delivered_mstamp = sk.delivered_mstamp.saturating_add(u32_at(b, 10) as u64);
        sk.mss_cache = u32_at(b, 14) & 0xffff;

        match b[18] % 8 {
            0 => {
                cc.ssthresh(&sk);
            }
            1 => {
                let state = sk.ca_state;
                cc.set_state(&mut sk, state);
            }
            2 => {
                cc.undo_cwnd();
            }
            _ => {
                let rs = RateSample {
                    delivered: u32_at(b, 19) as i32,
                    interval_us: (u32_at(b, 23) as i32) as i64,
                    rtt_us: (u32_at(b, 27) as i32) as i64,
                    losses: (b[31] as i8) as i32,
                    acked_sacked: b[5] as u32,
                    prior_delivered: sk.delivered.wrapping_sub(u32_at(b, 1) & 0xff),
                };
                let out = cc.cong_control(&mut sk, &rs);

                assert_eq!(out.cwnd, sk.snd_cwnd);
                assert!(out.cwnd >= 1);
                assert!(out.tso_segs_goal >= 1 && out.tso_segs_goal <= 127);
                if !conservation {
                    assert!(out.cwnd >= 2);
                    assert_eq!(out.cwnd % 2, 0);
                }
            }
        }
    }
});

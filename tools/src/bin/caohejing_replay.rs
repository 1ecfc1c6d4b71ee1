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

use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;

use clap::Parser;
use log::info;

use caohejing::CaohejingConfig;
use caohejing::WarmupScope;
use caohejing_tools::read_trace;
use caohejing_tools::ReplayRecord;
use caohejing_tools::Replayer;
use caohejing_tools::Result;
use caohejing_tools::SyntheticPath;
use caohejing_tools::TraceEvent;

#[derive(Parser, Debug, Clone)]
#[clap(name = "caohejing_replay")]
pub struct ReplayOpt {
    /// JSON lines trace of host events. If no trace is specified, a
    /// synthetic bottleneck path is simulated.
    #[clap(short, long, value_name = "FILE")]
    pub trace: Option<String>,

    /// JSON file of controller configuration.
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<String>,

    /// Number of ACK batches to simulate on the synthetic path.
    #[clap(long, default_value = "10000", value_name = "NUM")]
    pub steps: u64,

    /// Bottleneck capacity of the synthetic path in Mbit/s.
    #[clap(long, default_value = "100", value_name = "NUM")]
    pub capacity_mbps: f64,

    /// Propagation RTT of the synthetic path in milliseconds.
    #[clap(long, default_value = "40", value_name = "TIME")]
    pub rtt_ms: u64,

    /// Bottleneck buffer of the synthetic path in packets.
    #[clap(long, default_value = "200", value_name = "NUM")]
    pub buffer_pkts: u32,

    /// Relative delivery rate jitter of the synthetic path.
    #[clap(long, default_value = "0.05", value_name = "NUM")]
    pub jitter: f64,

    /// Seed of the synthetic path.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub seed: u64,

    /// Disable packet conservation during loss recovery.
    #[clap(long)]
    pub no_conservation: bool,

    /// Share the gain cycling warm-up across the process.
    #[clap(long)]
    pub process_warmup: bool,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,
}

fn load_config(option: &ReplayOpt) -> Result<CaohejingConfig> {
    let mut conf = match &option.config {
        Some(path) => CaohejingConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => CaohejingConfig::new(),
    };

    // Per-sample diagnostics are only useful when they are shown.
    if option.log_level >= log::LevelFilter::Debug {
        conf.enable_debug(true);
    }
    if option.no_conservation {
        conf.enable_conservation(false);
    }
    if option.process_warmup {
        conf.set_warmup_scope(WarmupScope::Process);
    }

    Ok(conf)
}

fn replay_trace<W: Write>(path: &str, replayer: &mut Replayer, out: &mut W) -> Result<()> {
    let events = read_trace(BufReader::new(File::open(path)?))?;
    info!("replay {} events from {}", events.len(), path);

    let mut step = 0;
    for event in &events {
        if let Some(output) = replayer.apply(event) {
            serde_json::to_writer(&mut *out, &ReplayRecord { step, output })?;
            writeln!(out)?;
            step += 1;
        }
    }

    Ok(())
}

fn replay_synthetic<W: Write>(
    option: &ReplayOpt,
    replayer: &mut Replayer,
    out: &mut W,
) -> Result<()> {
    let mut path = SyntheticPath::new(
        option.capacity_mbps,
        replayer.sock().mss_cache,
        option.rtt_ms,
        option.buffer_pkts,
        option.seed,
    );
    path.set_jitter(option.jitter);
    info!(
        "simulate {} steps, capacity {}Mbps rtt {}ms bdp {} buffer {}",
        option.steps,
        option.capacity_mbps,
        option.rtt_ms,
        path.bdp(),
        option.buffer_pkts
    );

    for step in 0..option.steps {
        let sample = path.step(replayer.sock_mut());
        let event = TraceEvent::Sample {
            sock: replayer.sock().clone(),
            sample,
        };
        if let Some(output) = replayer.apply(&event) {
            serde_json::to_writer(&mut *out, &ReplayRecord { step, output })?;
            writeln!(out)?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let option = ReplayOpt::parse();

    env_logger::builder()
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let conf = load_config(&option)?;
    let mut replayer = Replayer::new(&conf);
    let mut out = BufWriter::new(std::io::stdout().lock());

    match &option.trace {
        Some(path) => replay_trace(path, &mut replayer, &mut out)?,
        None => replay_synthetic(&option, &mut replayer, &mut out)?,
    }
    out.flush()?;

    info!("{:?}", replayer.controller().stats());
    Ok(())
}

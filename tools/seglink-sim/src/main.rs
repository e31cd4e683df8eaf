// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! seglink-sim - drive two seglink engines across a lossy channel
//!
//! Reports delivery, loss, duplication and discard counters, and exits
//! non-zero when an SDU was delivered twice or out of order.

mod channel;
mod config;
mod sim;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use seglink::{AmTxConfig, DeliveryMode, FlowConfig};

use crate::config::{ChannelConfig, PolicyName, ScenarioConfig, SwitchConfig, TrafficConfig};
use crate::sim::Simulation;

/// seglink link simulator
#[derive(Parser, Debug)]
#[command(name = "seglink-sim")]
#[command(version = "0.1.0")]
#[command(about = "Simulate segmented delivery over a lossy link")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bulk transfer over one leg
    Run {
        /// Scenario file (TOML); overrides every other option
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        link: LinkArgs,
    },

    /// Bulk transfer with a leg switch half-way through
    Switch {
        #[command(flatten)]
        link: LinkArgs,

        /// What happens to the old leg's queue
        #[arg(short, long, value_enum, default_value = "drain")]
        policy: PolicyArg,

        /// Switch after this many SDUs (default: half of --sdus)
        #[arg(long)]
        after: Option<usize>,
    },
}

#[derive(clap::Args, Debug)]
struct LinkArgs {
    /// Delivery mode
    #[arg(short, long, value_enum, default_value = "um")]
    mode: ModeArg,

    /// Packet loss probability per direction
    #[arg(short, long, default_value = "0.0")]
    loss: f64,

    /// Number of SDUs to send
    #[arg(short = 'n', long, default_value = "500")]
    sdus: usize,

    /// Largest SDU payload (bytes)
    #[arg(long, default_value = "400")]
    max_sdu: usize,

    /// PRNG seed
    #[arg(short, long, default_value = "1")]
    seed: u64,

    /// One-way delay (ms)
    #[arg(short, long, default_value = "10")]
    delay: u64,

    /// Delay jitter (ms, +/-)
    #[arg(short, long, default_value = "0")]
    jitter: u64,

    /// Bytes granted per 1 ms slot
    #[arg(short, long, default_value = "600")]
    grant: usize,

    /// SDUs offered per slot (0 = as many as the sender accepts)
    #[arg(long, default_value = "1")]
    rate: usize,

    /// Acknowledged mode: retransmissions before an SDU is abandoned
    #[arg(long, default_value_t = AmTxConfig::default().max_retransmissions)]
    max_retx: u32,

    /// Channel preset; replaces --loss, --delay and --jitter
    #[arg(long, value_enum)]
    preset: Option<PresetArg>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PresetArg {
    Satellite,
    TacticalRadio,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    /// Unacknowledged: segmentation and reordering only
    Um,
    /// Acknowledged: selective-repeat ARQ
    Am,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Drain,
    HardClear,
}

impl From<PolicyArg> for PolicyName {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Drain => PolicyName::Drain,
            PolicyArg::HardClear => PolicyName::HardClear,
        }
    }
}

impl LinkArgs {
    fn scenario(&self) -> ScenarioConfig {
        let mode = match self.mode {
            ModeArg::Um => DeliveryMode::Unacknowledged,
            ModeArg::Am => DeliveryMode::Acknowledged,
        };
        let defaults = AmTxConfig::default();
        let flow = FlowConfig {
            mode,
            am_tx: AmTxConfig {
                // largest fragment the grant can carry
                fragment_size: self
                    .grant
                    .saturating_sub(defaults.header_overhead)
                    .min(defaults.fragment_size),
                max_retransmissions: self.max_retx,
                ..defaults
            },
            ..FlowConfig::default()
        };
        ScenarioConfig {
            flow,
            channel: match self.preset {
                Some(PresetArg::Satellite) => ChannelConfig::satellite(),
                Some(PresetArg::TacticalRadio) => ChannelConfig::tactical_radio(),
                None => ChannelConfig {
                    delay_ms: self.delay,
                    jitter_ms: self.jitter,
                    ..ChannelConfig::lossy(self.loss)
                },
            },
            traffic: TrafficConfig {
                sdus: self.sdus,
                max_sdu_len: self.max_sdu,
                sdus_per_slot: self.rate,
                grant_bytes: self.grant,
                seed: self.seed,
                ..TrafficConfig::default()
            },
            switch: None,
        }
    }
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str()))
        .init();

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the run upheld at-most-once and in-order delivery.
fn run(args: &Args) -> Result<bool> {
    let scenario = match &args.command {
        Command::Run {
            config: Some(path), ..
        } => ScenarioConfig::from_file(path)?,
        Command::Run { config: None, link } => link.scenario(),
        Command::Switch {
            link,
            policy,
            after,
        } => ScenarioConfig {
            switch: Some(SwitchConfig {
                after_sdus: after.unwrap_or(link.sdus / 2),
                policy: (*policy).into(),
            }),
            ..link.scenario()
        },
    };

    println!("seglink-sim");
    println!("===========");
    println!(
        "loss {:.1}%, delay {} ms +/- {} ms, grant {} B/slot, seed {}",
        scenario.channel.loss_rate * 100.0,
        scenario.channel.delay_ms,
        scenario.channel.jitter_ms,
        scenario.traffic.grant_bytes,
        scenario.traffic.seed
    );
    if let Some(switch) = &scenario.switch {
        println!(
            "switch after {} SDUs ({:?})",
            switch.after_sdus, switch.policy
        );
    }
    println!();

    let report = Simulation::new(scenario)?.run()?;
    println!("{}", report);
    println!();

    if !report.at_most_once_held() {
        eprintln!("FAIL: at-most-once delivery violated");
    }
    if !report.ordering_held() {
        eprintln!("FAIL: in-order delivery violated");
    }
    if report.entity_failures > 0 {
        eprintln!("FAIL: {} entities failed", report.entity_failures);
    }
    if report.is_clean() {
        println!("OK");
    }
    Ok(report.is_clean())
}

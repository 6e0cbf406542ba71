//! mpath - a multipath interface failure detection library.
//!
//! This crate provides the probe engine and failure/recovery state machine
//! used to monitor groups of physical network interfaces configured for
//! load sharing and redundancy.  Each interface is probed over ICMP with
//! bounded detection latency; individual and group-wide failures are told
//! apart, failover flags are mirrored into the operating system through a
//! collaborator, and interfaces without an IP test address infer liveness
//! transitively from their peers.
//!
//! The engine is single-threaded and timer-driven: a caller-owned loop
//! multiplexes socket readability and a single relative timeout, invoking
//! [`Engine::tick`] and [`Engine::handle_incoming`].  Nothing blocks and no
//! entry point fails on malformed input.
//!
//! # Example
//!
//! The following example builds an engine, registers a two-interface group
//! and runs it against the platform network channel:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use mpath_core::{
//!     Builder, Channel, Family, InstanceKey, NullEventSink, NullFlagControl, PhyintConfig,
//!     ProbeId, SocketImpl,
//! };
//! use std::time::Instant;
//!
//! let mut engine = Builder::new(NullFlagControl, NullEventSink).build()?;
//! let now = Instant::now();
//! let net0 = engine.add_phyint(
//!     PhyintConfig {
//!         name: "net0".into(),
//!         group: Some("prod0".into()),
//!         ipv4_test_addr: Some("192.0.2.10".parse()?),
//!         ..Default::default()
//!     },
//!     now,
//! )?;
//! let mut channel: Channel<SocketImpl> = Channel::new();
//! channel.add_instance(
//!     InstanceKey {
//!         phyint: net0,
//!         family: Family::Ipv4,
//!     },
//!     "net0",
//!     "192.0.2.10".parse()?,
//!     ProbeId(0x6d70),
//! )?;
//! engine.run(&mut channel)?;
//! # Ok(())
//! # }
//! ```
#![warn(clippy::all, clippy::pedantic, clippy::nursery, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::use_self,
    clippy::option_if_let_else,
    clippy::missing_const_for_fn,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![deny(unsafe_code)]

mod builder;
mod config;
mod constants;
mod detector;
mod elector;
mod engine;
mod error;
mod group;
mod history;
mod net;
mod phyint;
mod rtt;
mod scheduler;
mod state;
mod sys;
mod target;
mod transitive;
mod types;

pub use builder::Builder;
pub use config::{defaults, EngineConfig, ProbeKind};
pub use detector::FailureKind;
pub use engine::{Engine, PhyintConfig};
pub use error::{Error, Result};
pub use group::GroupState;
pub use history::{ProbeOutcome, ProbeRecord, ProbeRing};
pub use net::channel::Channel;
pub use net::socket::{RecvMeta, Socket};
pub use net::{all_nodes_addr, Incoming, InstanceKey, Network, ProbeReply, ProbeRequest};
pub use phyint::PhyintState;
pub use rtt::{RttEstimate, TargetRtt};
pub use scheduler::{FixedJitter, Jitter, RandomJitter};
pub use state::{GroupHealth, Health, HealthState, InterfaceHealth};
pub use sys::{EventSink, FlagControl, LinkEvent, NullEventSink, NullFlagControl};
pub use target::{LocalState, Target, TargetKind, TargetStatus};
pub use types::{Family, GroupId, InterfaceFlags, PhyintId, ProbeId, ProbeStats, Sequence};

#[cfg(unix)]
pub use net::SocketImpl;

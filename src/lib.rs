//! Bitcoin p2p protocol engine.
//!
//! This crate implements the per-connection machinery of the bitcoin
//! peer-to-peer protocol: the wire codec in [wire], and the [Peer] state
//! machine which performs the version handshake, exchanges framed
//! messages, trickles inventory, detects stalled and idle connections,
//! and dispatches received messages to configurable listeners.
//!
//! The usual flow is to build a [Config], create a peer with
//! [Peer::new_outbound] or [Peer::new_inbound], establish (or accept) the
//! TCP connection yourself and hand the socket to
//! [Peer::associate_connection]. Everything else, from the handshake to
//! teardown, happens on the peer's own tasks.

#[macro_use]
extern crate log;

pub mod registry;
pub mod wire;

mod config;
mod error;
mod mru;
mod peer;
mod signal;
mod time;
mod waitgroup;

pub use config::{Config, HostToNetAddrFn, MessageListeners, NewestBlockFn, OnVersionFn};
pub use error::Error;
pub use peer::{
	Peer, PeerState, StatsSnap, DEFAULT_TRICKLE_INTERVAL, MAX_PROTOCOL_VERSION,
	MIN_ACCEPTABLE_PROTOCOL_VERSION,
};

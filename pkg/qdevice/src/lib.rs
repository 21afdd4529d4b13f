//! Protocol engine for the quorum-device arbitration subsystem: wire
//! codec, session state machines, timers, and the decision-algorithm
//! plug-in surface. Pure and synchronous — no networking or TLS lives
//! here; `qdevice-client`/`qdevice-server` drive these types from an
//! async I/O loop and execute the `Tick` each call produces.

#[macro_use]
extern crate error_chain;

pub mod adaptors;
pub mod algorithm;
pub mod algorithms;
pub mod client;
pub mod errors;
pub mod sendbuf;
pub mod server;
pub mod tick;
pub mod timer;
pub mod wire;

pub use client::{ClientConfig, ClientSession, ClientState};
pub use server::{ClusterRegistry, ServerConfig, ServerSession, ServerState};
pub use tick::{ClientTick, ClientTimerToken, ServerTick, ServerTimerToken};

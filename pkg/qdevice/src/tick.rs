//! Side-effect accumulator returned by every session state-machine method,
//! mirroring the teacher's `consensus::Tick`: state machines never perform
//! I/O themselves, they just describe what should happen, and the caller
//! (the actual non-blocking I/O loop) carries it out.

use crate::wire::Message;
use std::time::Duration;

/// A logical timer slot. At most one timer is ever outstanding per token
/// per session; arming a token that already has a pending timer replaces
/// it (this is how "rescheduling replaces the pending vote" in §4.4 is
/// implemented by the caller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientTimerToken {
	Heartbeat,
	HeartbeatTimeout,
	CastVote,
	AskLaterRetry,
	ReconnectBackoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerTimerToken {
	ProtocolTimeout,
}

#[derive(Debug)]
pub struct ClientTick {
	pub messages: Vec<Message>,
	pub arm: Vec<(ClientTimerToken, Duration, bool)>,
	pub cancel: Vec<ClientTimerToken>,
	/// Set when a cast-vote (or initial) timer should install this vote
	/// into the local vote-quorum service.
	pub install_vote: Option<crate::wire::typed::ResultVote>,
	pub close: Option<String>,
}

impl ClientTick {
	pub fn empty() -> Self {
		ClientTick { messages: Vec::new(), arm: Vec::new(), cancel: Vec::new(), install_vote: None, close: None }
	}

	pub fn send(&mut self, msg: Message) {
		self.messages.push(msg);
	}

	pub fn arm_oneshot(&mut self, token: ClientTimerToken, interval: Duration) {
		self.cancel.push(token);
		self.arm.push((token, interval, false));
	}

	pub fn arm_periodic(&mut self, token: ClientTimerToken, interval: Duration) {
		self.cancel.push(token);
		self.arm.push((token, interval, true));
	}

	pub fn cancel(&mut self, token: ClientTimerToken) {
		self.cancel.push(token);
	}

	pub fn close(&mut self, reason: impl Into<String>) {
		self.close = Some(reason.into());
	}
}

impl Default for ClientTick {
	fn default() -> Self {
		Self::empty()
	}
}

#[derive(Debug)]
pub struct ServerTick {
	/// Messages to send back on the session that produced this tick.
	pub messages: Vec<Message>,
	/// Messages to send to *other* sessions in the same cluster, addressed
	/// by node_id (used by `send_vote_info`, spec §4.5).
	pub messages_to_peers: Vec<(qdevice_primitives::NodeId, Message)>,
	pub arm: Vec<(ServerTimerToken, Duration, bool)>,
	pub cancel: Vec<ServerTimerToken>,
	pub close: Option<String>,
}

impl ServerTick {
	pub fn empty() -> Self {
		ServerTick {
			messages: Vec::new(),
			messages_to_peers: Vec::new(),
			arm: Vec::new(),
			cancel: Vec::new(),
			close: None,
		}
	}

	pub fn send(&mut self, msg: Message) {
		self.messages.push(msg);
	}

	pub fn send_to_peer(&mut self, node_id: qdevice_primitives::NodeId, msg: Message) {
		self.messages_to_peers.push((node_id, msg));
	}

	pub fn arm_oneshot(&mut self, token: ServerTimerToken, interval: Duration) {
		self.cancel.push(token);
		self.arm.push((token, interval, false));
	}

	pub fn cancel(&mut self, token: ServerTimerToken) {
		self.cancel.push(token);
	}

	pub fn close(&mut self, reason: impl Into<String>) {
		self.close = Some(reason.into());
	}
}

impl Default for ServerTick {
	fn default() -> Self {
		Self::empty()
	}
}

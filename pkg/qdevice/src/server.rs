//! Arbiter-server per-session state machine (spec §4.2 server states) and
//! the cluster registry that dispatches steady-state events into the
//! decision-algorithm surface (spec §4.5). Structurally this mirrors
//! `client.rs`'s pure-state-machine/`Tick` split, but a server session's
//! steady-state events additionally need a view of its *sibling* sessions
//! (same cluster), which a lone `ClientSession` never does — hence the
//! separate `ClusterRegistry` that owns every session in a cluster instead
//! of each session owning itself.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use qdevice_primitives::NodeId;

use crate::algorithm::{ClusterContext, DecisionAlgorithm};
use crate::algorithms;
use crate::errors::*;
use crate::tick::{ServerTick, ServerTimerToken};
use crate::wire::message::MessageType;
use crate::wire::typed::{self, ErrorCode, NodeListSubtype, ResultVote, TlsMode};
use crate::wire::Message;

pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
	WaitPreinit,
	WaitStartTlsOrInit,
	WaitInit,
	Steady,
}

pub struct ServerConfig {
	pub tls_posture: TlsMode,
	pub protocol_timeout: std::time::Duration,
	/// Advertised in `preinit-reply`'s `tls-client-cert-required` option;
	/// actual client-certificate verification happens in the TLS acceptor,
	/// this only tells the client it should present one.
	pub require_client_cert: bool,
}

/// One accepted connection's protocol state. Owned by `ClusterRegistry`,
/// not by the I/O loop, so that steady-state dispatch can reach every
/// session in a cluster without the caller having to thread them through.
pub struct ServerSession {
	config_tls_posture: TlsMode,
	state: ServerState,
	next_seq: u32,
	node_id: Option<NodeId>,
	cluster_name: Option<String>,
	session_data: Box<dyn Any + Send>,
}

impl ServerSession {
	fn new(tls_posture: TlsMode) -> Self {
		ServerSession {
			config_tls_posture: tls_posture,
			state: ServerState::WaitPreinit,
			next_seq: 1,
			node_id: None,
			cluster_name: None,
			session_data: Box::new(()),
		}
	}

	fn take_seq(&mut self) -> u32 {
		let seq = self.next_seq;
		self.next_seq += 1;
		seq
	}

	pub fn state(&self) -> ServerState {
		self.state
	}

	pub fn node_id(&self) -> Option<NodeId> {
		self.node_id
	}
}

struct Cluster {
	decision_algorithm: Arc<dyn DecisionAlgorithm>,
	members: HashMap<NodeId, SessionId>,
	algorithm_data: Box<dyn Any + Send>,
}

/// Result of dispatching one inbound message: what to write back on the
/// originating connection, what to write on sibling connections (resolved
/// from node_id to session_id here, since only the registry knows that
/// mapping), and whether the session should be torn down.
pub struct Dispatched {
	pub reply: Vec<Message>,
	pub to_peers: Vec<(SessionId, Message)>,
	pub arm: Vec<(ServerTimerToken, std::time::Duration, bool)>,
	pub cancel: Vec<ServerTimerToken>,
	pub close: Option<String>,
}

impl Dispatched {
	fn from_tick(tick: ServerTick, registry_resolve: impl Fn(NodeId) -> Option<SessionId>) -> Self {
		let to_peers =
			tick.messages_to_peers.into_iter().filter_map(|(node_id, msg)| registry_resolve(node_id).map(|sid| (sid, msg))).collect();
		Dispatched { reply: tick.messages, to_peers, arm: tick.arm, cancel: tick.cancel, close: tick.close }
	}
}

struct SessionCtx<'a> {
	own_node_id: NodeId,
	peers: &'a [NodeId],
	algorithm_data: &'a mut dyn Any,
	tick: &'a mut ServerTick,
}

impl<'a> ClusterContext for SessionCtx<'a> {
	fn own_node_id(&self) -> NodeId {
		self.own_node_id
	}
	fn peer_node_ids(&self) -> Vec<NodeId> {
		self.peers.to_vec()
	}
	fn send_vote_info(&mut self, target: NodeId, vote: ResultVote) {
		// seq 0 is a placeholder: the target session's own counter isn't
		// reachable from here (only its node_id is), so the I/O loop
		// renumbers this with `ServerSession::take_seq` on the target
		// session before writing it to the wire.
		self.tick.send_to_peer(target, typed::build_vote_info(0, vote));
	}
	fn cluster_data(&mut self) -> &mut dyn Any {
		self.algorithm_data
	}
}

pub struct ClusterRegistry {
	config: ServerConfig,
	sessions: HashMap<SessionId, ServerSession>,
	clusters: HashMap<String, Cluster>,
	next_session_id: u64,
}

impl ClusterRegistry {
	pub fn new(config: ServerConfig) -> Self {
		ClusterRegistry { config, sessions: HashMap::new(), clusters: HashMap::new(), next_session_id: 0 }
	}

	pub fn accept(&mut self) -> SessionId {
		let id = self.next_session_id;
		self.next_session_id += 1;
		self.sessions.insert(id, ServerSession::new(self.config.tls_posture));
		id
	}

	pub fn session_state(&self, session_id: SessionId) -> Option<ServerState> {
		self.sessions.get(&session_id).map(|s| s.state)
	}

	/// `(node_id, cluster_name)` once known, for attaching structured
	/// logging context to a session's connection task.
	pub fn session_identity(&self, session_id: SessionId) -> Option<(Option<NodeId>, Option<String>)> {
		self.sessions.get(&session_id).map(|s| (s.node_id, s.cluster_name.clone()))
	}

	/// Draws the next outgoing sequence number for `session_id`'s own
	/// counter, used by the I/O loop to renumber a `vote-info` produced by
	/// `send_vote_info` (which only has the target's node_id, not its
	/// session) before it is written to that session's socket.
	pub fn next_seq_for(&mut self, session_id: SessionId) -> Option<u32> {
		self.sessions.get_mut(&session_id).map(|s| s.take_seq())
	}

	fn resolve_peer(&self, cluster_name: &str, node_id: NodeId) -> Option<SessionId> {
		self.clusters.get(cluster_name).and_then(|c| c.members.get(&node_id)).copied()
	}

	pub fn on_tls_established(&mut self, session_id: SessionId) {
		if let Some(session) = self.sessions.get_mut(&session_id) {
			if session.state == ServerState::WaitStartTlsOrInit {
				session.state = ServerState::WaitInit;
			}
		}
	}

	pub fn on_message(&mut self, session_id: SessionId, msg: Message, now: std::time::Instant) -> Result<Dispatched> {
		let mut tick = ServerTick::empty();
		let _ = now;

		let outcome = self.dispatch(session_id, msg, &mut tick);

		let cluster_name = self.sessions.get(&session_id).and_then(|s| s.cluster_name.clone());
		let dispatched = Dispatched::from_tick(tick, |node_id| {
			cluster_name.as_deref().and_then(|name| self.resolve_peer(name, node_id))
		});

		outcome?;
		Ok(dispatched)
	}

	fn dispatch(&mut self, session_id: SessionId, msg: Message, tick: &mut ServerTick) -> Result<()> {
		let state = self
			.sessions
			.get(&session_id)
			.map(|s| s.state)
			.ok_or_else(|| Error::from(ErrorKind::UnexpectedMessage("unknown session".into())))?;

		match (state, msg.msg_type) {
			(ServerState::WaitPreinit, MessageType::Preinit) => self.handle_preinit(session_id, &msg, tick),
			(ServerState::WaitStartTlsOrInit, MessageType::StartTls) => {
				// The actual handshake is driven by the caller; no reply is
				// sent here, `on_tls_established` advances the state once it
				// finishes.
				Ok(())
			}
			(ServerState::WaitStartTlsOrInit, MessageType::Init) | (ServerState::WaitInit, MessageType::Init) => {
				self.handle_init(session_id, &msg, tick)
			}
			(ServerState::Steady, MessageType::SetOption) => {
				let session = self.sessions.get_mut(&session_id).unwrap();
				let seq = session.take_seq();
				tick.send(typed::build_set_option_reply(seq, true));
				Ok(())
			}
			(ServerState::Steady, MessageType::EchoRequest) => {
				let session = self.sessions.get_mut(&session_id).unwrap();
				let seq = session.take_seq();
				tick.send(typed::build_echo_reply(seq, msg.seq));
				Ok(())
			}
			(ServerState::Steady, MessageType::NodeList) => self.handle_node_list(session_id, &msg, tick),
			(ServerState::Steady, MessageType::AskForVote) => self.handle_ask_for_vote(session_id, &msg, tick),
			(ServerState::Steady, MessageType::VoteInfoReply) => self.handle_vote_info_reply(session_id, tick),
			(_, MessageType::Unknown(_)) => Ok(()), // §4.1: unknown types are skipped, not fatal
			(state, msg_type) => {
				tick.close(format!("unexpected message {:?} in state {:?}", msg_type, state));
				Err(ErrorKind::UnexpectedMessage(format!("{:?} in {:?}", msg_type, state)).into())
			}
		}
	}

	fn handle_preinit(&mut self, session_id: SessionId, msg: &Message, tick: &mut ServerTick) -> Result<()> {
		let cluster_name = typed::read_preinit(msg)?;
		let require_client_cert = self.config.require_client_cert;
		let session = self.sessions.get_mut(&session_id).unwrap();
		session.cluster_name = Some(cluster_name);
		let seq = session.take_seq();
		tick.send(typed::build_preinit_reply(seq, session.config_tls_posture, require_client_cert));
		session.state = ServerState::WaitStartTlsOrInit;
		tick.arm_oneshot(ServerTimerToken::ProtocolTimeout, self.config.protocol_timeout);
		Ok(())
	}

	fn handle_init(&mut self, session_id: SessionId, msg: &Message, tick: &mut ServerTick) -> Result<()> {
		{
			let session = self.sessions.get(&session_id).unwrap();
			if session.config_tls_posture == TlsMode::Required && session.state == ServerState::WaitStartTlsOrInit {
				let session = self.sessions.get_mut(&session_id).unwrap();
				let seq = session.take_seq();
				tick.send(typed::build_server_error(
					seq,
					ErrorCode::TlsRequired,
					"tls required but starttls was not performed",
				));
				tick.close("tls required but not negotiated");
				return Err(ErrorKind::TlsRequiredButUnsupported.into());
			}
		}

		let req = typed::read_init(msg)?;

		let algo = algorithms::resolve(req.decision_algorithm);
		let cluster = self.clusters.entry(req.cluster_name.clone()).or_insert_with(|| Cluster {
			decision_algorithm: algo.clone(),
			members: HashMap::new(),
			algorithm_data: algo.init_cluster_data(),
		});

		if cluster.decision_algorithm.name() != algo.name() {
			let session = self.sessions.get_mut(&session_id).unwrap();
			let seq = session.take_seq();
			tick.send(typed::build_server_error(
				seq,
				ErrorCode::AlgorithmDiffersFromOtherNodes,
				"decision algorithm differs from other nodes in this cluster",
			));
			tick.close("algorithm mismatch");
			return Err(ErrorKind::TieBreakerMismatch.into());
		}

		if cluster.members.contains_key(&req.node_id) {
			let session = self.sessions.get_mut(&session_id).unwrap();
			let seq = session.take_seq();
			tick.send(typed::build_server_error(seq, ErrorCode::DuplicateNodeId, "node_id already connected"));
			tick.close("duplicate node id");
			return Err(ErrorKind::DuplicateNodeId(req.node_id).into());
		}

		cluster.members.insert(req.node_id, session_id);

		let session = self.sessions.get_mut(&session_id).unwrap();
		session.node_id = Some(req.node_id);
		session.cluster_name = Some(req.cluster_name);
		session.session_data = algo.init_session_data();
		let seq = session.take_seq();
		tick.send(typed::build_init_reply(seq, true));
		session.state = ServerState::Steady;
		tick.cancel(ServerTimerToken::ProtocolTimeout);
		Ok(())
	}

	fn with_algorithm<R>(
		&mut self,
		session_id: SessionId,
		tick: &mut ServerTick,
		f: impl FnOnce(&Arc<dyn DecisionAlgorithm>, &mut dyn Any, &mut SessionCtx) -> R,
	) -> Option<R> {
		let (node_id, cluster_name) = {
			let session = self.sessions.get(&session_id)?;
			(session.node_id?, session.cluster_name.clone()?)
		};
		let cluster = self.clusters.get_mut(&cluster_name)?;
		let peers: Vec<NodeId> = cluster.members.keys().copied().filter(|id| *id != node_id).collect();
		let algo = cluster.decision_algorithm.clone();
		let session = self.sessions.get_mut(&session_id)?;

		let mut ctx = SessionCtx { own_node_id: node_id, peers: &peers, algorithm_data: &mut *cluster.algorithm_data, tick };
		Some(f(&algo, &mut *session.session_data, &mut ctx))
	}

	fn handle_node_list(&mut self, session_id: SessionId, msg: &Message, tick: &mut ServerTick) -> Result<()> {
		let event = typed::read_node_list(msg)?;
		let request_seq = msg.seq;

		let result = self.with_algorithm(session_id, tick, |algo, data, ctx| match event.subtype {
			NodeListSubtype::Config => algo.config_node_list_received(ctx, data, &event),
			NodeListSubtype::Membership => algo.membership_node_list_received(ctx, data, &event),
			NodeListSubtype::Quorum => algo.quorum_node_list_received(ctx, data, &event),
		});

		let (code, vote) = result.ok_or_else(|| Error::from(ErrorKind::UnexpectedMessage("node-list before init".into())))?;

		let session = self.sessions.get_mut(&session_id).unwrap();
		if code != ErrorCode::NoError {
			let seq = session.take_seq();
			tick.send(typed::build_server_error(seq, code, "node list rejected"));
			tick.close("node list rejected");
			return Ok(());
		}
		let seq = session.take_seq();
		tick.send(typed::build_node_list_reply(seq, request_seq, vote));
		Ok(())
	}

	fn handle_ask_for_vote(&mut self, session_id: SessionId, msg: &Message, tick: &mut ServerTick) -> Result<()> {
		let request_seq = typed::read_ask_for_vote(msg)?;

		let result = self.with_algorithm(session_id, tick, |algo, data, ctx| {
			algo.ask_for_vote_received(ctx, data, request_seq)
		});
		let (_code, vote) =
			result.ok_or_else(|| Error::from(ErrorKind::UnexpectedMessage("ask-for-vote before init".into())))?;

		let session = self.sessions.get_mut(&session_id).unwrap();
		let seq = session.take_seq();
		tick.send(typed::build_ask_for_vote_reply(seq, request_seq, vote));
		Ok(())
	}

	fn handle_vote_info_reply(&mut self, session_id: SessionId, tick: &mut ServerTick) -> Result<()> {
		self.with_algorithm(session_id, tick, |algo, data, ctx| {
			algo.vote_info_reply_received(ctx, data);
		});
		Ok(())
	}

	/// Tears down a session: notifies its algorithm, removes it from its
	/// cluster's membership set, and drops the cluster entirely once empty
	/// (spec §4.6 "a cluster with no remaining sessions is discarded").
	pub fn on_disconnect(&mut self, session_id: SessionId, server_going_down: bool) {
		let mut tick = ServerTick::empty();
		self.with_algorithm(session_id, &mut tick, |algo, data, ctx| {
			algo.client_disconnect(ctx, data, server_going_down);
		});

		if let Some(session) = self.sessions.remove(&session_id) {
			if let (Some(node_id), Some(cluster_name)) = (session.node_id, session.cluster_name) {
				if let Some(cluster) = self.clusters.get_mut(&cluster_name) {
					cluster.members.remove(&node_id);
					if cluster.members.is_empty() {
						self.clusters.remove(&cluster_name);
					}
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use qdevice_primitives::{NodeDescriptor, NodeList, NodeState};
	use std::time::{Duration, Instant};

	fn registry() -> ClusterRegistry {
		ClusterRegistry::new(ServerConfig {
			tls_posture: TlsMode::Unsupported,
			protocol_timeout: Duration::from_secs(10),
			require_client_cert: false,
		})
	}

	fn drive_to_steady(reg: &mut ClusterRegistry, sid: SessionId, node_id: NodeId, algo: typed::DecisionAlgorithm) {
		let now = Instant::now();
		reg.on_message(sid, typed::build_preinit(1, "c1"), now).unwrap();
		reg.on_message(
			sid,
			typed::build_init(
				2,
				&typed::InitRequest {
					protocol_version: 1,
					node_id,
					decision_algorithm: algo,
					heartbeat_interval_ms: 8000,
					tls_supported: TlsMode::Unsupported,
					cluster_name: "c1".to_string(),
					supported_messages: typed::known_message_types(),
					supported_options: typed::known_option_types(),
				},
			),
			now,
		)
		.unwrap();
		assert_eq!(reg.session_state(sid), Some(ServerState::Steady));
	}

	#[test]
	fn preinit_then_init_reaches_steady_and_cancels_timeout() {
		let mut reg = registry();
		let sid = reg.accept();
		let now = Instant::now();

		let dispatched = reg.on_message(sid, typed::build_preinit(1, "c1"), now).unwrap();
		assert_eq!(dispatched.reply[0].msg_type.as_u8(), MessageType::PreinitReply.as_u8());
		assert!(dispatched.arm.iter().any(|(t, _, _)| *t == ServerTimerToken::ProtocolTimeout));
		assert_eq!(reg.session_state(sid), Some(ServerState::WaitStartTlsOrInit));

		let dispatched = reg
			.on_message(
				sid,
				typed::build_init(
					2,
					&typed::InitRequest {
						protocol_version: 1,
						node_id: 1,
						decision_algorithm: typed::DecisionAlgorithm::Test,
						heartbeat_interval_ms: 8000,
						tls_supported: TlsMode::Unsupported,
						cluster_name: "c1".to_string(),
						supported_messages: typed::known_message_types(),
						supported_options: typed::known_option_types(),
					},
				),
				now,
			)
			.unwrap();
		assert_eq!(dispatched.reply[0].msg_type.as_u8(), MessageType::InitReply.as_u8());
		assert!(dispatched.cancel.contains(&ServerTimerToken::ProtocolTimeout));
		assert_eq!(reg.session_state(sid), Some(ServerState::Steady));
	}

	#[test]
	fn duplicate_node_id_in_same_cluster_is_rejected() {
		let mut reg = registry();
		let sid1 = reg.accept();
		drive_to_steady(&mut reg, sid1, 1, typed::DecisionAlgorithm::Test);

		let sid2 = reg.accept();
		let now = Instant::now();
		reg.on_message(sid2, typed::build_preinit(1, "c1"), now).unwrap();
		let err = reg.on_message(
			sid2,
			typed::build_init(
				2,
				&typed::InitRequest {
					protocol_version: 1,
					node_id: 1,
					decision_algorithm: typed::DecisionAlgorithm::Test,
					heartbeat_interval_ms: 8000,
					tls_supported: TlsMode::Unsupported,
					cluster_name: "c1".to_string(),
						supported_messages: typed::known_message_types(),
						supported_options: typed::known_option_types(),
				},
			),
			now,
		);
		assert!(err.is_err());
	}

	#[test]
	fn algorithm_mismatch_in_same_cluster_is_rejected() {
		let mut reg = registry();
		let sid1 = reg.accept();
		drive_to_steady(&mut reg, sid1, 1, typed::DecisionAlgorithm::Test);

		let sid2 = reg.accept();
		let now = Instant::now();
		reg.on_message(sid2, typed::build_preinit(1, "c1"), now).unwrap();
		let err = reg.on_message(
			sid2,
			typed::build_init(
				2,
				&typed::InitRequest {
					protocol_version: 1,
					node_id: 2,
					decision_algorithm: typed::DecisionAlgorithm::FfSplit,
					heartbeat_interval_ms: 8000,
					tls_supported: TlsMode::Unsupported,
					cluster_name: "c1".to_string(),
						supported_messages: typed::known_message_types(),
						supported_options: typed::known_option_types(),
				},
			),
			now,
		);
		assert!(err.is_err());
	}

	#[test]
	fn test_algorithm_always_acks_node_list() {
		let mut reg = registry();
		let sid = reg.accept();
		drive_to_steady(&mut reg, sid, 1, typed::DecisionAlgorithm::Test);

		let mut nodes = NodeList::new();
		nodes.push(NodeDescriptor { node_id: 1, data_center_id: 0, node_state: NodeState::Member });
		let dispatched = reg
			.on_message(
				sid,
				typed::build_node_list(
					3,
					&typed::NodeListMessage { subtype: NodeListSubtype::Config, nodes, ring_id: None, quorate: None },
				),
				Instant::now(),
			)
			.unwrap();
		let (_, vote) = typed::read_node_list_reply(&dispatched.reply[0]).unwrap();
		assert_eq!(vote, ResultVote::Ack);
	}

	#[test]
	fn disconnect_removes_from_cluster_and_drops_empty_cluster() {
		let mut reg = registry();
		let sid = reg.accept();
		drive_to_steady(&mut reg, sid, 1, typed::DecisionAlgorithm::Test);
		reg.on_disconnect(sid, false);
		assert!(reg.clusters.is_empty());
	}
}

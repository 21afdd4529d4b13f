//! Arbiter-client session state machine (spec §4.2 client states, §4.4
//! event translation). Generalizes the teacher's `ConsensusModule`: instead
//! of driving a single Raft group to consensus, it drives a single session
//! with the arbiter server and relays its reply into a cast-vote decision.

use std::time::Duration;

use qdevice_primitives::{NodeList, RingId};

use crate::errors::*;
use crate::tick::{ClientTick, ClientTimerToken};
use crate::wire::message::MessageType;
use crate::wire::typed::{self, DecisionAlgorithm, ResultVote, TlsMode};
use crate::wire::Message;

pub const PROTOCOL_VERSION: u8 = 1;
pub const DEFAULT_CAST_VOTE_TIMER_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(8000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	WaitPreinitReply,
	WaitStartTlsSent,
	WaitInitReply,
	WaitSetOptionReply,
	Steady,
}

pub struct ClientConfig {
	pub node_id: qdevice_primitives::NodeId,
	pub cluster_name: String,
	pub decision_algorithm: DecisionAlgorithm,
	pub tls_posture: TlsMode,
	pub heartbeat_interval: Duration,
	pub cast_vote_timer_interval: Duration,
	/// Whether this client has a TLS client certificate configured, for
	/// satisfying a server's `tls-client-cert-required` advertisement.
	pub has_client_cert: bool,
}

pub struct ClientSession {
	config: ClientConfig,
	state: ClientState,
	next_seq: u32,
	/// `msg_seq_num` of the most recent node-list/ask-for-vote we are
	/// awaiting a vote reply for.
	outstanding_request_seq: Option<u32>,
	current_vote: Option<ResultVote>,
	waiting_for_vote_info: bool,
	last_echo_seq: Option<u32>,
}

impl ClientSession {
	pub fn new(config: ClientConfig) -> Self {
		ClientSession {
			config,
			state: ClientState::WaitPreinitReply,
			next_seq: 1,
			outstanding_request_seq: None,
			current_vote: None,
			waiting_for_vote_info: false,
			last_echo_seq: None,
		}
	}

	pub fn state(&self) -> ClientState {
		self.state
	}

	pub fn current_vote(&self) -> Option<ResultVote> {
		self.current_vote
	}

	fn take_seq(&mut self) -> u32 {
		let seq = self.next_seq;
		self.next_seq += 1;
		seq
	}

	/// Called once, immediately after the TCP connection (and any TLS
	/// handshake already completed out-of-band at connect time) is ready.
	pub fn on_connect(&mut self, tick: &mut ClientTick) {
		let seq = self.take_seq();
		tick.send(typed::build_preinit(seq, &self.config.cluster_name));
		self.state = ClientState::WaitPreinitReply;
	}

	pub fn on_message(&mut self, msg: Message, tick: &mut ClientTick) -> Result<()> {
		match (self.state, msg.msg_type) {
			(ClientState::WaitPreinitReply, MessageType::PreinitReply) => self.handle_preinit_reply(&msg, tick),
			(ClientState::WaitStartTlsSent, MessageType::Init) => {
				// No server message is expected here: `starttls` is
				// acknowledged implicitly by the TLS handshake succeeding,
				// driven by the caller. Receiving anything before that
				// completes is out of order.
				tick.close("unexpected message during starttls upgrade");
				Ok(())
			}
			(ClientState::WaitInitReply, MessageType::InitReply) => self.handle_init_reply(&msg, tick),
			(ClientState::WaitSetOptionReply, MessageType::SetOptionReply) => {
				self.handle_set_option_reply(&msg, tick)
			}
			(ClientState::Steady, MessageType::NodeListReply) => self.handle_node_list_reply(&msg, tick),
			(ClientState::Steady, MessageType::AskForVoteReply) => self.handle_ask_for_vote_reply(&msg, tick),
			(ClientState::Steady, MessageType::VoteInfo) => self.handle_vote_info(&msg, tick),
			(ClientState::Steady, MessageType::EchoReply) => self.handle_echo_reply(&msg, tick),
			(ClientState::Steady, MessageType::ServerError) => {
				let (code, text) = typed::read_server_error(&msg)?;
				tick.close(format!("server-error {}: {}", code, text));
				Ok(())
			}
			(_, MessageType::Unknown(_)) => Ok(()), // §4.1: unknown types are skipped, not fatal
			(state, msg_type) => {
				tick.close(format!("unexpected message {:?} in state {:?}", msg_type, state));
				Err(ErrorKind::UnexpectedMessage(format!("{:?} in {:?}", msg_type, state)).into())
			}
		}
	}

	fn handle_preinit_reply(&mut self, msg: &Message, tick: &mut ClientTick) -> Result<()> {
		let (server_tls, client_cert_required) = typed::read_preinit_reply(msg)?;

		let needs_tls = matches!(self.config.tls_posture, TlsMode::Required | TlsMode::Supported)
			&& matches!(server_tls, TlsMode::Required | TlsMode::Supported);
		let mismatch = (self.config.tls_posture == TlsMode::Required && server_tls == TlsMode::Unsupported)
			|| (server_tls == TlsMode::Required && self.config.tls_posture == TlsMode::Unsupported);

		if mismatch {
			tick.close("tls-required-but-unsupported");
			return Err(ErrorKind::TlsRequiredButUnsupported.into());
		}

		if client_cert_required && !self.config.has_client_cert {
			tick.close("server requires a tls client certificate but none is configured");
			return Err(ErrorKind::TlsRequiredButUnsupported.into());
		}

		if needs_tls {
			let seq = self.take_seq();
			tick.send(typed::build_starttls(seq));
			self.state = ClientState::WaitStartTlsSent;
			// The caller performs the actual handshake out-of-band and
			// then calls `on_tls_established` to continue.
		} else {
			self.send_init(tick);
		}
		Ok(())
	}

	/// Called by the I/O loop once a STARTTLS-triggered handshake
	/// completes (or immediately, if no upgrade was needed).
	pub fn on_tls_established(&mut self, tick: &mut ClientTick) {
		self.send_init(tick);
	}

	fn send_init(&mut self, tick: &mut ClientTick) {
		let seq = self.take_seq();
		tick.send(typed::build_init(
			seq,
			&typed::InitRequest {
				protocol_version: PROTOCOL_VERSION,
				node_id: self.config.node_id,
				decision_algorithm: self.config.decision_algorithm,
				heartbeat_interval_ms: self.config.heartbeat_interval.as_millis() as u32,
				tls_supported: self.config.tls_posture,
				cluster_name: self.config.cluster_name.clone(),
				supported_messages: typed::known_message_types(),
				supported_options: typed::known_option_types(),
			},
		));
		self.state = ClientState::WaitInitReply;
	}

	fn handle_init_reply(&mut self, msg: &Message, tick: &mut ClientTick) -> Result<()> {
		let ok = typed::read_init_reply(msg)?;
		if !ok {
			tick.close("init rejected by server");
			return Err(ErrorKind::UnexpectedMessage("init-reply not ok".into()).into());
		}
		let seq = self.take_seq();
		tick.send(typed::build_set_option_heartbeat(seq, self.config.heartbeat_interval.as_millis() as u32, true));
		self.state = ClientState::WaitSetOptionReply;
		Ok(())
	}

	fn handle_set_option_reply(&mut self, _msg: &Message, tick: &mut ClientTick) -> Result<()> {
		self.state = ClientState::Steady;
		tick.arm_periodic(ClientTimerToken::Heartbeat, self.config.heartbeat_interval);
		Ok(())
	}

	pub fn on_config_node_list(&mut self, nodes: NodeList, tick: &mut ClientTick) {
		if self.state != ClientState::Steady || self.waiting_for_vote_info {
			return;
		}
		let seq = self.take_seq();
		self.outstanding_request_seq = Some(seq);
		tick.send(typed::build_node_list(
			seq,
			&typed::NodeListMessage {
				subtype: typed::NodeListSubtype::Config,
				nodes,
				ring_id: None,
				quorate: None,
			},
		));
	}

	pub fn on_membership_node_list(&mut self, nodes: NodeList, ring_id: RingId, tick: &mut ClientTick) {
		if self.state != ClientState::Steady || self.waiting_for_vote_info {
			return;
		}
		let seq = self.take_seq();
		self.outstanding_request_seq = Some(seq);
		tick.send(typed::build_node_list(
			seq,
			&typed::NodeListMessage {
				subtype: typed::NodeListSubtype::Membership,
				nodes,
				ring_id: Some(ring_id),
				quorate: None,
			},
		));
	}

	pub fn on_quorum_node_list(&mut self, nodes: NodeList, quorate: bool, tick: &mut ClientTick) {
		if self.state != ClientState::Steady || self.waiting_for_vote_info {
			return;
		}
		let seq = self.take_seq();
		self.outstanding_request_seq = Some(seq);
		tick.send(typed::build_node_list(
			seq,
			&typed::NodeListMessage {
				subtype: typed::NodeListSubtype::Quorum,
				nodes,
				ring_id: None,
				quorate: Some(quorate),
			},
		));
	}

	fn handle_node_list_reply(&mut self, msg: &Message, tick: &mut ClientTick) -> Result<()> {
		let (request_seq, vote) = typed::read_node_list_reply(msg)?;
		if Some(request_seq) != self.outstanding_request_seq {
			// §4.2: replies with unknown msg_seq_num are logged and
			// ignored, not fatal.
			return Ok(());
		}
		self.apply_result_vote(vote, tick);
		Ok(())
	}

	fn handle_ask_for_vote_reply(&mut self, msg: &Message, tick: &mut ClientTick) -> Result<()> {
		let (request_seq, vote) = typed::read_ask_for_vote_reply(msg)?;
		if Some(request_seq) != self.outstanding_request_seq {
			return Ok(());
		}
		self.apply_result_vote(vote, tick);
		Ok(())
	}

	fn handle_vote_info(&mut self, msg: &Message, tick: &mut ClientTick) -> Result<()> {
		let vote = typed::read_vote_info(msg)?;
		self.waiting_for_vote_info = false;
		self.current_vote = Some(vote);
		tick.install_vote = Some(vote);
		let seq = self.take_seq();
		tick.send(typed::build_vote_info_reply(seq, msg.seq));
		Ok(())
	}

	fn handle_echo_reply(&mut self, msg: &Message, tick: &mut ClientTick) -> Result<()> {
		let request_seq = typed::read_echo_reply_request_seq(msg)?;
		if Some(request_seq) == self.last_echo_seq {
			tick.cancel(ClientTimerToken::HeartbeatTimeout);
		}
		Ok(())
	}

	fn apply_result_vote(&mut self, vote: ResultVote, tick: &mut ClientTick) {
		match vote {
			ResultVote::Ack | ResultVote::Nack => {
				self.current_vote = Some(vote);
				tick.arm_oneshot(ClientTimerToken::CastVote, self.config.cast_vote_timer_interval);
			}
			ResultVote::AskLater => {
				tick.arm_oneshot(ClientTimerToken::AskLaterRetry, self.config.cast_vote_timer_interval);
			}
			ResultVote::WaitForReply => {
				self.waiting_for_vote_info = true;
			}
			ResultVote::NoChange => {}
		}
	}

	/// Fired by the cast-vote timer: installs the currently scheduled vote
	/// into the local vote-quorum subsystem (spec §4.4).
	pub fn on_cast_vote_timer(&mut self, tick: &mut ClientTick) {
		if let Some(vote) = self.current_vote {
			tick.install_vote = Some(vote);
		}
	}

	/// Fired by the ask-later retry timer: re-sends `ask-for-vote` for the
	/// outstanding request.
	pub fn on_ask_later_retry_timer(&mut self, tick: &mut ClientTick) {
		if let Some(request_seq) = self.outstanding_request_seq {
			let seq = self.take_seq();
			tick.send(typed::build_ask_for_vote(seq, request_seq));
		}
	}

	pub fn on_heartbeat_timer(&mut self, tick: &mut ClientTick) {
		let seq = self.take_seq();
		self.last_echo_seq = Some(seq);
		tick.send(typed::build_echo_request(seq));
		tick.arm_oneshot(ClientTimerToken::HeartbeatTimeout, self.config.heartbeat_interval * 2);
	}

	pub fn on_heartbeat_timeout(&mut self, tick: &mut ClientTick) {
		tick.close("no echo-reply within 2*heartbeat_interval");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use qdevice_primitives::{NodeDescriptor, NodeState};

	fn fresh() -> ClientSession {
		ClientSession::new(ClientConfig {
			node_id: 1,
			cluster_name: "c1".to_string(),
			decision_algorithm: DecisionAlgorithm::Test,
			tls_posture: TlsMode::Unsupported,
			heartbeat_interval: Duration::from_millis(8000),
			cast_vote_timer_interval: Duration::from_secs(10),
			has_client_cert: false,
		})
	}

	fn drive_to_steady(c: &mut ClientSession) {
		let mut tick = ClientTick::empty();
		c.on_connect(&mut tick);
		c.on_message(typed::build_preinit_reply(1, TlsMode::Unsupported, false), &mut tick).unwrap();
		c.on_message(typed::build_init_reply(2, true), &mut tick).unwrap();
		c.on_message(typed::build_set_option_reply(3, true), &mut tick).unwrap();
		assert_eq!(c.state(), ClientState::Steady);
	}

	#[test]
	fn happy_path_ack_arms_cast_vote_timer() {
		let mut c = fresh();
		drive_to_steady(&mut c);

		let mut tick = ClientTick::empty();
		let mut nodes = NodeList::new();
		nodes.push(NodeDescriptor { node_id: 1, data_center_id: 0, node_state: NodeState::Member });
		nodes.push(NodeDescriptor { node_id: 2, data_center_id: 0, node_state: NodeState::Member });
		c.on_membership_node_list(nodes, RingId { node_id: 1, seq: 5 }, &mut tick);
		let sent_seq = tick.messages[0].seq;

		let mut tick2 = ClientTick::empty();
		c.on_message(typed::build_node_list_reply(99, sent_seq, ResultVote::Ack), &mut tick2).unwrap();
		assert_eq!(c.current_vote(), Some(ResultVote::Ack));
		assert!(tick2.arm.iter().any(|(t, _, _)| *t == ClientTimerToken::CastVote));
	}

	#[test]
	fn ask_later_schedules_retry_not_install() {
		let mut c = fresh();
		drive_to_steady(&mut c);

		let mut tick = ClientTick::empty();
		let nodes = NodeList::new();
		c.on_config_node_list(nodes, &mut tick);
		let sent_seq = tick.messages[0].seq;

		let mut tick2 = ClientTick::empty();
		c.on_message(typed::build_node_list_reply(99, sent_seq, ResultVote::AskLater), &mut tick2).unwrap();
		assert!(tick2.install_vote.is_none());
		assert!(tick2.arm.iter().any(|(t, _, _)| *t == ClientTimerToken::AskLaterRetry));

		let mut tick3 = ClientTick::empty();
		c.on_ask_later_retry_timer(&mut tick3);
		assert_eq!(tick3.messages[0].msg_type.as_u8(), MessageType::AskForVote.as_u8());
	}

	#[test]
	fn wait_for_reply_suppresses_sends_until_vote_info() {
		let mut c = fresh();
		drive_to_steady(&mut c);

		let mut tick = ClientTick::empty();
		c.on_config_node_list(NodeList::new(), &mut tick);
		let sent_seq = tick.messages[0].seq;

		let mut tick2 = ClientTick::empty();
		c.on_message(typed::build_node_list_reply(99, sent_seq, ResultVote::WaitForReply), &mut tick2).unwrap();

		let mut tick3 = ClientTick::empty();
		c.on_config_node_list(NodeList::new(), &mut tick3);
		assert!(tick3.messages.is_empty());

		let mut tick4 = ClientTick::empty();
		c.on_message(typed::build_vote_info(100, ResultVote::Nack), &mut tick4).unwrap();
		assert_eq!(tick4.install_vote, Some(ResultVote::Nack));
		assert_eq!(tick4.messages[0].msg_type.as_u8(), MessageType::VoteInfoReply.as_u8());
	}

	#[test]
	fn heartbeat_loss_closes_session() {
		let mut c = fresh();
		drive_to_steady(&mut c);

		let mut tick = ClientTick::empty();
		c.on_heartbeat_timer(&mut tick);
		assert!(tick.arm.iter().any(|(t, _, _)| *t == ClientTimerToken::HeartbeatTimeout));

		let mut tick2 = ClientTick::empty();
		c.on_heartbeat_timeout(&mut tick2);
		assert!(tick2.close.is_some());
	}

	#[test]
	fn tls_mismatch_closes_before_init() {
		let mut c = ClientSession::new(ClientConfig {
			node_id: 1,
			cluster_name: "c1".to_string(),
			decision_algorithm: DecisionAlgorithm::Test,
			tls_posture: TlsMode::Required,
			heartbeat_interval: Duration::from_millis(8000),
			cast_vote_timer_interval: Duration::from_secs(10),
			has_client_cert: false,
		});
		let mut tick = ClientTick::empty();
		c.on_connect(&mut tick);
		let mut tick2 = ClientTick::empty();
		let err = c.on_message(typed::build_preinit_reply(1, TlsMode::Unsupported, false), &mut tick2);
		assert!(err.is_err());
		assert!(tick2.close.is_some());
		assert_eq!(c.state(), ClientState::WaitPreinitReply);
	}

	#[test]
	fn server_requires_tls_but_client_unsupported_closes() {
		let mut c = ClientSession::new(ClientConfig {
			node_id: 1,
			cluster_name: "c1".to_string(),
			decision_algorithm: DecisionAlgorithm::Test,
			tls_posture: TlsMode::Unsupported,
			heartbeat_interval: Duration::from_millis(8000),
			cast_vote_timer_interval: Duration::from_secs(10),
			has_client_cert: false,
		});
		let mut tick = ClientTick::empty();
		c.on_connect(&mut tick);
		let mut tick2 = ClientTick::empty();
		let err = c.on_message(typed::build_preinit_reply(1, TlsMode::Required, false), &mut tick2);
		assert!(err.is_err());
		assert!(tick2.close.is_some());
	}

	#[test]
	fn missing_client_cert_closes_when_server_requires_one() {
		let mut c = fresh();
		let mut tick = ClientTick::empty();
		c.on_connect(&mut tick);
		let mut tick2 = ClientTick::empty();
		let err = c.on_message(typed::build_preinit_reply(1, TlsMode::Unsupported, true), &mut tick2);
		assert!(err.is_err());
		assert!(tick2.close.is_some());
	}
}

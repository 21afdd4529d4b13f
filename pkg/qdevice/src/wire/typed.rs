//! Typed builders/readers layered over the raw TLV `Message`, one per
//! protocol message named in spec §3/§6. Mirrors the way the teacher's
//! `protos.rs` gives each RPC a dedicated request/response struct instead
//! of making call sites poke at a generic envelope.

use qdevice_primitives::{NodeDescriptor, NodeId, NodeList, NodeState, RingId};

use super::message::{Message, MessageType};
use super::opt;
use crate::errors::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
	Unsupported,
	Supported,
	Required,
}

impl TlsMode {
	fn as_u8(self) -> u8 {
		match self {
			TlsMode::Unsupported => 0,
			TlsMode::Supported => 1,
			TlsMode::Required => 2,
		}
	}
	fn from_u8(v: u8) -> Result<Self> {
		Ok(match v {
			0 => TlsMode::Unsupported,
			1 => TlsMode::Supported,
			2 => TlsMode::Required,
			_ => return Err("invalid tls mode".into()),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionAlgorithm {
	Test,
	FfSplit,
	Lms,
	TwoNodeLms,
}

impl DecisionAlgorithm {
	pub fn as_u8(self) -> u8 {
		match self {
			DecisionAlgorithm::Test => 0,
			DecisionAlgorithm::FfSplit => 1,
			DecisionAlgorithm::Lms => 2,
			DecisionAlgorithm::TwoNodeLms => 3,
		}
	}
	pub fn from_u8(v: u8) -> Result<Self> {
		Ok(match v {
			0 => DecisionAlgorithm::Test,
			1 => DecisionAlgorithm::FfSplit,
			2 => DecisionAlgorithm::Lms,
			3 => DecisionAlgorithm::TwoNodeLms,
			_ => return Err(ErrorKind::UnsupportedDecisionAlgorithm(v.to_string()).into()),
		})
	}
	pub fn name(self) -> &'static str {
		match self {
			DecisionAlgorithm::Test => "TEST",
			DecisionAlgorithm::FfSplit => "FFSPLIT",
			DecisionAlgorithm::Lms => "LMS",
			DecisionAlgorithm::TwoNodeLms => "2NODELMS",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeListSubtype {
	Config,
	Membership,
	Quorum,
}

impl NodeListSubtype {
	fn as_u8(self) -> u8 {
		match self {
			NodeListSubtype::Config => 0,
			NodeListSubtype::Membership => 1,
			NodeListSubtype::Quorum => 2,
		}
	}
	fn from_u8(v: u8) -> Result<Self> {
		Ok(match v {
			0 => NodeListSubtype::Config,
			1 => NodeListSubtype::Membership,
			2 => NodeListSubtype::Quorum,
			_ => return Err("invalid node-list subtype".into()),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultVote {
	Ack,
	Nack,
	AskLater,
	WaitForReply,
	NoChange,
}

impl ResultVote {
	pub fn as_u8(self) -> u8 {
		match self {
			ResultVote::Ack => 0,
			ResultVote::Nack => 1,
			ResultVote::AskLater => 2,
			ResultVote::WaitForReply => 3,
			ResultVote::NoChange => 4,
		}
	}
	pub fn from_u8(v: u8) -> Result<Self> {
		Ok(match v {
			0 => ResultVote::Ack,
			1 => ResultVote::Nack,
			2 => ResultVote::AskLater,
			3 => ResultVote::WaitForReply,
			4 => ResultVote::NoChange,
			_ => return Err("invalid result vote".into()),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
	NoError = 0,
	InternalError = 1,
	UnexpectedMessage = 2,
	Malformed = 3,
	TlsRequired = 4,
	UnsupportedNeededOption = 5,
	UnsupportedMsg = 6,
	DuplicateNodeId = 7,
	TieBreakerDiffersFromOtherNodes = 8,
	AlgorithmDiffersFromOtherNodes = 9,
	UnsupportedDecisionAlgorithm = 10,
}

// --- preinit / preinit-reply ---

pub fn build_preinit(seq: u32, cluster_name: &str) -> Message {
	let mut m = Message::new(MessageType::Preinit, seq);
	m.options.push(opt_str(opt::CLUSTER_NAME, true, cluster_name));
	m
}

pub fn build_preinit_reply(seq: u32, tls_mode: TlsMode, client_cert_required: bool) -> Message {
	let mut m = Message::new(MessageType::PreinitReply, seq);
	m.options.push(opt_u8(opt::TLS_MODE, true, tls_mode.as_u8()));
	m.options.push(opt_bool(opt::TLS_CLIENT_CERT_REQUIRED, false, client_cert_required));
	m
}

/// Returns `(tls_mode, client_cert_required)`. `client_cert_required` is
/// advisory and defaults to `false` when the peer doesn't send it.
pub fn read_preinit_reply(m: &Message) -> Result<(TlsMode, bool)> {
	let raw = m.option(opt::TLS_MODE).ok_or("preinit-reply missing tls_mode")?;
	let tls_mode = TlsMode::from_u8(raw.as_u8()?)?;
	let client_cert_required =
		m.option(opt::TLS_CLIENT_CERT_REQUIRED).map(|o| o.as_bool()).transpose()?.unwrap_or(false);
	Ok((tls_mode, client_cert_required))
}

pub fn read_preinit(m: &Message) -> Result<String> {
	Ok(m.option(opt::CLUSTER_NAME).ok_or("preinit missing cluster_name")?.as_str()?.to_string())
}

// --- starttls ---

pub fn build_starttls(seq: u32) -> Message {
	Message::new(MessageType::StartTls, seq)
}

// --- init / init-reply ---

pub struct InitRequest {
	pub protocol_version: u8,
	pub node_id: NodeId,
	pub decision_algorithm: DecisionAlgorithm,
	pub heartbeat_interval_ms: u32,
	pub tls_supported: TlsMode,
	pub cluster_name: String,
	/// `MessageType::as_u8()` values this build understands.
	pub supported_messages: Vec<u8>,
	/// Option-tag values (low 15 bits, mandatory bit excluded) this build
	/// understands.
	pub supported_options: Vec<u16>,
}

/// The full set of message types this build of the protocol understands,
/// for advertisement in `init`'s `supported-messages` field.
pub fn known_message_types() -> Vec<u8> {
	[
		MessageType::Preinit,
		MessageType::PreinitReply,
		MessageType::StartTls,
		MessageType::Init,
		MessageType::InitReply,
		MessageType::SetOption,
		MessageType::SetOptionReply,
		MessageType::EchoRequest,
		MessageType::EchoReply,
		MessageType::NodeList,
		MessageType::NodeListReply,
		MessageType::AskForVote,
		MessageType::AskForVoteReply,
		MessageType::VoteInfo,
		MessageType::VoteInfoReply,
		MessageType::ServerError,
	]
	.iter()
	.map(|t| t.as_u8())
	.collect()
}

/// The full set of option tags this build of the protocol understands, for
/// advertisement in `init`'s `supported-options` field.
pub fn known_option_types() -> Vec<u16> {
	vec![
		opt::SEQ,
		opt::CLUSTER_NAME,
		opt::TLS_MODE,
		opt::TLS_CLIENT_CERT_REQUIRED,
		opt::PROTOCOL_VERSION,
		opt::NODE_ID,
		opt::DECISION_ALGORITHM,
		opt::HEARTBEAT_INTERVAL_MS,
		opt::SUPPORTED_MESSAGES,
		opt::SUPPORTED_OPTIONS,
		opt::SUPPORTED_DECISION_ALGORITHMS,
		opt::RESULT_OK,
		opt::ERROR_CODE,
		opt::ERROR_MESSAGE,
		opt::NODE_LIST_SUBTYPE,
		opt::RING_ID_NODE,
		opt::RING_ID_SEQ,
		opt::NODE_ENTRY,
		opt::QUORATE,
		opt::RESULT_VOTE,
		opt::KEEPALIVE_ENABLED,
		opt::REQUEST_SEQ,
	]
}

fn encode_u16_list(vals: &[u16]) -> Vec<u8> {
	vals.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn decode_u16_list(bytes: &[u8]) -> Result<Vec<u16>> {
	if bytes.len() % 2 != 0 {
		return Err("malformed u16 list option".into());
	}
	Ok(bytes.chunks(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect())
}

pub fn build_init(seq: u32, req: &InitRequest) -> Message {
	let mut m = Message::new(MessageType::Init, seq);
	m.options.push(opt_u8(opt::PROTOCOL_VERSION, true, req.protocol_version));
	m.options.push(opt_u32(opt::NODE_ID, true, req.node_id));
	m.options.push(opt_u8(opt::DECISION_ALGORITHM, true, req.decision_algorithm.as_u8()));
	m.options.push(opt_u32(opt::HEARTBEAT_INTERVAL_MS, true, req.heartbeat_interval_ms));
	m.options.push(opt_u8(opt::TLS_MODE, true, req.tls_supported.as_u8()));
	m.options.push(opt_str(opt::CLUSTER_NAME, true, &req.cluster_name));
	m.options.push(opt_bytes(opt::SUPPORTED_MESSAGES, true, req.supported_messages.clone()));
	m.options.push(opt_bytes(opt::SUPPORTED_OPTIONS, true, encode_u16_list(&req.supported_options)));
	m
}

pub fn read_init(m: &Message) -> Result<InitRequest> {
	Ok(InitRequest {
		protocol_version: m.option(opt::PROTOCOL_VERSION).ok_or("init missing protocol_version")?.as_u8()?,
		node_id: m.option(opt::NODE_ID).ok_or("init missing node_id")?.as_u32()?,
		decision_algorithm: DecisionAlgorithm::from_u8(
			m.option(opt::DECISION_ALGORITHM).ok_or("init missing decision_algorithm")?.as_u8()?,
		)?,
		heartbeat_interval_ms: m
			.option(opt::HEARTBEAT_INTERVAL_MS)
			.ok_or("init missing heartbeat_interval_ms")?
			.as_u32()?,
		tls_supported: TlsMode::from_u8(m.option(opt::TLS_MODE).ok_or("init missing tls_mode")?.as_u8()?)?,
		cluster_name: m.option(opt::CLUSTER_NAME).ok_or("init missing cluster_name")?.as_str()?.to_string(),
		supported_messages: m
			.option(opt::SUPPORTED_MESSAGES)
			.ok_or("init missing supported_messages")?
			.value
			.clone(),
		supported_options: decode_u16_list(
			&m.option(opt::SUPPORTED_OPTIONS).ok_or("init missing supported_options")?.value,
		)?,
	})
}

pub fn build_init_reply(seq: u32, ok: bool) -> Message {
	let mut m = Message::new(MessageType::InitReply, seq);
	m.options.push(opt_bool(opt::RESULT_OK, true, ok));
	m
}

pub fn read_init_reply(m: &Message) -> Result<bool> {
	m.option(opt::RESULT_OK).ok_or("init-reply missing result".into()).and_then(|o| o.as_bool())
}

// --- set-option / set-option-reply ---

pub fn build_set_option_heartbeat(seq: u32, heartbeat_interval_ms: u32, keepalive: bool) -> Message {
	let mut m = Message::new(MessageType::SetOption, seq);
	m.options.push(opt_u32(opt::HEARTBEAT_INTERVAL_MS, false, heartbeat_interval_ms));
	m.options.push(opt_bool(opt::KEEPALIVE_ENABLED, false, keepalive));
	m
}

pub fn build_set_option_reply(seq: u32, ok: bool) -> Message {
	let mut m = Message::new(MessageType::SetOptionReply, seq);
	m.options.push(opt_bool(opt::RESULT_OK, true, ok));
	m
}

// --- echo ---

pub fn build_echo_request(seq: u32) -> Message {
	Message::new(MessageType::EchoRequest, seq)
}

pub fn build_echo_reply(seq: u32, request_seq: u32) -> Message {
	let mut m = Message::new(MessageType::EchoReply, seq);
	m.options.push(opt_u32(opt::REQUEST_SEQ, true, request_seq));
	m
}

pub fn read_echo_reply_request_seq(m: &Message) -> Result<u32> {
	m.option(opt::REQUEST_SEQ).ok_or("echo-reply missing request_seq".into()).and_then(|o| o.as_u32())
}

// --- node-list / node-list-reply ---

pub struct NodeListMessage {
	pub subtype: NodeListSubtype,
	pub nodes: NodeList,
	pub ring_id: Option<RingId>,
	pub quorate: Option<bool>,
}

pub fn build_node_list(seq: u32, msg: &NodeListMessage) -> Message {
	let mut m = Message::new(MessageType::NodeList, seq);
	m.options.push(opt_u8(opt::NODE_LIST_SUBTYPE, true, msg.subtype.as_u8()));
	for n in msg.nodes.iter() {
		let mut v = Vec::with_capacity(opt::NODE_ENTRY_LEN);
		v.extend_from_slice(&n.node_id.to_be_bytes());
		v.extend_from_slice(&n.data_center_id.to_be_bytes());
		v.push(n.node_state.as_u8());
		m.options.push(opt_bytes(opt::NODE_ENTRY, true, v));
	}
	if let Some(ring_id) = msg.ring_id {
		m.options.push(opt_u32(opt::RING_ID_NODE, true, ring_id.node_id));
		m.options.push(opt_u64(opt::RING_ID_SEQ, true, ring_id.seq));
	}
	if let Some(quorate) = msg.quorate {
		m.options.push(opt_bool(opt::QUORATE, true, quorate));
	}
	m
}

pub fn read_node_list(m: &Message) -> Result<NodeListMessage> {
	let subtype = NodeListSubtype::from_u8(
		m.option(opt::NODE_LIST_SUBTYPE).ok_or("node-list missing subtype")?.as_u8()?,
	)?;

	let mut nodes = NodeList::new();
	for raw in m.options_of(opt::NODE_ENTRY) {
		if raw.value.len() != opt::NODE_ENTRY_LEN {
			return Err("malformed node entry".into());
		}
		let node_id = u32::from_be_bytes(raw.value[0..4].try_into().unwrap());
		let data_center_id = u32::from_be_bytes(raw.value[4..8].try_into().unwrap());
		let node_state = NodeState::from_u8(raw.value[8]).ok_or("invalid node_state")?;
		nodes.push(NodeDescriptor { node_id, data_center_id, node_state });
	}

	let ring_id = match (m.option(opt::RING_ID_NODE), m.option(opt::RING_ID_SEQ)) {
		(Some(n), Some(s)) => Some(RingId { node_id: n.as_u32()?, seq: s.as_u64()? }),
		_ => None,
	};

	let quorate = m.option(opt::QUORATE).map(|o| o.as_bool()).transpose()?;

	Ok(NodeListMessage { subtype, nodes, ring_id, quorate })
}

pub fn build_node_list_reply(seq: u32, request_seq: u32, vote: ResultVote) -> Message {
	let mut m = Message::new(MessageType::NodeListReply, seq);
	m.options.push(opt_u32(opt::REQUEST_SEQ, true, request_seq));
	m.options.push(opt_u8(opt::RESULT_VOTE, true, vote.as_u8()));
	m
}

pub fn read_node_list_reply(m: &Message) -> Result<(u32, ResultVote)> {
	let request_seq = m.option(opt::REQUEST_SEQ).ok_or("node-list-reply missing request_seq")?.as_u32()?;
	let vote = ResultVote::from_u8(m.option(opt::RESULT_VOTE).ok_or("node-list-reply missing vote")?.as_u8()?)?;
	Ok((request_seq, vote))
}

// --- ask-for-vote / ask-for-vote-reply ---

pub fn build_ask_for_vote(seq: u32, request_seq: u32) -> Message {
	let mut m = Message::new(MessageType::AskForVote, seq);
	m.options.push(opt_u32(opt::REQUEST_SEQ, true, request_seq));
	m
}

pub fn read_ask_for_vote(m: &Message) -> Result<u32> {
	m.option(opt::REQUEST_SEQ).ok_or("ask-for-vote missing request_seq".into()).and_then(|o| o.as_u32())
}

pub fn build_ask_for_vote_reply(seq: u32, request_seq: u32, vote: ResultVote) -> Message {
	let mut m = Message::new(MessageType::AskForVoteReply, seq);
	m.options.push(opt_u32(opt::REQUEST_SEQ, true, request_seq));
	m.options.push(opt_u8(opt::RESULT_VOTE, true, vote.as_u8()));
	m
}

pub fn read_ask_for_vote_reply(m: &Message) -> Result<(u32, ResultVote)> {
	let request_seq = m.option(opt::REQUEST_SEQ).ok_or("ask-for-vote-reply missing request_seq")?.as_u32()?;
	let vote = ResultVote::from_u8(m.option(opt::RESULT_VOTE).ok_or("ask-for-vote-reply missing vote")?.as_u8()?)?;
	Ok((request_seq, vote))
}

// --- vote-info / vote-info-reply ---

pub fn build_vote_info(seq: u32, vote: ResultVote) -> Message {
	let mut m = Message::new(MessageType::VoteInfo, seq);
	m.options.push(opt_u8(opt::RESULT_VOTE, true, vote.as_u8()));
	m
}

pub fn read_vote_info(m: &Message) -> Result<ResultVote> {
	ResultVote::from_u8(m.option(opt::RESULT_VOTE).ok_or("vote-info missing vote")?.as_u8()?)
}

pub fn build_vote_info_reply(seq: u32, request_seq: u32) -> Message {
	let mut m = Message::new(MessageType::VoteInfoReply, seq);
	m.options.push(opt_u32(opt::REQUEST_SEQ, true, request_seq));
	m
}

// --- server-error ---

pub fn build_server_error(seq: u32, code: ErrorCode, msg: &str) -> Message {
	let mut m = Message::new(MessageType::ServerError, seq);
	m.options.push(opt_u16(opt::ERROR_CODE, true, code as u16));
	m.options.push(opt_str(opt::ERROR_MESSAGE, false, msg));
	m
}

pub fn read_server_error(m: &Message) -> Result<(u16, String)> {
	let code = m.option(opt::ERROR_CODE).ok_or("server-error missing code")?.as_u16()?;
	let msg = m.option(opt::ERROR_MESSAGE).map(|o| o.as_str().unwrap_or("").to_string()).unwrap_or_default();
	Ok((code, msg))
}

// --- small option constructors ---

use super::tlv::RawOption;

fn opt_u8(opt_type: u16, mandatory: bool, v: u8) -> RawOption {
	RawOption { opt_type, mandatory, value: vec![v] }
}
fn opt_u16(opt_type: u16, mandatory: bool, v: u16) -> RawOption {
	RawOption { opt_type, mandatory, value: v.to_be_bytes().to_vec() }
}
fn opt_u32(opt_type: u16, mandatory: bool, v: u32) -> RawOption {
	RawOption { opt_type, mandatory, value: v.to_be_bytes().to_vec() }
}
fn opt_u64(opt_type: u16, mandatory: bool, v: u64) -> RawOption {
	RawOption { opt_type, mandatory, value: v.to_be_bytes().to_vec() }
}
fn opt_bool(opt_type: u16, mandatory: bool, v: bool) -> RawOption {
	opt_u8(opt_type, mandatory, v as u8)
}
fn opt_str(opt_type: u16, mandatory: bool, v: &str) -> RawOption {
	RawOption { opt_type, mandatory, value: v.as_bytes().to_vec() }
}
fn opt_bytes(opt_type: u16, mandatory: bool, v: Vec<u8>) -> RawOption {
	RawOption { opt_type, mandatory, value: v }
}

#[cfg(test)]
mod tests {
	use super::*;
	use qdevice_primitives::NodeDescriptor;

	#[test]
	fn node_list_round_trips_through_wire() {
		let mut nodes = NodeList::new();
		nodes.push(NodeDescriptor { node_id: 1, data_center_id: 0, node_state: NodeState::Member });
		nodes.push(NodeDescriptor { node_id: 2, data_center_id: 0, node_state: NodeState::Member });

		let built = build_node_list(
			5,
			&NodeListMessage {
				subtype: NodeListSubtype::Membership,
				nodes,
				ring_id: Some(RingId { node_id: 1, seq: 5 }),
				quorate: None,
			},
		);
		let bytes = built.encode();
		let (decoded, _) = Message::decode(&bytes, super::super::message::DEFAULT_MAX_MSG_LEN).unwrap().unwrap();
		let parsed = read_node_list(&decoded).unwrap();
		assert_eq!(parsed.subtype, NodeListSubtype::Membership);
		assert_eq!(parsed.nodes.len(), 2);
		assert_eq!(parsed.ring_id, Some(RingId { node_id: 1, seq: 5 }));
	}

	#[test]
	fn init_round_trips() {
		let req = InitRequest {
			protocol_version: 1,
			node_id: 7,
			decision_algorithm: DecisionAlgorithm::FfSplit,
			heartbeat_interval_ms: 8000,
			tls_supported: TlsMode::Supported,
			cluster_name: "c1".to_string(),
			supported_messages: known_message_types(),
			supported_options: known_option_types(),
		};
		let built = build_init(1, &req);
		let bytes = built.encode();
		let (decoded, _) = Message::decode(&bytes, super::super::message::DEFAULT_MAX_MSG_LEN).unwrap().unwrap();
		let parsed = read_init(&decoded).unwrap();
		assert_eq!(parsed.node_id, 7);
		assert_eq!(parsed.decision_algorithm, DecisionAlgorithm::FfSplit);
		assert_eq!(parsed.cluster_name, "c1");
		assert_eq!(parsed.supported_messages, known_message_types());
		assert_eq!(parsed.supported_options, known_option_types());
	}

	#[test]
	fn preinit_reply_round_trips_client_cert_required() {
		let built = build_preinit_reply(1, TlsMode::Required, true);
		let bytes = built.encode();
		let (decoded, _) = Message::decode(&bytes, super::super::message::DEFAULT_MAX_MSG_LEN).unwrap().unwrap();
		let (tls_mode, client_cert_required) = read_preinit_reply(&decoded).unwrap();
		assert_eq!(tls_mode, TlsMode::Required);
		assert!(client_cert_required);
	}
}

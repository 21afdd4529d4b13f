//! Message framing (spec §4.1, §3 "Message").
//!
//! `msg_type(u8) ∥ reserved(u8) ∥ option_count(u16 BE, advisory) ∥
//! msg_len(u32 BE, covers options only) ∥ options…`. The sender's sequence
//! number is itself carried as a mandatory `opt::SEQ` TLV option rather than
//! a fixed header field, so that the header stays message-type agnostic
//! (see DESIGN.md for why this reading of §3/§4.1 was chosen).

use super::tlv::{self, RawOption};
use crate::errors::*;

pub const HEADER_LEN: usize = 1 + 1 + 2 + 4;
pub const DEFAULT_MAX_MSG_LEN: u32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
	Preinit,
	PreinitReply,
	StartTls,
	Init,
	InitReply,
	SetOption,
	SetOptionReply,
	EchoRequest,
	EchoReply,
	NodeList,
	NodeListReply,
	AskForVote,
	AskForVoteReply,
	VoteInfo,
	VoteInfoReply,
	ServerError,
	Unknown(u8),
}

impl MessageType {
	pub fn as_u8(self) -> u8 {
		match self {
			MessageType::Preinit => 1,
			MessageType::PreinitReply => 2,
			MessageType::StartTls => 3,
			MessageType::Init => 4,
			MessageType::InitReply => 5,
			MessageType::SetOption => 6,
			MessageType::SetOptionReply => 7,
			MessageType::EchoRequest => 8,
			MessageType::EchoReply => 9,
			MessageType::NodeList => 10,
			MessageType::NodeListReply => 11,
			MessageType::AskForVote => 12,
			MessageType::AskForVoteReply => 13,
			MessageType::VoteInfo => 14,
			MessageType::VoteInfoReply => 15,
			MessageType::ServerError => 16,
			MessageType::Unknown(v) => v,
		}
	}

	pub fn from_u8(v: u8) -> Self {
		match v {
			1 => MessageType::Preinit,
			2 => MessageType::PreinitReply,
			3 => MessageType::StartTls,
			4 => MessageType::Init,
			5 => MessageType::InitReply,
			6 => MessageType::SetOption,
			7 => MessageType::SetOptionReply,
			8 => MessageType::EchoRequest,
			9 => MessageType::EchoReply,
			10 => MessageType::NodeList,
			11 => MessageType::NodeListReply,
			12 => MessageType::AskForVote,
			13 => MessageType::AskForVoteReply,
			14 => MessageType::VoteInfo,
			15 => MessageType::VoteInfoReply,
			16 => MessageType::ServerError,
			other => MessageType::Unknown(other),
		}
	}
}

#[derive(Debug, Clone)]
pub struct Message {
	pub msg_type: MessageType,
	pub seq: u32,
	pub options: Vec<RawOption>,
}

impl Message {
	pub fn new(msg_type: MessageType, seq: u32) -> Self {
		Message { msg_type, seq, options: Vec::new() }
	}

	pub fn option(&self, opt_type: u16) -> Option<&RawOption> {
		self.options.iter().find(|o| o.opt_type == opt_type)
	}

	pub fn options_of(&self, opt_type: u16) -> impl Iterator<Item = &RawOption> {
		self.options.iter().filter(move |o| o.opt_type == opt_type)
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut enc = tlv::Encoder::new();
		enc.push_u32(super::opt::SEQ, true, self.seq);
		for opt in &self.options {
			enc.push_bytes(opt.opt_type, opt.mandatory, &opt.value);
		}
		let (body, count) = enc.finish();

		let mut out = Vec::with_capacity(HEADER_LEN + body.len());
		out.push(self.msg_type.as_u8());
		out.push(0); // reserved
		out.extend_from_slice(&count.to_be_bytes());
		out.extend_from_slice(&(body.len() as u32).to_be_bytes());
		out.extend_from_slice(&body);
		out
	}

	/// Attempts to decode one full frame from the front of `buf`. Returns
	/// `Ok(None)` if `buf` does not yet hold a complete frame (more bytes
	/// must be read). `max_msg_len` bounds `msg_len`, per §4.1's "fails with
	/// malformed if msg_len exceeds the negotiated maximum".
	pub fn decode(buf: &[u8], max_msg_len: u32) -> Result<Option<(Message, usize)>> {
		if buf.len() < HEADER_LEN {
			return Ok(None);
		}

		let msg_type = buf[0];
		let msg_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

		if msg_len > max_msg_len {
			return Err(ErrorKind::Malformed(format!(
				"msg_len {} exceeds negotiated maximum {}",
				msg_len, max_msg_len
			))
			.into());
		}

		let total = HEADER_LEN + msg_len as usize;
		if buf.len() < total {
			return Ok(None);
		}

		let options = tlv::decode_options(&buf[HEADER_LEN..total])?;

		let seq = options
			.iter()
			.find(|o| o.opt_type == super::opt::SEQ)
			.ok_or_else(|| Error::from(ErrorKind::Malformed("missing seq option".into())))?
			.as_u32()?;

		let rest: Vec<RawOption> =
			options.into_iter().filter(|o| o.opt_type != super::opt::SEQ).collect();

		Ok(Some((
			Message { msg_type: MessageType::from_u8(msg_type), seq, options: rest },
			total,
		)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::wire::opt;

	fn sample() -> Message {
		let mut m = Message::new(MessageType::Init, 42);
		m.options.push(RawOption { opt_type: opt::CLUSTER_NAME, mandatory: true, value: b"c1".to_vec() });
		m.options.push(RawOption { opt_type: opt::NODE_ID, mandatory: true, value: 7u32.to_be_bytes().to_vec() });
		m
	}

	#[test]
	fn round_trip_law() {
		let m = sample();
		let bytes = m.encode();
		let (decoded, consumed) = Message::decode(&bytes, DEFAULT_MAX_MSG_LEN).unwrap().unwrap();
		assert_eq!(consumed, bytes.len());
		assert_eq!(decoded.msg_type.as_u8(), m.msg_type.as_u8());
		assert_eq!(decoded.seq, m.seq);
		assert_eq!(decoded.options.len(), m.options.len());
		assert_eq!(decoded.option(opt::CLUSTER_NAME).unwrap().as_str().unwrap(), "c1");
		assert_eq!(decoded.option(opt::NODE_ID).unwrap().as_u32().unwrap(), 7);
	}

	#[test]
	fn encoded_len_matches_advertised_msg_len() {
		let m = sample();
		let bytes = m.encode();
		let msg_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
		assert_eq!(bytes.len(), HEADER_LEN + msg_len as usize);
	}

	#[test]
	fn partial_buffer_requests_more() {
		let m = sample();
		let bytes = m.encode();
		let partial = &bytes[..bytes.len() - 1];
		assert!(Message::decode(partial, DEFAULT_MAX_MSG_LEN).unwrap().is_none());
	}

	#[test]
	fn oversized_msg_len_is_malformed() {
		let mut bytes = vec![0u8; HEADER_LEN];
		bytes[0] = MessageType::EchoRequest.as_u8();
		bytes[4..8].copy_from_slice(&(DEFAULT_MAX_MSG_LEN + 1).to_be_bytes());
		assert!(Message::decode(&bytes, DEFAULT_MAX_MSG_LEN).is_err());
	}

	#[test]
	fn unknown_message_type_still_decodes_structurally() {
		let mut m = Message::new(MessageType::Unknown(200), 1);
		m.options.push(RawOption { opt_type: 99, mandatory: false, value: vec![1, 2, 3] });
		let bytes = m.encode();
		let (decoded, _) = Message::decode(&bytes, DEFAULT_MAX_MSG_LEN).unwrap().unwrap();
		assert_eq!(decoded.msg_type.as_u8(), 200);
	}
}

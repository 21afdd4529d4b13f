//! TLV option-type constants shared by every message (spec §4.1, §6).
//! `RawOption::opt_type` carries the low 15 bits of the tag written here;
//! the `mandatory` flag is the separate high bit handled by the codec.

pub const SEQ: u16 = 1;
pub const CLUSTER_NAME: u16 = 2;
pub const TLS_MODE: u16 = 3;
pub const TLS_CLIENT_CERT_REQUIRED: u16 = 4;
pub const PROTOCOL_VERSION: u16 = 5;
pub const NODE_ID: u16 = 6;
pub const DECISION_ALGORITHM: u16 = 7;
pub const HEARTBEAT_INTERVAL_MS: u16 = 8;
pub const SUPPORTED_MESSAGES: u16 = 9;
pub const SUPPORTED_OPTIONS: u16 = 10;
pub const SUPPORTED_DECISION_ALGORITHMS: u16 = 11;
pub const RESULT_OK: u16 = 12;
pub const ERROR_CODE: u16 = 13;
pub const ERROR_MESSAGE: u16 = 14;
pub const NODE_LIST_SUBTYPE: u16 = 15;
pub const RING_ID_NODE: u16 = 16;
pub const RING_ID_SEQ: u16 = 17;
/// Repeated per node present in a node-list message.
pub const NODE_ENTRY: u16 = 18;
pub const QUORATE: u16 = 19;
pub const RESULT_VOTE: u16 = 20;
pub const KEEPALIVE_ENABLED: u16 = 21;
/// Carries the `msg_seq_num` a reply correlates to, or that an
/// `ask-for-vote`/`vote-info-reply` re-references.
pub const REQUEST_SEQ: u16 = 22;

/// `node_id ++ data_center_id ++ node_state`, big-endian.
pub const NODE_ENTRY_LEN: usize = 4 + 4 + 1;

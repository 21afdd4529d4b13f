pub mod message;
pub mod opt;
pub mod tlv;
pub mod typed;

pub use message::{Message, MessageType, DEFAULT_MAX_MSG_LEN};
pub use tlv::RawOption;

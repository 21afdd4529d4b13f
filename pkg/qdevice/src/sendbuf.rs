//! Per-connection ordered outbound queue (spec §3 "Send-buffer list", §4.3).

use crate::errors::*;

pub const DEFAULT_MAX_COUNT: usize = 32;
pub const DEFAULT_MAX_BYTES: usize = 256 * 1024;

pub struct PendingBuffer {
	pub buffer: Vec<u8>,
	pub bytes_already_sent: usize,
	pub msg_seq_num: u32,
	pub requires_tls: bool,
}

impl PendingBuffer {
	fn remaining(&self) -> &[u8] {
		&self.buffer[self.bytes_already_sent..]
	}
}

/// At most one entry is ever "active" (partially written); append is O(1);
/// an entry is freed only after it is fully transmitted.
pub struct SendBufferList {
	entries: std::collections::VecDeque<PendingBuffer>,
	total_bytes: usize,
	max_count: usize,
	max_bytes: usize,
}

impl SendBufferList {
	pub fn new() -> Self {
		Self::with_limits(DEFAULT_MAX_COUNT, DEFAULT_MAX_BYTES)
	}

	pub fn with_limits(max_count: usize, max_bytes: usize) -> Self {
		SendBufferList { entries: std::collections::VecDeque::new(), total_bytes: 0, max_count, max_bytes }
	}

	/// Appends a new buffer to the tail of the queue. Closes the session
	/// (by returning an error) if either bound would be exceeded.
	pub fn push(&mut self, buffer: Vec<u8>, msg_seq_num: u32, requires_tls: bool) -> Result<()> {
		if self.entries.len() + 1 > self.max_count || self.total_bytes + buffer.len() > self.max_bytes {
			return Err(ErrorKind::SendQueueOverflow.into());
		}
		self.total_bytes += buffer.len();
		self.entries.push_back(PendingBuffer { buffer, bytes_already_sent: 0, msg_seq_num, requires_tls });
		Ok(())
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// The bytes of the head entry not yet written, or `None` if the queue
	/// is empty or the head entry is withheld pending a TLS handshake
	/// (§4.3 "a buffer marked requires_tls is withheld until the TLS
	/// handshake completes").
	pub fn writable_head(&self, tls_ready: bool) -> Option<&[u8]> {
		let head = self.entries.front()?;
		if head.requires_tls && !tls_ready {
			return None;
		}
		Some(head.remaining())
	}

	/// Records that `n` more bytes of the head entry were written,
	/// dropping it from the queue once it is fully sent.
	pub fn advance(&mut self, n: usize) {
		if let Some(head) = self.entries.front_mut() {
			head.bytes_already_sent += n;
			if head.bytes_already_sent >= head.buffer.len() {
				self.total_bytes -= head.buffer.len();
				self.entries.pop_front();
			}
		}
	}

	/// Drains the queue without sending, for session teardown (§5
	/// "cancellation... drains its send-buffer list without sending").
	pub fn drain_without_sending(&mut self) {
		self.entries.clear();
		self.total_bytes = 0;
	}
}

impl Default for SendBufferList {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_write_advances_head_only() {
		let mut q = SendBufferList::new();
		q.push(vec![1, 2, 3, 4], 1, false).unwrap();
		q.push(vec![5, 6], 2, false).unwrap();

		assert_eq!(q.writable_head(true), Some(&[1u8, 2, 3, 4][..]));
		q.advance(2);
		assert_eq!(q.writable_head(true), Some(&[3u8, 4][..]));
		q.advance(2);
		assert_eq!(q.writable_head(true), Some(&[5u8, 6][..]));
		assert_eq!(q.len(), 1);
	}

	#[test]
	fn tls_gated_entry_is_withheld_until_ready() {
		let mut q = SendBufferList::new();
		q.push(vec![9, 9], 1, true).unwrap();
		assert_eq!(q.writable_head(false), None);
		assert_eq!(q.writable_head(true), Some(&[9u8, 9][..]));
	}

	#[test]
	fn max_count_overflow_errors() {
		let mut q = SendBufferList::with_limits(2, 1024);
		q.push(vec![0], 1, false).unwrap();
		q.push(vec![0], 2, false).unwrap();
		assert!(q.push(vec![0], 3, false).is_err());
	}

	#[test]
	fn max_bytes_overflow_errors() {
		let mut q = SendBufferList::with_limits(32, 4);
		q.push(vec![0, 0], 1, false).unwrap();
		assert!(q.push(vec![0, 0, 0], 2, false).is_err());
	}

	#[test]
	fn drain_without_sending_clears_queue() {
		let mut q = SendBufferList::new();
		q.push(vec![1, 2, 3], 1, false).unwrap();
		q.drain_without_sending();
		assert!(q.is_empty());
	}
}

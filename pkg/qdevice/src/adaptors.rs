//! Cluster-map (`cmap`) and vote-quorum (`votequorum`) adaptors (spec §4.6,
//! §1 "named external interfaces"). The libraries themselves are out of
//! scope; what belongs to this subsystem is the reload-coalescing barrier
//! around their callbacks and the node-id auto-generation rule, both of
//! which are pure and independently testable.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use qdevice_primitives::NodeId;

/// Buffers adaptor events behind the `config.totemconfig_reload_in_progress`
/// barrier so a multi-key atomic edit produces one synthesised event per
/// domain instead of a flap per key (spec §4.6, §8 "Reload coalescing").
pub struct ReloadCoalescer<E> {
	in_reload: bool,
	pending: BTreeMap<&'static str, E>,
}

impl<E> ReloadCoalescer<E> {
	pub fn new() -> Self {
		ReloadCoalescer { in_reload: false, pending: BTreeMap::new() }
	}

	pub fn is_in_reload(&self) -> bool {
		self.in_reload
	}

	/// Called when the reload flag changes. On a `true → false` edge,
	/// returns the coalesced events to emit — at most one per domain;
	/// otherwise returns nothing (entering a reload emits nothing, staying
	/// in one keeps buffering).
	pub fn set_reload_flag(&mut self, in_progress: bool) -> Vec<(&'static str, E)> {
		let was_in_reload = self.in_reload;
		self.in_reload = in_progress;
		if was_in_reload && !in_progress {
			std::mem::take(&mut self.pending).into_iter().collect()
		} else {
			Vec::new()
		}
	}

	/// Records an event observed for `domain`. Outside a reload it is
	/// returned immediately for the caller to emit; during one it replaces
	/// any previously buffered event for the same domain and is held back.
	pub fn record(&mut self, domain: &'static str, event: E) -> Option<(&'static str, E)> {
		if self.in_reload {
			self.pending.insert(domain, event);
			None
		} else {
			Some((domain, event))
		}
	}
}

impl<E> Default for ReloadCoalescer<E> {
	fn default() -> Self {
		Self::new()
	}
}

/// Derives a node_id from `ring0_addr` when the configuration map has no
/// explicit `nodeid` key (spec §4.6). Non-IPv4 addresses are invalid and
/// represented as `0`, which callers must reject.
///
/// The source copies the address bytes into a host-order integer and then
/// applies `htonl` to it; on a little-endian host that byte-swap turns the
/// little-endian reading back into the big-endian one, and on a big-endian
/// host `htonl` is a no-op over an already-big-endian reading. Either way
/// the result is the octets read big-endian, which is also what spec §4.6's
/// own wire description calls for.
pub fn derive_node_id(ring0_addr: &str, clear_node_high_bit: bool) -> NodeId {
	let addr: Ipv4Addr = match ring0_addr.parse() {
		Ok(a) => a,
		Err(_) => return 0,
	};
	let mut id = u32::from_be_bytes(addr.octets());
	if clear_node_high_bit {
		id &= !(1u32 << 31);
	}
	id
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reload_coalescing_emits_once_per_domain_on_flag_clear() {
		let mut c: ReloadCoalescer<u32> = ReloadCoalescer::new();
		assert_eq!(c.set_reload_flag(true), Vec::new());

		assert_eq!(c.record("nodelist", 1), None);
		assert_eq!(c.record("nodelist", 2), None); // second edit replaces the first
		assert_eq!(c.record("logging", 9), None);

		let mut flushed = c.set_reload_flag(false);
		flushed.sort();
		assert_eq!(flushed, vec![("logging", 9), ("nodelist", 2)]);
	}

	#[test]
	fn outside_reload_events_pass_through_immediately() {
		let mut c: ReloadCoalescer<u32> = ReloadCoalescer::new();
		assert_eq!(c.record("nodelist", 7), Some(("nodelist", 7)));
	}

	#[test]
	fn invalid_address_yields_zero() {
		assert_eq!(derive_node_id("not-an-ip", false), 0);
		assert_eq!(derive_node_id("::1", false), 0);
	}

	#[test]
	fn high_bit_is_cleared_when_configured() {
		let with_bit = derive_node_id("255.0.0.0", false);
		assert_eq!(with_bit, u32::from_be_bytes([255, 0, 0, 0]));
		let cleared = derive_node_id("255.0.0.0", true);
		assert_eq!(cleared, with_bit & !(1u32 << 31));
	}

	#[test]
	fn node_id_reads_octets_big_endian() {
		assert_eq!(derive_node_id("10.0.0.1", false), u32::from_be_bytes([10, 0, 0, 1]));
		assert_eq!(derive_node_id("1.0.0.10", false), u32::from_be_bytes([1, 0, 0, 10]));
	}
}

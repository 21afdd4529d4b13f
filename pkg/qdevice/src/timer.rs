//! Monotonic-time min-heap of scheduled callbacks (spec §3 "Timer list",
//! §4.7). Generalized from a callback-per-entry design to a token-per-entry
//! design: the I/O loop owns the single source of truth for "what to do
//! when a timer fires" and the heap only hands back the token, which plays
//! nicer with Rust's borrow checker than storing `FnMut` trait objects the
//! way the spec's source does (see DESIGN.md).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone, Copy)]
pub enum Reschedule {
	OneShot,
	Periodic(Duration),
}

struct Entry<T> {
	deadline: Instant,
	insertion_seq: u64,
	handle: TimerHandle,
	reschedule: Reschedule,
	token: T,
}

impl<T> PartialEq for Entry<T> {
	fn eq(&self, other: &Self) -> bool {
		self.deadline == other.deadline && self.insertion_seq == other.insertion_seq
	}
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}
impl<T> Ord for Entry<T> {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		// FIFO among equal deadlines: smaller insertion_seq sorts first.
		(self.deadline, self.insertion_seq).cmp(&(other.deadline, other.insertion_seq))
	}
}

/// A min-heap of timers keyed on monotonic expiry. Cancellation is
/// logically O(log n): the handle is recorded as cancelled and lazily
/// skipped when popped, so a callback firing may safely add/remove other
/// timers without invalidating the heap mid-iteration (§4.7 "safe-delete").
pub struct TimerList<T> {
	heap: BinaryHeap<Reverse<Entry<T>>>,
	cancelled: HashSet<TimerHandle>,
	next_handle: u64,
	next_insertion_seq: u64,
}

impl<T> TimerList<T> {
	pub fn new() -> Self {
		TimerList { heap: BinaryHeap::new(), cancelled: HashSet::new(), next_handle: 0, next_insertion_seq: 0 }
	}

	pub fn add(&mut self, now: Instant, interval: Duration, reschedule: Reschedule, token: T) -> TimerHandle {
		let handle = TimerHandle(self.next_handle);
		self.next_handle += 1;
		self.push_entry(now + interval, handle, reschedule, token);
		handle
	}

	fn push_entry(&mut self, deadline: Instant, handle: TimerHandle, reschedule: Reschedule, token: T) {
		let insertion_seq = self.next_insertion_seq;
		self.next_insertion_seq += 1;
		self.heap.push(Reverse(Entry { deadline, insertion_seq, handle, reschedule, token }));
	}

	pub fn delete(&mut self, handle: TimerHandle) {
		self.cancelled.insert(handle);
	}

	/// Returns the duration until the next non-cancelled deadline, if any.
	pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
		self.heap.peek().map(|Reverse(e)| e.deadline.saturating_duration_since(now))
	}

	/// Pops and returns every timer expired as of `now`, in strict
	/// fire-before order (§8 "timer ordering"), rescheduling periodic
	/// entries for their next interval and dropping cancelled ones.
	pub fn pop_expired(&mut self, now: Instant) -> Vec<(TimerHandle, T)>
	where
		T: Clone,
	{
		let mut fired = Vec::new();
		while let Some(Reverse(entry)) = self.heap.peek() {
			if entry.deadline > now {
				break;
			}
			let Reverse(entry) = self.heap.pop().unwrap();
			if self.cancelled.remove(&entry.handle) {
				continue;
			}
			if let Reschedule::Periodic(interval) = entry.reschedule {
				self.push_entry(entry.deadline + interval, entry.handle, entry.reschedule, entry.token.clone());
			}
			fired.push((entry.handle, entry.token));
		}
		fired
	}

	pub fn is_empty(&self) -> bool {
		self.heap.iter().all(|Reverse(e)| self.cancelled.contains(&e.handle))
	}
}

impl<T> Default for TimerList<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fires_strictly_in_deadline_order() {
		let mut timers: TimerList<&'static str> = TimerList::new();
		let now = Instant::now();
		timers.add(now, Duration::from_millis(20), Reschedule::OneShot, "second");
		timers.add(now, Duration::from_millis(10), Reschedule::OneShot, "first");
		timers.add(now, Duration::from_millis(30), Reschedule::OneShot, "third");

		let fired = timers.pop_expired(now + Duration::from_millis(100));
		let order: Vec<&str> = fired.into_iter().map(|(_, t)| t).collect();
		assert_eq!(order, vec!["first", "second", "third"]);
	}

	#[test]
	fn equal_deadlines_fire_fifo() {
		let mut timers: TimerList<u32> = TimerList::new();
		let now = Instant::now();
		let d = Duration::from_millis(10);
		timers.add(now, d, Reschedule::OneShot, 1);
		timers.add(now, d, Reschedule::OneShot, 2);
		timers.add(now, d, Reschedule::OneShot, 3);

		let fired = timers.pop_expired(now + d);
		let order: Vec<u32> = fired.into_iter().map(|(_, t)| t).collect();
		assert_eq!(order, vec![1, 2, 3]);
	}

	#[test]
	fn cancelled_timer_does_not_fire() {
		let mut timers: TimerList<u32> = TimerList::new();
		let now = Instant::now();
		let h = timers.add(now, Duration::from_millis(5), Reschedule::OneShot, 42);
		timers.delete(h);
		let fired = timers.pop_expired(now + Duration::from_millis(10));
		assert!(fired.is_empty());
	}

	#[test]
	fn periodic_timer_reschedules_itself() {
		let mut timers: TimerList<u32> = TimerList::new();
		let now = Instant::now();
		timers.add(now, Duration::from_millis(10), Reschedule::Periodic(Duration::from_millis(10)), 1);

		let fired = timers.pop_expired(now + Duration::from_millis(10));
		assert_eq!(fired.len(), 1);
		assert!(!timers.is_empty());

		let fired = timers.pop_expired(now + Duration::from_millis(20));
		assert_eq!(fired.len(), 1);
	}
}

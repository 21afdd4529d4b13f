//! The binary-crate side of the cmap/votequorum interface points named out
//! of scope in spec §1/§4.6: `qdevice` only defines what a cluster-map event
//! looks like and what a cast vote is, not how either actually reaches the
//! local corosync instance. This module is the seam where a real binding
//! would plug in; today it ships a channel-fed source and a logging sink so
//! the I/O loop has something to drive against.

use qdevice_primitives::{NodeList, RingId};
use tokio::sync::mpsc;
use tracing::info;

use qdevice::wire::typed::ResultVote;

#[derive(Debug, Clone)]
pub enum ClusterEvent {
	ConfigNodeList(NodeList),
	MembershipNodeList(NodeList, RingId),
	QuorumNodeList(NodeList, bool),
	ReloadFlag(bool),
}

/// Feeds `ClusterEvent`s into the I/O loop. A real deployment implements
/// this over `corosync-cmap`'s tracking callbacks; this crate ships only
/// the channel-backed version used to drive the loop end-to-end.
pub struct ChannelClusterMapSource {
	rx: mpsc::UnboundedReceiver<ClusterEvent>,
}

impl ChannelClusterMapSource {
	pub fn new() -> (mpsc::UnboundedSender<ClusterEvent>, Self) {
		let (tx, rx) = mpsc::unbounded_channel();
		(tx, ChannelClusterMapSource { rx })
	}

	pub async fn recv(&mut self) -> Option<ClusterEvent> {
		self.rx.recv().await
	}
}

/// Receives the votes this session installs. A real deployment calls
/// `votequorum_qdevice_register`/`_update` here; this crate logs instead.
pub trait VoteQuorumSink {
	fn install_vote(&mut self, algorithm_name: &str, vote: ResultVote);
}

pub struct LoggingVoteQuorumSink;

impl VoteQuorumSink for LoggingVoteQuorumSink {
	fn install_vote(&mut self, algorithm_name: &str, vote: ResultVote) {
		info!(algorithm = algorithm_name, ?vote, "installing cast vote with vote-quorum");
	}
}

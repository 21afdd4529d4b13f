//! FFSPLIT ("fifty-fifty split") algorithm (spec §9): grants the vote to
//! whichever partition holds a strict majority of the cluster's configured
//! membership; on an even split, the partition containing the lowest known
//! node_id wins.
//!
//! The comparison needs a cluster-wide baseline — how many nodes the
//! cluster is configured with, and which node_id is lowest — which no
//! single session's view carries on its own. We keep that baseline in the
//! cluster-scoped `init_cluster_data` slot rather than the per-session one,
//! updated whenever any session reports its configured node list.

use std::any::Any;
use std::collections::BTreeSet;

use qdevice_primitives::NodeId;

use crate::algorithm::{ClusterContext, DecisionAlgorithm};
use crate::wire::typed::{ErrorCode, NodeListMessage, ResultVote};

#[derive(Default)]
struct ClusterData {
	known_node_ids: BTreeSet<NodeId>,
}

pub struct FfSplit;

impl FfSplit {
	fn decide(&self, ctx: &mut dyn ClusterContext, event: &NodeListMessage) -> ResultVote {
		let data = ctx.cluster_data().downcast_mut::<ClusterData>().expect("ffsplit cluster data");

		let partition: BTreeSet<NodeId> = event.nodes.iter().map(|n| n.node_id).collect();
		if data.known_node_ids.is_empty() {
			data.known_node_ids = partition.clone();
		}
		let total = data.known_node_ids.len().max(partition.len());
		if total == 0 {
			return ResultVote::Ack;
		}

		let partition_size = partition.len();
		if partition_size * 2 > total {
			return ResultVote::Ack;
		}
		if partition_size * 2 < total {
			return ResultVote::Nack;
		}

		// Exact tie: the partition holding the globally lowest known node_id wins.
		match data.known_node_ids.iter().next() {
			Some(lowest) if partition.contains(lowest) => ResultVote::Ack,
			_ => ResultVote::Nack,
		}
	}
}

impl DecisionAlgorithm for FfSplit {
	fn name(&self) -> &'static str {
		"FFSPLIT"
	}

	fn init_cluster_data(&self) -> Box<dyn Any + Send> {
		Box::new(ClusterData::default())
	}

	fn config_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		let data = ctx.cluster_data().downcast_mut::<ClusterData>().expect("ffsplit cluster data");
		data.known_node_ids = event.nodes.iter().map(|n| n.node_id).collect();
		(ErrorCode::NoError, ResultVote::Ack)
	}

	fn membership_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		(ErrorCode::NoError, self.decide(ctx, event))
	}

	fn quorum_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		(ErrorCode::NoError, self.decide(ctx, event))
	}

	fn ask_for_vote_received(
		&self,
		_ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		_request_seq: u32,
	) -> (ErrorCode, ResultVote) {
		(ErrorCode::NoError, ResultVote::NoChange)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::algorithms::test_support::{node, FakeCluster};
	use qdevice_primitives::NodeList;

	fn nodes(ids: &[NodeId]) -> NodeList {
		ids.iter().map(|&id| node(id)).collect()
	}

	#[test]
	fn strict_majority_wins() {
		let algo = FfSplit;
		let mut cluster = FakeCluster::with_data(1, ClusterData { known_node_ids: [1, 2, 3].into_iter().collect() });

		let event = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Membership,
			nodes: nodes(&[1, 2]),
			ring_id: None,
			quorate: None,
		};
		let (_, vote) = algo.membership_node_list_received(&mut cluster.ctx(), &mut (), &event);
		assert_eq!(vote, ResultVote::Ack);
	}

	#[test]
	fn minority_loses() {
		let algo = FfSplit;
		let mut cluster = FakeCluster::with_data(1, ClusterData { known_node_ids: [1, 2, 3].into_iter().collect() });

		let event = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Membership,
			nodes: nodes(&[2]),
			ring_id: None,
			quorate: None,
		};
		let (_, vote) = algo.membership_node_list_received(&mut cluster.ctx(), &mut (), &event);
		assert_eq!(vote, ResultVote::Nack);
	}

	#[test]
	fn even_split_breaks_tie_on_lowest_node_id() {
		let algo = FfSplit;
		let mut cluster = FakeCluster::with_data(1, ClusterData { known_node_ids: [1, 2].into_iter().collect() });

		let holds_lowest = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Membership,
			nodes: nodes(&[1]),
			ring_id: None,
			quorate: None,
		};
		let (_, vote) = algo.membership_node_list_received(&mut cluster.ctx(), &mut (), &holds_lowest);
		assert_eq!(vote, ResultVote::Ack);

		let holds_other = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Membership,
			nodes: nodes(&[2]),
			ring_id: None,
			quorate: None,
		};
		let (_, vote) = algo.membership_node_list_received(&mut cluster.ctx(), &mut (), &holds_other);
		assert_eq!(vote, ResultVote::Nack);
	}
}

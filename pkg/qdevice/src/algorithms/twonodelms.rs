//! 2NODELMS (spec §9): LMS specialised for exactly two configured nodes.
//! The only behavioural difference from plain LMS is the bootstrap case —
//! before any quorate membership has ever been recorded, a two-node
//! cluster needs the device to break the tie immediately (each node alone
//! already has as much claim to quorum as the other), so we grant the vote
//! instead of LMS's conservative reject.

use std::any::Any;
use std::collections::BTreeSet;

use qdevice_primitives::NodeId;

use super::lms::ClusterData;
use crate::algorithm::{ClusterContext, DecisionAlgorithm};
use crate::wire::typed::{ErrorCode, NodeListMessage, ResultVote};

fn decide(data: &mut ClusterData, partition: &BTreeSet<NodeId>, quorate_report: Option<bool>) -> ResultVote {
	if quorate_report == Some(true) {
		data.last_quorate = Some(partition.clone());
		return ResultVote::Ack;
	}
	match &data.last_quorate {
		Some(baseline) if partition.is_subset(baseline) => ResultVote::Ack,
		Some(_) => ResultVote::Nack,
		None => ResultVote::Ack,
	}
}

pub struct TwoNodeLms;

impl DecisionAlgorithm for TwoNodeLms {
	fn name(&self) -> &'static str {
		"2NODELMS"
	}

	fn init_cluster_data(&self) -> Box<dyn Any + Send> {
		Box::new(ClusterData::default())
	}

	fn config_node_list_received(
		&self,
		_ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		_event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		(ErrorCode::NoError, ResultVote::Ack)
	}

	fn membership_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		let data = ctx.cluster_data().downcast_mut::<ClusterData>().expect("2nodelms cluster data");
		let partition: BTreeSet<NodeId> = event.nodes.iter().map(|n| n.node_id).collect();
		(ErrorCode::NoError, decide(data, &partition, None))
	}

	fn quorum_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		let data = ctx.cluster_data().downcast_mut::<ClusterData>().expect("2nodelms cluster data");
		let partition: BTreeSet<NodeId> = event.nodes.iter().map(|n| n.node_id).collect();
		(ErrorCode::NoError, decide(data, &partition, event.quorate))
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

	#[test]
	fn lone_node_wins_before_any_quorate_baseline() {
		let algo = TwoNodeLms;
		let mut cluster = FakeCluster::with_data(1, ClusterData::default());

		let event = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Membership,
			nodes: [node(1)].into_iter().collect::<NodeList>(),
			ring_id: None,
			quorate: None,
		};
		let (_, vote) = algo.membership_node_list_received(&mut cluster.ctx(), &mut (), &event);
		assert_eq!(vote, ResultVote::Ack);
	}

	#[test]
	fn disjoint_partition_after_baseline_is_rejected() {
		let algo = TwoNodeLms;
		let mut cluster = FakeCluster::with_data(1, ClusterData { last_quorate: Some([1, 2].into_iter().collect()) });

		let event = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Membership,
			nodes: [node(3)].into_iter().collect::<NodeList>(),
			ring_id: None,
			quorate: None,
		};
		let (_, vote) = algo.membership_node_list_received(&mut cluster.ctx(), &mut (), &event);
		assert_eq!(vote, ResultVote::Nack);
	}
}

//! LMS ("last man standing") algorithm (spec §9): a partition is granted
//! quorum if it is a subset of the most recent partition that was itself
//! quorate. The cluster remembers that baseline across sessions.

use std::any::Any;
use std::collections::BTreeSet;

use qdevice_primitives::NodeId;

use crate::algorithm::{ClusterContext, DecisionAlgorithm};
use crate::wire::typed::{ErrorCode, NodeListMessage, ResultVote};

#[derive(Default)]
pub(crate) struct ClusterData {
	pub(crate) last_quorate: Option<BTreeSet<NodeId>>,
}

/// Whether a newly reported partition would be a last-man-standing survivor
/// of `last_quorate`. A cluster with no recorded baseline yet falls back to
/// `bootstrap`, since LMS and 2NODELMS disagree on how to behave before any
/// quorate membership has ever been observed (see DESIGN.md).
fn decide(data: &mut ClusterData, partition: &BTreeSet<NodeId>, quorate_report: Option<bool>, bootstrap: ResultVote) -> ResultVote {
	if quorate_report == Some(true) {
		data.last_quorate = Some(partition.clone());
		return ResultVote::Ack;
	}

	match &data.last_quorate {
		Some(baseline) if partition.is_subset(baseline) => ResultVote::Ack,
		Some(_) => ResultVote::Nack,
		None => bootstrap,
	}
}

pub struct Lms;

impl DecisionAlgorithm for Lms {
	fn name(&self) -> &'static str {
		"LMS"
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
		let data = ctx.cluster_data().downcast_mut::<ClusterData>().expect("lms cluster data");
		let partition: BTreeSet<NodeId> = event.nodes.iter().map(|n| n.node_id).collect();
		(ErrorCode::NoError, decide(data, &partition, None, ResultVote::Nack))
	}

	fn quorum_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		let data = ctx.cluster_data().downcast_mut::<ClusterData>().expect("lms cluster data");
		let partition: BTreeSet<NodeId> = event.nodes.iter().map(|n| n.node_id).collect();
		(ErrorCode::NoError, decide(data, &partition, event.quorate, ResultVote::Nack))
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
	fn subset_of_previous_quorate_membership_survives() {
		let algo = Lms;
		let mut cluster =
			FakeCluster::with_data(1, ClusterData { last_quorate: Some([1, 2, 3].into_iter().collect()) });

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
	fn disjoint_partition_is_rejected() {
		let algo = Lms;
		let mut cluster =
			FakeCluster::with_data(1, ClusterData { last_quorate: Some([1, 2, 3].into_iter().collect()) });

		let event = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Membership,
			nodes: nodes(&[4]),
			ring_id: None,
			quorate: None,
		};
		let (_, vote) = algo.membership_node_list_received(&mut cluster.ctx(), &mut (), &event);
		assert_eq!(vote, ResultVote::Nack);
	}

	#[test]
	fn new_quorate_report_becomes_baseline() {
		let algo = Lms;
		let mut cluster = FakeCluster::with_data(1, ClusterData::default());

		let event = NodeListMessage {
			subtype: crate::wire::typed::NodeListSubtype::Quorum,
			nodes: nodes(&[1, 2]),
			ring_id: None,
			quorate: Some(true),
		};
		let (_, vote) = algo.quorum_node_list_received(&mut cluster.ctx(), &mut (), &event);
		assert_eq!(vote, ResultVote::Ack);
		assert_eq!(cluster.cluster_data_mut::<ClusterData>().last_quorate, Some([1, 2].into_iter().collect()));
	}
}

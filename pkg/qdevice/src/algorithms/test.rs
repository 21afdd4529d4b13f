//! TEST algorithm (spec §9): always grants quorum. Used for development and
//! for clusters that want the device's vote to be unconditional.

use std::any::Any;

use crate::algorithm::{ClusterContext, DecisionAlgorithm};
use crate::wire::typed::{ErrorCode, NodeListMessage, ResultVote};

pub struct Test;

impl DecisionAlgorithm for Test {
	fn name(&self) -> &'static str {
		"TEST"
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
		_ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		_event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		(ErrorCode::NoError, ResultVote::Ack)
	}

	fn quorum_node_list_received(
		&self,
		_ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		_event: &NodeListMessage,
	) -> (ErrorCode, ResultVote) {
		(ErrorCode::NoError, ResultVote::Ack)
	}

	fn ask_for_vote_received(
		&self,
		_ctx: &mut dyn ClusterContext,
		_session_data: &mut dyn Any,
		_request_seq: u32,
	) -> (ErrorCode, ResultVote) {
		(ErrorCode::NoError, ResultVote::Ack)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::algorithms::test_support::FakeCluster;

	#[test]
	fn always_acks() {
		let algo = Test;
		let mut cluster = FakeCluster::new(1);
		let (code, vote) = algo.ask_for_vote_received(&mut cluster.ctx(), &mut (), 1);
		assert_eq!(code, ErrorCode::NoError);
		assert_eq!(vote, ResultVote::Ack);
	}
}

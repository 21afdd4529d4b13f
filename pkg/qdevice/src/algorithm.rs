//! Decision-algorithm plug-in surface (spec §4.5, §9 "plug-in algorithm
//! surface vs dynamic dispatch"). The source uses a table of function
//! pointers keyed by an enum tag sent in `init`; we re-architect that as a
//! `DecisionAlgorithm` trait object registry keyed by the same tag.
//!
//! Algorithm implementations are stateless and shared (`Arc<dyn
//! DecisionAlgorithm>`); all mutable state lives in an opaque associated
//! slot whose lifetime is bound to the session (`init_session_data`) or,
//! where an algorithm genuinely needs cluster-wide memory (FFSPLIT's
//! partition-size comparison, LMS's "previous quorate membership"), to the
//! cluster (`init_cluster_data`) — an extension of the spec's purely
//! per-session slot, recorded as an open-question resolution in
//! DESIGN.md.

use std::any::Any;

use qdevice_primitives::NodeId;

use crate::wire::typed::{ErrorCode, ResultVote};
use crate::wire::typed::NodeListMessage;

/// The server-side view an algorithm is given of its cluster: which other
/// sessions exist, and a way to force a vote change on any of them by
/// sending a fresh `vote-info` (spec §4.5 `send_vote_info`).
pub trait ClusterContext {
	fn own_node_id(&self) -> NodeId;
	fn peer_node_ids(&self) -> Vec<NodeId>;
	fn send_vote_info(&mut self, target: NodeId, vote: ResultVote);
	fn cluster_data(&mut self) -> &mut dyn Any;
}

pub trait DecisionAlgorithm: Send + Sync {
	fn name(&self) -> &'static str;

	fn init_session_data(&self) -> Box<dyn Any + Send> {
		Box::new(())
	}

	fn init_cluster_data(&self) -> Box<dyn Any + Send> {
		Box::new(())
	}

	fn config_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote);

	fn membership_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote);

	fn quorum_node_list_received(
		&self,
		ctx: &mut dyn ClusterContext,
		session_data: &mut dyn Any,
		event: &NodeListMessage,
	) -> (ErrorCode, ResultVote);

	fn ask_for_vote_received(
		&self,
		ctx: &mut dyn ClusterContext,
		session_data: &mut dyn Any,
		request_seq: u32,
	) -> (ErrorCode, ResultVote);

	fn vote_info_reply_received(&self, ctx: &mut dyn ClusterContext, session_data: &mut dyn Any) {
		let _ = (ctx, session_data);
	}

	fn client_disconnect(&self, ctx: &mut dyn ClusterContext, session_data: &mut dyn Any, server_going_down: bool) {
		let _ = (ctx, session_data, server_going_down);
	}
}

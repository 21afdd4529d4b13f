//! Shared `ClusterContext` test double for the built-in algorithms' unit
//! tests. Not part of the public API; compiled only under `#[cfg(test)]`.

use std::any::Any;

use qdevice_primitives::{NodeDescriptor, NodeId, NodeState};

use crate::algorithm::ClusterContext;
use crate::wire::typed::ResultVote;

pub(crate) fn node(id: NodeId) -> NodeDescriptor {
	NodeDescriptor { node_id: id, data_center_id: 0, node_state: NodeState::Member }
}

pub(crate) struct FakeCluster {
	own: NodeId,
	peers: Vec<NodeId>,
	pub(crate) sent: Vec<(NodeId, ResultVote)>,
	data: Box<dyn Any + Send>,
}

impl FakeCluster {
	pub(crate) fn new(own: NodeId) -> Self {
		FakeCluster { own, peers: Vec::new(), sent: Vec::new(), data: Box::new(()) }
	}

	pub(crate) fn with_data<T: Any + Send>(own: NodeId, data: T) -> Self {
		FakeCluster { own, peers: Vec::new(), sent: Vec::new(), data: Box::new(data) }
	}

	pub(crate) fn cluster_data_mut<T: Any>(&mut self) -> &mut T {
		self.data.downcast_mut::<T>().expect("cluster data type mismatch in test")
	}

	pub(crate) fn ctx(&mut self) -> &mut Self {
		self
	}
}

impl ClusterContext for FakeCluster {
	fn own_node_id(&self) -> NodeId {
		self.own
	}

	fn peer_node_ids(&self) -> Vec<NodeId> {
		self.peers.clone()
	}

	fn send_vote_info(&mut self, target: NodeId, vote: ResultVote) {
		self.sent.push((target, vote));
	}

	fn cluster_data(&mut self) -> &mut dyn Any {
		&mut *self.data
	}
}

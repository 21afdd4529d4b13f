//! The four built-in decision algorithms named in spec §9.

pub mod ffsplit;
pub mod lms;
pub mod test;
pub mod twonodelms;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use crate::algorithm::DecisionAlgorithm;
use crate::wire::typed::DecisionAlgorithm as WireTag;

/// Resolves a wire-level algorithm tag to the shared, stateless
/// implementation object (spec §4.5: the tag sent in `init` selects the
/// algorithm for the whole cluster).
pub fn resolve(tag: WireTag) -> Arc<dyn DecisionAlgorithm> {
	match tag {
		WireTag::Test => Arc::new(test::Test),
		WireTag::FfSplit => Arc::new(ffsplit::FfSplit),
		WireTag::Lms => Arc::new(lms::Lms),
		WireTag::TwoNodeLms => Arc::new(twonodelms::TwoNodeLms),
	}
}

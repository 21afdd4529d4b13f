error_chain! {
	foreign_links {
		Io(::std::io::Error);
	}

	errors {
		/// `msg_len` exceeded the negotiated maximum, or an `opt_len` would
		/// overrun the message. Session must be closed per §4.1.
		Malformed(t: String) {
			description("malformed message")
			display("malformed message: {}", t)
		}

		/// A `mandatory` TLV option inside a known message was not
		/// recognized. Session must be closed with `unsupported option`.
		UnsupportedOption(opt_type: u16) {
			description("unsupported mandatory option")
			display("unsupported mandatory option: {}", opt_type)
		}

		/// A state transition was attempted out of order.
		UnexpectedMessage(t: String) {
			description("unexpected message")
			display("unexpected message: {}", t)
		}

		/// Send-buffer list exceeded its bounded max-count or max-bytes.
		SendQueueOverflow {
			description("send queue overflow")
			display("send queue overflow")
		}

		/// Both client and server TLS postures are incompatible.
		TlsRequiredButUnsupported {
			description("tls required but unsupported")
			display("tls required but unsupported")
		}

		/// `init.node_id` already present in the cluster's session set.
		DuplicateNodeId(id: u32) {
			description("duplicate node id")
			display("duplicate node id: {}", id)
		}

		/// `init.decision_algorithm` disagrees with the cluster's existing
		/// algorithm.
		TieBreakerMismatch {
			description("tie-breaker mismatch")
			display("tie-breaker mismatch")
		}

		/// Requested decision algorithm has no registered implementation.
		UnsupportedDecisionAlgorithm(name: String) {
			description("unsupported decision algorithm")
			display("unsupported decision algorithm: {}", name)
		}
	}
}

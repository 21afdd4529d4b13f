error_chain! {
	links {
		Protocol(qdevice::errors::Error, qdevice::errors::ErrorKind);
	}
	foreign_links {
		Io(::std::io::Error);
		Tls(::rustls::Error);
	}
	errors {
		Config(msg: String) {
			description("invalid configuration")
			display("invalid configuration: {}", msg)
		}
		SessionClosed(reason: String) {
			description("session closed")
			display("session closed: {}", reason)
		}
	}
}

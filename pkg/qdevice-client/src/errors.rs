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
		ServerClosed(reason: String) {
			description("server closed the session")
			display("server closed the session: {}", reason)
		}
	}
}

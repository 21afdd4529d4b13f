//! A TCP stream that may be upgraded to TLS in place, so the rest of the
//! I/O loop can keep holding one `AsyncRead + AsyncWrite` value across the
//! STARTTLS transition instead of juggling two socket types.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pub enum Transport {
	Plain(TcpStream),
	Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
	pub fn is_tls(&self) -> bool {
		matches!(self, Transport::Tls(_))
	}
}

impl AsyncRead for Transport {
	fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
		match self.get_mut() {
			Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
			Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
		}
	}
}

impl AsyncWrite for Transport {
	fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
		match self.get_mut() {
			Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
			Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		match self.get_mut() {
			Transport::Plain(s) => Pin::new(s).poll_flush(cx),
			Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
		}
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		match self.get_mut() {
			Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
			Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
		}
	}
}

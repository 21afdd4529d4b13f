//! Single-threaded cooperative accept loop (spec §7): one `ClusterRegistry`
//! shared by every connection on a `LocalSet`, each connection a lightweight
//! task that owns nothing but its own socket, timer list and send buffer.
//! Cross-session `vote-info` forwarding (`ClusterRegistry::Dispatched`'s
//! `to_peers`) is relayed over a per-session channel rather than a shared
//! lock, since nothing here is `Send` across an OS thread anyway.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn, Instrument};

use qdevice::sendbuf::SendBufferList;
use qdevice::server::{ClusterRegistry, Dispatched, ServerConfig, SessionId};
use qdevice::tick::ServerTimerToken;
use qdevice::timer::{Reschedule, TimerHandle, TimerList};
use qdevice::wire::{Message, MessageType, DEFAULT_MAX_MSG_LEN};

use crate::config::FileConfig;
use crate::errors::*;
use crate::transport::Transport;

struct Shared {
	registry: RefCell<ClusterRegistry>,
	peers: RefCell<HashMap<SessionId, mpsc::UnboundedSender<Vec<u8>>>>,
}

pub struct App {
	file_config: FileConfig,
	tls_acceptor: Option<TlsAcceptor>,
}

impl App {
	pub fn new(file_config: FileConfig, tls_acceptor: Option<TlsAcceptor>) -> Self {
		App { file_config, tls_acceptor }
	}

	pub async fn run(self) -> Result<()> {
		let listener = TcpListener::bind(&self.file_config.listen).await?;
		info!(addr = %self.file_config.listen, "qdevice-server listening");

		let registry = ClusterRegistry::new(ServerConfig {
			tls_posture: self.file_config.tls.to_wire(),
			protocol_timeout: self.file_config.protocol_timeout(),
			require_client_cert: self.file_config.require_client_cert(),
		});
		let shared = Rc::new(Shared { registry: RefCell::new(registry), peers: RefCell::new(HashMap::new()) });

		let local = tokio::task::LocalSet::new();
		local
			.run_until(async move {
				loop {
					tokio::select! {
						accepted = listener.accept() => {
							let (tcp, addr) = match accepted {
								Ok(v) => v,
								Err(e) => { warn!(error = %e, "accept failed"); continue; }
							};
							tcp.set_nodelay(true).ok();
							let session_id = shared.registry.borrow_mut().accept();
							let span = tracing::info_span!(
								"session",
								session_id,
								peer = %addr,
								cluster_name = tracing::field::Empty,
								node_id = tracing::field::Empty,
							);
							let shared = Rc::clone(&shared);
							let tls_acceptor = self.tls_acceptor.clone();
							tokio::task::spawn_local(
								async move {
									if let Err(e) = handle_connection(shared, session_id, tcp, tls_acceptor).await {
										warn!(error = %e, "connection ended with error");
									}
								}
								.instrument(span),
							);
						}
						_ = tokio::signal::ctrl_c() => {
							info!("shutting down, notifying active sessions");
							let session_ids: Vec<SessionId> = shared.peers.borrow().keys().copied().collect();
							for sid in session_ids {
								shared.registry.borrow_mut().on_disconnect(sid, true);
							}
							return Ok(());
						}
					}
				}
			})
			.await
	}
}

async fn handle_connection(
	shared: Rc<Shared>,
	session_id: SessionId,
	tcp: TcpStream,
	tls_acceptor: Option<TlsAcceptor>,
) -> Result<()> {
	let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<Vec<u8>>();
	shared.peers.borrow_mut().insert(session_id, forward_tx);

	let result = run_session(&shared, session_id, tcp, tls_acceptor, &mut forward_rx).await;

	shared.peers.borrow_mut().remove(&session_id);
	let going_down = false;
	shared.registry.borrow_mut().on_disconnect(session_id, going_down);
	result
}

async fn run_session(
	shared: &Rc<Shared>,
	session_id: SessionId,
	tcp: TcpStream,
	tls_acceptor: Option<TlsAcceptor>,
	forward_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) -> Result<()> {
	let mut transport = Some(Transport::Plain(tcp));
	let mut sendbuf = SendBufferList::new();
	let mut timers: TimerList<ServerTimerToken> = TimerList::new();
	let mut handles: HashMap<ServerTimerToken, TimerHandle> = HashMap::new();
	let mut read_buf = Vec::with_capacity(4096);
	let mut tls_ready = tls_acceptor.is_none();

	loop {
		let now = Instant::now();
		let next_deadline = timers.next_deadline(now).unwrap_or(Duration::from_secs(3600));
		let mut read_chunk = [0u8; 4096];

		tokio::select! {
			n = transport.as_mut().unwrap().read(&mut read_chunk) => {
				let n = n?;
				if n == 0 {
					return Ok(());
				}
				read_buf.extend_from_slice(&read_chunk[..n]);

				while let Some((msg, consumed)) = Message::decode(&read_buf, DEFAULT_MAX_MSG_LEN)? {
					read_buf.drain(..consumed);
					let is_starttls = msg.msg_type == MessageType::StartTls;

					let dispatched = shared.registry.borrow_mut().on_message(session_id, msg, now)?;
					apply_dispatched(shared, session_id, dispatched, &mut sendbuf, &mut timers, &mut handles)?;

					if let Some((node_id, cluster_name)) = shared.registry.borrow().session_identity(session_id) {
						let span = tracing::Span::current();
						if let Some(node_id) = node_id {
							span.record("node_id", node_id);
						}
						if let Some(cluster_name) = &cluster_name {
							span.record("cluster_name", cluster_name.as_str());
						}
					}

					if is_starttls {
						if let Some(acceptor) = &tls_acceptor {
							let tcp = match transport.take().expect("transport present") {
								Transport::Plain(tcp) => tcp,
								Transport::Tls(_) => unreachable!("starttls upgrade attempted twice"),
							};
							let tls_stream = acceptor.accept(tcp).await?;
							transport = Some(Transport::Tls(Box::new(tls_stream)));
							tls_ready = true;
							shared.registry.borrow_mut().on_tls_established(session_id);
						}
					}
				}

				flush(transport.as_mut().unwrap(), &mut sendbuf, tls_ready).await?;
			}

			_ = tokio::time::sleep(next_deadline) => {
				let fired = timers.pop_expired(Instant::now());
				for (_, token) in fired {
					match token {
						ServerTimerToken::ProtocolTimeout => {
							info!("protocol timeout waiting for init, closing");
							return Ok(());
						}
					}
				}
			}

			forwarded = forward_rx.recv() => {
				let Some(bytes) = forwarded else { return Ok(()) };
				sendbuf.push(bytes, 0, false)?;
				flush(transport.as_mut().unwrap(), &mut sendbuf, tls_ready).await?;
			}
		}
	}
}

fn apply_dispatched(
	shared: &Rc<Shared>,
	session_id: SessionId,
	dispatched: Dispatched,
	sendbuf: &mut SendBufferList,
	timers: &mut TimerList<ServerTimerToken>,
	handles: &mut HashMap<ServerTimerToken, TimerHandle>,
) -> Result<()> {
	for msg in dispatched.reply {
		let seq = msg.seq;
		sendbuf.push(msg.encode(), seq, false)?;
	}

	for (target_sid, mut msg) in dispatched.to_peers {
		if let Some(real_seq) = shared.registry.borrow_mut().next_seq_for(target_sid) {
			msg.seq = real_seq;
			match shared.peers.borrow().get(&target_sid) {
				Some(tx) => {
					let _ = tx.send(msg.encode());
				}
				None => {
					warn!(from = session_id, to = target_sid, "dropping forward to peer with no active connection");
				}
			}
		}
	}

	let now = Instant::now();
	for token in dispatched.cancel {
		if let Some(handle) = handles.remove(&token) {
			timers.delete(handle);
		}
	}
	for (token, interval, periodic) in dispatched.arm {
		let reschedule = if periodic { Reschedule::Periodic(interval) } else { Reschedule::OneShot };
		let handle = timers.add(now, interval, reschedule, token);
		handles.insert(token, handle);
	}

	if let Some(reason) = dispatched.close {
		return Err(ErrorKind::SessionClosed(reason).into());
	}
	Ok(())
}

async fn flush(transport: &mut Transport, sendbuf: &mut SendBufferList, tls_ready: bool) -> Result<()> {
	while let Some(chunk) = sendbuf.writable_head(tls_ready) {
		if chunk.is_empty() {
			break;
		}
		let n = transport.write(chunk).await?;
		if n == 0 {
			return Err(ErrorKind::SessionClosed("write returned 0".into()).into());
		}
		sendbuf.advance(n);
	}
	transport.flush().await?;
	Ok(())
}

pub fn load_tls_acceptor(
	cert_file: Option<&str>,
	key_file: Option<&str>,
	client_ca_file: Option<&str>,
) -> Result<Option<TlsAcceptor>> {
	let (Some(cert_file), Some(key_file)) = (cert_file, key_file) else { return Ok(None) };

	let cert_pem = std::fs::read(cert_file)?;
	let mut cert_reader = std::io::BufReader::new(&cert_pem[..]);
	let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader).collect::<std::result::Result<_, _>>()?;

	let key_pem = std::fs::read(key_file)?;
	let mut key_reader = std::io::BufReader::new(&key_pem[..]);
	let key = rustls_pemfile::private_key(&mut key_reader)?
		.ok_or_else(|| Error::from(ErrorKind::Config(format!("no private key found in {}", key_file))))?;

	let builder = rustls::ServerConfig::builder();
	let config = match client_ca_file {
		Some(ca_file) => {
			let mut roots = rustls::RootCertStore::empty();
			let ca_pem = std::fs::read(ca_file)?;
			let mut ca_reader = std::io::BufReader::new(&ca_pem[..]);
			for cert in rustls_pemfile::certs(&mut ca_reader) {
				roots.add(cert?).map_err(|e| Error::from(ErrorKind::Config(format!("invalid client CA cert: {}", e))))?;
			}
			let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
				.build()
				.map_err(|e| Error::from(ErrorKind::Config(format!("invalid client CA bundle: {}", e))))?;
			builder
				.with_client_cert_verifier(verifier)
				.with_single_cert(certs, key)
				.map_err(|e| Error::from(ErrorKind::Config(format!("invalid TLS certificate/key: {}", e))))?
		}
		None => builder
			.with_no_client_auth()
			.with_single_cert(certs, key)
			.map_err(|e| Error::from(ErrorKind::Config(format!("invalid TLS certificate/key: {}", e))))?,
	};

	Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

//! The non-blocking I/O loop that drives a `ClientSession`: owns the socket,
//! the timer list, the send-buffer list, and the cmap/votequorum adaptor
//! seam, translating each of their events into a `ClientSession` call and
//! executing the `ClientTick` it returns. The session itself never touches
//! a socket (spec §4.4) — this is the only place that does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tracing::{info, warn, Instrument};

use qdevice::sendbuf::SendBufferList;
use qdevice::tick::{ClientTick, ClientTimerToken};
use qdevice::timer::{Reschedule, TimerHandle, TimerList};
use qdevice::wire::{Message, MessageType, DEFAULT_MAX_MSG_LEN};
use qdevice::{ClientConfig, ClientSession, ClientState};

use crate::adaptors::{ChannelClusterMapSource, ClusterEvent, LoggingVoteQuorumSink, VoteQuorumSink};
use crate::config::FileConfig;
use crate::errors::*;
use crate::transport::Transport;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

pub struct App {
	file_config: FileConfig,
	tls_connector: Option<TlsConnector>,
	has_client_cert: bool,
	events_tx: mpsc::UnboundedSender<ClusterEvent>,
	events_rx: ChannelClusterMapSource,
}

impl App {
	pub fn new(file_config: FileConfig, tls_connector: Option<TlsConnector>, has_client_cert: bool) -> Self {
		let (events_tx, events_rx) = ChannelClusterMapSource::new();
		App { file_config, tls_connector, has_client_cert, events_tx, events_rx }
	}

	/// A handle callers outside this loop (a real cmap binding) would use to
	/// push membership/config/quorum changes in.
	pub fn event_sender(&self) -> mpsc::UnboundedSender<ClusterEvent> {
		self.events_tx.clone()
	}

	/// Runs forever: connects, drives the session to `Steady` and beyond,
	/// and reconnects with backoff whenever the session closes, until
	/// cancelled (spec §7/§8 scenario 6 "server connection lost").
	pub async fn run(mut self) -> Result<()> {
		let mut backoff = RECONNECT_BASE;
		let mut vote_sink = LoggingVoteQuorumSink;

		loop {
			let addr = match self.resolve_server().await {
				Ok(addr) => addr,
				Err(e) => {
					warn!(error = %e, "could not resolve qnetd host, retrying");
					self.sleep_backoff(&mut backoff).await;
					continue;
				}
			};

			let span = tracing::info_span!(
				"session",
				cluster_name = %self.file_config.cluster_name,
				node_id = self.file_config.node_id.unwrap_or(0),
				peer = %addr,
			);

			tokio::select! {
				result = self.run_session(addr, &mut vote_sink).instrument(span) => {
					match result {
						Ok(()) => info!("session ended, reconnecting"),
						Err(e) => warn!(error = %e, "session failed, reconnecting"),
					}
					backoff = RECONNECT_BASE;
					self.sleep_backoff(&mut backoff).await;
				}
				_ = tokio::signal::ctrl_c() => {
					info!("received shutdown signal");
					return Ok(());
				}
			}
		}
	}

	async fn resolve_server(&self) -> Result<SocketAddr> {
		for host in &self.file_config.host {
			let candidate = if host.contains(':') { host.clone() } else { format!("{}:5403", host) };
			if let Ok(mut addrs) = tokio::net::lookup_host(&candidate).await {
				if let Some(addr) = addrs.next() {
					return Ok(addr);
				}
			}
		}
		Err(ErrorKind::Config(format!("no resolvable host in {:?}", self.file_config.host)).into())
	}

	async fn sleep_backoff(&self, backoff: &mut Duration) {
		let jitter_ms = rand::thread_rng().gen_range(0..250);
		tokio::time::sleep(*backoff + Duration::from_millis(jitter_ms)).await;
		*backoff = (*backoff * 2).min(RECONNECT_MAX);
	}

	async fn run_session(&mut self, addr: SocketAddr, vote_sink: &mut dyn VoteQuorumSink) -> Result<()> {
		let tcp = TcpStream::connect(addr).await?;
		tcp.set_nodelay(true).ok();
		let mut transport = Some(Transport::Plain(tcp));

		let node_id = self.file_config.node_id.unwrap_or(0);
		let config = ClientConfig {
			node_id,
			cluster_name: self.file_config.cluster_name.clone(),
			decision_algorithm: self.file_config.algorithm.to_wire(),
			tls_posture: self.file_config.tls.to_wire(),
			heartbeat_interval: self.file_config.heartbeat_interval(),
			cast_vote_timer_interval: self.file_config.cast_vote_timer_interval(),
			has_client_cert: self.has_client_cert,
		};
		let algorithm_name = config.decision_algorithm.name();
		let mut session = ClientSession::new(config);

		let mut sendbuf = SendBufferList::new();
		let mut timers: TimerList<ClientTimerToken> = TimerList::new();
		let mut handles: HashMap<ClientTimerToken, TimerHandle> = HashMap::new();
		let mut read_buf = Vec::with_capacity(4096);
		let mut tls_ready = false;

		let mut tick = ClientTick::empty();
		session.on_connect(&mut tick);
		let tls_pending = session.state() == ClientState::WaitStartTlsSent;
		self.apply_tick(tick, &mut sendbuf, &mut timers, &mut handles, algorithm_name, vote_sink, tls_pending)?;
		self.flush(transport.as_mut().unwrap(), &mut sendbuf, tls_ready).await?;

		loop {
			let now = Instant::now();
			let next_deadline = timers.next_deadline(now).unwrap_or(Duration::from_secs(3600));
			let mut read_chunk = [0u8; 4096];

			tokio::select! {
				n = transport.as_mut().unwrap().read(&mut read_chunk) => {
					let n = n?;
					if n == 0 {
						return Err(ErrorKind::ServerClosed("eof".into()).into());
					}
					read_buf.extend_from_slice(&read_chunk[..n]);

					while let Some((msg, consumed)) = Message::decode(&read_buf, DEFAULT_MAX_MSG_LEN)? {
						read_buf.drain(..consumed);
						let mut tick = ClientTick::empty();
						session.on_message(msg, &mut tick)?;
						let tls_pending = session.state() == ClientState::WaitStartTlsSent;
						self.apply_tick(tick, &mut sendbuf, &mut timers, &mut handles, algorithm_name, vote_sink, tls_pending)?;
					}

					self.flush(transport.as_mut().unwrap(), &mut sendbuf, tls_ready).await?;

					if session.state() == ClientState::WaitStartTlsSent && sendbuf.is_empty() && !tls_ready {
						self.upgrade_to_tls(&mut transport).await?;
						tls_ready = true;
						let mut tick = ClientTick::empty();
						session.on_tls_established(&mut tick);
						let tls_pending = session.state() == ClientState::WaitStartTlsSent;
						self.apply_tick(tick, &mut sendbuf, &mut timers, &mut handles, algorithm_name, vote_sink, tls_pending)?;
						self.flush(transport.as_mut().unwrap(), &mut sendbuf, tls_ready).await?;
					}
				}

				_ = tokio::time::sleep(next_deadline) => {
					let fired = timers.pop_expired(Instant::now());
					for (_, token) in fired {
						let mut tick = ClientTick::empty();
						match token {
							ClientTimerToken::Heartbeat => session.on_heartbeat_timer(&mut tick),
							ClientTimerToken::HeartbeatTimeout => session.on_heartbeat_timeout(&mut tick),
							ClientTimerToken::CastVote => session.on_cast_vote_timer(&mut tick),
							ClientTimerToken::AskLaterRetry => session.on_ask_later_retry_timer(&mut tick),
							ClientTimerToken::ReconnectBackoff => {}
						}
						let tls_pending = session.state() == ClientState::WaitStartTlsSent;
						self.apply_tick(tick, &mut sendbuf, &mut timers, &mut handles, algorithm_name, vote_sink, tls_pending)?;
					}
					self.flush(transport.as_mut().unwrap(), &mut sendbuf, tls_ready).await?;
				}

				event = self.events_rx.recv() => {
					let Some(event) = event else { return Ok(()) };
					let mut tick = ClientTick::empty();
					match event {
						ClusterEvent::ConfigNodeList(nodes) => session.on_config_node_list(nodes, &mut tick),
						ClusterEvent::MembershipNodeList(nodes, ring_id) => {
							session.on_membership_node_list(nodes, ring_id, &mut tick)
						}
						ClusterEvent::QuorumNodeList(nodes, quorate) => {
							session.on_quorum_node_list(nodes, quorate, &mut tick)
						}
						ClusterEvent::ReloadFlag(_) => {}
					}
					let tls_pending = session.state() == ClientState::WaitStartTlsSent;
					self.apply_tick(tick, &mut sendbuf, &mut timers, &mut handles, algorithm_name, vote_sink, tls_pending)?;
					self.flush(transport.as_mut().unwrap(), &mut sendbuf, tls_ready).await?;
				}
			}
		}
	}

	async fn upgrade_to_tls(&self, transport: &mut Option<Transport>) -> Result<()> {
		let connector = self
			.tls_connector
			.clone()
			.ok_or_else(|| Error::from(ErrorKind::Config("tls required but no client TLS config supplied".into())))?;
		let tcp = match transport.take().expect("transport always present between polls") {
			Transport::Plain(tcp) => tcp,
			Transport::Tls(_) => unreachable!("starttls upgrade attempted twice"),
		};
		let server_name = rustls::pki_types::ServerName::try_from(self.file_config.host[0].clone())
			.map_err(|_| Error::from(ErrorKind::Config("invalid server name for TLS SNI".into())))?;
		let tls_stream = connector.connect(server_name, tcp).await?;
		*transport = Some(Transport::Tls(Box::new(tls_stream)));
		Ok(())
	}

	async fn flush(&self, transport: &mut Transport, sendbuf: &mut SendBufferList, tls_ready: bool) -> Result<()> {
		while let Some(chunk) = sendbuf.writable_head(tls_ready) {
			if chunk.is_empty() {
				break;
			}
			let n = transport.write(chunk).await?;
			if n == 0 {
				return Err(ErrorKind::ServerClosed("write returned 0".into()).into());
			}
			sendbuf.advance(n);
		}
		transport.flush().await?;
		Ok(())
	}

	fn apply_tick(
		&self,
		tick: ClientTick,
		sendbuf: &mut SendBufferList,
		timers: &mut TimerList<ClientTimerToken>,
		handles: &mut HashMap<ClientTimerToken, TimerHandle>,
		algorithm_name: &str,
		vote_sink: &mut dyn VoteQuorumSink,
		tls_pending: bool,
	) -> Result<()> {
		// `tls_pending` reflects whether the session actually decided to
		// negotiate TLS this connection (state == WaitStartTlsSent when this
		// tick was produced), not the static configured posture: a session
		// can be configured `tls=supported` and still never upgrade, if the
		// server doesn't support it either. Gating a message on a TLS
		// handshake that's never going to happen would strand it in the
		// send buffer forever.
		for msg in tick.messages {
			let requires_tls =
				tls_pending && msg.msg_type != MessageType::Preinit && msg.msg_type != MessageType::StartTls;
			let seq = msg.seq;
			sendbuf.push(msg.encode(), seq, requires_tls)?;
		}

		let now = Instant::now();
		for token in tick.cancel {
			if let Some(handle) = handles.remove(&token) {
				timers.delete(handle);
			}
		}
		for (token, interval, periodic) in tick.arm {
			let reschedule = if periodic { Reschedule::Periodic(interval) } else { Reschedule::OneShot };
			let handle = timers.add(now, interval, reschedule, token);
			handles.insert(token, handle);
		}

		if let Some(vote) = tick.install_vote {
			vote_sink.install_vote(algorithm_name, vote);
		}

		if let Some(reason) = tick.close {
			return Err(ErrorKind::ServerClosed(reason).into());
		}
		Ok(())
	}
}

pub fn load_tls_connector(
	ca_file: Option<&std::path::Path>,
	client_cert_file: Option<&std::path::Path>,
	client_key_file: Option<&std::path::Path>,
) -> Result<Option<TlsConnector>> {
	let Some(ca_file) = ca_file else { return Ok(None) };
	let mut roots = rustls::RootCertStore::empty();
	let pem = std::fs::read(ca_file)?;
	let mut reader = std::io::BufReader::new(&pem[..]);
	for cert in rustls_pemfile::certs(&mut reader) {
		roots.add(cert?).map_err(|e| Error::from(ErrorKind::Config(format!("invalid CA cert: {}", e))))?;
	}
	let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

	let config = match (client_cert_file, client_key_file) {
		(Some(cert_file), Some(key_file)) => {
			let cert_pem = std::fs::read(cert_file)?;
			let mut cert_reader = std::io::BufReader::new(&cert_pem[..]);
			let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader).collect::<std::result::Result<_, _>>()?;

			let key_pem = std::fs::read(key_file)?;
			let mut key_reader = std::io::BufReader::new(&key_pem[..]);
			let key = rustls_pemfile::private_key(&mut key_reader)?
				.ok_or_else(|| Error::from(ErrorKind::Config(format!("no private key found in {}", key_file.display()))))?;

			builder
				.with_client_auth_cert(certs, key)
				.map_err(|e| Error::from(ErrorKind::Config(format!("invalid client certificate/key: {}", e))))?
		}
		_ => builder.with_no_client_auth(),
	};

	Ok(Some(TlsConnector::from(Arc::new(config))))
}

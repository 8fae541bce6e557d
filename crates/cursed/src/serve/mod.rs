pub mod auth;
pub mod signer;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cursed_core::drain::DrainWatcher;
use futures_util::StreamExt;
use futures_util::TryFutureExt;
use http_body_util::{BodyExt, Full, Limited};
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use rustls::crypto::CryptoProvider;
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};
use x509_parser::prelude::FromDer;

use crate::tlsca::TlsAuthority;

pub type Body = Full<Bytes>;
pub type Response = http::Response<Body>;

/// Largest request body either endpoint accepts.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

pub static TLS_VERSIONS: &[&rustls::SupportedProtocolVersion] =
	&[&rustls::version::TLS12, &rustls::version::TLS13];

/// Crypto provider restricted to the cipher and curve policy: ECDHE with
/// AES-GCM or ChaCha20-Poly1305 only, P-256 and X25519 key exchange.
pub fn provider() -> Arc<CryptoProvider> {
	use rustls::crypto::aws_lc_rs::{cipher_suite, default_provider, kx_group};
	Arc::new(CryptoProvider {
		cipher_suites: vec![
			cipher_suite::TLS13_AES_256_GCM_SHA384,
			cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
			cipher_suite::TLS13_AES_128_GCM_SHA256,
			cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
			cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
			cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
			cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
			cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
			cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
		],
		kx_groups: vec![kx_group::SECP256R1, kx_group::X25519],
		..default_provider()
	})
}

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
	#[error("tls config: {0}")]
	Rustls(#[from] rustls::Error),

	#[error("client verifier: {0}")]
	Verifier(#[from] rustls::server::VerifierBuilderError),

	#[error("trust anchors: {0}")]
	Roots(String),
}

/// Build the listener TLS config. The signer endpoint's "must present a
/// verified client cert" rule lives here, in the verify mode, not in the
/// request pipeline.
pub fn server_config(
	authority: &TlsAuthority,
	require_client_cert: bool,
) -> Result<ServerConfig, ServeError> {
	let builder = ServerConfig::builder_with_provider(provider())
		.with_protocol_versions(TLS_VERSIONS)
		.expect("tls versions are compatible with the provider");
	let builder = if require_client_cert {
		let mut roots = RootCertStore::empty();
		for anchor in authority.trust_anchors() {
			roots
				.add(anchor.clone())
				.map_err(|e| ServeError::Roots(e.to_string()))?;
		}
		let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider())
			.build()?;
		builder.with_client_cert_verifier(verifier)
	} else {
		builder.with_no_client_auth()
	};
	let mut config =
		builder.with_single_cert(vec![authority.serving_cert()], authority.serving_key())?;
	config.alpn_protocols = vec![b"http/1.1".to_vec()];
	Ok(config)
}

/// Who is on the other end of the connection.
#[derive(Debug, Clone)]
pub struct Peer {
	pub addr: SocketAddr,
	/// CN of the verified client certificate, when the listener requires one.
	pub caller: Option<String>,
}

fn peer_common_name(conn: &rustls::ServerConnection) -> Option<String> {
	let cert = conn.peer_certificates()?.first()?;
	let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(cert.as_ref()).ok()?;
	parsed
		.subject()
		.iter_common_name()
		.next()
		.and_then(|cn| cn.as_str().ok())
		.map(str::to_string)
}

/// An HTTPS server with the following behavior:
/// * HTTP/1.1 over TLS only
/// * Draining
pub struct Server<S> {
	name: &'static str,
	listener: TcpListener,
	tls: TlsAcceptor,
	drain_rx: DrainWatcher,
	state: Arc<S>,
}

impl<S> Server<S> {
	pub async fn bind(
		name: &'static str,
		addr: SocketAddr,
		tls_config: Arc<ServerConfig>,
		drain_rx: DrainWatcher,
		state: S,
	) -> anyhow::Result<Self> {
		let listener = TcpListener::bind(&addr).await?;
		Ok(Server {
			name,
			listener,
			tls: TlsAcceptor::from(tls_config),
			drain_rx,
			state: Arc::new(state),
		})
	}

	pub fn address(&self) -> SocketAddr {
		self
			.listener
			.local_addr()
			.expect("local address must be ready")
	}

	pub fn spawn<F, R>(self, f: F)
	where
		S: Send + Sync + 'static,
		F: Fn(Arc<S>, Peer, Request<Incoming>) -> R + Send + Sync + 'static,
		R: Future<Output = Result<Response, anyhow::Error>> + Send + 'static,
	{
		let address = self.address();
		let Server {
			name,
			listener,
			tls,
			drain_rx: drain,
			state,
		} = self;
		let f = Arc::new(f);
		info!(%address, component = name, "listener established");
		let drain_stream = drain.clone();
		tokio::spawn(async move {
			let stream = tokio_stream::wrappers::TcpListenerStream::new(listener);
			let mut stream = stream.take_until(Box::pin(drain_stream.wait_for_drain()));
			while let Some(Ok(socket)) = stream.next().await {
				let _ = socket.set_nodelay(true);
				let remote = match socket.peer_addr() {
					Ok(a) => a,
					Err(_) => continue,
				};
				let tls = tls.clone();
				let drain = drain.clone();
				let f = f.clone();
				let state = state.clone();
				tokio::spawn(async move {
					let tls_stream = match tls.accept(socket).await {
						Ok(s) => s,
						Err(e) => {
							debug!(component = name, remote = %remote, "tls handshake failed: {e}");
							return;
						},
					};
					let peer = Peer {
						addr: remote,
						caller: peer_common_name(tls_stream.get_ref().1),
					};
					let serve = http1::Builder::new()
						.timer(TokioTimer::new())
						.half_close(true)
						.header_read_timeout(Duration::from_secs(2))
						.serve_connection(
							TokioIo::new(tls_stream),
							hyper::service::service_fn(move |req| {
								let state = state.clone();
								let peer = peer.clone();

								// Failures would abort the whole connection; we just want to return an HTTP error
								f(state, peer, req).or_else(|err| async move {
									warn!("request handler failed: {err}");
									Ok::<_, Infallible>(empty_response(
										hyper::StatusCode::INTERNAL_SERVER_ERROR,
									))
								})
							}),
						);
					// Wait for drain to signal or connection serving to complete
					match futures_util::future::select(Box::pin(drain.wait_for_drain()), serve).await {
						futures_util::future::Either::Left((_shutdown, mut serve)) => {
							let drain = std::pin::Pin::new(&mut serve);
							drain.graceful_shutdown();
							let _ = serve.await;
						},
						futures_util::future::Either::Right((serve, _shutdown)) => {
							if let Err(e) = serve {
								debug!(component = name, remote = %remote, "connection closed: {e}");
							}
						},
					}
				});
			}
			info!(%address, component = name, "listener drained");
		});
	}
}

pub fn empty_response(code: hyper::StatusCode) -> Response {
	http::Response::builder()
		.status(code)
		.body(Body::default())
		.expect("builder with known status code should not fail")
}

pub fn plaintext_response(code: hyper::StatusCode, body: String) -> Response {
	http::Response::builder()
		.status(code)
		.header(hyper::header::CONTENT_TYPE, "text/plain")
		.body(Body::from(body))
		.expect("builder with known status code should not fail")
}

/// Collect a request body, bounded by [`MAX_BODY_SIZE`].
pub async fn collect_body(body: Incoming) -> Result<Bytes, String> {
	Limited::new(body, MAX_BODY_SIZE)
		.collect()
		.await
		.map(|b| b.to_bytes())
		.map_err(|e| e.to_string())
}

//! HTTP/1.1 upgrade transport on hyper client connections.

use std::{fmt, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::{
    Request, StatusCode, Uri,
    header::{COOKIE, HOST, SET_COOKIE},
    uri::Authority,
};
use http_body_util::Empty;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::{net::TcpStream, task::JoinHandle, time::timeout};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::{MaybeTlsStream, UpgradeResponse, UpgradeTransport, UpgradedSocket};
use crate::{
    auth::{Authenticator, NoAuth, Principal},
    cookie::CookieStore,
    error::{TransportError, TransportResult},
};

type Io = TokioIo<MaybeTlsStream<TcpStream>>;

/// Timeouts and socket options of [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Timeout for establishing the TCP connection and the TLS session.
    pub connect_timeout: Duration,
    /// Timeout for receiving the response head (None = wait forever).
    pub socket_timeout: Option<Duration>,
    /// Disable Nagle's algorithm on the socket.
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            socket_timeout: Some(Duration::from_secs(30)),
            nodelay: true,
        }
    }
}

impl TransportConfig {
    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the response timeout.
    #[must_use]
    pub fn socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Set `TCP_NODELAY`.
    #[must_use]
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if self.socket_timeout.is_some_and(|t| t.is_zero()) {
            return Err("Socket timeout must be > 0".to_string());
        }
        Ok(())
    }
}

/// TLS connector trusting the webpki root certificates, speaking HTTP/1.1.
pub fn webpki_connector() -> TransportResult<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));

    let mut config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .map_err(|e| TransportError::tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Builder for [`HttpTransport`].
#[derive(Default)]
pub struct HttpTransportBuilder {
    config: TransportConfig,
    connector: Option<TlsConnector>,
    authenticator: Option<Arc<dyn Authenticator>>,
    cookie_store: Option<Arc<dyn CookieStore>>,
}

impl HttpTransportBuilder {
    #[must_use]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Makes the transport secure: every exchange runs over TLS.
    #[must_use]
    pub fn tls(mut self, connector: TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn authenticator<A: Authenticator + 'static>(mut self, authenticator: A) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    #[must_use]
    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    pub fn build(self) -> TransportResult<HttpTransport> {
        self.config.validate().map_err(TransportError::config)?;
        Ok(HttpTransport {
            config: self.config,
            connector: self.connector,
            authenticator: self.authenticator.unwrap_or_else(|| Arc::new(NoAuth)),
            cookie_store: self.cookie_store,
            pending: Vec::new(),
            drivers: Vec::new(),
        })
    }
}

/// Sends the upgrade request on a fresh TCP (or TLS) connection per
/// exchange and keeps the switched connections until they are taken.
pub struct HttpTransport {
    config: TransportConfig,
    connector: Option<TlsConnector>,
    authenticator: Arc<dyn Authenticator>,
    cookie_store: Option<Arc<dyn CookieStore>>,
    pending: Vec<OnUpgrade>,
    drivers: Vec<JoinHandle<()>>,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::default()
    }

    /// A plaintext transport with the default configuration.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            connector: None,
            authenticator: Arc::new(NoAuth),
            cookie_store: None,
            pending: Vec::new(),
            drivers: Vec::new(),
        }
    }

    /// A TLS transport trusting the webpki roots.
    pub fn secure() -> TransportResult<Self> {
        Self::builder().tls(webpki_connector()?).build()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    async fn open(&self, authority: &Authority, secure: bool) -> TransportResult<MaybeTlsStream<TcpStream>> {
        let host = authority.host().trim_start_matches('[').trim_end_matches(']');
        let port = authority.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let connect_timeout = self.config.connect_timeout;
        let tcp = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::timeout(connect_timeout))??;
        if let Err(error) = tcp.set_nodelay(self.config.nodelay) {
            debug!(error = %error, "failed to set TCP_NODELAY");
        }

        if !secure {
            return Ok(MaybeTlsStream::Plain(tcp));
        }
        let connector = self
            .connector
            .as_ref()
            .ok_or_else(|| TransportError::tls("secure exchange requested without a TLS context"))?;
        let domain = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::invalid_host(format!("'{host}' is not a valid server name")))?;
        let tls = timeout(connect_timeout, connector.connect(domain, tcp))
            .await
            .map_err(|_| TransportError::timeout(connect_timeout))??;
        Ok(MaybeTlsStream::Tls(tls))
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .field("secure", &self.connector.is_some())
            .field("authenticator", &self.authenticator)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for driver in &self.drivers {
            driver.abort();
        }
    }
}

/// The authority the request is addressed to, from `Host` or the target.
fn request_authority(request: &Request<()>) -> TransportResult<Authority> {
    if let Some(host) = request.headers().get(HOST) {
        let host = host
            .to_str()
            .map_err(|_| TransportError::invalid_host("Host header is not ASCII"))?;
        return host
            .parse()
            .map_err(|e| TransportError::invalid_host(format!("'{host}': {e}")));
    }
    request
        .uri()
        .authority()
        .cloned()
        .ok_or_else(|| TransportError::invalid_host("request has neither a Host header nor an absolute target"))
}

#[async_trait]
impl UpgradeTransport for HttpTransport {
    async fn execute(
        &mut self,
        mut request: Request<()>,
        principal: Option<&Principal>,
        secure: bool,
        retain_connection: bool,
    ) -> TransportResult<UpgradeResponse> {
        let authority = request_authority(&request)?;
        let origin = Uri::builder()
            .scheme(if secure { "https" } else { "http" })
            .authority(authority.clone())
            .path_and_query("/")
            .build()
            .map_err(|e| TransportError::invalid_host(e.to_string()))?;

        let stream = self.open(&authority, secure).await?;

        self.authenticator
            .authenticate(principal, request.headers_mut())
            .await?;
        if let Some(store) = &self.cookie_store
            && let Some(cookies) = store.cookies(&origin)
        {
            request.headers_mut().insert(COOKIE, cookies);
        }

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        self.drivers.retain(|driver| !driver.is_finished());
        self.drivers.push(tokio::spawn(async move {
            if let Err(error) = conn.with_upgrades().await {
                debug!(error = %error, "upgrade connection closed with error");
            }
        }));

        let (parts, ()) = request.into_parts();
        let request = Request::from_parts(parts, Empty::<Bytes>::new());
        let send = sender.send_request(request);
        let mut response = match self.config.socket_timeout {
            Some(duration) => timeout(duration, send)
                .await
                .map_err(|_| TransportError::timeout(duration))??,
            None => send.await?,
        };

        if let Some(store) = &self.cookie_store {
            let mut received = response.headers().get_all(SET_COOKIE).iter();
            store.set_cookies(&mut received, &origin);
        }

        let status = response.status();
        let reason = response
            .extensions()
            .get::<hyper::ext::ReasonPhrase>()
            .and_then(|reason| std::str::from_utf8(reason.as_bytes()).ok())
            .map(str::to_string);

        if retain_connection && status == StatusCode::SWITCHING_PROTOCOLS {
            self.pending.push(hyper::upgrade::on(&mut response));
        }

        let mut upgrade = UpgradeResponse::new(status, response.headers().clone());
        upgrade.reason = reason;
        Ok(upgrade)
    }

    async fn take_open_sockets(&mut self) -> Vec<UpgradedSocket> {
        let pending = std::mem::take(&mut self.pending);
        let mut sockets = Vec::with_capacity(pending.len());
        for upgrade in pending {
            match upgrade.await {
                Ok(upgraded) => match upgraded.downcast::<Io>() {
                    Ok(parts) => {
                        sockets.push(UpgradedSocket::new(parts.io.into_inner()).with_read_buf(parts.read_buf));
                    }
                    Err(_) => warn!("upgraded connection has an unexpected io type"),
                },
                Err(error) => warn!(error = %error, "connection was not upgraded"),
            }
        }
        sockets
    }

    async fn close(&mut self) -> io::Result<()> {
        self.pending.clear();
        for driver in self.drivers.drain(..) {
            driver.abort();
        }
        Ok(())
    }

    fn is_secure(&self) -> bool {
        self.connector.is_some()
    }
}

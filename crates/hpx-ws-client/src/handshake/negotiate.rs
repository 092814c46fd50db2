//! Upgrade negotiation: request, response validation and socket hand-over.

use std::{fmt, sync::Arc};

use http::{
    Method, Request, StatusCode,
    header::{
        CONNECTION, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION,
        UPGRADE,
    },
};
use tracing::{debug, warn};
use url::Url;

use super::key::{HandshakeKey, KeyGenerator, verify_accept};
use crate::{
    auth::Principal,
    connection::Connection,
    dispatch::Dispatcher,
    error::{HandshakeError, HandshakeResult},
    parser::{DataProvider, MemoryDataProvider, ParserConfig, WEBSOCKET_VERSION},
    transport::{HttpTransport, UpgradeTransport, UpgradedSocket},
};

/// Where to connect and how to parse what comes back.
///
/// The transport carries everything about *how* the request travels (TLS,
/// timeouts, authentication scheme, cookies); these options describe the
/// endpoint and the session.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Host name or address, as sent in the `Host` header.
    pub host: String,
    /// Port (None = 80, or 443 on a secure transport).
    pub port: Option<u16>,
    /// Request target: path plus optional query.
    pub path: String,
    /// Identity handed to the transport's authenticator.
    pub principal: Option<Principal>,
    /// Subprotocols offered in `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
    /// Storage for inbound message bodies.
    pub data_provider: Arc<dyn DataProvider>,
    /// Source of the `Sec-WebSocket-Key` nonce.
    pub key_generator: Arc<KeyGenerator>,
}

impl ConnectOptions {
    /// Create options for `host` with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            path: "/".to_string(),
            principal: None,
            protocols: Vec::new(),
            data_provider: Arc::new(MemoryDataProvider::default()),
            key_generator: Arc::new(KeyGenerator::new()),
        }
    }

    /// Options for a `ws://` or `wss://` URL.
    pub fn from_url(url: &Url) -> HandshakeResult<Self> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(HandshakeError::invalid_url(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| HandshakeError::invalid_url("missing host"))?;

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        let mut options = Self::new(host).path(path);
        options.port = url.port();
        Ok(options)
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the request target.
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the principal.
    #[must_use]
    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Offer a subprotocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Replace the offered subprotocols.
    #[must_use]
    pub fn protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set the data provider.
    #[must_use]
    pub fn data_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.data_provider = provider;
        self
    }

    /// Set the key generator.
    #[must_use]
    pub fn key_generator(mut self, generator: Arc<KeyGenerator>) -> Self {
        self.key_generator = generator;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Host cannot be empty".to_string());
        }
        if self.port == Some(0) {
            return Err("Port must be > 0".to_string());
        }
        if !self.path.starts_with('/') {
            return Err(format!("Path must start with '/', got '{}'", self.path));
        }
        if let Some(protocol) = self
            .protocols
            .iter()
            .find(|p| p.is_empty() || p.contains([',', ' ']))
        {
            return Err(format!("Invalid subprotocol '{protocol}'"));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("principal", &self.principal)
            .field("protocols", &self.protocols)
            .field("data_provider", &self.data_provider)
            .finish_non_exhaustive()
    }
}

/// Builds the `GET` upgrade request for `key`.
pub fn upgrade_request(options: &ConnectOptions, port: u16, key: &HandshakeKey) -> HandshakeResult<Request<()>> {
    let mut builder = Request::builder()
        .method(Method::GET)
        .uri(options.path.as_str())
        .header(HOST, format!("{}:{}", options.host, port))
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_KEY, key.as_str())
        .header(SEC_WEBSOCKET_VERSION, WEBSOCKET_VERSION.to_string());
    if !options.protocols.is_empty() {
        builder = builder.header(SEC_WEBSOCKET_PROTOCOL, options.protocols.join(", "));
    }
    Ok(builder.body(())?)
}

/// Performs the opening handshake through `transport` and binds the upgraded
/// socket to a new, not yet started [`Connection`].
///
/// On failure the transport is closed before the error is returned.
pub async fn connect<T>(
    mut transport: T,
    options: ConnectOptions,
    dispatcher: Arc<dyn Dispatcher>,
) -> HandshakeResult<Connection>
where
    T: UpgradeTransport,
{
    match negotiate(&mut transport, &options).await {
        Ok(socket) => {
            let config = ParserConfig::new(
                options.data_provider,
                options.protocols,
                options.path,
                WEBSOCKET_VERSION,
            );
            Ok(Connection::new(socket, config, dispatcher))
        }
        Err(error) => {
            if let Err(close_error) = transport.close().await {
                warn!(error = %close_error, "failed to close transport after a failed upgrade");
            }
            Err(error)
        }
    }
}

/// Connects to a `ws://` or `wss://` URL with a default [`HttpTransport`].
pub async fn connect_url(url: &str, dispatcher: Arc<dyn Dispatcher>) -> HandshakeResult<Connection> {
    let url = Url::parse(url).map_err(|e| HandshakeError::invalid_url(e.to_string()))?;
    let options = ConnectOptions::from_url(&url)?;
    let transport = if url.scheme() == "wss" {
        HttpTransport::secure()?
    } else {
        HttpTransport::new()
    };
    connect(transport, options, dispatcher).await
}

async fn negotiate<T>(transport: &mut T, options: &ConnectOptions) -> HandshakeResult<UpgradedSocket>
where
    T: UpgradeTransport,
{
    options.validate().map_err(HandshakeError::invalid_options)?;

    let secure = transport.is_secure();
    let port = options.port.unwrap_or(if secure { 443 } else { 80 });
    let key = options.key_generator.generate();
    let request = upgrade_request(options, port, &key)?;

    let response = transport
        .execute(request, options.principal.as_ref(), secure, true)
        .await?;

    if response.status != StatusCode::SWITCHING_PROTOCOLS {
        return Err(HandshakeError::UnexpectedStatus {
            code: response.status.as_u16(),
            message: response.reason().to_string(),
        });
    }

    let accept = response
        .headers
        .get(SEC_WEBSOCKET_ACCEPT)
        .ok_or(HandshakeError::MissingAcceptHeader)?;
    verify_accept(&key, &String::from_utf8_lossy(accept.as_bytes()))?;

    let mut sockets = transport.take_open_sockets().await;
    if sockets.len() > 1 {
        return Err(HandshakeError::AmbiguousSocket { count: sockets.len() });
    }
    let socket = sockets.pop().ok_or(HandshakeError::SocketClosedPrematurely)?;

    debug!(host = %options.host, port, path = %options.path, secure, "websocket upgrade completed");
    Ok(socket)
}

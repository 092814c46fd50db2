//! Authentication of the upgrade request.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use base64::prelude::*;
use http::{HeaderMap, HeaderName, HeaderValue, header};

use crate::error::{TransportError, TransportResult};

/// The identity a connection is opened for.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    name: String,
    password: Option<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Adds credentials to the headers of an upgrade request.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    async fn authenticate(
        &self,
        principal: Option<&Principal>,
        headers: &mut HeaderMap,
    ) -> TransportResult<()>;
}

fn header_value(value: &str) -> TransportResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| TransportError::auth(format!("invalid header value: {e}")))
}

/// No authentication
#[derive(Debug, Clone, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn authenticate(&self, _principal: Option<&Principal>, _headers: &mut HeaderMap) -> TransportResult<()> {
        Ok(())
    }
}

/// HTTP Basic authentication from the principal's name and password.
///
/// Requests without a principal are sent unauthenticated; a principal without
/// a password is an error.
#[derive(Debug, Clone, Default)]
pub struct BasicAuth;

#[async_trait]
impl Authenticator for BasicAuth {
    async fn authenticate(&self, principal: Option<&Principal>, headers: &mut HeaderMap) -> TransportResult<()> {
        let Some(principal) = principal else {
            return Ok(());
        };
        let password = principal
            .password()
            .ok_or_else(|| TransportError::auth(format!("no password for principal '{}'", principal.name())))?;
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", principal.name(), password));
        let mut value = header_value(&format!("Basic {credentials}"))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }
}

/// Bearer token authentication
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth").finish_non_exhaustive()
    }
}

#[async_trait]
impl Authenticator for BearerAuth {
    async fn authenticate(&self, _principal: Option<&Principal>, headers: &mut HeaderMap) -> TransportResult<()> {
        let mut value = header_value(&format!("Bearer {}", self.token))?;
        value.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }
}

/// Static API key sent in a custom header.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    name: HeaderName,
    value: HeaderValue,
}

impl ApiKeyAuth {
    pub fn header(name: &str, value: &str) -> TransportResult<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::auth(format!("invalid header name: {e}")))?;
        let mut value = header_value(value)?;
        value.set_sensitive(true);
        Ok(Self { name, value })
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuth {
    async fn authenticate(&self, _principal: Option<&Principal>, headers: &mut HeaderMap) -> TransportResult<()> {
        headers.insert(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// Applies several authenticators in order.
#[derive(Clone, Default)]
pub struct CompositeAuth {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl CompositeAuth {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_auth<A: Authenticator + 'static>(mut self, auth: A) -> Self {
        self.authenticators.push(Arc::new(auth));
        self
    }
}

impl fmt::Debug for CompositeAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuth")
            .field("authenticators", &self.authenticators.len())
            .finish()
    }
}

#[async_trait]
impl Authenticator for CompositeAuth {
    async fn authenticate(&self, principal: Option<&Principal>, headers: &mut HeaderMap) -> TransportResult<()> {
        for auth in &self.authenticators {
            auth.authenticate(principal, headers).await?;
        }
        Ok(())
    }
}

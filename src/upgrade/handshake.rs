//! Metadata captured by the handshake and supplied through `pre_init`.

use std::{collections::BTreeMap, time::Duration};

use crate::frame::{Transform, TransformChain};

/// Negotiated parameters of an upgrade.
#[derive(Debug, Default)]
pub struct HandshakeContext {
    request_uri: String,
    query: Option<String>,
    path_params: BTreeMap<String, String>,
    subprotocol: Option<String>,
    transforms: TransformChain,
    secure: bool,
    http_session_id: Option<String>,
    idle_timeout: Option<Duration>,
}

impl HandshakeContext {
    /// Handshake for a request to `request_uri`.
    #[must_use]
    pub fn new(request_uri: impl Into<String>) -> Self {
        Self {
            request_uri: request_uri.into(),
            ..Self::default()
        }
    }

    /// Query string of the upgrade request.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Path parameter extracted by the routing layer.
    #[must_use]
    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Negotiated sub-protocol.
    #[must_use]
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }

    /// Append a negotiated extension to the transform chain.
    #[must_use]
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms = self.transforms.with(transform);
        self
    }

    /// Whether the upgrade happened over a secure transport.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Identifier of the HTTP session that performed the upgrade.
    #[must_use]
    pub fn with_http_session_id(mut self, id: impl Into<String>) -> Self {
        self.http_session_id = Some(id.into());
        self
    }

    /// Idle timeout overriding the configured default.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub(super) fn idle_timeout(&self) -> Option<Duration> { self.idle_timeout }

    pub(super) fn into_parts(self) -> (SessionMetadata, TransformChain) {
        let metadata = SessionMetadata {
            request_uri: self.request_uri,
            query: self.query,
            path_params: self.path_params,
            subprotocol: self.subprotocol,
            extensions: self.transforms.names(),
            secure: self.secure,
            http_session_id: self.http_session_id,
        };
        (metadata, self.transforms)
    }
}

/// Immutable handshake metadata exposed on a [`Session`](super::Session).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionMetadata {
    /// URI of the upgrade request.
    pub request_uri: String,
    /// Query string of the upgrade request.
    pub query: Option<String>,
    /// Path parameters extracted by the routing layer.
    pub path_params: BTreeMap<String, String>,
    /// Negotiated sub-protocol.
    pub subprotocol: Option<String>,
    /// Negotiated extension names in registration order.
    pub extensions: Vec<String>,
    /// Whether the transport is secure.
    pub secure: bool,
    /// HTTP session that performed the upgrade.
    pub http_session_id: Option<String>,
}

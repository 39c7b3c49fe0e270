//! Request rewriting ("directing") toward the upstream endpoint.
//!
//! # Responsibilities
//! - Strip blacklisted headers (case-insensitive)
//! - Point Host header and URI authority at the endpoint host
//! - Switch the URI scheme to the endpoint scheme
//! - Prefix the request path with the endpoint path, joined by exactly one slash
//!
//! # Design Decisions
//! - Pure rewrite of `request::Parts`: no I/O, deterministic for equal input
//! - A caller-supplied [`Director`] fully replaces the default one

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme, Uri};
use url::Url;

/// Rewrites a request in place so it targets the upstream.
pub trait Director: Send + Sync + 'static {
    fn direct(&self, request: &mut Parts);
}

impl<F> Director for F
where
    F: Fn(&mut Parts) + Send + Sync + 'static,
{
    fn direct(&self, request: &mut Parts) {
        self(request)
    }
}

/// Error type for endpoint parsing.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("endpoint scheme {0:?} is not http or https")]
    Scheme(String),

    #[error("endpoint has no host")]
    MissingHost,

    #[error("invalid endpoint component: {0}")]
    Component(#[from] axum::http::Error),

    #[error("invalid header name {0:?}")]
    HeaderName(String),
}

/// The upstream target: scheme, host and path prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: Scheme,
    authority: Authority,
    host_header: HeaderValue,
    path: String,
}

impl Endpoint {
    /// Parse an absolute http or https URL.
    pub fn parse(endpoint: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(endpoint)?;
        let scheme = match url.scheme() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            other => return Err(EndpointError::Scheme(other.to_string())),
        };
        let host = url.host_str().ok_or(EndpointError::MissingHost)?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = Authority::try_from(authority).map_err(axum::http::Error::from)?;
        let host_header =
            HeaderValue::from_str(authority.as_str()).map_err(axum::http::Error::from)?;

        Ok(Self {
            scheme,
            authority,
            host_header,
            path: url.path().to_string(),
        })
    }

    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// Host and optional port.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn host_header(&self) -> &HeaderValue {
        &self.host_header
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Header names removed from every proxied request.
#[derive(Debug, Clone, Default)]
pub struct HeaderBlacklist(Vec<HeaderName>);

impl HeaderBlacklist {
    pub fn new<I, S>(names: I) -> Result<Self, EndpointError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| EndpointError::HeaderName(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Remove every blacklisted header, all values included.
    pub fn strip(&self, headers: &mut HeaderMap) {
        for name in &self.0 {
            headers.remove(name);
        }
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.0.contains(name)
    }
}

/// Join two path segments so exactly one slash sits between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// The default director: blacklist, then host, scheme and path rewrite.
#[derive(Debug, Clone)]
pub struct EndpointDirector {
    endpoint: Endpoint,
    blacklist: HeaderBlacklist,
}

impl EndpointDirector {
    pub fn new(endpoint: Endpoint, blacklist: HeaderBlacklist) -> Self {
        Self {
            endpoint,
            blacklist,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Director for EndpointDirector {
    fn direct(&self, request: &mut Parts) {
        self.blacklist.strip(&mut request.headers);
        request.headers.insert(HOST, self.endpoint.host_header.clone());

        let path = single_joining_slash(&self.endpoint.path, request.uri.path());
        let path_and_query = match request.uri.query() {
            Some(query) => format!("{path}?{query}"),
            None => path,
        };
        let path_and_query = PathAndQuery::try_from(path_and_query).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Directed path is invalid, using endpoint root");
            PathAndQuery::from_static("/")
        });

        let mut parts = axum::http::uri::Parts::default();
        parts.scheme = Some(self.endpoint.scheme.clone());
        parts.authority = Some(self.endpoint.authority.clone());
        parts.path_and_query = Some(path_and_query);
        match Uri::from_parts(parts) {
            Ok(uri) => request.uri = uri,
            Err(e) => tracing::error!(error = %e, "Failed to build directed URI"),
        }

        tracing::debug!(uri = %request.uri, "Directing to upstream");
    }
}

//! Broker endpoint parsing.
//!
//! Endpoints are connection strings of the form `scheme://authority[/path]`,
//! e.g. `tcp://127.0.0.1:9007/amps/json` or `mem://local`. The scheme names
//! the transport; everything after `://` is interpreted by it.

use std::fmt;

/// A parsed broker endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    authority: String,
    path: String,
}

/// Error type for endpoint parsing failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointParseError {
    /// Endpoint is empty (zero length).
    Empty,
    /// Endpoint does not contain a `scheme://` prefix.
    MissingScheme,
    /// Scheme contains characters outside `[a-zA-Z0-9+.-]` or does not
    /// start with a letter.
    InvalidScheme,
    /// Nothing follows the `scheme://` prefix.
    EmptyAuthority,
}

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointParseError::Empty => write!(f, "endpoint cannot be empty"),
            EndpointParseError::MissingScheme => {
                write!(f, "endpoint must start with `scheme://`")
            }
            EndpointParseError::InvalidScheme => {
                write!(f, "endpoint scheme contains invalid characters")
            }
            EndpointParseError::EmptyAuthority => {
                write!(f, "endpoint is missing a host or broker name after `://`")
            }
        }
    }
}

impl std::error::Error for EndpointParseError {}

impl Endpoint {
    /// Parse a connection string.
    ///
    /// # Examples
    ///
    /// ```
    /// use trestle_core::endpoint::Endpoint;
    ///
    /// let ep = Endpoint::parse("tcp://127.0.0.1:9007/amps/json").unwrap();
    /// assert_eq!(ep.scheme(), "tcp");
    /// assert_eq!(ep.authority(), "127.0.0.1:9007");
    /// assert_eq!(ep.path(), "/amps/json");
    /// ```
    pub fn parse(input: &str) -> Result<Endpoint, EndpointParseError> {
        if input.is_empty() {
            return Err(EndpointParseError::Empty);
        }

        let (scheme, rest) = input
            .split_once("://")
            .ok_or(EndpointParseError::MissingScheme)?;

        if scheme.is_empty() {
            return Err(EndpointParseError::MissingScheme);
        }

        let mut chars = scheme.chars();
        let leading_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
        let tail_valid = scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'));
        if !leading_alpha || !tail_valid {
            return Err(EndpointParseError::InvalidScheme);
        }

        let (authority, path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, format!("/{path}")),
            None => (rest, String::new()),
        };

        if authority.is_empty() {
            return Err(EndpointParseError::EmptyAuthority);
        }

        Ok(Endpoint {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path,
        })
    }

    /// Transport scheme, e.g. `tcp` or `mem`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host/port pair or broker name after the scheme.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Trailing path, empty if the endpoint has none. Includes the leading
    /// slash when present.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.authority, self.path)
    }
}

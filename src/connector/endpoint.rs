use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangePattern {
    /// Fire and forget; outbound work goes through the dispatcher executor.
    #[default]
    OneWay,
    /// The caller waits for the reply.
    RequestResponse,
}

/// Registry key of a receiver, by default the endpoint address.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct EndpointKey(Arc<str>);

impl EndpointKey {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EndpointKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for EndpointKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only description of where a connector sends to or receives from.
/// Two endpoints are the same pool key when all fields match; the protocol
/// is stored lowercase.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct Endpoint {
    name: String,
    #[serde(deserialize_with = "lowercase")]
    protocol: String,
    address: String,
    #[serde(default)]
    exchange_pattern: ExchangePattern,
}

impl Endpoint {
    pub fn new(protocol: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: address.clone(),
            protocol: protocol.into().to_ascii_lowercase(),
            address,
            exchange_pattern: ExchangePattern::OneWay,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_exchange_pattern(mut self, pattern: ExchangePattern) -> Self {
        self.exchange_pattern = pattern;
        self
    }

    #[inline]
    pub fn request_response(self) -> Self {
        self.with_exchange_pattern(ExchangePattern::RequestResponse)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    #[inline]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[inline]
    pub fn exchange_pattern(&self) -> ExchangePattern {
        self.exchange_pattern
    }

    #[inline]
    pub fn key(&self) -> EndpointKey {
        EndpointKey::from(self.address.as_str())
    }

    pub fn uri(&self) -> String {
        format!("{}://{}", self.protocol, self.address)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.address)
    }
}

/// The flow (service) a receiver delivers to.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FlowConstruct {
    name: Arc<str>,
}

impl FlowConstruct {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn lowercase<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    String::deserialize(de).map(|s| s.to_ascii_lowercase())
}

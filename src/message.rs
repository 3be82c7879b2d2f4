use ahash::AHashMap;
use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

pub const PROP_ORIGINATING_ENDPOINT: &str = "originating_endpoint";
pub const PROP_CONNECTOR: &str = "connector";

/// Unit of data travelling through receivers, dispatchers and requesters.
#[derive(Clone, PartialEq, Eq)]
pub struct Event {
    id: Uuid,
    payload: Bytes,
    properties: AHashMap<String, String>,
}

impl Event {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            properties: AHashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Same payload and properties under a fresh id, for replies.
    pub fn derive(&self, payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            properties: self.properties.clone(),
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("payload_len", &self.payload.len())
            .field("properties", &self.properties)
            .finish()
    }
}

/// Consumer of received events; a returned event is the reply for
/// request-response exchanges.
pub trait MessageProcessor: Send + Sync + 'static {
    fn process(&self, event: Event) -> anyhow::Result<Option<Event>>;
}

impl<F> MessageProcessor for F
where
    F: Fn(Event) -> anyhow::Result<Option<Event>> + Send + Sync + 'static,
{
    #[inline]
    fn process(&self, event: Event) -> anyhow::Result<Option<Event>> {
        self(event)
    }
}

/// Builds events for data read off a transport.
pub trait MessageFactory: Send + Sync + 'static {
    fn create(&self, payload: Bytes, endpoint: &str) -> Event;
}

/// Tags every event with the connector and the endpoint it came from.
#[derive(Debug, Clone)]
pub struct DefaultMessageFactory {
    connector: String,
}

impl DefaultMessageFactory {
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
        }
    }
}

impl MessageFactory for DefaultMessageFactory {
    fn create(&self, payload: Bytes, endpoint: &str) -> Event {
        Event::new(payload)
            .with_property(PROP_CONNECTOR, self.connector.as_str())
            .with_property(PROP_ORIGINATING_ENDPOINT, endpoint)
    }
}

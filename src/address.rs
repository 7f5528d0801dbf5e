use std::fmt;

/// The device id every account's primary device is registered under.
pub const DEFAULT_DEVICE_ID: u32 = 1;

/// One device of one remote account: the unit a ratchet session is kept for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolAddress {
    name: String,
    device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// An account as the push server knows it, optionally homed on a federated relay.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    name: String,
    relay: Option<String>,
}

impl ServiceAddress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relay: None,
        }
    }

    pub fn with_relay(name: impl Into<String>, relay: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relay: Some(relay.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relay(&self) -> Option<&str> {
        self.relay.as_deref()
    }

    /// The session address of one of this account's devices.
    pub fn device(&self, device_id: u32) -> ProtocolAddress {
        ProtocolAddress::new(self.name.clone(), device_id)
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

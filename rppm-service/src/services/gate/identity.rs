use crate::services::device::DeviceIdentity;
use secrecy::{ExposeSecret, SecretString};
use service_core::middleware::rate_limit::ClientAddr;
use service_core::utils::constant_time_eq;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

/// Callers exempt from rate limiting and quota.
#[derive(Clone, Default)]
pub struct OwnerBypass {
    key: Option<SecretString>,
    ips: HashSet<IpAddr>,
}

impl OwnerBypass {
    pub fn new(key: Option<SecretString>, ips: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            key: key.filter(|k| !k.expose_secret().is_empty()),
            ips: ips.into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub fn matches_key(&self, provided: &str) -> bool {
        match &self.key {
            Some(key) => constant_time_eq(key.expose_secret(), provided),
            None => false,
        }
    }

    pub fn contains_ip(&self, ip: &IpAddr) -> bool {
        self.ips.contains(ip)
    }
}

impl fmt::Debug for OwnerBypass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerBypass")
            .field("key_configured", &self.key.is_some())
            .field("ip_count", &self.ips.len())
            .finish()
    }
}

/// Who is asking, for bucketing purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    Owner,
    Ip(IpAddr),
    Device(String),
    /// Neither an address nor a device could be determined. All such callers
    /// share one bucket.
    Anonymous,
}

impl ClientIdentity {
    /// Resolve in order: owner key, source address, device identity.
    ///
    /// A wrong owner key is ignored rather than rejected, so probing it
    /// yields the same response as not sending one. Owner addresses only
    /// match the socket peer, never an address read from a header.
    pub fn resolve(
        owner_key: Option<&str>,
        source: Option<ClientAddr>,
        device: Option<&DeviceIdentity>,
        bypass: &OwnerBypass,
    ) -> Self {
        if owner_key.is_some_and(|key| bypass.matches_key(key)) {
            return ClientIdentity::Owner;
        }

        match (source, device) {
            (Some(addr), _) if !addr.forwarded && bypass.contains_ip(&addr.ip) => {
                ClientIdentity::Owner
            }
            (Some(addr), _) => ClientIdentity::Ip(addr.ip),
            (None, Some(device)) => ClientIdentity::Device(device.as_wire()),
            (None, None) => ClientIdentity::Anonymous,
        }
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, ClientIdentity::Owner)
    }

    /// Key under which rate and quota counters are kept.
    pub fn bucket_key(&self) -> String {
        match self {
            ClientIdentity::Owner => "owner".to_string(),
            ClientIdentity::Ip(ip) => format!("ip:{}", ip),
            ClientIdentity::Device(id) => format!("dev:{}", id),
            ClientIdentity::Anonymous => "anon".to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientIdentity::Owner => "owner",
            ClientIdentity::Ip(_) => "ip",
            ClientIdentity::Device(_) => "device",
            ClientIdentity::Anonymous => "anonymous",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bypass() -> OwnerBypass {
        OwnerBypass::new(
            Some(SecretString::new("owner-secret".to_string())),
            ["10.9.9.9".parse().unwrap()],
        )
    }

    fn peer(ip: &str) -> Option<ClientAddr> {
        ip.parse().ok().map(|ip| ClientAddr {
            ip,
            forwarded: false,
        })
    }

    #[test]
    fn test_owner_key_wins() {
        let ip = peer("203.0.113.1");
        assert_eq!(
            ClientIdentity::resolve(Some("owner-secret"), ip, None, &bypass()),
            ClientIdentity::Owner
        );
    }

    #[test]
    fn test_wrong_owner_key_falls_through_to_ip() {
        let ip: IpAddr = "203.0.113.1".parse().unwrap();
        assert_eq!(
            ClientIdentity::resolve(Some("guess"), peer("203.0.113.1"), None, &bypass()),
            ClientIdentity::Ip(ip)
        );
    }

    #[test]
    fn test_owner_ip_is_bypassed() {
        assert_eq!(
            ClientIdentity::resolve(None, peer("10.9.9.9"), None, &bypass()),
            ClientIdentity::Owner
        );
    }

    #[test]
    fn test_forwarded_owner_ip_is_metered() {
        let forwarded = ClientAddr {
            ip: "10.9.9.9".parse().unwrap(),
            forwarded: true,
        };
        assert_eq!(
            ClientIdentity::resolve(None, Some(forwarded), None, &bypass()),
            ClientIdentity::Ip(forwarded.ip)
        );
    }

    #[test]
    fn test_device_used_without_ip() {
        let device = DeviceIdentity::Strong("abc".to_string());
        let identity = ClientIdentity::resolve(None, None, Some(&device), &bypass());
        assert_eq!(identity.bucket_key(), "dev:fp:abc");
        assert_eq!(
            ClientIdentity::resolve(None, None, None, &bypass()),
            ClientIdentity::Anonymous
        );
    }

    #[test]
    fn test_empty_key_never_matches() {
        let bypass = OwnerBypass::new(Some(SecretString::new(String::new())), []);
        assert!(!bypass.has_key());
        assert!(!bypass.matches_key(""));
    }

    #[test]
    fn test_debug_does_not_leak_contents() {
        let rendered = format!("{:?}", bypass());
        assert!(!rendered.contains("owner-secret"));
        assert!(!rendered.contains("10.9.9.9"));
    }
}

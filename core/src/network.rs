//! Network endpoint and NIC attachment types.

use serde::{Deserialize, Serialize};

/// A host-managed network endpoint, resolved by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkEndpoint {
    /// Endpoint ID.
    pub id: String,

    /// Endpoint name (lookup key).
    pub name: String,

    /// Network namespace that owns this endpoint.
    pub namespace_id: String,

    /// MAC address (e.g., "00-15-5D-52-C0-00").
    pub mac_address: String,

    #[serde(default)]
    pub ip_address: String,

    #[serde(default)]
    pub prefix_length: u8,

    #[serde(default)]
    pub gateway_address: String,

    #[serde(default)]
    pub dns_suffix: String,

    /// Comma-separated DNS servers.
    #[serde(default)]
    pub dns_servers: String,
}

/// A NIC attached to a guest network namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicAttachment {
    pub container_id: String,
    pub nic_id: String,
    pub endpoint_id: String,
    pub namespace_id: String,
    /// Attach timestamp (RFC 3339).
    pub attached_at: String,
}

impl NicAttachment {
    pub fn new(container_id: &str, nic_id: &str, endpoint: &NetworkEndpoint) -> Self {
        Self {
            container_id: container_id.to_string(),
            nic_id: nic_id.to_string(),
            endpoint_id: endpoint.id.clone(),
            namespace_id: endpoint.namespace_id.clone(),
            attached_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> NetworkEndpoint {
        NetworkEndpoint {
            id: "ep-1".to_string(),
            name: "eth-test".to_string(),
            namespace_id: "ns-1".to_string(),
            mac_address: "00-15-5D-52-C0-00".to_string(),
            ip_address: "10.0.0.2".to_string(),
            prefix_length: 24,
            gateway_address: "10.0.0.1".to_string(),
            dns_suffix: String::new(),
            dns_servers: String::new(),
        }
    }

    #[test]
    fn test_attachment_takes_ids_from_endpoint() {
        let nic = NicAttachment::new("c1", "nic-1", &endpoint());
        assert_eq!(nic.container_id, "c1");
        assert_eq!(nic.endpoint_id, "ep-1");
        assert_eq!(nic.namespace_id, "ns-1");
        assert!(!nic.attached_at.is_empty());
    }

    #[test]
    fn test_endpoint_optional_fields_default() {
        let json = r#"{"id":"ep","name":"n","namespace_id":"ns","mac_address":"00-00-00-00-00-01"}"#;
        let ep: NetworkEndpoint = serde_json::from_str(json).unwrap();
        assert_eq!(ep.prefix_length, 0);
        assert!(ep.ip_address.is_empty());
    }
}

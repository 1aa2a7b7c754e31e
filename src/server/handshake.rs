// Handshake negotiation
//
// Runs before any Connection exists. The request path yields the device
// (and optionally tenant), the offered subprotocols yield the version.
// Any failure refuses the upgrade.

use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};

use crate::common::types::{Identity, ProtocolVersion};
use crate::registry::TenantLookup;

/// Why an accept attempt was refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("path must have 2 or 3 non-empty segments, got {segments}")]
    InvalidPath { segments: usize },

    #[error("unknown tenant {0}")]
    UnknownTenant(String),

    #[error("a tenant segment is required")]
    TenantRequired,

    #[error("no supported subprotocol offered (offered: {offered:?})")]
    UnsupportedSubprotocol { offered: Vec<String> },
}

impl IdentityError {
    /// HTTP status the refused upgrade is answered with
    pub fn status(&self) -> StatusCode {
        match self {
            IdentityError::UnknownTenant(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Tokens from every Sec-WebSocket-Protocol header, in offer order
pub fn offered_subprotocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(String::from)
        .collect()
}

/// Pick the first version in `supported` whose exact token was offered
pub fn select_version(offered: &[String], supported: &[ProtocolVersion]) -> Option<ProtocolVersion> {
    supported.iter().copied().find(|version| {
        version
            .subprotocol()
            .is_some_and(|token| offered.iter().any(|offer| offer == token))
    })
}

/// Split a connection path into `(tenant, device)`. The leading version
/// prefix is required but its value is not interpreted.
pub fn parse_path(path: &str) -> Result<(Option<&str>, &str), IdentityError> {
    let trimmed = path.trim_matches('/');
    let segments: Vec<&str> = if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    };

    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(IdentityError::InvalidPath {
            segments: segments.len(),
        });
    }

    match segments.as_slice() {
        [_prefix, device] => Ok((None, *device)),
        [_prefix, tenant, device] => Ok((Some(*tenant), *device)),
        other => Err(IdentityError::InvalidPath { segments: other.len() }),
    }
}

/// Settings the negotiation depends on
pub struct Negotiator<'a> {
    pub supported: &'a [ProtocolVersion],
    pub tenants: &'a dyn TenantLookup,
    pub require_tenant: bool,
}

impl Negotiator<'_> {
    pub fn negotiate(&self, path: &str, offered: &[String]) -> Result<Identity, IdentityError> {
        let (tenant, device) = parse_path(path)?;

        let version = select_version(offered, self.supported).ok_or_else(|| IdentityError::UnsupportedSubprotocol {
            offered: offered.to_vec(),
        })?;

        match tenant {
            Some(name) => {
                if self.tenants.find_by_name(name).is_none() {
                    return Err(IdentityError::UnknownTenant(name.to_string()));
                }
            }
            None if self.require_tenant => return Err(IdentityError::TenantRequired),
            None => {}
        }

        Ok(Identity::new(tenant.map(String::from), device, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryTenants;
    use proptest::prelude::*;
    use tokio_tungstenite::tungstenite::http::HeaderValue;

    const SUPPORTED: [ProtocolVersion; 2] = [ProtocolVersion::V16, ProtocolVersion::V201];

    fn tokens(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn negotiate(path: &str, offered: &[&str], require_tenant: bool) -> Result<Identity, IdentityError> {
        let tenants = InMemoryTenants::from_names(["tenantA"]);
        Negotiator {
            supported: &SUPPORTED,
            tenants: &tenants,
            require_tenant,
        }
        .negotiate(path, &tokens(offered))
    }

    #[test]
    fn test_tenant_aware_path() {
        let identity = negotiate("/OCPP16/tenantA/CS001", &["ocpp1.6"], false).unwrap();
        assert_eq!(
            identity,
            Identity::new(Some("tenantA".into()), "CS001", ProtocolVersion::V16)
        );
    }

    #[test]
    fn test_two_segment_path() {
        let identity = negotiate("ocpp/CS002/", &["ocpp2.0.1"], false).unwrap();
        assert_eq!(identity.tenant_id, None);
        assert_eq!(identity.device_id, "CS002");
        assert_eq!(identity.version, ProtocolVersion::V201);
    }

    #[test]
    fn test_bad_segment_counts() {
        for path in ["/", "/OCPP16", "/a/b/c/d", "/a//b", ""] {
            assert!(
                matches!(negotiate(path, &["ocpp1.6"], false), Err(IdentityError::InvalidPath { .. })),
                "{path}"
            );
        }
    }

    #[test]
    fn test_subprotocol_selection() {
        assert_eq!(
            select_version(&tokens(&["foo", "ocpp1.6"]), &SUPPORTED),
            Some(ProtocolVersion::V16)
        );
        assert_eq!(select_version(&tokens(&["foo", "bar"]), &SUPPORTED), None);
        assert_eq!(select_version(&tokens(&["OCPP1.6"]), &SUPPORTED), None);
        // server preference wins over offer order
        assert_eq!(
            select_version(&tokens(&["ocpp2.0.1", "ocpp1.6"]), &SUPPORTED),
            Some(ProtocolVersion::V16)
        );
        assert_eq!(
            select_version(&tokens(&["ocpp1.6"]), &[ProtocolVersion::V201]),
            None
        );
    }

    #[test]
    fn test_refusals() {
        assert!(matches!(
            negotiate("/OCPP16/CS001", &["foo", "bar"], false),
            Err(IdentityError::UnsupportedSubprotocol { .. })
        ));
        let unknown = negotiate("/OCPP16/nobody/CS001", &["ocpp1.6"], false).unwrap_err();
        assert_eq!(unknown, IdentityError::UnknownTenant("nobody".into()));
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let required = negotiate("/OCPP16/CS001", &["ocpp1.6"], true).unwrap_err();
        assert_eq!(required, IdentityError::TenantRequired);
        assert_eq!(required.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_offered_header_parsing() {
        let mut headers = HeaderMap::new();
        headers.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("foo, ocpp1.6"));
        headers.append(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("ocpp2.0.1,,"));
        assert_eq!(offered_subprotocols(&headers), tokens(&["foo", "ocpp1.6", "ocpp2.0.1"]));
        assert!(offered_subprotocols(&HeaderMap::new()).is_empty());
    }

    proptest! {
        #[test]
        fn only_two_or_three_segments_pass(segments in proptest::collection::vec("[A-Za-z0-9]{1,8}", 0..6)) {
            let path = format!("/{}", segments.join("/"));
            let result = parse_path(&path);
            if segments.len() == 2 || segments.len() == 3 {
                prop_assert!(result.is_ok());
                let (_, device) = result.unwrap();
                prop_assert_eq!(device, segments.last().unwrap().as_str());
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}

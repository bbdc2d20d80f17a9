use crate::cache::Subscription;
use crate::codec::{OpData, RawEnvelope};
use crate::error::{EngineError, EngineResult};
use crate::protocol::{EventSubscription, HelloInfo, IdentifiedInfo, IdentifyInfo, RPC_VERSION};
use base64::{engine::general_purpose, Engine as _};
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn authentication_string(password: &str, salt: &str, challenge: &str) -> String {
    let secret = Sha256::digest(format!("{password}{salt}").as_bytes());
    let secret = general_purpose::STANDARD.encode(secret);
    let response = Sha256::digest(format!("{secret}{challenge}").as_bytes());
    general_purpose::STANDARD.encode(response)
}

/// Waits for the first envelope of a connection, which must be Hello.
pub(crate) async fn await_hello(
    envelopes: &mut Subscription<Arc<RawEnvelope>>,
    timeout: Duration,
) -> EngineResult<HelloInfo> {
    let raw = next_envelope(envelopes, timeout).await?;
    match OpData::from_raw(&raw)? {
        OpData::Hello(hello) => Ok(hello),
        other => Err(EngineError::disconnected(
            None,
            format!("expected Hello, received {}", other.op_code()),
        )),
    }
}

/// Builds the Identify reply to `hello`. A server that asks for
/// authentication gets nothing when there is no usable password.
pub(crate) fn identify_for(
    hello: &HelloInfo,
    password: Option<&str>,
    event_subscriptions: EventSubscription,
) -> EngineResult<IdentifyInfo> {
    let authentication = match &hello.authentication {
        Some(auth) => {
            let password = password
                .filter(|password| !password.is_empty())
                .ok_or(EngineError::MissingPasswordWhereRequired)?;
            Some(authentication_string(password, &auth.salt, &auth.challenge))
        }
        None => None,
    };
    Ok(IdentifyInfo {
        rpc_version: hello.rpc_version.min(RPC_VERSION),
        authentication,
        event_subscriptions: Some(event_subscriptions),
    })
}

/// Skips envelopes until Identified arrives.
pub(crate) async fn await_identified(
    envelopes: &mut Subscription<Arc<RawEnvelope>>,
    timeout: Duration,
) -> EngineResult<IdentifiedInfo> {
    let wait = async {
        loop {
            let raw = match envelopes.next().await {
                Some(item) => item?,
                None => return Err(closed_during_handshake()),
            };
            match OpData::from_raw(&raw) {
                Ok(OpData::Identified(identified)) => return Ok(identified),
                Ok(other) => {
                    tracing::debug!(op = %other.op_code(), "ignoring envelope while awaiting Identified");
                }
                Err(err) => {
                    tracing::debug!(error = %err, "ignoring malformed envelope while awaiting Identified");
                }
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| EngineError::TimedOutWaitingToConnect)?
}

async fn next_envelope(
    envelopes: &mut Subscription<Arc<RawEnvelope>>,
    timeout: Duration,
) -> EngineResult<Arc<RawEnvelope>> {
    match tokio::time::timeout(timeout, envelopes.next()).await {
        Err(_) => Err(EngineError::TimedOutWaitingToConnect),
        Ok(Some(item)) => item,
        Ok(None) => Err(closed_during_handshake()),
    }
}

fn closed_during_handshake() -> EngineError {
    EngineError::disconnected(None, "connection closed during handshake")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Authentication;

    fn hello(authentication: Option<Authentication>, rpc_version: u32) -> HelloInfo {
        HelloInfo {
            obs_web_socket_version: "5.5.0".to_string(),
            rpc_version,
            authentication,
        }
    }

    #[test]
    fn authentication_matches_reference_vectors() {
        assert_eq!(
            authentication_string("pw", "s", "c"),
            "xMPN4g9M0+1V8ZyBd8LT5TKpVDn9gISLBuOsmcvzsaU="
        );
        assert_eq!(
            authentication_string(
                "supersecretpassword",
                "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=",
                "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY="
            ),
            "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4="
        );
    }

    #[test]
    fn identify_without_auth_carries_no_secret() {
        let identify = identify_for(&hello(None, 1), Some("ignored"), EventSubscription::ALL).unwrap();
        assert_eq!(identify.authentication, None);
        assert_eq!(identify.event_subscriptions, Some(EventSubscription::ALL));
    }

    #[test]
    fn missing_or_empty_password_is_rejected_when_auth_is_required() {
        let auth = Authentication {
            challenge: "c".to_string(),
            salt: "s".to_string(),
        };
        let hello = hello(Some(auth), 1);
        for password in [None, Some("")] {
            let err = identify_for(&hello, password, EventSubscription::ALL).unwrap_err();
            assert_eq!(err, EngineError::MissingPasswordWhereRequired);
        }
        let identify = identify_for(&hello, Some("pw"), EventSubscription::ALL).unwrap();
        assert_eq!(
            identify.authentication.as_deref(),
            Some("xMPN4g9M0+1V8ZyBd8LT5TKpVDn9gISLBuOsmcvzsaU=")
        );
    }

    #[test]
    fn rpc_version_is_capped_at_ours() {
        let identify = identify_for(&hello(None, 3), None, EventSubscription::NONE).unwrap();
        assert_eq!(identify.rpc_version, RPC_VERSION);
    }
}

//! The responding side of an exchange.
//!
//! Takes an [`InitResponse`], answers with its own public key, and derives the
//! same session key the server hands to its channel registry. Used by clients
//! embedding the crate and by tests.

use num_bigint_dig::BigUint;

use crate::crypto::{derive_session_key, encoding, AeadKey, DhParameters, KeyPair};
use crate::error::{Error, Result};
use crate::exchange::{CompleteRequest, InitResponse};

/// Client half of one exchange.
#[derive(Debug)]
pub struct PeerExchange {
    session_id: String,
    parameters: DhParameters,
    server_public: BigUint,
    keypair: KeyPair,
}

impl PeerExchange {
    /// Decode the server's material and generate a matching key pair.
    pub fn respond(init: &InitResponse) -> Result<Self> {
        let parameters =
            encoding::parameters_from_pem(&encoding::unwrap_base64(&init.parameters)?)?;
        let server = encoding::public_key_from_pem(&encoding::unwrap_base64(&init.public_key)?)?;

        if server.parameters != parameters {
            return Err(Error::invalid_peer_key(
                "server key does not match issued parameters",
            ));
        }
        parameters.check_public(&server.value)?;

        let keypair = KeyPair::generate(&parameters)?;
        Ok(Self {
            session_id: init.session_id.clone(),
            parameters,
            server_public: server.value,
            keypair,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn parameters(&self) -> &DhParameters {
        &self.parameters
    }

    /// The `complete` body carrying this side's public key.
    pub fn complete_request(&self) -> Result<CompleteRequest> {
        let pem = encoding::public_key_to_pem(&self.parameters, self.keypair.public())?;
        Ok(CompleteRequest {
            session_id: self.session_id.clone(),
            public_key: encoding::wrap_base64(&pem),
        })
    }

    /// Derive the session key from the server's public value.
    pub fn derive_key(&self) -> Result<AeadKey> {
        let shared = self
            .keypair
            .compute_shared(&self.parameters, &self.server_public)?;
        derive_session_key(&shared, &self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DhGenerator;
    use crate::exchange::SessionInfo;

    fn init_response() -> (InitResponse, KeyPair, DhParameters) {
        let (params, server) = DhGenerator::insecure_for_tests(256).generate().unwrap();
        let info = SessionInfo {
            id: "sid".into(),
            state: crate::exchange::ExchangeState::AwaitingPeer,
            parameters: params.clone(),
            public_key: server.public().clone(),
            created_at: tokio::time::Instant::now(),
        };
        (InitResponse::from_session(&info).unwrap(), server, params)
    }

    #[test]
    fn test_peer_agrees_with_server() {
        let (init, server, params) = init_response();
        let peer = PeerExchange::respond(&init).unwrap();
        assert_eq!(peer.session_id(), "sid");
        assert_eq!(peer.parameters(), &params);

        let request = peer.complete_request().unwrap();
        let pem = encoding::unwrap_base64(&request.public_key).unwrap();
        let client_public = encoding::public_key_from_pem(&pem).unwrap();

        let shared = server.compute_shared(&params, &client_public.value).unwrap();
        let server_key = derive_session_key(&shared, "sid").unwrap();
        assert_eq!(peer.derive_key().unwrap(), server_key);
    }

    #[test]
    fn test_rejects_mismatched_server_key() {
        let (mut init, _, _) = init_response();
        let (other, _, _) = init_response();
        init.public_key = other.public_key;

        assert!(matches!(PeerExchange::respond(&init), Err(Error::InvalidPeerKey(_))));
    }

    #[test]
    fn test_rejects_garbage_parameters() {
        let (mut init, _, _) = init_response();
        init.parameters = "not-base64!".into();
        assert!(matches!(PeerExchange::respond(&init), Err(Error::Encoding(_))));
    }
}

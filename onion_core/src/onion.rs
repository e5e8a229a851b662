/*! Layered encryption of onion requests

The payload is encrypted for the destination first. Then, walking the path
from the exit back to the guard, each hop gets a layer holding the previous
ciphertext and the instruction where to forward it:

```text
destination:  E(dst, payload)
exit:         E(exit, [len][E(dst, ..)]{"destination"|"host".., "ephemeral_key"})
middle:       E(middle, [len][E(exit, ..)]{"destination": exit, "ephemeral_key"})
guard:        E(guard, [len][E(middle, ..)]{"destination": middle, "ephemeral_key"})
```

Only the destination symmetric key is kept: the response comes back
encrypted with it.
*/

use onion_crypto::*;
use onion_packet::*;

use crate::errors::OnionRequestError;

/// Fully built onion ready to be sent to a guard.
#[derive(Clone, Debug)]
pub struct Onion {
    /// Node the onion is sent to.
    pub guard: ServiceNode,
    /// Outermost layer, encrypted for the guard.
    pub guard_layer: EncryptionResult,
    /// Key the destination encrypts its response with.
    pub destination_symmetric_key: SymmetricKey,
}

impl Onion {
    /// Wrap `payload` for `destination` in one layer per node of `path`.
    pub fn build(path: &Path, destination: &Destination, payload: &[u8]) -> Result<Onion, OnionRequestError> {
        let mut result = encrypt_for_destination(destination, payload)?;
        let destination_symmetric_key = result.symmetric_key.clone();

        let mut next = destination.clone();
        for hop in path.nodes().iter().rev() {
            result = encrypt_hop(hop, &next, &result)?;
            next = Destination::ToNode(hop.clone());
        }

        Ok(Onion {
            guard: path.guard().clone(),
            guard_layer: result,
            destination_symmetric_key,
        })
    }

    /// Body of the request to the guard's onion endpoint.
    pub fn request_body(&self) -> Result<Vec<u8>, OnionRequestError> {
        let layer = OnionLayer::guard_request(
            self.guard_layer.ciphertext.clone(),
            &self.guard_layer.ephemeral_public_key,
        );
        Ok(layer.encode()?)
    }

    /// Size of the outermost ciphertext.
    pub fn len(&self) -> usize {
        self.guard_layer.ciphertext.len()
    }

    /// Check if the outermost ciphertext is empty.
    pub fn is_empty(&self) -> bool {
        self.guard_layer.ciphertext.is_empty()
    }
}

/// Encrypt `payload` for the destination. Node destinations get the payload
/// framed with empty headers.
pub fn encrypt_for_destination(destination: &Destination, payload: &[u8]) -> Result<EncryptionResult, OnionRequestError> {
    let public_key = destination.x25519_public_key()?;
    let plaintext = match destination {
        Destination::ToNode(_) => OnionLayer::node_payload(payload.to_vec()).encode()?,
        Destination::ToServer(_) => payload.to_vec(),
    };
    Ok(encrypt_for(&public_key, &plaintext)?)
}

/// Encrypt the layer for `hop` telling it to forward `previous` to `next`.
pub fn encrypt_hop(hop: &ServiceNode, next: &Destination, previous: &EncryptionResult) -> Result<EncryptionResult, OnionRequestError> {
    let instruction = next.hop_instruction(&previous.ephemeral_public_key);
    let plaintext = OnionLayer::new(previous.ciphertext.clone(), &instruction)?.encode()?;
    Ok(encrypt_for(&hop.x25519_public_key()?, &plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::thread_rng;
    use serde_json::{json, Value};

    struct Hop {
        node: ServiceNode,
        secret_key: SecretKey,
    }

    fn hop(i: u8) -> Hop {
        let secret_key = SecretKey::generate(&mut thread_rng());
        let node = ServiceNode::new(
            format!("https://10.0.3.{}", i),
            22021,
            format!("ed{}", i),
            secret_key.public_key().to_hex(),
        );
        Hop { node, secret_key }
    }

    fn peel(secret_key: &SecretKey, ciphertext: &[u8], ephemeral_key: &PublicKey) -> OnionLayer {
        let key = receiver_key(secret_key, ephemeral_key).unwrap();
        OnionLayer::decode(&key.decrypt(ciphertext).unwrap()).unwrap()
    }

    fn ephemeral_key(layer: &OnionLayer) -> PublicKey {
        let instruction: HopInstruction = layer.metadata_as().unwrap();
        PublicKey::from_hex(instruction.ephemeral_key()).unwrap()
    }

    #[test]
    fn peel_node_onion() {
        let hops = [hop(1), hop(2), hop(3)];
        let target = hop(4);
        let path = Path::new([hops[0].node.clone(), hops[1].node.clone(), hops[2].node.clone()]).unwrap();
        let destination = Destination::ToNode(target.node.clone());
        let payload = br#"{"method":"info","params":{}}"#;

        let onion = Onion::build(&path, &destination, payload).unwrap();
        assert_eq!(onion.guard, hops[0].node);

        let body = OnionLayer::decode(&onion.request_body().unwrap()).unwrap();
        let metadata: Value = body.metadata_as().unwrap();
        assert_eq!(metadata, json!({ "ephemeral_key": onion.guard_layer.ephemeral_public_key.to_hex() }));

        let mut ciphertext = body.ciphertext;
        let mut key = onion.guard_layer.ephemeral_public_key;
        let expected_next = ["ed2", "ed3", "ed4"];
        for (hop, next) in hops.iter().zip(expected_next.iter()) {
            let layer = peel(&hop.secret_key, &ciphertext, &key);
            match layer.metadata_as::<HopInstruction>().unwrap() {
                HopInstruction::Node { destination, .. } => assert_eq!(&destination, next),
                instruction => panic!("unexpected instruction {:?}", instruction),
            }
            key = ephemeral_key(&layer);
            ciphertext = layer.ciphertext;
        }

        let shared = receiver_key(&target.secret_key, &key).unwrap();
        assert_eq!(shared, onion.destination_symmetric_key);
        let framed = OnionLayer::decode(&shared.decrypt(&ciphertext).unwrap()).unwrap();
        assert_eq!(framed.ciphertext, payload.to_vec());
        assert_eq!(framed.metadata_as::<Value>().unwrap(), json!({ "headers": "" }));
    }

    #[test]
    fn server_payload_is_not_framed() {
        let hops = [hop(1), hop(2), hop(3)];
        let server_key = SecretKey::generate(&mut thread_rng());
        let path = Path::new([hops[0].node.clone(), hops[1].node.clone(), hops[2].node.clone()]).unwrap();
        let destination = Destination::ToServer(ServerDestination {
            host: "open.example.org".to_owned(),
            target: OnionVersion::V4.target().to_owned(),
            x25519_public_key: server_key.public_key().to_hex(),
            scheme: "https".to_owned(),
            port: 443,
        });

        let onion = Onion::build(&path, &destination, b"l2:{}e").unwrap();
        let mut ciphertext = onion.guard_layer.ciphertext.clone();
        let mut key = onion.guard_layer.ephemeral_public_key;
        let mut last = None;
        for hop in &hops {
            let layer = peel(&hop.secret_key, &ciphertext, &key);
            key = ephemeral_key(&layer);
            ciphertext = layer.ciphertext.clone();
            last = Some(layer);
        }

        match last.unwrap().metadata_as::<HopInstruction>().unwrap() {
            HopInstruction::Server { host, target, method, port, .. } => {
                assert_eq!(host, "open.example.org");
                assert_eq!(target, "/oxen/v4/lsrpc");
                assert_eq!(method, "POST");
                assert_eq!(port, 443);
            },
            instruction => panic!("unexpected instruction {:?}", instruction),
        }
        let shared = receiver_key(&server_key, &key).unwrap();
        assert_eq!(shared.decrypt(&ciphertext).unwrap(), b"l2:{}e".to_vec());
    }

    #[test]
    fn invalid_destination_key() {
        let hops = [hop(1), hop(2), hop(3)];
        let path = Path::new([hops[0].node.clone(), hops[1].node.clone(), hops[2].node.clone()]).unwrap();
        let destination = Destination::ToNode(ServiceNode::new("https://10.0.3.9", 1, "ed9", "zz"));
        assert!(matches!(Onion::build(&path, &destination, b"{}"), Err(OnionRequestError::Encryption(_))));
    }
}

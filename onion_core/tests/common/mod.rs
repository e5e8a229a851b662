#![allow(dead_code)]

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use rand::thread_rng;
use serde_json::{json, Value};

use onion_core::config::OnionConfig;
use onion_core::context::OnionRoutingContext;
use onion_core::store::MemoryStore;
use onion_core::transport::*;
use onion_crypto::*;
use onion_packet::*;

pub const SEED: &str = "https://seed.test:4433";
pub const PORT: u16 = 22021;

/// Where an onion ended up.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Node(ServiceNode),
    Server { host: String, port: u16, target: String },
}

/// Onion fully peeled by the fake network.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub hops: Vec<ServiceNode>,
    pub target: Target,
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }

    pub fn guard(&self) -> &ServiceNode {
        &self.hops[0]
    }
}

/// How the network answers a delivery.
pub enum Reply {
    /// The guard answers by itself with a status and raw body.
    Guard(u16, String),
    /// The destination answers in version 3 format.
    Destination(u16, Value),
    /// The destination answers in version 4 format.
    DestinationV4(Value, Option<Vec<u8>>),
    /// Nobody ever answers.
    Hang,
}

type Handler = Box<dyn Fn(&Delivery) -> Reply + Send + Sync>;

struct FakeNode {
    node: ServiceNode,
    secret_key: SecretKey,
}

struct State {
    handler: Handler,
    seed_requests: usize,
    seed_hangs: bool,
    deliveries: Vec<Delivery>,
}

/// In-process service node network. Every node knows its secret key so
/// onions are peeled hop by hop like a real network would.
#[derive(Clone)]
pub struct FakeNetwork {
    nodes: Arc<Vec<FakeNode>>,
    server_key: Arc<SecretKey>,
    state: Arc<Mutex<State>>,
}

impl FakeNetwork {
    pub fn new(count: u8) -> Self {
        let nodes = (1..=count).map(|i| {
            let secret_key = SecretKey::generate(&mut thread_rng());
            let node = ServiceNode::from_ip(
                &format!("10.1.0.{}", i),
                PORT,
                &format!("ed{:02}", i),
                &secret_key.public_key().to_hex(),
            ).unwrap();
            FakeNode { node, secret_key }
        }).collect();
        FakeNetwork {
            nodes: Arc::new(nodes),
            server_key: Arc::new(SecretKey::generate(&mut thread_rng())),
            state: Arc::new(Mutex::new(State {
                handler: Box::new(|_| Reply::Destination(200, json!({}))),
                seed_requests: 0,
                seed_hangs: false,
                deliveries: Vec::new(),
            })),
        }
    }

    pub fn nodes(&self) -> Vec<ServiceNode> {
        self.nodes.iter().map(|fake| fake.node.clone()).collect()
    }

    pub fn node(&self, index: usize) -> ServiceNode {
        self.nodes[index].node.clone()
    }

    pub fn server_public_key(&self) -> String {
        self.server_key.public_key().to_hex()
    }

    pub fn on_delivery<F>(&self, handler: F)
    where F: Fn(&Delivery) -> Reply + Send + Sync + 'static {
        self.state.lock().handler = Box::new(handler);
    }

    /// Seeds accept requests but never answer.
    pub fn hang_seeds(&self) {
        self.state.lock().seed_hangs = true;
    }

    pub fn seed_requests(&self) -> usize {
        self.state.lock().seed_requests
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().deliveries.clone()
    }

    pub fn config(&self) -> OnionConfig {
        OnionConfig {
            seed_nodes: vec![SEED.to_owned()],
            ..OnionConfig::default()
        }
    }

    pub fn context(&self, config: OnionConfig) -> (OnionRoutingContext, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let context = OnionRoutingContext::new(config, store.clone(), Arc::new(self.clone()));
        (context, store)
    }

    /// Seed listing: every node plus two unusable entries.
    fn seed_response(&self) -> Vec<u8> {
        let mut states = self.nodes.iter().map(|fake| json!({
            "public_ip": fake.node.address.trim_start_matches(SNODE_SCHEME),
            "storage_port": fake.node.port,
            "pubkey_ed25519": fake.node.keys.ed25519,
            "pubkey_x25519": fake.node.keys.x25519,
        })).collect::<Vec<_>>();
        states.push(json!({
            "public_ip": UNROUTABLE_ADDRESS,
            "storage_port": PORT,
            "pubkey_ed25519": "edff",
            "pubkey_x25519": self.server_public_key(),
        }));
        states.push(json!({ "public_ip": "10.1.1.1", "storage_port": PORT }));
        json!({ "result": { "service_node_states": states } }).to_string().into_bytes()
    }

    fn find_by_url(&self, url: &str) -> Option<&FakeNode> {
        self.nodes.iter().find(|fake| url.starts_with(&fake.node.url("")))
    }

    fn find_by_ed25519(&self, ed25519: &str) -> Option<&FakeNode> {
        self.nodes.iter().find(|fake| fake.node.ed25519() == ed25519)
    }

    /// Peel the onion sent to `guard`. `None` means nobody answers.
    fn route(&self, guard: &FakeNode, body: &[u8]) -> Option<HttpResponse> {
        let request = OnionLayer::decode(body).unwrap();
        let metadata: Value = request.metadata_as().unwrap();
        let mut ephemeral_key = PublicKey::from_hex(metadata["ephemeral_key"].as_str().unwrap()).unwrap();
        let mut ciphertext = request.ciphertext;
        let mut current = guard;
        let mut hops = Vec::new();

        loop {
            hops.push(current.node.clone());
            let key = receiver_key(&current.secret_key, &ephemeral_key).unwrap();
            let layer = OnionLayer::decode(&key.decrypt(&ciphertext).unwrap()).unwrap();
            let instruction: HopInstruction = layer.metadata_as().unwrap();
            ephemeral_key = PublicKey::from_hex(instruction.ephemeral_key()).unwrap();
            ciphertext = layer.ciphertext;

            match instruction {
                HopInstruction::Node { destination, .. } => {
                    let next = match self.find_by_ed25519(&destination) {
                        Some(next) => next,
                        None => return Some(HttpResponse {
                            status: 502,
                            body: format!("Next node not found: {}", destination).into_bytes(),
                        }),
                    };
                    if hops.len() == PATH_SIZE {
                        let key = receiver_key(&next.secret_key, &ephemeral_key).unwrap();
                        let framed = OnionLayer::decode(&key.decrypt(&ciphertext).unwrap()).unwrap();
                        let delivery = Delivery {
                            hops,
                            target: Target::Node(next.node.clone()),
                            payload: framed.ciphertext,
                        };
                        return self.reply(delivery, &key);
                    }
                    current = next;
                },
                HopInstruction::Server { host, port, target, .. } => {
                    let key = receiver_key(&self.server_key, &ephemeral_key).unwrap();
                    let delivery = Delivery {
                        hops,
                        target: Target::Server { host, port, target },
                        payload: key.decrypt(&ciphertext).unwrap(),
                    };
                    return self.reply(delivery, &key);
                },
            }
        }
    }

    fn reply(&self, delivery: Delivery, key: &SymmetricKey) -> Option<HttpResponse> {
        let mut state = self.state.lock();
        let reply = (state.handler)(&delivery);
        state.deliveries.push(delivery);
        drop(state);

        match reply {
            Reply::Guard(status, body) => Some(HttpResponse { status, body: body.into_bytes() }),
            Reply::Destination(status, body) => {
                let plaintext = json!({ "status": status, "body": body.to_string() }).to_string();
                let ciphertext = key.encrypt(plaintext.as_bytes()).unwrap();
                Some(HttpResponse { status: 200, body: BASE64.encode(ciphertext).into_bytes() })
            },
            Reply::DestinationV4(info, body) => {
                let info = info.to_string().into_bytes();
                let plaintext = match body {
                    Some(body) => bencode_list(&[info.as_slice(), body.as_slice()]),
                    None => bencode_list(&[info.as_slice()]),
                };
                Some(HttpResponse { status: 200, body: key.encrypt(&plaintext).unwrap() })
            },
            Reply::Hang => None,
        }
    }
}

impl Transport for FakeNetwork {
    fn execute(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        if request.url.starts_with(SEED) {
            let mut state = self.state.lock();
            state.seed_requests += 1;
            if state.seed_hangs {
                return future::pending().boxed();
            }
            drop(state);
            return future::ready(Ok(HttpResponse { status: 200, body: self.seed_response() })).boxed();
        }

        let node = match self.find_by_url(&request.url) {
            Some(node) => node,
            None => return future::ready(Err(TransportError::Connection(request.url))).boxed(),
        };
        if request.url.ends_with("get_stats/v1") {
            let body = json!({ "version": [2, 1, 0] }).to_string().into_bytes();
            return future::ready(Ok(HttpResponse { status: 200, body })).boxed();
        }
        if request.url.ends_with("onion_req/v2") {
            let body = request.body.unwrap_or_default();
            return match self.route(node, &body) {
                Some(response) => future::ready(Ok(response)).boxed(),
                None => future::pending().boxed(),
            };
        }
        future::ready(Ok(HttpResponse { status: 404, body: Vec::new() })).boxed()
    }
}

/// Swarm listing entry of `node`.
pub fn swarm_entry(node: &ServiceNode) -> Value {
    json!({
        "ip": node.address.trim_start_matches(SNODE_SCHEME),
        "port": node.port.to_string(),
        "pubkey_ed25519": node.keys.ed25519,
        "pubkey_x25519": node.keys.x25519,
    })
}

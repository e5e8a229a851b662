/*!
Onion request routing through service nodes.

Requests are wrapped in one encryption layer per hop and relayed through a
three node path, so the destination never learns who sent them and the guard
never learns what was sent. The moving parts, leaves first:

- [`directory::NodeDirectory`] keeps the pool of known service nodes and
  refreshes it from seeds.
- [`swarm::SwarmResolver`] maps a public key to the nodes storing its
  messages.
- [`failure::FailureTracker`] counts node and path failures and evicts nodes
  that keep failing.
- [`paths::PathManager`] checks guards, builds paths and repairs them.
- [`onion::Onion`] encrypts a payload layer by layer.
- [`dispatcher::RequestDispatcher`] sends onions to guards, decrypts answers
  and feeds failures back.

[`context::OnionRoutingContext`] wires them together.
*/

#![forbid(unsafe_code)]

#[macro_use]
extern crate log;

pub mod config;
pub mod errors;
pub mod events;
pub mod store;
pub mod transport;
pub mod network;
pub mod directory;
pub mod swarm;
pub mod failure;
pub mod paths;
pub mod onion;
pub mod dispatcher;
pub mod context;

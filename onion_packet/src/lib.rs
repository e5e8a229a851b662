/*! Wire formats of onion requests.

Everything that goes over the wire or into the persisted store is described
here: service nodes and paths, per hop routing instructions, the
`[u32 LE length][ciphertext][json]` layer framing, snode RPC bodies and the
responses a guard sends back.
*/

#![forbid(unsafe_code)]
#![deny(missing_docs)]

#[macro_use]
extern crate cookie_factory;

pub mod errors;
pub mod snode;
pub mod path;
pub mod destination;
pub mod layer;
pub mod rpc;
pub mod response;
pub mod server;

pub use crate::errors::*;
pub use crate::snode::*;
pub use crate::path::*;
pub use crate::destination::*;
pub use crate::layer::*;
pub use crate::rpc::*;
pub use crate::response::*;
pub use crate::server::*;

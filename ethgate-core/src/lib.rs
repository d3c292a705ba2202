//! Core primitives shared by the REST gateway crates: the message model for
//! submissions and replies, the error taxonomy, the OpenAPI document model,
//! and the traits that form the seams to external collaborators (node RPC,
//! signers, compiler, event subsystem).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod messages;
mod openapi;
mod traits;
mod utils;

pub use error::*;
pub use messages::*;
pub use openapi::*;
pub use traits::*;
pub use utils::*;

pub use ethers::types::{Address, Bytes, H256, U256, U64};

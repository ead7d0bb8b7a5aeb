//! Transaction-side modules: the request/unsigned/signed data model
//! (`types`), RLP envelope encoding (`encode`), and the fill→sign→broadcast→
//! wait pipeline (`pipeline`, C7).

pub mod encode;
pub mod pipeline;
pub mod types;

pub use pipeline::TxPipeline;
pub use types::{SignedTx, TransactionRequest, UnsignedTx};

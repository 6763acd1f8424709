#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! BFT-lite consensus: vote/commit tallying, signing, and the adapter that
//! bridges it to the gossip/scheduler layer.

pub mod adapter;
pub mod engine;
pub mod signing;

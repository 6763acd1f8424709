#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: the loop-free raw-TCP gossip overlay and the HTTP sync
//! service used to catch a joining node up to the current chain head.

pub mod gossip;
pub mod sync;

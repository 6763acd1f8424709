#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Validator key custody.

pub mod keystore;

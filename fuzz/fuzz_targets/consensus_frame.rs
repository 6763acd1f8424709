#![no_main]
use libfuzzer_sys::fuzz_target;
use poa_ledger::core::types::{decode_canonical_limited, ConsensusMsg, Proposal, WireEnvelope};

const MAX_BYTES: usize = 8 * 1024 * 1024;

fuzz_target!(|data: &[u8]| {
    // Every shape a gossip payload can arrive as: none of these should panic,
    // regardless of how malformed `data` is.
    let _: Result<WireEnvelope, _> = decode_canonical_limited(data, MAX_BYTES);
    let _: Result<ConsensusMsg, _> = decode_canonical_limited(data, MAX_BYTES);
    let _: Result<Proposal, _> = decode_canonical_limited(data, MAX_BYTES);
});

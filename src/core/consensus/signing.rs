// Copyright (c) 2026 Poa Ledger Contributors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Domain-separated signing bytes for consensus messages.

use crate::core::types::{Address, H256};

/// Vote signing payload: domain || height || round || block_hash || voter
pub fn vote_signing_bytes(
    height: u64,
    round: u64,
    block_hash: H256,
    voter: &Address,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + 8 + 8 + 32 + 20);
    out.extend_from_slice(b"PoaLedger-Vote-v1");
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&round.to_be_bytes());
    out.extend_from_slice(block_hash.as_bytes());
    out.extend_from_slice(voter.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differs_by_height() {
        let voter = Address::from_bytes([1u8; 20]);
        let a = vote_signing_bytes(1, 0, H256::ZERO, &voter);
        let b = vote_signing_bytes(2, 0, H256::ZERO, &voter);
        assert_ne!(a, b);
    }
}

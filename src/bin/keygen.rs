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

use anyhow::Result;
use poa_ledger::core::security::keystore::Keystore;

fn main() -> Result<()> {
    let out_dir = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    std::fs::create_dir_all(&out_dir)?;

    let keystore = Keystore::open(&out_dir)
        .map_err(|_| anyhow::anyhow!("failed to generate or load validator key"))?;
    println!("{}", keystore.address().to_hex());
    Ok(())
}

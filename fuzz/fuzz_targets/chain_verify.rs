#![no_main]

use libfuzzer_sys::fuzz_target;
use veilbid_ledger::{verify_chain, Block, Ledger};

fuzz_target!(|data: &[u8]| {
    let Ok(chain) = serde_json::from_slice::<Vec<Block>>(data) else {
        return;
    };
    // A chain that verifies must also be adoptable
    if verify_chain(&chain).is_ok() {
        assert!(Ledger::from_chain(chain, 1).is_ok());
    }
});

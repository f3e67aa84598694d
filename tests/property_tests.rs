//! Property-based tests for veilbid

use std::sync::{Mutex, OnceLock};

use proptest::prelude::*;
use rand_core::OsRng;
use serde_json::{json, Map, Value};
use veilbid_ledger::{verify_chain, FaultReason, Ledger};
use veilbid_primitives::hash_canonical;
use veilbid_tokens::AuthoritySigner;

fn signer() -> &'static Mutex<AuthoritySigner> {
    static SIGNER: OnceLock<Mutex<AuthoritySigner>> = OnceLock::new();
    SIGNER.get_or_init(|| {
        let mut signer = AuthoritySigner::generate(&mut OsRng, 1024).unwrap();
        signer.grant("prop", u32::MAX);
        Mutex::new(signer)
    })
}

// Property test: canonical hashing ignores key insertion order
proptest! {
    #[test]
    fn canonical_hash_is_order_independent(
        fields in prop::collection::btree_map("[a-z]{1,8}", any::<u64>(), 1..12)
    ) {
        let forward: Map<String, Value> = fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
        let backward: Map<String, Value> = fields.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();
        prop_assert_eq!(hash_canonical(&Value::Object(forward)), hash_canonical(&Value::Object(backward)));
    }
}

// Property test: any single tampered event is caught at its own height
proptest! {
    #[test]
    fn tampering_is_located_at_the_tampered_block(
        bids in prop::collection::vec(1u64..1_000_000, 1..10),
        pick in any::<prop::sample::Index>()
    ) {
        let mut ledger = Ledger::new(1);
        for (i, bid) in bids.iter().enumerate() {
            ledger
                .add_action(json!({"type": "bid", "bid": bid, "token": {"token_id": format!("t{i}"), "token_sig": "AA=="}}))
                .unwrap();
        }
        let mut chain = ledger.chain().to_vec();
        prop_assert!(verify_chain(&chain).is_ok());

        let target = 1 + pick.index(bids.len());
        chain[target].events[0]["bid"] = json!(0);
        let fault = verify_chain(&chain).unwrap_err();
        prop_assert_eq!(fault.height, target as u64);
        prop_assert_eq!(fault.reason, FaultReason::HashMismatch);
    }
}

// Property test: blind issuance always yields a verifying, unlinkable token
proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]
    #[test]
    fn blind_issuance_roundtrip(_seed in any::<u64>()) {
        let signer = signer().lock().unwrap();
        let rsa = signer.blind_rsa().clone();
        drop(signer);

        let r1 = rsa.random_blinding_factor(&mut OsRng);
        let r2 = rsa.random_blinding_factor(&mut OsRng);
        let token_id = rsa.derive_token_id(&r1).unwrap();
        let b1 = rsa.blind(&token_id, &r1).unwrap();
        let b2 = rsa.blind(&token_id, &r2).unwrap();
        prop_assert_ne!(&b1, &b2);

        let blind_sig = signer_sign(&rsa.encode(&b1).unwrap());
        let sig = rsa.unblind(&rsa.decode(&blind_sig).unwrap(), &r1).unwrap();
        prop_assert!(rsa.verify(&token_id, &sig));
        prop_assert!(rsa.verify_blinding(&token_id, &r1, &sig).is_ok());
        prop_assert!(rsa.verify_blinding(&token_id, &r2, &sig).is_err());
    }
}

fn signer_sign(blinded_b64: &str) -> String {
    signer().lock().unwrap().sign_blinded("prop", blinded_b64).unwrap()
}

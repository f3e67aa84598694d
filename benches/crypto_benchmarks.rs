use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand_core::OsRng;
use serde_json::json;
use veilbid_auction::SymmetricKey;
use veilbid_ledger::{verify_chain, Ledger};
use veilbid_primitives::hash_canonical;
use veilbid_tokens::AuthoritySigner;

const BITS: usize = 2048;

fn bench_blind_issuance(c: &mut Criterion) {
    let mut signer = AuthoritySigner::generate(&mut OsRng, BITS).unwrap();
    signer.grant("bench", u32::MAX);
    let rsa = signer.blind_rsa().clone();
    let r = rsa.random_blinding_factor(&mut OsRng);
    let token_id = rsa.derive_token_id(&r).unwrap();

    c.bench_function("blind", |b| {
        b.iter(|| {
            let _ = rsa.blind(black_box(&token_id), black_box(&r));
        });
    });

    let blinded = rsa.encode(&rsa.blind(&token_id, &r).unwrap()).unwrap();
    c.bench_function("authority_sign_blinded", |b| {
        b.iter(|| {
            let _ = signer.sign_blinded("bench", black_box(&blinded));
        });
    });

    let blind_sig = rsa.decode(&signer.sign_blinded("bench", &blinded).unwrap()).unwrap();
    c.bench_function("unblind", |b| {
        b.iter(|| {
            let _ = rsa.unblind(black_box(&blind_sig), black_box(&r));
        });
    });

    let sig = rsa.unblind(&blind_sig, &r).unwrap();
    c.bench_function("token_verify", |b| {
        b.iter(|| {
            let _ = rsa.verify(black_box(&token_id), black_box(&sig));
        });
    });

    c.bench_function("verify_blinding", |b| {
        b.iter(|| {
            let _ = rsa.verify_blinding(black_box(&token_id), black_box(&r), black_box(&sig));
        });
    });
}

fn bench_chain_verify(c: &mut Criterion) {
    let mut ledger = Ledger::new(1);
    for i in 0..200u64 {
        ledger
            .add_action(json!({
                "type": "bid",
                "auction_id": 1,
                "bid": 100 + i,
                "token": {"token_id": format!("{i:064x}"), "token_sig": "AA=="},
            }))
            .unwrap();
    }
    let chain = ledger.chain().to_vec();

    c.bench_function("verify_chain_200", |b| {
        b.iter(|| {
            let _ = verify_chain(black_box(&chain));
        });
    });

    let event = &chain[1].events[0];
    c.bench_function("hash_canonical_event", |b| {
        b.iter(|| {
            let _ = hash_canonical(black_box(event));
        });
    });
}

fn bench_sealing(c: &mut Criterion) {
    let key = SymmetricKey::generate();
    let frame = vec![0x5a_u8; 4096];
    let sealed = key.seal(&frame).unwrap();

    c.bench_function("seal_4k", |b| {
        b.iter(|| {
            let _ = key.seal(black_box(&frame));
        });
    });

    c.bench_function("open_4k", |b| {
        b.iter(|| {
            let _ = key.open(black_box(&sealed));
        });
    });
}

criterion_group!(benches, bench_blind_issuance, bench_chain_verify, bench_sealing);
criterion_main!(benches);

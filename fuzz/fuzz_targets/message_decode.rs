#![no_main]

use libfuzzer_sys::fuzz_target;
use veilbid_auction::group_key::decode_frame;
use veilbid_auction::{GroupKey, Message};

fuzz_target!(|data: &[u8]| {
    // Plain envelopes, then the same bytes as a sealed frame
    if let Ok(msg) = serde_json::from_slice::<Message>(data) {
        let _ = msg.to_event().map(|event| Message::from_event(&event));
    }
    if let Ok(frame) = std::str::from_utf8(data) {
        let key = GroupKey::from_slice(&[7u8; 32]).unwrap();
        let _ = decode_frame(frame, Some(&key));
    }
});

//! Fuzz target for payload decoding.
//!
//! Feeds arbitrary bytes to `Message::decode()` and to the side-channel
//! decompressor. Decode errors are expected; panics are not. Anything that
//! decodes must re-encode to text that is stable under another
//! decode/encode pass (NaN floats compare unequal, so text is compared).
//!
//! Run with: `cargo +nightly fuzz run payload_decoding`

#![no_main]
use libfuzzer_sys::fuzz_target;
use stepwire::shared::channel::decompress_payload;
use stepwire::types::Message;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(message) = Message::decode(text) {
        let encoded = message.encode();
        let again = Message::decode(&encoded).expect("re-encoded message must decode");
        assert_eq!(again.encode(), encoded);
    }

    let _ = decompress_payload(text);
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use scope_client::protocol::decode_message;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = std::str::from_utf8(data) {
        let _ = decode_message(frame);
    }
});

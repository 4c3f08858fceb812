//! Fuzz target: `FrameDecoder::push` + `decode_request`
//!
//! Drives arbitrary byte sequences through the streaming frame decoder and
//! the request decoder.  Neither may panic, payloads must stay within
//! `MAX_FRAME_SIZE`, and a decoded request must re-encode to a frame.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use periph_bridge::rpc::codec::{
    decode_request, encode_request, FrameDecoder, FRAME_BUF_SIZE, MAX_FRAME_SIZE,
};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();

    for &b in data {
        let Ok(Some(payload)) = decoder.push(b) else {
            continue;
        };
        assert!(!payload.is_empty(), "decoder must not yield empty payload");
        assert!(payload.len() <= MAX_FRAME_SIZE, "payload exceeds MAX_FRAME_SIZE");

        if let Ok(request) = decode_request(payload) {
            let mut buf = [0u8; FRAME_BUF_SIZE];
            assert!(encode_request(&request, &mut buf).is_ok());
        }
    }

    // The whole input as a bare payload must not panic either.
    let _ = decode_request(data);
});

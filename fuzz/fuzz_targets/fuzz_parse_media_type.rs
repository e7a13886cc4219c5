#![no_main]

use libfuzzer_sys::fuzz_target;
use yamime::{format_media_type, parse_media_type};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let (mediatype, params, err) = parse_media_type(s);
        if err.is_none() {
            // A clean parse must survive formatting.
            let _ = format_media_type(&mediatype, &params);
        }
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;
use yamime::quotedprintable::Utf8Reader;

fuzz_target!(|data: &[u8]| {
    let rt = Runtime::new().unwrap();

    rt.block_on(async {
        let mut out = Vec::new();
        Utf8Reader::new(data).read_to_end(&mut out).await.unwrap();

        // The rejoiner only ever deletes line break bytes.
        assert!(out.len() <= data.len());
        let count = |bytes: &[u8], b: u8| bytes.iter().filter(|&&x| x == b).count();
        for b in 0..=u8::MAX {
            if b == b'\r' || b == b'\n' {
                assert!(count(&out, b) <= count(data, b));
            } else {
                assert_eq!(count(&out, b), count(data, b));
            }
        }
    });
});

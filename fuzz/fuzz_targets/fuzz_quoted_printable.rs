#![no_main]

use libfuzzer_sys::fuzz_target;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;
use yamime::quotedprintable::Reader;

fuzz_target!(|data: &[u8]| {
    let rt = Runtime::new().unwrap();

    rt.block_on(async {
        let mut lenient = Vec::new();
        Reader::new(data).read_to_end(&mut lenient).await.unwrap();

        // Strict mode decodes identically but stops reporting at the first
        // defect, so its output is a prefix of the lenient output; with no
        // defect the two are equal.
        let mut strict = Vec::new();
        let res = Reader::strict(data).read_to_end(&mut strict).await;
        assert!(lenient.starts_with(&strict));
        if res.is_ok() {
            assert_eq!(lenient, strict);
        }
    });
});

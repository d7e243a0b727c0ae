#![no_main]

use flatdex::format::{EmblFormat, RecordFormat};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut reader = Cursor::new(data);
    let mut buf = Vec::new();
    let mut tokens = Vec::new();
    while let Ok(n) = EmblFormat.read_record(&mut reader, &mut buf) {
        if n == 0 {
            break;
        }
        let _ = EmblFormat.identifier(&buf);
        for field in ["id", "acc", "des", "org", "key", "xx"] {
            EmblFormat.extract_field(&buf, field, &mut tokens);
        }
        buf.clear();
        tokens.clear();
    }
});

#![no_main]

use flatdex::index::header::{Header, IndexKind};
use libfuzzer_sys::fuzz_target;
use std::path::Path;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must decode to a header or a CorruptHeader error
    if let Ok(header) = Header::decode(data, Path::new("fuzz")) {
        let _ = header.validate(IndexKind::Entry, data.len() as u64, Path::new("fuzz"));
        let _ = header.build_date_string();
    }
});

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Must never panic, whatever the input
    let query = flatdex::query::parse_query(data, "id");
    for field in &query.fields {
        let _ = flatdex::query::resolver::field_pattern(&field.pattern, false, false);
        let _ = flatdex::query::resolver::field_pattern(&field.pattern, true, false);
    }
});

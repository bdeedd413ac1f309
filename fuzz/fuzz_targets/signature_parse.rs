#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = libident::signatures::loader::decode_source(data.to_vec()) {
        let _ = libident::SignatureStore::from_source_str(&text);
    }
});

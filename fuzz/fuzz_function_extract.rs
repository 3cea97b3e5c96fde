//! Fuzz target for function extraction and per-function hashing.
//!
//! Run with: cargo +nightly fuzz run fuzz_function_extract
//!
//! The first byte picks the grammar; the rest is treated as a source file.
//! Extraction must either fail with a parse error or return functions whose
//! source spans hash without panicking.

#![no_main]

use aflow_core::hashtree::{FunctionExtractor, SourceLanguage, hash_bytes, normalize_source};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };
    let Ok(source) = std::str::from_utf8(rest) else {
        return;
    };
    let language = if selector % 2 == 0 {
        SourceLanguage::Python
    } else {
        SourceLanguage::Rust
    };
    let Ok(mut extractor) = FunctionExtractor::new(language) else {
        return;
    };
    if let Ok(functions) = extractor.extract(source) {
        for function in functions {
            let _ = hash_bytes(normalize_source(&function.source).as_bytes());
        }
    }
});

// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for legacy rule translation.
// Run with: cargo +nightly fuzz run fuzz_legacy_translate -- -max_len=65536

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // The translator does not check grammar; its output may still be
        // rejected by the canonical parser, but neither may panic.
        if let Ok(canonical) = devgroup_rules::translate(input) {
            let _ = devgroup_rules::parse(&canonical);
        }
    }
});

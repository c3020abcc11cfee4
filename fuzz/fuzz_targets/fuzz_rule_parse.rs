// SPDX-License-Identifier: PMPL-1.0-or-later
// Fuzz target for canonical rule parsing and relation discovery.
// Run with: cargo +nightly fuzz run fuzz_rule_parse -- -max_len=65536

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = devgroup_rules::relations_of(input);
        if let Ok(rule) = devgroup_rules::Rule::parse(input) {
            if let Some(expr) = rule.expr() {
                let _ = expr.to_string();
                let _ = devgroup_rules::SqlFragment::predicate(expr);
            }
        }
    }
});

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use foldwise::classifier::validate_folder_name;
use foldwise::mover::sanitize_folder_name;
use foldwise::remote::parse_verdict;

#[derive(Arbitrary, Debug)]
struct Input<'a> {
    reply: &'a str,
    folder: &'a str,
    max_len: u8,
}

fuzz_target!(|input: Input<'_>| {
    if let Ok(verdict) = parse_verdict(input.reply) {
        assert!((0.0..=1.0).contains(&verdict.confidence));
    }

    if let Some(name) = validate_folder_name(input.folder) {
        let len = name.chars().count();
        assert!((2..=30).contains(&len));
        assert!(!name.contains('/'));
    }

    if let Some(name) = sanitize_folder_name(input.folder, usize::from(input.max_len)) {
        assert!(!name.is_empty());
        assert!(!name.contains('/'));
    }
});

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use snapsort::classifier::{parse_response, sanitize_description, Category};

#[derive(Arbitrary, Debug)]
enum Input {
    Description(String),
    Response(String),
    Category(String),
}

fuzz_target!(|input: Input| {
    match input {
        Input::Description(raw) => {
            let slug = sanitize_description(&raw);
            assert!(!slug.is_empty());
            assert!(slug.len() <= 50);
            assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }
        Input::Response(raw) => {
            if let Ok(result) = parse_response(&raw) {
                assert!((0.0..=1.0).contains(&result.confidence));
                assert!(result.tags.len() <= 5);
                assert!(Category::ALL.contains(&result.category));
            }
        }
        Input::Category(raw) => {
            let category = Category::parse(&raw);
            if !Category::ALL.iter().any(|c| c.as_str() == raw) {
                assert_eq!(category, Category::Other);
            }
        }
    }
});

//! Fuzz testing for the parsers that see raw client input.
//!
//! Every function here reads attacker-controlled bytes before any credential
//! has been checked, so none of them may panic on any input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the parser fuzz target
//! cargo +nightly fuzz run fuzz_request_parsers
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_request_parsers -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `parse_basic_auth`: the `Authorization` header
//! - `parse_key_values` / `parse_bool`: analytics signal headers
//! - `parse_search_response`: backend search bodies, single and multi
//! - `CidrRange::parse`, `wildcard_match`: permission restrictions
//! - `validate_username` / `validate_password`: management request fields

#![no_main]

use arbitrary::Arbitrary;
use axum::http::{HeaderMap, HeaderValue, header};
use libfuzzer_sys::fuzz_target;
use search_gateway::analytics::{
    SEARCH_FILTERS_HEADER, parse_bool, parse_key_values, parse_search_response,
};
use search_gateway::middleware::{CidrRange, parse_basic_auth, wildcard_match};
use search_gateway::validation::{validate_password, validate_username};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    authorization: &'a [u8],
    text: &'a str,
    pattern: &'a str,
    body: &'a [u8],
    multi: bool,
}

fuzz_target!(|input: Input<'_>| {
    if let Ok(value) = HeaderValue::from_bytes(input.authorization) {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value);
        let _ = parse_basic_auth(&headers);
    }

    let _ = parse_key_values(input.text, SEARCH_FILTERS_HEADER);
    let _ = parse_bool(input.text);

    let _ = parse_search_response(input.body, input.multi);

    if let Some(range) = CidrRange::parse(input.pattern)
        && let Ok(ip) = input.text.parse()
    {
        let _ = range.contains(&ip);
    }
    let _ = wildcard_match(input.pattern, input.text);

    let _ = validate_username(input.text);
    let _ = validate_password(input.text);
});

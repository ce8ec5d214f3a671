// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use rand::Rng;

const NAME_LEN: usize = 32;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Random workload name: lowercase alphanumerics, always starting with a
/// letter so it is usable as a hostname label.
pub fn generate_workload_name() -> String {
    let mut rng = rand::rng();
    (0..NAME_LEN)
        .map(|i| {
            let upper = if i == 0 { 26 } else { ALPHABET.len() };
            ALPHABET[rng.random_range(0..upper)] as char
        })
        .collect()
}

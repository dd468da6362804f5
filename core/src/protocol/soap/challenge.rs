/*
 * challenge.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Chiacchiera, a cross-platform messenger plugin.
 *
 * Chiacchiera is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Chiacchiera is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Chiacchiera.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Lock-key challenge response (the MSNP13 `CHL`/`QRY` hash), used to answer the
//! `LockKeyChallenge` of an offline-message `AuthenticationFailed` fault.

use md5::{Digest, Md5};

use crate::config::ChallengeKeys;

const MODULUS: u64 = 0x7FFF_FFFF;
const MULTIPLIER: u64 = 0x0E79_A9C1;

fn le_words(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64)
        .collect()
}

/// Response to `challenge` for the given product identity: 32 lowercase hex characters.
pub fn lock_key_response(challenge: &str, keys: &ChallengeKeys) -> String {
    let mut hasher = Md5::new();
    hasher.update(challenge.as_bytes());
    hasher.update(keys.product_key.as_bytes());
    let digest = hasher.finalize();

    let mut hash_parts = [0u32; 4];
    let mut md5_parts = [0u64; 4];
    for (i, chunk) in digest.chunks_exact(4).enumerate() {
        hash_parts[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        md5_parts[i] = (hash_parts[i] & 0x7FFF_FFFF) as u64;
    }

    // challenge + product id, padded with '0' to a multiple of 8 (a full block when already aligned)
    let mut buf = Vec::with_capacity(challenge.len() + keys.product_id.len() + 8);
    buf.extend_from_slice(challenge.as_bytes());
    buf.extend_from_slice(keys.product_id.as_bytes());
    let pad = 8 - (buf.len() % 8);
    buf.resize(buf.len() + pad, b'0');
    let words = le_words(&buf);

    let mut high: u64 = 0;
    let mut low: u64 = 0;
    for pair in words.chunks_exact(2) {
        let temp = (md5_parts[0] * (((MULTIPLIER * pair[0]) % MODULUS) + high) + md5_parts[1])
            % MODULUS;
        high = (md5_parts[2] * ((pair[1] + temp) % MODULUS) + md5_parts[3]) % MODULUS;
        low = low.wrapping_add(high + temp);
    }
    high = (high + md5_parts[1]) % MODULUS;
    low = (low + md5_parts[3]) % MODULUS;

    hash_parts[0] ^= high as u32;
    hash_parts[1] ^= low as u32;
    hash_parts[2] ^= high as u32;
    hash_parts[3] ^= low as u32;

    let mut out = String::with_capacity(32);
    for part in hash_parts {
        for b in part.to_le_bytes() {
            out.push_str(&format!("{:02x}", b));
        }
    }
    out
}

//! Reproducible GUID allocation.
//!
//! Byte indices below refer to the little-endian "byte array" layout of a GUID
//! (`Uuid::to_bytes_le`), where byte 3 is the least significant byte of the
//! first field and byte 15 is the last byte of the node field.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wxsforge_contracts::DEFAULT_GUID_BASE;

/// Byte significance from lowest to highest, in byte-array positions.
const ORDER_MAP: [usize; 16] = [15, 14, 13, 12, 11, 10, 9, 8, 6, 7, 4, 5, 0, 1, 2, 3];

const HASH_SEED: i32 = 0x1505_1505;
const HASH_MULTIPLIER: i32 = 0x5d58_8b65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuidMode {
    /// The base value is perturbed by a hash of the seed. The base never moves.
    #[default]
    Default,
    /// The seed is ignored; the base value is advanced by one per call.
    Sequential,
}

pub fn default_guid_base() -> Uuid {
    Uuid::from_u128(DEFAULT_GUID_BASE)
}

#[derive(Debug, Clone)]
pub struct GuidAllocator {
    current: Uuid,
    mode: GuidMode,
}

impl Default for GuidAllocator {
    fn default() -> Self {
        GuidAllocator::new(default_guid_base(), GuidMode::Default)
    }
}

impl GuidAllocator {
    pub fn new(base: Uuid, mode: GuidMode) -> Self {
        GuidAllocator {
            current: base,
            mode,
        }
    }

    pub fn next_guid(&mut self, seed: &str) -> Uuid {
        match self.mode {
            GuidMode::Default => hash_guid_by_integer(self.current, hash32(seed)),
            GuidMode::Sequential => {
                self.current = increment(self.current);
                self.current
            }
        }
    }

    pub fn current(&self) -> Uuid {
        self.current
    }

    pub fn set_base(&mut self, base: Uuid) {
        self.current = base;
    }

    pub fn mode(&self) -> GuidMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: GuidMode) {
        self.mode = mode;
    }
}

/// Adds the little-endian bytes of `hash` to the four least significant bytes
/// of `guid`. Each byte wraps on its own; there is no carry between them.
pub fn hash_guid_by_integer(guid: Uuid, hash: i32) -> Uuid {
    let mut bytes = guid.to_bytes_le();
    for (i, h) in hash.to_le_bytes().iter().enumerate() {
        let idx = ORDER_MAP[i];
        bytes[idx] = bytes[idx].wrapping_add(*h);
    }
    Uuid::from_bytes_le(bytes)
}

/// `guid + 1` in sequential-GUID byte order.
pub fn increment(guid: Uuid) -> Uuid {
    let mut bytes = guid.to_bytes_le();
    for idx in ORDER_MAP {
        bytes[idx] = bytes[idx].wrapping_add(1);
        if bytes[idx] != 0 {
            break;
        }
    }
    Uuid::from_bytes_le(bytes)
}

/// Platform independent 32-bit string hash over UTF-16 code units.
///
/// Two accumulators consume the text in interleaved pairs of code units. The
/// result must never change: every generated component GUID depends on it.
pub fn hash32(text: &str) -> i32 {
    let units: Vec<u16> = text.encode_utf16().collect();
    let unit = |i: usize| units.get(i).map_or(0, |u| i32::from(*u));
    let mix = |acc: i32, pair: i32| {
        (acc.wrapping_shl(5).wrapping_add(acc).wrapping_add(acc >> 27)) ^ pair
    };

    let mut num1 = HASH_SEED;
    let mut num2 = HASH_SEED;
    let mut ind = 0usize;
    while ind < units.len() {
        num1 = mix(num1, (unit(ind + 1) << 16) | unit(ind));
        ind += 2;
        if ind >= units.len() {
            break;
        }
        num2 = mix(num2, (unit(ind + 1) << 16) | unit(ind));
        ind += 2;
    }
    num1.wrapping_add(num2.wrapping_mul(HASH_MULTIPLIER))
}

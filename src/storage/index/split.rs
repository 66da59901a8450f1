//! Splitting wide keys into narrow components.
//!
//! Object ids and array indexes have value domains far larger than one
//! index set can usefully hold. Such a key is cut into `parts` components,
//! each indexed on its own. Splitting is injective, so a lookup that
//! intersects one partial-equality scan per component is exact.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{Result, TraceError};

/// Components of one split key.
pub type SplitParts = SmallVec<[u64; 4]>;

/// How a key is cut into components.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum SplitScheme {
    /// Consecutive `bits`-wide slices from the low end. Keys wider than
    /// `bits * parts` overflow.
    Mask {
        /// Width of each component.
        bits: u8,
        /// Number of components.
        parts: u8,
    },
    /// Bit `j` of the key goes to component `j % parts`. Spreads
    /// sequentially allocated ids over every component.
    Interleave {
        /// Number of components.
        parts: u8,
    },
}

impl Default for SplitScheme {
    fn default() -> Self {
        SplitScheme::Interleave { parts: 2 }
    }
}

impl SplitScheme {
    /// Number of components.
    pub fn parts(&self) -> usize {
        match *self {
            SplitScheme::Mask { parts, .. } | SplitScheme::Interleave { parts } => parts as usize,
        }
    }

    /// Checks the scheme can represent keys at all.
    pub fn validate(&self) -> Result<()> {
        match *self {
            SplitScheme::Mask { bits, parts } => {
                if bits == 0 || parts == 0 || u32::from(bits) * u32::from(parts) > 64 {
                    return Err(TraceError::Config(format!(
                        "mask split of {parts} x {bits} bits is invalid"
                    )));
                }
            }
            SplitScheme::Interleave { parts } => {
                if !(1..=64).contains(&parts) {
                    return Err(TraceError::Config(format!(
                        "interleave split into {parts} parts is invalid"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Cuts `key` into its components.
    pub fn split(&self, key: u64) -> Result<SplitParts> {
        match *self {
            SplitScheme::Mask { bits, parts } => {
                let mask = low_mask(bits);
                let mut rest = key;
                let mut out = SplitParts::new();
                for _ in 0..parts {
                    out.push(rest & mask);
                    rest = rest.checked_shr(u32::from(bits)).unwrap_or(0);
                }
                if rest != 0 {
                    return Err(TraceError::EncodingOverflow {
                        field: "split key",
                        value: key,
                        bits: bits.saturating_mul(parts),
                    });
                }
                Ok(out)
            }
            SplitScheme::Interleave { parts } => {
                let parts = u32::from(parts);
                let mut out: SplitParts = (0..parts).map(|_| 0).collect();
                for j in 0..64u32 {
                    if key & (1u64 << j) != 0 {
                        out[(j % parts) as usize] |= 1u64 << (j / parts);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Reassembles a key from its components.
    pub fn join(&self, parts: &[u64]) -> Result<u64> {
        if parts.len() != self.parts() {
            return Err(TraceError::Invalid("wrong number of key components"));
        }
        match *self {
            SplitScheme::Mask { bits, .. } => Ok(parts
                .iter()
                .enumerate()
                .fold(0u64, |acc, (i, part)| {
                    acc | part.checked_shl(u32::from(bits) * i as u32).unwrap_or(0)
                })),
            SplitScheme::Interleave { parts: n } => {
                let n = u32::from(n);
                let mut key = 0u64;
                for j in 0..64u32 {
                    if parts[(j % n) as usize] & (1u64 << (j / n)) != 0 {
                        key |= 1u64 << j;
                    }
                }
                Ok(key)
            }
        }
    }

    /// True when component `part` of `key` equals `partial`.
    pub fn matches(&self, part: usize, partial: u64, key: u64) -> Result<bool> {
        Ok(self.split(key)?.get(part).copied() == Some(partial))
    }
}

fn low_mask(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

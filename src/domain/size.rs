//! Storage Sizes
//!
//! `SizeValue` holds an exact byte count together with the block size used
//! to derive sector counts. Literals follow `<number><unit>` where the unit
//! is one of b, s/sec/secs, k, m, g, t, p, e, z (case-insensitive, optional
//! trailing `b`). A bare number is rejected.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Default logical block size in bytes
pub const DEFAULT_BLOCK_SIZE: u32 = 512;

// =============================================================================
// Size Unit
// =============================================================================

/// Unit magnitudes understood by size literals
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SizeUnit {
    Byte,
    Sector,
    Kilobyte,
    Megabyte,
    Gigabyte,
    Terabyte,
    Petabyte,
    Exabyte,
    Zettabyte,
}

impl SizeUnit {
    /// Compound units in ascending order, used for auto-selection
    const COMPOUND: [SizeUnit; 7] = [
        SizeUnit::Kilobyte,
        SizeUnit::Megabyte,
        SizeUnit::Gigabyte,
        SizeUnit::Terabyte,
        SizeUnit::Petabyte,
        SizeUnit::Exabyte,
        SizeUnit::Zettabyte,
    ];

    /// Bytes per unit for a given block size
    pub fn multiplier(self, block_size: u32) -> u128 {
        match self {
            SizeUnit::Byte => 1,
            SizeUnit::Sector => block_size as u128,
            SizeUnit::Kilobyte => 1 << 10,
            SizeUnit::Megabyte => 1 << 20,
            SizeUnit::Gigabyte => 1 << 30,
            SizeUnit::Terabyte => 1 << 40,
            SizeUnit::Petabyte => 1 << 50,
            SizeUnit::Exabyte => 1 << 60,
            SizeUnit::Zettabyte => 1 << 70,
        }
    }

    /// Whether values in this unit render with two decimals
    pub fn is_compound(self) -> bool {
        !matches!(self, SizeUnit::Byte | SizeUnit::Sector)
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        let unit = match suffix.to_ascii_lowercase().as_str() {
            "b" | "byte" | "bytes" => SizeUnit::Byte,
            "s" | "sec" | "secs" | "sector" | "sectors" => SizeUnit::Sector,
            "k" | "kb" => SizeUnit::Kilobyte,
            "m" | "mb" => SizeUnit::Megabyte,
            "g" | "gb" => SizeUnit::Gigabyte,
            "t" | "tb" => SizeUnit::Terabyte,
            "p" | "pb" => SizeUnit::Petabyte,
            "e" | "eb" => SizeUnit::Exabyte,
            "z" | "zb" => SizeUnit::Zettabyte,
            _ => return None,
        };
        Some(unit)
    }
}

impl std::fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeUnit::Byte => write!(f, "B"),
            SizeUnit::Sector => write!(f, "secs"),
            SizeUnit::Kilobyte => write!(f, "KB"),
            SizeUnit::Megabyte => write!(f, "MB"),
            SizeUnit::Gigabyte => write!(f, "GB"),
            SizeUnit::Terabyte => write!(f, "TB"),
            SizeUnit::Petabyte => write!(f, "PB"),
            SizeUnit::Exabyte => write!(f, "EB"),
            SizeUnit::Zettabyte => write!(f, "ZB"),
        }
    }
}

// =============================================================================
// Size Value
// =============================================================================

/// An exact storage size
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SizeValue {
    bytes: u128,
    block_size: u32,
}

impl SizeValue {
    /// Build a size from a byte count
    pub fn from_bytes(bytes: u128) -> Self {
        Self {
            bytes,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Build a size from a sector count
    pub fn from_sectors(sectors: u64, block_size: u32) -> Self {
        Self {
            bytes: sectors as u128 * block_size as u128,
            block_size,
        }
    }

    /// Parse a literal using the default block size
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_with_block_size(text, DEFAULT_BLOCK_SIZE)
    }

    /// Parse a literal; sector units are resolved with `block_size`
    pub fn parse_with_block_size(text: &str, block_size: u32) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::SizeParse("block size must be non-zero".into()));
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(Error::SizeParse("empty size string".into()));
        }

        let num_end = text
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
            .map(|(i, _)| i)
            .unwrap_or(text.len());

        let num_str = &text[..num_end];
        let unit_str = text[num_end..].trim();

        if num_str.is_empty() {
            return Err(Error::SizeParse(format!("missing number: {}", text)));
        }
        if unit_str.is_empty() {
            return Err(Error::SizeParse(format!("missing unit: {}", text)));
        }

        let unit = SizeUnit::from_suffix(unit_str)
            .ok_or_else(|| Error::SizeParse(format!("unknown unit: {}", unit_str)))?;

        let bytes = scale_decimal(num_str, unit.multiplier(block_size))?;
        Ok(Self { bytes, block_size })
    }

    /// Exact byte count
    pub fn bytes(&self) -> u128 {
        self.bytes
    }

    /// Byte count clamped to u64, as consumed by backends
    pub fn bytes_u64(&self) -> u64 {
        u64::try_from(self.bytes).unwrap_or(u64::MAX)
    }

    /// Block size used for sector conversions
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Same size, different block size
    pub fn with_block_size(self, block_size: u32) -> Self {
        Self {
            bytes: self.bytes,
            block_size: block_size.max(1),
        }
    }

    /// Whole sectors covered by this size (rounded down)
    pub fn sectors(&self) -> u64 {
        u64::try_from(self.bytes / self.block_size as u128).unwrap_or(u64::MAX)
    }

    /// Value expressed in `unit`
    pub fn value_in(&self, unit: SizeUnit) -> f64 {
        self.bytes as f64 / unit.multiplier(self.block_size) as f64
    }

    /// Render in the given unit; compound units use two decimals
    pub fn format(&self, unit: SizeUnit) -> String {
        if unit.is_compound() {
            format!("{:.2}{}", self.value_in(unit), unit)
        } else if unit == SizeUnit::Sector {
            format!("{}{}", self.sectors(), unit)
        } else {
            format!("{}{}", self.bytes, unit)
        }
    }

    /// Largest compound unit not exceeding the value, bytes otherwise
    pub fn best_unit(&self) -> SizeUnit {
        SizeUnit::COMPOUND
            .iter()
            .rev()
            .copied()
            .find(|u| self.bytes >= u.multiplier(self.block_size))
            .unwrap_or(SizeUnit::Byte)
    }

    /// Subtraction that refuses to go negative
    pub fn checked_sub(self, rhs: SizeValue) -> Option<SizeValue> {
        self.bytes.checked_sub(rhs.bytes).map(|bytes| SizeValue {
            bytes,
            block_size: self.block_size,
        })
    }
}

/// Multiply a decimal literal by `multiplier` without going through floats
fn scale_decimal(num_str: &str, multiplier: u128) -> Result<u128> {
    let (int_part, frac_part) = match num_str.split_once('.') {
        Some((i, f)) => (i, f),
        None => (num_str, ""),
    };

    if frac_part.contains('.') || (int_part.is_empty() && frac_part.is_empty()) {
        return Err(Error::SizeParse(format!("invalid number: {}", num_str)));
    }

    let overflow = || Error::SizeParse(format!("size out of range: {}", num_str));

    let int_val: u128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| Error::SizeParse(format!("invalid number: {}", num_str)))?
    };

    let mut bytes = int_val.checked_mul(multiplier).ok_or_else(overflow)?;

    if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::SizeParse(format!("invalid number: {}", num_str)));
    }

    if !frac_part.is_empty() {
        // Digits beyond what `multiplier` leaves room for are below one byte
        // and are truncated
        let mut digits = frac_part.len().min(38) as u32;
        while digits > 0 && 10u128.pow(digits).checked_mul(multiplier).is_none() {
            digits -= 1;
        }
        let frac_val: u128 = frac_part[..digits as usize]
            .parse()
            .map_err(|_| Error::SizeParse(format!("invalid number: {}", num_str)))?;
        let scale = 10u128.pow(digits);
        let frac_bytes = frac_val
            .checked_mul(multiplier)
            .map(|v| v / scale)
            .ok_or_else(overflow)?;
        bytes = bytes.checked_add(frac_bytes).ok_or_else(overflow)?;
    }

    Ok(bytes)
}

impl FromStr for SizeValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SizeValue::parse(s)
    }
}

impl TryFrom<String> for SizeValue {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        SizeValue::parse(&value)
    }
}

impl From<SizeValue> for String {
    fn from(value: SizeValue) -> Self {
        // Exact form so documents survive a save/load cycle unchanged
        format!("{}b", value.bytes)
    }
}

impl std::fmt::Display for SizeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format(self.best_unit()))
    }
}

impl PartialEq for SizeValue {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SizeValue {}

impl PartialOrd for SizeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SizeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Add for SizeValue {
    type Output = SizeValue;

    fn add(self, rhs: SizeValue) -> SizeValue {
        SizeValue {
            bytes: self.bytes.saturating_add(rhs.bytes),
            block_size: self.block_size,
        }
    }
}

impl Sub for SizeValue {
    type Output = SizeValue;

    fn sub(self, rhs: SizeValue) -> SizeValue {
        SizeValue {
            bytes: self.bytes.saturating_sub(rhs.bytes),
            block_size: self.block_size,
        }
    }
}

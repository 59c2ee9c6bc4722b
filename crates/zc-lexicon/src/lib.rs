#![forbid(unsafe_code)]
//! Size and cache-mode lexicon.
//!
//! Parses human-supplied block sizes (`256K`, `1G`, `0x8000`) and cache-mode
//! names, formats sizes back into their shortest exact unit, and owns the
//! block-size bounds rule shared by the superblock validator and the
//! formatting workflow.

use std::fmt;
use thiserror::Error;
use zc_types::{BLOCK_SIZE_GRANULARITY, CacheMode, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

// ── Block-size rule ─────────────────────────────────────────────────────────

/// One violated block-size constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSizeIssue {
    TooSmall,
    TooLarge,
    Misaligned,
}

impl fmt::Display for BlockSizeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TooSmall => "block size smaller than 32 KiB (32768 bytes)",
            Self::TooLarge => "block size larger than 1 GiB (1073741824 bytes)",
            Self::Misaligned => "block size not a multiple of 32 KiB (32768 bytes)",
        })
    }
}

/// Every constraint `block_size` violates, lazily, in rule order.
///
/// All three rules are evaluated independently, so `0` is reported only as
/// too small while `1 GiB + 1` is both too large and misaligned.
pub fn block_size_issues(block_size: u64) -> impl Iterator<Item = BlockSizeIssue> + Clone {
    [
        (block_size < MIN_BLOCK_SIZE).then_some(BlockSizeIssue::TooSmall),
        (block_size > MAX_BLOCK_SIZE).then_some(BlockSizeIssue::TooLarge),
        (block_size % BLOCK_SIZE_GRANULARITY != 0).then_some(BlockSizeIssue::Misaligned),
    ]
    .into_iter()
    .flatten()
}

#[must_use]
pub fn block_size_is_valid(block_size: u64) -> bool {
    block_size_issues(block_size).next().is_none()
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// Rejected user input. Every variant echoes the offending token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexiconError {
    #[error("invalid size: {input}")]
    Malformed { input: String },
    #[error("invalid size: {input}: negative size")]
    Negative { input: String },
    #[error("invalid size: {input}: size too large")]
    TooLarge { input: String },
    #[error("invalid block size: {input}: {issue}")]
    BlockSize {
        input: String,
        issue: BlockSizeIssue,
    },
    #[error("invalid cache mode: {input}")]
    UnknownCacheMode { input: String },
    #[error("invalid cache mode value: {code}")]
    UnknownCacheModeCode { code: u64 },
}

// ── Sizes ───────────────────────────────────────────────────────────────────

/// Parse a size token into bytes.
///
/// Grammar: optional whitespace, optional sign, a decimal or `0x`-prefixed
/// hexadecimal integer, then an optional single `K`/`M`/`G` suffix (any
/// case). Values must be strictly below `i64::MAX / unit` before the unit
/// is applied.
pub fn parse_size(input: &str) -> Result<u64, LexiconError> {
    let malformed = || LexiconError::Malformed {
        input: input.to_owned(),
    };

    let body = input.trim_start();
    let (negative, body) = match body.as_bytes().first() {
        Some(b'-') => (true, &body[1..]),
        Some(b'+') => (false, &body[1..]),
        _ => (false, body),
    };

    let (radix, body) = match body.get(..2) {
        Some("0x" | "0X") if body.len() > 2 => (16, &body[2..]),
        _ => (10, body),
    };

    let digits_end = body
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(body.len());
    if digits_end == 0 {
        return Err(malformed());
    }
    let (digits, suffix) = body.split_at(digits_end);
    let value = i64::from_str_radix(digits, radix).map_err(|_| malformed())?;

    if negative && value != 0 {
        return Err(LexiconError::Negative {
            input: input.to_owned(),
        });
    }

    let unit: i64 = match suffix {
        "" => 1,
        "k" | "K" => 1024,
        "m" | "M" => 1024 * 1024,
        "g" | "G" => 1024 * 1024 * 1024,
        _ => return Err(malformed()),
    };

    if value >= i64::MAX / unit {
        return Err(LexiconError::TooLarge {
            input: input.to_owned(),
        });
    }

    u64::try_from(value * unit).map_err(|_| malformed())
}

/// Parse a size token and require it to satisfy the block-size rule.
pub fn parse_block_size(input: &str) -> Result<u64, LexiconError> {
    let size = parse_size(input)?;
    match block_size_issues(size).next() {
        None => Ok(size),
        Some(issue) => Err(LexiconError::BlockSize {
            input: input.to_owned(),
            issue,
        }),
    }
}

/// Render `size` in the largest binary unit that divides it exactly.
///
/// Terse form: `256K`, `2G`, `1000`. Verbose form groups digits in threes:
/// `256 KiB`, `2 GiB`, `1,000 bytes`. Zero always renders in bytes.
#[must_use]
pub fn format_size(size: u64, verbose: bool) -> String {
    let units: [(u64, &str, &str); 3] = [(GIB, "G", "GiB"), (MIB, "M", "MiB"), (KIB, "K", "KiB")];

    if size != 0 {
        for (unit, short, long) in units {
            if size % unit == 0 {
                let n = size / unit;
                return if verbose {
                    format!("{} {long}", group_digits(n))
                } else {
                    format!("{n}{short}")
                };
            }
        }
    }

    if verbose {
        format!("{} bytes", group_digits(size))
    } else {
        size.to_string()
    }
}

fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    out
}

// ── Cache modes ─────────────────────────────────────────────────────────────

/// Case-insensitive lookup against the canonical cache-mode names.
pub fn parse_cache_mode(input: &str) -> Result<CacheMode, LexiconError> {
    CacheMode::ALL
        .into_iter()
        .find(|mode| mode.as_str().eq_ignore_ascii_case(input))
        .ok_or_else(|| LexiconError::UnknownCacheMode {
            input: input.to_owned(),
        })
}

/// Canonical name for an on-disk cache-mode value.
pub fn format_cache_mode(code: u64) -> Result<&'static str, LexiconError> {
    CacheMode::from_code(code)
        .map(CacheMode::as_str)
        .ok_or(LexiconError::UnknownCacheModeCode { code })
}

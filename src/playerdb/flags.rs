//! Alphabetic flag strings and the typed flag sets stored in player records.
//!
//! A flag set is written as one character per set bit: `a`..`z` for bits 0-25
//! and `A`..`Z` for bits 26-51. An empty set is written as `0`. Decoding is
//! order-independent and tolerates duplicates; an all-digit string is read as
//! the legacy numeric form.

use bitflags::bitflags;

use crate::playerdb::errors::FieldError;

/// Highest bit position representable in an alphabetic flag string.
pub const ALPHA_FLAG_BITS: u32 = 52;

/// Encode bits as the canonical (ascending) alphabetic flag string.
pub fn to_alpha(bits: u64) -> String {
    let mut out = String::new();
    for bit in 0..ALPHA_FLAG_BITS {
        if bits & (1u64 << bit) != 0 {
            let ch = if bit < 26 {
                (b'a' + bit as u8) as char
            } else {
                (b'A' + (bit - 26) as u8) as char
            };
            out.push(ch);
        }
    }
    if out.is_empty() {
        out.push('0');
    }
    out
}

/// Decode an alphabetic (or legacy numeric) flag string.
///
/// Unrecognized characters are skipped and reported; the recognized bits are
/// still returned so the caller can keep them.
pub fn from_alpha(text: &str) -> (u64, Option<FieldError>) {
    let text = text.trim();
    if text.is_empty() {
        return (0, None);
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return match text.parse::<u64>() {
            Ok(bits) => (bits, None),
            Err(_) => (0, Some(FieldError::BadFlags(text.to_string()))),
        };
    }

    let mut bits = 0u64;
    let mut bad = String::new();
    for ch in text.chars() {
        match ch {
            'a'..='z' => bits |= 1u64 << (ch as u8 - b'a'),
            'A'..='Z' => bits |= 1u64 << (26 + (ch as u8 - b'A')),
            _ => bad.push(ch),
        }
    }
    let err = (!bad.is_empty()).then(|| FieldError::BadFlags(bad));
    (bits, err)
}

bitflags! {
    /// Persistent player flags (`Player Flags:`).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct PlayerFlags: u64 {
        const APPROVED              = 1 << 0;
        const FROZEN                = 1 << 1;
        const MUTED                 = 1 << 2;
        const SITEOK                = 1 << 3;
        const INVSTART              = 1 << 4;
        /// Always resume at the stored loadroom, never re-detect it.
        const LOADROOM              = 1 << 5;
        const NOWIZLIST             = 1 << 6;
        const IPMASK                = 1 << 7;
        const DELETED               = 1 << 8;
        /// Runtime-only; never survives a load.
        const EXTRACTED             = 1 << 9;
        /// Runtime-only; never survives a load.
        const DONTSET               = 1 << 10;
        const NEEDS_NEWBIE_SETUP    = 1 << 11;
        /// Record was loaded from disk for an offline edit; preserve last-login info on save.
        const KEEP_LAST_LOGIN_INFO  = 1 << 12;
        const ADVENTURE_SUMMONED    = 1 << 13;
    }
}

bitflags! {
    /// Player preference toggles (`Preferences:`).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct PrefFlags: u64 {
        const BRIEF       = 1 << 0;
        const COMPACT     = 1 << 1;
        const AUTOEXITS   = 1 << 2;
        const HOLYLIGHT   = 1 << 3;
        const ROOMFLAGS   = 1 << 4;
        const NOHASSLE    = 1 << 5;
        const MORTLOG     = 1 << 6;
        const AUTOKILL    = 1 << 7;
        /// Return home after a long absence instead of resuming in place.
        const AUTORECALL  = 1 << 8;
        const NOSPAM      = 1 << 9;
        const SCREEN_READER = 1 << 10;
    }
}

bitflags! {
    /// Affect bits (`Affect Flags:` and per-affect bitvectors).
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct AffectFlags: u64 {
        const BLIND            = 1 << 0;
        const MAJESTY          = 1 << 1;
        const INFRAVISION      = 1 << 2;
        const SNEAK            = 1 << 3;
        const HIDE             = 1 << 4;
        const CHARM            = 1 << 5;
        const INVISIBLE        = 1 << 6;
        const IMMUNE_PHYSICAL  = 1 << 7;
        const NO_ATTACK        = 1 << 8;
        const STUNNED          = 1 << 9;
        const EARTHMELD        = 1 << 10;
        const MUMMIFY          = 1 << 11;
        const DEATHSHROUD      = 1 << 12;
        const FLY              = 1 << 13;
        const DISARM           = 1 << 14;
    }
}

impl PlayerFlags {
    pub fn to_alpha(self) -> String {
        to_alpha(self.bits())
    }

    pub fn from_alpha(text: &str) -> (Self, Option<FieldError>) {
        let (bits, err) = from_alpha(text);
        (Self::from_bits_retain(bits), err)
    }
}

impl PrefFlags {
    pub fn to_alpha(self) -> String {
        to_alpha(self.bits())
    }

    pub fn from_alpha(text: &str) -> (Self, Option<FieldError>) {
        let (bits, err) = from_alpha(text);
        (Self::from_bits_retain(bits), err)
    }
}

impl AffectFlags {
    pub fn to_alpha(self) -> String {
        to_alpha(self.bits())
    }

    pub fn from_alpha(text: &str) -> (Self, Option<FieldError>) {
        let (bits, err) = from_alpha(text);
        (Self::from_bits_retain(bits), err)
    }

    /// Concealment states under which a player loads reclined.
    pub fn concealment() -> Self {
        AffectFlags::EARTHMELD | AffectFlags::MUMMIFY | AffectFlags::DEATHSHROUD
    }
}

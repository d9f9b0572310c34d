//! Security identifier (SID) codec.
//!
//! Converts between the binary SID layout returned by directory attributes
//! such as `objectSid` and `tokenGroups`, and the textual `S-1-...` form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MembershipError;

/// Maximum number of sub-authorities a SID may carry.
pub const MAX_SUB_AUTHORITIES: usize = 15;

/// The only SID revision in use.
pub const SID_REVISION: u8 = 1;

const HEADER_LEN: usize = 8;
const MAX_AUTHORITY: u64 = (1 << 48) - 1;

/// A parsed security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Build a SID from its identifier authority and sub-authorities.
    pub fn new(authority: u64, sub_authorities: Vec<u32>) -> Result<Self, MembershipError> {
        if authority > MAX_AUTHORITY {
            return Err(MembershipError::conversion(format!(
                "identifier authority {authority} exceeds 48 bits"
            )));
        }
        if sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(MembershipError::conversion(format!(
                "SID has {} sub-authorities, at most {MAX_SUB_AUTHORITIES} allowed",
                sub_authorities.len()
            )));
        }
        Ok(Self {
            revision: SID_REVISION,
            authority,
            sub_authorities,
        })
    }

    /// Decode the binary layout: revision, sub-authority count, 6-byte
    /// big-endian authority, then little-endian 32-bit sub-authorities.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MembershipError> {
        if bytes.len() < HEADER_LEN {
            return Err(MembershipError::conversion(format!(
                "SID is {} bytes, header needs {HEADER_LEN}",
                bytes.len()
            )));
        }

        let revision = bytes[0];
        if revision != SID_REVISION {
            return Err(MembershipError::conversion(format!(
                "unsupported SID revision {revision}"
            )));
        }

        let count = usize::from(bytes[1]);
        if count > MAX_SUB_AUTHORITIES {
            return Err(MembershipError::conversion(format!(
                "SID declares {count} sub-authorities, at most {MAX_SUB_AUTHORITIES} allowed"
            )));
        }

        let expected = HEADER_LEN + count * 4;
        if bytes.len() != expected {
            return Err(MembershipError::conversion(format!(
                "SID with {count} sub-authorities must be {expected} bytes, got {}",
                bytes.len()
            )));
        }

        let authority = bytes[2..HEADER_LEN]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        let sub_authorities = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Encode into the binary layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.sub_authorities.len() * 4);
        bytes.push(self.revision);
        // Bounded by MAX_SUB_AUTHORITIES at construction.
        bytes.push(self.sub_authorities.len() as u8);
        bytes.extend_from_slice(&self.authority.to_be_bytes()[2..]);
        for sub in &self.sub_authorities {
            bytes.extend_from_slice(&sub.to_le_bytes());
        }
        bytes
    }

    /// The 48-bit identifier authority.
    #[must_use]
    pub fn authority(&self) -> u64 {
        self.authority
    }

    /// The sub-authorities, in order.
    #[must_use]
    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// The relative identifier (last sub-authority), if any.
    #[must_use]
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority >= 1 << 32 {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = MembershipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| MembershipError::conversion(format!("invalid SID '{s}': {reason}"));

        let mut parts = s.trim().split('-');

        match parts.next() {
            Some(prefix) if prefix.eq_ignore_ascii_case("s") => {}
            _ => return Err(invalid("missing 'S-' prefix")),
        }

        let revision = parts
            .next()
            .and_then(|r| r.parse::<u8>().ok())
            .ok_or_else(|| invalid("bad revision"))?;
        if revision != SID_REVISION {
            return Err(invalid("unsupported revision"));
        }

        let authority_text = parts.next().ok_or_else(|| invalid("missing authority"))?;
        let authority = match authority_text
            .strip_prefix("0x")
            .or_else(|| authority_text.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => authority_text.parse::<u64>(),
        }
        .map_err(|_| invalid("bad identifier authority"))?;

        let sub_authorities = parts
            .map(|p| {
                if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(invalid("bad sub-authority"));
                }
                p.parse::<u32>().map_err(|_| invalid("sub-authority out of range"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(authority, sub_authorities).map_err(|_| invalid("out of range"))
    }
}

/// Check whether a string is a well-formed SID in text form.
#[must_use]
pub fn is_sid(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed
        .get(..2)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("s-"))
        && trimmed.parse::<Sid>().is_ok()
}

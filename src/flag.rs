//! Module dedicated to message flags.
//!
//! Flags are carried in a compact, canonical letter form: sorted,
//! deduplicated, restricted to the recognized set `{D, F, R, S, T}`.
//! This is the form stored in Maildir filenames and in the syncstatus
//! table; IMAP system flags are mapped to and from it.

use std::collections::BTreeSet;
use std::fmt;

/// A single recognized message flag.
///
/// Variants are declared in letter order so that the derived `Ord`
/// matches the canonical string order.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Flag {
    /// `D`, IMAP `\Draft`.
    Draft,
    /// `F`, IMAP `\Flagged`.
    Flagged,
    /// `R`, IMAP `\Answered`.
    Answered,
    /// `S`, IMAP `\Seen`.
    Seen,
    /// `T`, IMAP `\Deleted`.
    Deleted,
}

impl Flag {
    pub fn letter(&self) -> char {
        match self {
            Flag::Draft => 'D',
            Flag::Flagged => 'F',
            Flag::Answered => 'R',
            Flag::Seen => 'S',
            Flag::Deleted => 'T',
        }
    }

    /// Parses a flag from its letter form. Unknown letters yield
    /// [`None`] and are dropped by the callers.
    pub fn from_letter(c: char) -> Option<Flag> {
        match c {
            'd' | 'D' => Some(Flag::Draft),
            'f' | 'F' => Some(Flag::Flagged),
            'r' | 'R' => Some(Flag::Answered),
            's' | 'S' => Some(Flag::Seen),
            't' | 'T' => Some(Flag::Deleted),
            _ => None,
        }
    }

    pub fn to_imap_query(&self) -> &'static str {
        match self {
            Flag::Draft => "\\Draft",
            Flag::Flagged => "\\Flagged",
            Flag::Answered => "\\Answered",
            Flag::Seen => "\\Seen",
            Flag::Deleted => "\\Deleted",
        }
    }
}

impl TryFrom<&imap::types::Flag<'_>> for Flag {
    type Error = ();

    fn try_from(flag: &imap::types::Flag<'_>) -> Result<Self, ()> {
        match flag {
            imap::types::Flag::Seen => Ok(Flag::Seen),
            imap::types::Flag::Answered => Ok(Flag::Answered),
            imap::types::Flag::Deleted => Ok(Flag::Deleted),
            imap::types::Flag::Draft => Ok(Flag::Draft),
            imap::types::Flag::Flagged => Ok(Flag::Flagged),
            _ => Err(()),
        }
    }
}

impl From<Flag> for imap::types::Flag<'static> {
    fn from(flag: Flag) -> Self {
        match flag {
            Flag::Seen => imap::types::Flag::Seen,
            Flag::Answered => imap::types::Flag::Answered,
            Flag::Deleted => imap::types::Flag::Deleted,
            Flag::Draft => imap::types::Flag::Draft,
            Flag::Flagged => imap::types::Flag::Flagged,
        }
    }
}

/// A canonical set of flags.
///
/// Backed by a [`BTreeSet`], so iteration and the string form are
/// always sorted and duplicate-free.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Flags(BTreeSet<Flag>);

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.0.contains(&flag)
    }

    pub fn insert(&mut self, flag: Flag) {
        self.0.insert(flag);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }

    /// Returns the canonical union of two flag sets.
    pub fn union(&self, other: &Flags) -> Flags {
        Flags(self.0.union(&other.0).copied().collect())
    }

    /// Returns the canonical difference `self \ other`.
    pub fn difference(&self, other: &Flags) -> Flags {
        Flags(self.0.difference(&other.0).copied().collect())
    }

    /// Renders the flags for an IMAP `FLAGS (…)` list.
    pub fn to_imap_query(&self) -> String {
        self.0.iter().fold(String::new(), |mut query, flag| {
            if !query.is_empty() {
                query.push(' ');
            }
            query.push_str(flag.to_imap_query());
            query
        })
    }

    pub fn to_imap_vec(&self) -> Vec<imap::types::Flag<'static>> {
        self.0.iter().copied().map(Into::into).collect()
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flag in &self.0 {
            write!(f, "{}", flag.letter())?;
        }
        Ok(())
    }
}

impl From<&str> for Flags {
    fn from(s: &str) -> Self {
        Flags(s.chars().filter_map(Flag::from_letter).collect())
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<I: IntoIterator<Item = Flag>>(iter: I) -> Self {
        Flags(iter.into_iter().collect())
    }
}

impl From<&[imap::types::Flag<'_>]> for Flags {
    fn from(flags: &[imap::types::Flag<'_>]) -> Self {
        Flags(flags.iter().filter_map(|f| Flag::try_from(f).ok()).collect())
    }
}

impl From<Vec<imap::types::Flag<'_>>> for Flags {
    fn from(flags: Vec<imap::types::Flag<'_>>) -> Self {
        Flags::from(flags.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_is_sorted_and_deduplicated() {
        assert_eq!(Flags::from("TSRS").to_string(), "RST");
        assert_eq!(Flags::from("").to_string(), "");
        assert_eq!(Flags::from("FDTRS").to_string(), "DFRST");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for s in ["", "S", "TDRS", "xyzST", "SSSS"] {
            let once = Flags::from(s).to_string();
            let twice = Flags::from(once.as_str()).to_string();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn unknown_letters_are_dropped() {
        assert_eq!(Flags::from("SaXbT").to_string(), "ST");
    }

    #[test]
    fn union_and_difference_stay_canonical() {
        let a = Flags::from("ST");
        let b = Flags::from("TD");
        assert_eq!(a.union(&b).to_string(), "DST");
        assert_eq!(a.difference(&b).to_string(), "S");
    }

    #[test]
    fn imap_round_trip() {
        let flags = Flags::from("RST");
        let imap_flags = flags.to_imap_vec();
        assert_eq!(Flags::from(imap_flags.as_slice()), flags);
    }

    #[test]
    fn unknown_imap_flags_are_dropped() {
        let imap_flags = vec![
            imap::types::Flag::Seen,
            imap::types::Flag::Recent,
            imap::types::Flag::Custom("$Forwarded".into()),
        ];
        assert_eq!(Flags::from(imap_flags.as_slice()).to_string(), "S");
    }

    #[test]
    fn imap_query_form() {
        assert_eq!(Flags::from("ST").to_imap_query(), "\\Seen \\Deleted");
        assert_eq!(Flags::new().to_imap_query(), "");
    }
}

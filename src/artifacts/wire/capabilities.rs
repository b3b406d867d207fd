//! Capability advertisement and negotiation
//!
//! The first non-flush packet of an advertisement carries a ref record
//! followed by a NUL and a space-delimited capability list. Later packets
//! carry refs only. Both peers end up operating on the intersection of
//! what they support.

use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::wire::ProtocolError;
use std::collections::BTreeSet;
use std::fmt;

/// Capabilities this implementation understands
pub const REPORT_STATUS: &str = "report-status";
pub const DELETE_REFS: &str = "delete-refs";
pub const NO_THIN: &str = "no-thin";
pub const OFS_DELTA: &str = "ofs-delta";

/// An advertised reference with its object id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefRecord {
    pub oid: ObjectId,
    pub name: String,
}

impl RefRecord {
    pub fn new(oid: ObjectId, name: impl Into<String>) -> Self {
        Self {
            oid,
            name: name.into(),
        }
    }
}

/// A set of protocol capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: BTreeSet<String>,
}

impl CapabilitySet {
    pub fn new(caps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        CapabilitySet {
            caps: caps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, cap: &str) -> bool {
        self.caps.contains(cap)
    }

    pub fn insert(&mut self, cap: impl Into<String>) {
        self.caps.insert(cap.into());
    }

    /// Capabilities both sides support
    pub fn intersect(&self, other: &CapabilitySet) -> CapabilitySet {
        CapabilitySet {
            caps: self.caps.intersection(&other.caps).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Parse a space-delimited capability list
    pub fn parse(text: &str) -> Self {
        CapabilitySet {
            caps: text
                .split_ascii_whitespace()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            self.caps.iter().cloned().collect::<Vec<_>>().join(" ")
        )
    }
}

/// Format the first advertisement packet: `<oid> <ref>\0<capabilities>`
pub fn format_advertisement(record: &RefRecord, caps: &CapabilitySet) -> String {
    format!("{} {}\0{}", record.oid, record.name, caps)
}

/// Parse the first advertisement packet
pub fn parse_advertisement(payload: &str) -> Result<(RefRecord, CapabilitySet), ProtocolError> {
    let (record, caps) = match payload.split_once('\0') {
        Some((record, caps)) => (record, CapabilitySet::parse(caps)),
        None => (payload, CapabilitySet::default()),
    };

    let (oid, name) = record
        .split_once(' ')
        .ok_or_else(|| ProtocolError::Malformed(payload.to_string()))?;
    let oid = ObjectId::try_parse(oid.to_string())
        .map_err(|err| ProtocolError::Malformed(err.to_string()))?;

    Ok((RefRecord::new(oid, name.trim()), caps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_advertisement_round_trip() {
        let record = RefRecord::new(
            ObjectId::try_parse("ab".repeat(20)).unwrap(),
            "refs/heads/main",
        );
        let caps = CapabilitySet::new([REPORT_STATUS, OFS_DELTA]);

        let wire = format_advertisement(&record, &caps);
        let (parsed_record, parsed_caps) = parse_advertisement(&wire).unwrap();

        assert_eq!(parsed_record, record);
        assert_eq!(parsed_caps, caps);
    }

    #[test]
    fn test_negotiation_is_an_intersection() {
        let ours = CapabilitySet::new([REPORT_STATUS, OFS_DELTA, DELETE_REFS]);
        let theirs = CapabilitySet::new([OFS_DELTA, NO_THIN]);

        let shared = ours.intersect(&theirs);

        assert!(shared.contains(OFS_DELTA));
        assert!(!shared.contains(REPORT_STATUS));
        assert!(!shared.contains(NO_THIN));
    }

    #[test]
    fn test_advertisement_without_capabilities() {
        let wire = format!("{} refs/heads/x", "cd".repeat(20));
        let (record, caps) = parse_advertisement(&wire).unwrap();

        assert_eq!(record.name, "refs/heads/x");
        assert!(caps.is_empty());
    }
}

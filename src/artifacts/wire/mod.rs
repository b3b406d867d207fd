//! Wire message semantics
//!
//! The message layer of the push/fetch protocols: pkt-line framing,
//! capability sets, refspecs, and the line forms exchanged during
//! negotiation. Transport (process spawning, stdio plumbing) lives outside
//! the core; these types only define what the bytes mean.

pub mod capabilities;
pub mod pkt_line;
pub mod refspec;

use crate::artifacts::branch::branch_name::SymRefName;
use crate::artifacts::objects::object_id::ObjectId;
use thiserror::Error;

/// A missing object in update lines is spelled as 40 zeros
pub const ZERO_OID: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("IO failure on wire: {0}")]
    Io(#[from] std::io::Error),
}

/// One `<old> <new> <ref>` line of a receive-pack request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub old_oid: Option<ObjectId>,
    pub new_oid: Option<ObjectId>,
    pub name: SymRefName,
}

impl RefUpdate {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.splitn(3, ' ');
        let (old, new, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(old), Some(new), Some(name)) => (old, new, name),
            _ => return Err(ProtocolError::Malformed(line.to_string())),
        };

        Ok(RefUpdate {
            old_oid: parse_optional_oid(old)?,
            new_oid: parse_optional_oid(new)?,
            name: SymRefName::new(name.to_string()),
        })
    }

    pub fn format(&self) -> String {
        format!(
            "{} {} {}",
            format_optional_oid(&self.old_oid),
            format_optional_oid(&self.new_oid),
            self.name
        )
    }

    /// Whether a pack must follow the update list
    pub fn pushes_objects(&self) -> bool {
        self.new_oid.is_some()
    }
}

fn parse_optional_oid(text: &str) -> Result<Option<ObjectId>, ProtocolError> {
    if text == ZERO_OID {
        return Ok(None);
    }
    ObjectId::try_parse(text.to_string())
        .map(Some)
        .map_err(|err| ProtocolError::Malformed(err.to_string()))
}

fn format_optional_oid(oid: &Option<ObjectId>) -> String {
    match oid {
        Some(oid) => oid.to_string(),
        None => ZERO_OID.to_string(),
    }
}

/// `want <oid>` / `have <oid>` lines of upload-pack negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationLine {
    Want(ObjectId),
    Have(ObjectId),
    Done,
}

impl NegotiationLine {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if line == "done" {
            return Ok(NegotiationLine::Done);
        }

        let (keyword, oid) = line
            .split_once(' ')
            .ok_or_else(|| ProtocolError::Malformed(line.to_string()))?;
        let oid = ObjectId::try_parse(oid.trim().to_string())
            .map_err(|err| ProtocolError::Malformed(err.to_string()))?;

        match keyword {
            "want" => Ok(NegotiationLine::Want(oid)),
            "have" => Ok(NegotiationLine::Have(oid)),
            _ => Err(ProtocolError::Malformed(line.to_string())),
        }
    }

    pub fn format(&self) -> String {
        match self {
            NegotiationLine::Want(oid) => format!("want {}", oid),
            NegotiationLine::Have(oid) => format!("have {}", oid),
            NegotiationLine::Done => "done".to_string(),
        }
    }
}

/// Per-ref status in a receive-pack report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportLine {
    UnpackOk,
    UnpackFailed(String),
    RefOk(String),
    RefFailed(String, String),
}

impl ReportLine {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        if line == "unpack ok" {
            return Ok(ReportLine::UnpackOk);
        }
        if let Some(error) = line.strip_prefix("unpack ") {
            return Ok(ReportLine::UnpackFailed(error.to_string()));
        }
        if let Some(name) = line.strip_prefix("ok ") {
            return Ok(ReportLine::RefOk(name.to_string()));
        }
        if let Some(rest) = line.strip_prefix("ng ") {
            let (name, reason) = rest.split_once(' ').unwrap_or((rest, ""));
            return Ok(ReportLine::RefFailed(name.to_string(), reason.to_string()));
        }

        Err(ProtocolError::Malformed(line.to_string()))
    }

    pub fn format(&self) -> String {
        match self {
            ReportLine::UnpackOk => "unpack ok".to_string(),
            ReportLine::UnpackFailed(error) => format!("unpack {}", error),
            ReportLine::RefOk(name) => format!("ok {}", name),
            ReportLine::RefFailed(name, reason) => format!("ng {} {}", name, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ref_update_round_trip() {
        let line = format!("{} {} refs/heads/main", "ab".repeat(20), "cd".repeat(20));
        let update = RefUpdate::parse(&line).unwrap();

        assert!(update.pushes_objects());
        assert_eq!(update.format(), line);
    }

    #[test]
    fn test_zero_oid_means_absent() {
        let line = format!("{} {} refs/heads/topic", ZERO_OID, "cd".repeat(20));
        let update = RefUpdate::parse(&line).unwrap();

        assert_eq!(update.old_oid, None);
        assert!(update.new_oid.is_some());
    }

    #[test]
    fn test_deletion_pushes_no_objects() {
        let line = format!("{} {} refs/heads/topic", "ab".repeat(20), ZERO_OID);
        let update = RefUpdate::parse(&line).unwrap();

        assert!(!update.pushes_objects());
    }

    #[test]
    fn test_negotiation_lines() {
        let oid = ObjectId::try_parse("ab".repeat(20)).unwrap();

        let want = NegotiationLine::parse(&format!("want {}", oid)).unwrap();
        assert_eq!(want, NegotiationLine::Want(oid.clone()));

        let have = NegotiationLine::parse(&format!("have {}", oid)).unwrap();
        assert_eq!(have, NegotiationLine::Have(oid));

        assert_eq!(
            NegotiationLine::parse("done").unwrap(),
            NegotiationLine::Done
        );
        assert!(NegotiationLine::parse("need abc").is_err());
    }

    #[test]
    fn test_report_lines() {
        assert_eq!(ReportLine::parse("unpack ok").unwrap(), ReportLine::UnpackOk);
        assert_eq!(
            ReportLine::parse("ng refs/heads/main non-fast-forward").unwrap(),
            ReportLine::RefFailed("refs/heads/main".to_string(), "non-fast-forward".to_string())
        );
        assert_eq!(
            ReportLine::parse("ok refs/heads/main").unwrap().format(),
            "ok refs/heads/main"
        );
    }
}

//! Revision expressions
//!
//! A revision identifies a commit by name, object ID or graph position:
//!
//! - Branch/ref names: `main`, `feature/new-feature`, `HEAD`
//! - Aliases: `@` (resolves to `HEAD`)
//! - Full or abbreviated OIDs (resolved as fallback if no such ref exists)
//! - Parent notation: `<revision>^`, `<revision>^<n>` (nth parent of a merge)
//! - Ancestor notation: `<revision>~<n>` (follows first parents)
//!
//! The grammar `expr := name | expr '^' n? | expr '~' n` is parsed by hand:
//! a leading name followed by a loop over suffix operators.

use crate::areas::repository::Repository;
use crate::artifacts::branch::REF_ALIASES;
use crate::artifacts::branch::branch_name::BranchName;
use crate::artifacts::objects::OBJECT_ID_LENGTH;
use crate::artifacts::objects::object_id::ObjectId;
use crate::artifacts::objects::object_type::ObjectType;

#[derive(Debug, Clone)]
pub enum Revision {
    /// A reference name, or an OID resolved during the resolution phase
    Ref(BranchName),
    /// The nth parent of a revision (e.g. `HEAD^`, `merge^2`)
    Parent(Box<Revision>, usize),
    /// The nth first-parent ancestor of a revision (e.g. `HEAD~3`)
    Ancestor(Box<Revision>, usize),
}

impl Revision {
    /// Parse a revision expression
    pub fn parse(expr: &str) -> anyhow::Result<Self> {
        let expr = REF_ALIASES
            .iter()
            .find(|(alias, _)| *alias == expr)
            .map(|(_, target)| *target)
            .unwrap_or(expr);

        let name_end = expr
            .find(['^', '~'])
            .unwrap_or(expr.len());
        let (name, mut rest) = expr.split_at(name_end);

        let mut revision = Revision::Ref(BranchName::try_parse(name.to_string())?);

        while !rest.is_empty() {
            let op = rest.as_bytes()[0];
            rest = &rest[1..];

            let digits_end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let (digits, tail) = rest.split_at(digits_end);
            rest = tail;

            revision = match op {
                b'^' => {
                    let n = if digits.is_empty() { 1 } else { digits.parse()? };
                    Revision::Parent(Box::new(revision), n)
                }
                b'~' => {
                    if digits.is_empty() {
                        anyhow::bail!("'~' must be followed by a number in a revision");
                    }
                    Revision::Ancestor(Box::new(revision), digits.parse()?)
                }
                _ => unreachable!(),
            };
        }

        Ok(revision)
    }

    /// Resolve the revision to a commit ID
    ///
    /// Returns `None` for a ref that exists but is unborn (e.g. `HEAD` in a
    /// fresh repository).
    pub fn resolve(&self, repository: &Repository) -> anyhow::Result<Option<ObjectId>> {
        match self {
            Revision::Ref(branch_name) => {
                let name_str = branch_name.as_ref();

                match repository.refs().read_ref(branch_name.clone()) {
                    Ok(Some(oid)) => Ok(Some(oid)),
                    Ok(None) => Ok(None),
                    Err(_) => {
                        // No such ref: fall back to OID resolution
                        if Self::looks_like_oid(name_str) {
                            Self::resolve_oid(name_str, repository).map(Some)
                        } else {
                            Err(anyhow::anyhow!("branch {} not found", name_str))
                        }
                    }
                }
            }
            Revision::Parent(base_revision, n) => {
                let oid = base_revision.resolve(repository)?;
                Self::resolve_commit_parent(oid, *n, repository)
            }
            Revision::Ancestor(base_revision, generations) => {
                let mut oid = base_revision.resolve(repository)?;
                for _ in 0..*generations {
                    oid = Self::resolve_commit_parent(oid, 1, repository)?;
                }

                Ok(oid)
            }
        }
    }

    fn looks_like_oid(name: &str) -> bool {
        (4..=OBJECT_ID_LENGTH).contains(&name.len())
            && name.chars().all(|c| c.is_ascii_hexdigit())
    }

    fn resolve_commit_parent(
        oid: Option<ObjectId>,
        n: usize,
        repository: &Repository,
    ) -> anyhow::Result<Option<ObjectId>> {
        let Some(oid) = oid else { return Ok(None) };

        let commit = repository
            .database()
            .parse_object_as_commit(&oid)?
            .ok_or_else(|| anyhow::anyhow!("object {} is not a commit", oid))?;

        Ok(commit.parents().get(n.saturating_sub(1)).cloned())
    }

    fn resolve_oid(oid_str: &str, repository: &Repository) -> anyhow::Result<ObjectId> {
        if oid_str.len() == OBJECT_ID_LENGTH {
            let oid = ObjectId::try_parse(oid_str.to_string())?;
            Self::validate_oid_is_commit(&oid, repository)?;
            return Ok(oid);
        }

        let matches = repository.database().prefix_match(oid_str)?;

        match matches.len() {
            0 => anyhow::bail!(
                "ambiguous argument '{}': unknown revision or path not in the working tree",
                oid_str
            ),
            1 => {
                let oid = matches[0].clone();
                Self::validate_oid_is_commit(&oid, repository)?;
                Ok(oid)
            }
            _ => anyhow::bail!(
                "short object ID {} is ambiguous ({} candidates)",
                oid_str,
                matches.len()
            ),
        }
    }

    fn validate_oid_is_commit(oid: &ObjectId, repository: &Repository) -> anyhow::Result<()> {
        let (object_type, _) = repository.database().load_info(oid)?;
        if object_type != ObjectType::Commit {
            anyhow::bail!("object {} is a {}, not a commit", oid, object_type);
        }

        Ok(())
    }
}

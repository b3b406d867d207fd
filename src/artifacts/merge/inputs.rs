//! The two sides of a merge
//!
//! Resolves the left (HEAD) and right (incoming) revisions and computes
//! their merge base set. The base list is ordered oldest first; when a
//! criss-cross history yields several independent bases the first (oldest)
//! is used as *the* base.

use crate::areas::repository::Repository;
use crate::artifacts::branch::revision::Revision;
use crate::artifacts::merge::common_ancestors::Bases;
use crate::artifacts::objects::object_id::ObjectId;

#[derive(Debug, Clone)]
pub struct Inputs {
    pub left_name: String,
    pub right_name: String,
    pub left_oid: ObjectId,
    pub right_oid: ObjectId,
    pub base_oids: Vec<ObjectId>,
}

impl Inputs {
    pub fn new(
        repository: &Repository,
        left_name: String,
        right_name: String,
    ) -> anyhow::Result<Self> {
        let left_oid = Self::resolve_rev(repository, &left_name)?;
        let right_oid = Self::resolve_rev(repository, &right_name)?;

        let base_oids = Bases::find(repository.database(), &left_oid, &right_oid)?;

        Ok(Inputs {
            left_name,
            right_name,
            left_oid,
            right_oid,
            base_oids,
        })
    }

    /// The incoming side is already an ancestor of HEAD: nothing to do
    pub fn already_merged(&self) -> bool {
        self.base_oids == [self.right_oid.clone()]
    }

    /// HEAD is the base: the merge degenerates to moving HEAD forward
    pub fn is_fast_forward(&self) -> bool {
        self.base_oids == [self.left_oid.clone()]
    }

    /// The base commit used for the three-way diff, if any
    pub fn base_oid(&self) -> Option<&ObjectId> {
        self.base_oids.first()
    }

    fn resolve_rev(repository: &Repository, rev: &str) -> anyhow::Result<ObjectId> {
        Revision::parse(rev)?
            .resolve(repository)?
            .ok_or_else(|| anyhow::anyhow!("merge: {} - not something we can merge", rev))
    }
}

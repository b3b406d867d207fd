//! Checkout conflict classification and messages

/// Ways a planned migration can collide with local state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictType {
    /// Working directory file differs from index and both trees
    StaleFile,
    /// A directory stands where a file must go
    StaleDirectory,
    /// Checkout would overwrite an untracked file
    UntrackedOverwritten,
    /// Checkout would remove an untracked file
    UntrackedRemoved,
}

/// Header/footer pair wrapped around the offending path list
pub struct ConflictMessage {
    pub header: &'static str,
    pub footer: &'static str,
}

impl ConflictType {
    /// Classify a conflict from what occupies the path
    pub fn get_conflict_type(
        stat_is_directory: Option<bool>,
        has_entry: bool,
        has_new_item: bool,
    ) -> Self {
        if has_entry {
            ConflictType::StaleFile
        } else if stat_is_directory == Some(true) {
            ConflictType::StaleDirectory
        } else if has_new_item {
            ConflictType::UntrackedOverwritten
        } else {
            ConflictType::UntrackedRemoved
        }
    }
}

impl From<&ConflictType> for ConflictMessage {
    fn from(conflict_type: &ConflictType) -> Self {
        match conflict_type {
            ConflictType::StaleFile => ConflictMessage {
                header: "Your local changes to the following files would be overwritten by checkout:",
                footer: "Please commit your changes or stash them before you switch branches.",
            },
            ConflictType::StaleDirectory => ConflictMessage {
                header: "Updating the following directories would lose untracked files in them:",
                footer: "\n",
            },
            ConflictType::UntrackedOverwritten => ConflictMessage {
                header: "The following untracked working tree files would be overwritten by checkout:",
                footer: "Please move or remove them before you switch branches.",
            },
            ConflictType::UntrackedRemoved => ConflictMessage {
                header: "The following untracked working tree files would be removed by checkout:",
                footer: "Please move or remove them before you switch branches.",
            },
        }
    }
}

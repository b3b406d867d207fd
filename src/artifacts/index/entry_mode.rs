//! File modes recorded in tree entries and the index
//!
//! Only three modes are meaningful to the core: regular files (0100644),
//! executable files (0100755) and subtrees (040000).

use std::fmt;

/// Mode of a regular file entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileMode {
    #[default]
    Regular,
    Executable,
}

/// Mode of a tree or index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryMode {
    File(FileMode),
    Directory,
}

/// Octal value of the regular-file mode
pub const REGULAR_MODE: u32 = 0o100644;
/// Octal value of the executable-file mode
pub const EXECUTABLE_MODE: u32 = 0o100755;
/// Octal value of the subtree mode
pub const DIRECTORY_MODE: u32 = 0o40000;

impl Default for EntryMode {
    fn default() -> Self {
        EntryMode::File(FileMode::Regular)
    }
}

impl EntryMode {
    pub fn as_u32(&self) -> u32 {
        match self {
            EntryMode::File(FileMode::Regular) => REGULAR_MODE,
            EntryMode::File(FileMode::Executable) => EXECUTABLE_MODE,
            EntryMode::Directory => DIRECTORY_MODE,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntryMode::File(FileMode::Regular) => "100644",
            EntryMode::File(FileMode::Executable) => "100755",
            EntryMode::Directory => "040000",
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, EntryMode::Directory)
    }

    /// Parse a mode from the octal string used in tree entries
    pub fn from_octal_str(mode_str: &str) -> anyhow::Result<Self> {
        let mode = u32::from_str_radix(mode_str, 8)
            .map_err(|_| anyhow::anyhow!("Invalid entry mode: {}", mode_str))?;
        mode.try_into()
    }
}

impl TryFrom<u32> for EntryMode {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> anyhow::Result<Self> {
        match value {
            REGULAR_MODE => Ok(EntryMode::File(FileMode::Regular)),
            EXECUTABLE_MODE => Ok(EntryMode::File(FileMode::Executable)),
            DIRECTORY_MODE => Ok(EntryMode::Directory),
            _ => Err(anyhow::anyhow!("Unknown entry mode {:o}", value)),
        }
    }
}

impl From<EntryMode> for u32 {
    fn from(mode: EntryMode) -> u32 {
        mode.as_u32()
    }
}

impl fmt::Display for EntryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

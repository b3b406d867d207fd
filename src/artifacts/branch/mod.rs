pub mod branch_name;
pub mod revision;

/// Aliases accepted in revision expressions
pub const REF_ALIASES: [(&str, &str); 1] = [("@", "HEAD")];

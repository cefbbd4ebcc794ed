mod commits;
mod compare;
mod versions;

pub use commits::{
    Commit, CommitGraph, CommitGraphError, CommitHash, CommitKind, Variant, VariantStatus,
};
pub use compare::{diff_code, diff_commits};
pub use versions::{ImageSession, VersionEntry, VersionHistory, VersionKind};

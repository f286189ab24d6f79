//! Share a local shell over SSH with whoever holds a key published on a
//! GitHub account.

pub mod share;

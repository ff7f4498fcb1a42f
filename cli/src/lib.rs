//! Tagbag CLI - deduplicated container image tarballs.

pub mod commands;
pub mod output;

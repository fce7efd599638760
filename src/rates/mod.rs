//! Where rate tables come from, and which one is currently in effect.

pub mod book;
pub mod provider;

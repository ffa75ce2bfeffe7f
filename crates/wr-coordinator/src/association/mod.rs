//! Client-to-site association cache

mod cache;

pub use cache::{AssociationCache, AssociationChange};

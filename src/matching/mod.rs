//! Matching — profile aggregation and compatibility ranking.

pub mod profile;
pub mod ranker;

pub use profile::{Profile, aggregate, build_profile};
pub use ranker::{RankedMatch, rank_top, score};

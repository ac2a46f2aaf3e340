pub mod engine;

pub use engine::{compute_ranks, rank_entries};

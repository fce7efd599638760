pub mod aggregator;
pub mod solver;

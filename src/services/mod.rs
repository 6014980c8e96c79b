pub mod aggregation;
pub mod recommendation;
pub mod training;

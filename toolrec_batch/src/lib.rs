pub mod als;
pub mod batch;
pub mod loader;
pub mod matrix;
pub mod publisher;
pub mod rankers;
pub mod ranking;
pub mod recommender;
pub mod scorers;
pub mod source;

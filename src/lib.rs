pub mod config;
pub mod control;
pub mod fuzzy;
pub mod lidar;
pub mod node;
pub mod rules;

pub use config::FollowerParams;
pub use node::FuzzyFollower;

pub mod endpoint;
pub mod message;
pub mod topic;
pub mod unit;

pub mod job;
pub mod link;

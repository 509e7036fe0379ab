pub mod compliance;
pub mod document;
pub mod job;
pub mod source;

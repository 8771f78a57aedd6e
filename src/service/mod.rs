pub mod batch;
pub mod mapper;
pub mod retention;
pub mod rollover;

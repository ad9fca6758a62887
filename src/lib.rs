pub mod archive;
pub mod config;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod report;

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod observation;
pub mod pipeline;
pub mod publish;
pub mod scoring;
pub mod store;

#[cfg(test)]
pub mod test_support;

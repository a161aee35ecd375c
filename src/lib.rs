pub mod config;
pub mod distribution;
pub mod index;
pub mod logging;
pub mod lsp;
pub mod metrics;
pub mod parsers;

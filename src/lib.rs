#![forbid(unsafe_code)]

pub mod archive;
pub mod archive_store;
pub mod chapter;
pub mod cli;
pub mod commands;
pub mod config;
pub mod fetch;
pub mod formats;
pub mod image_format;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod scratch;
pub mod sites;

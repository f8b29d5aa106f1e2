pub mod config;
pub mod convert;
pub mod detect;
pub mod domain;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod mds;
pub mod output;
pub mod pipeline;
pub mod place;
pub mod progress;
pub mod redcap;

pub mod activity_store;
pub mod app;
pub mod backfill;
pub mod cache;
pub mod cascade;
pub mod config;
pub mod decode;
pub mod domain;
pub mod error;
pub mod fit;
pub mod http;
pub mod moving_time;
pub mod normalize;
pub mod output;
pub mod payload;
pub mod retry;
pub mod sensor_log;
pub mod stats;
pub mod streams;
pub mod upstream;
pub mod weather;
pub mod writer;

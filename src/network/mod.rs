//! Network ingest for pushed PCM streams

pub mod ingest;

pub use ingest::TcpIngest;

// Clippy allows for the whole crate
#![allow(clippy::too_many_arguments)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::type_complexity)]

//! Transferase: a networked engine for aggregated DNA methylation statistics
//! over whole-genome bisulfite-sequenced methylomes.
//!
//! A server holds genome indexes and per-sample methylome data resident in
//! bounded, single-flight caches, and answers requests for weighted mean
//! methylation levels aggregated over arbitrary intervals, fixed-size bins,
//! or sliding windows. A client composes one of those three request shapes,
//! sends it over a plain TCP connection, and reads back a grid of level
//! elements shaped `n_regions x n_methylomes`.
//!
//! # Example
//!
//! ```rust,no_run
//! use transferase::bins_client::BinsClient;
//! use transferase::level_element::LevelElement;
//!
//! # async fn run() -> Result<(), transferase::error::ClientError> {
//! let mut client = BinsClient::<LevelElement>::bins(0x1234, 1000, vec!["SRX012345".to_string()]);
//! client.run("localhost", 5009).await?;
//! let levels = client.take_levels();
//! assert_eq!(levels.n_cols(), 1);
//! # Ok(())
//! # }
//! ```

pub mod bins_client;
pub mod client_connection;
pub mod config;
pub mod connection;
pub mod download;
pub mod error;
pub mod genome_index;
pub mod genome_index_set;
pub mod interval;
pub mod intervals_client;
pub mod level_element;
pub mod logging;
pub mod lru_tracker;
pub mod methylome;
pub mod methylome_data;
pub mod methylome_set;
pub mod parallel;
pub mod query;
pub mod request;
pub mod request_handler;
pub mod response;
pub mod server;

// Re-export commonly used types.
pub use bins_client::BinsClient;
pub use error::{ClientError, ServerError};
pub use genome_index::GenomeIndex;
pub use interval::GenomicInterval;
pub use intervals_client::IntervalsClient;
pub use level_element::{CoveredLevelElement, LevelContainerMD, LevelElement};
pub use methylome::Methylome;
pub use query::QueryContainer;
pub use request::{Request, RequestType};
pub use response::ResponseHeader;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::bins_client::BinsClient;
    pub use crate::client_connection::ClientWatchdog;
    pub use crate::error::{ClientError, ServerError};
    pub use crate::genome_index::GenomeIndex;
    pub use crate::interval::GenomicInterval;
    pub use crate::intervals_client::IntervalsClient;
    pub use crate::level_element::{CoveredLevelElement, LevelContainerMD, LevelElement};
    pub use crate::methylome::Methylome;
    pub use crate::query::QueryContainer;
    pub use crate::request::{Request, RequestType};
    pub use crate::response::ResponseHeader;
}

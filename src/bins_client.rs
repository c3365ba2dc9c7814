//! Concrete client for bins and windows requests (§4.6): compose a request,
//! send it, read back a header and a grid of level elements shaped
//! `n_bins x n_methylomes` (or `n_windows x n_methylomes`).

use crate::client_connection::{ClientConnection, ClientWatchdog};
use crate::error::{ClientError, ClientResult};
use crate::level_element::{CoveredLevelElement, LevelContainerMD, LevelElement};
use crate::request::Request;

enum Aggregation {
    Bins { bin_size: u32 },
    Windows { window_size: u32, window_step: u32 },
}

/// Builds and drives one bins/windows request over its own connection.
/// `E` is `LevelElement` or `CoveredLevelElement`, selecting the covered
/// variant of the request (§3 "LevelElement variants").
pub struct BinsClient<E> {
    index_hash: u64,
    methylome_names: Vec<String>,
    aggregation: Aggregation,
    watchdog: ClientWatchdog,
    levels: Option<LevelContainerMD<E>>,
}

impl<E> BinsClient<E> {
    #[must_use]
    pub fn bins(index_hash: u64, bin_size: u32, methylome_names: Vec<String>) -> Self {
        Self {
            index_hash,
            methylome_names,
            aggregation: Aggregation::Bins { bin_size },
            watchdog: ClientWatchdog::default(),
            levels: None,
        }
    }

    #[must_use]
    pub fn windows(index_hash: u64, window_size: u32, window_step: u32, methylome_names: Vec<String>) -> Self {
        Self {
            index_hash,
            methylome_names,
            aggregation: Aggregation::Windows { window_size, window_step },
            watchdog: ClientWatchdog::default(),
            levels: None,
        }
    }

    #[must_use]
    pub fn with_watchdog(mut self, watchdog: ClientWatchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Take the computed grid out of this client. Panics if called before a
    /// successful [`Self::run`], mirroring the original's "results only
    /// valid after `run` succeeds" contract.
    pub fn take_levels(&mut self) -> LevelContainerMD<E> {
        self.levels.take().expect("take_levels called before a successful run")
    }

    fn request(&self, covered: bool) -> Request {
        match self.aggregation {
            Aggregation::Bins { bin_size } => {
                Request::new_bins(covered, self.index_hash, bin_size, self.methylome_names.clone())
            }
            Aggregation::Windows { window_size, window_step } => {
                Request::new_windows(covered, self.index_hash, window_size, window_step, self.methylome_names.clone())
            }
        }
    }
}

impl BinsClient<LevelElement> {
    pub async fn run(&mut self, host: &str, port: u16) -> ClientResult<()> {
        let mut conn = ClientConnection::connect(host, port, self.watchdog).await?;
        let request = self.request(false);
        conn.write_request(&request).await?;
        let header = conn.read_response_header().await?;
        if !header.status.is_ok() {
            return Err(ClientError::ServerStatus(header.status));
        }
        let body = conn.read_body(header.n_bytes as usize).await?;
        let mut cursor = &body[..];
        let grid = LevelContainerMD::<LevelElement>::read_wire(&mut cursor, header.rows as usize, header.cols as usize)
            .map_err(ClientError::Io)?;
        conn.close().await;
        self.levels = Some(grid);
        Ok(())
    }
}

impl BinsClient<CoveredLevelElement> {
    pub async fn run(&mut self, host: &str, port: u16) -> ClientResult<()> {
        let mut conn = ClientConnection::connect(host, port, self.watchdog).await?;
        let request = self.request(true);
        conn.write_request(&request).await?;
        let header = conn.read_response_header().await?;
        if !header.status.is_ok() {
            return Err(ClientError::ServerStatus(header.status));
        }
        let body = conn.read_body(header.n_bytes as usize).await?;
        let mut cursor = &body[..];
        let grid =
            LevelContainerMD::<CoveredLevelElement>::read_wire(&mut cursor, header.rows as usize, header.cols as usize)
                .map_err(ClientError::Io)?;
        conn.close().await;
        self.levels = Some(grid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use crate::connection::{handle_connection, WatchdogConfig};
    use crate::genome_index::GenomeIndex;
    use crate::methylome::Methylome;
    use crate::methylome_data::MethylomeData;
    use crate::request::limits;
    use crate::request_handler::RequestHandler;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[serial]
    #[tokio::test]
    async fn test_bins_client_round_trip() {
        limits::reset_to_defaults();
        let index_dir = tempfile::tempdir().unwrap();
        let methylome_dir = tempfile::tempdir().unwrap();
        let index = GenomeIndex::new("toy", vec!["chr1".to_string()], vec![1000], vec![vec![10, 50, 100, 900]]);
        index.write(index_dir.path(), "toy").unwrap();
        let data = MethylomeData::new(vec![(5, 5), (0, 0), (10, 0), (1, 9)]);
        let m = Methylome::build(data, &index, false, "t");
        m.write(methylome_dir.path(), "SRX1").unwrap();

        let handler = Arc::new(RequestHandler::new(index_dir.path(), methylome_dir.path(), 8, 8));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(socket, &handler, WatchdogConfig::default()).await.unwrap()
        });

        let mut client = BinsClient::<LevelElement>::bins(index.hash, 500, vec!["SRX1".to_string()]);
        client.run(&addr.ip().to_string(), addr.port()).await.unwrap();
        let levels = client.take_levels();
        assert_eq!(levels.n_cols(), 1);
        assert_eq!(levels.n_rows() as u32, index.n_bins(500));
    }

    #[serial]
    #[tokio::test]
    async fn test_bins_client_surfaces_server_error() {
        limits::reset_to_defaults();
        let index_dir = tempfile::tempdir().unwrap();
        let methylome_dir = tempfile::tempdir().unwrap();
        let index = GenomeIndex::new("toy", vec!["chr1".to_string()], vec![1000], vec![vec![10, 50]]);
        index.write(index_dir.path(), "toy").unwrap();

        let handler = Arc::new(RequestHandler::new(index_dir.path(), methylome_dir.path(), 8, 8));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(socket, &handler, WatchdogConfig::default()).await.unwrap()
        });

        let mut client = BinsClient::<LevelElement>::bins(index.hash, 500, vec!["nope".to_string()]);
        let err = client.run(&addr.ip().to_string(), addr.port()).await.unwrap_err();
        assert!(matches!(err, ClientError::ServerStatus(crate::error::ServerError::MethylomeNotFound)));
    }
}

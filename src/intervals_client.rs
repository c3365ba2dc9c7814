//! Concrete client for interval-list requests (§4.6): compose a request
//! carrying `n_intervals`, stream the raw query payload immediately after
//! the request header, then read back a header and a grid of level
//! elements shaped `n_intervals x n_methylomes`.

use crate::client_connection::{ClientConnection, ClientWatchdog};
use crate::error::{ClientError, ClientResult};
use crate::level_element::{CoveredLevelElement, LevelContainerMD, LevelElement};
use crate::query::QueryContainer;
use crate::request::Request;

/// Builds and drives one intervals request over its own connection. `E` is
/// `LevelElement` or `CoveredLevelElement`, selecting the covered variant.
pub struct IntervalsClient<E> {
    index_hash: u64,
    methylome_names: Vec<String>,
    query: QueryContainer,
    watchdog: ClientWatchdog,
    levels: Option<LevelContainerMD<E>>,
}

impl<E> IntervalsClient<E> {
    #[must_use]
    pub fn new(index_hash: u64, query: QueryContainer, methylome_names: Vec<String>) -> Self {
        Self {
            index_hash,
            methylome_names,
            query,
            watchdog: ClientWatchdog::default(),
            levels: None,
        }
    }

    #[must_use]
    pub fn with_watchdog(mut self, watchdog: ClientWatchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn take_levels(&mut self) -> LevelContainerMD<E> {
        self.levels.take().expect("take_levels called before a successful run")
    }

    fn request(&self, covered: bool) -> Request {
        Request::new_intervals(covered, self.index_hash, self.query.len() as u32, self.methylome_names.clone())
    }
}

impl IntervalsClient<LevelElement> {
    pub async fn run(&mut self, host: &str, port: u16) -> ClientResult<()> {
        let mut conn = ClientConnection::connect(host, port, self.watchdog).await?;
        let request = self.request(false);
        conn.write_request(&request).await?;
        let mut query_buf = Vec::with_capacity(self.query.wire_len());
        self.query.write_wire(&mut query_buf).map_err(ClientError::Io)?;
        conn.write_query_bytes(&query_buf).await?;

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

impl IntervalsClient<CoveredLevelElement> {
    pub async fn run(&mut self, host: &str, port: u16) -> ClientResult<()> {
        let mut conn = ClientConnection::connect(host, port, self.watchdog).await?;
        let request = self.request(true);
        conn.write_request(&request).await?;
        let mut query_buf = Vec::with_capacity(self.query.wire_len());
        self.query.write_wire(&mut query_buf).map_err(ClientError::Io)?;
        conn.write_query_bytes(&query_buf).await?;

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
    async fn test_intervals_client_round_trip() {
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

        let query = QueryContainer::from_ranges(vec![(0, 2), (2, 4)]);
        let mut client = IntervalsClient::<LevelElement>::new(index.hash, query, vec!["SRX1".to_string()]);
        client.run(&addr.ip().to_string(), addr.port()).await.unwrap();
        let levels = client.take_levels();
        assert_eq!(levels.n_rows(), 2);
        assert_eq!(levels.n_cols(), 1);
    }
}

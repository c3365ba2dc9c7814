//! Per-connection state machine run by the server for each accepted socket
//! (§4.5 "Per-connection state machine"): `read_request` → `parse_request_header`
//! → (`read_query` for intervals) → `compute` → `respond_with_header` →
//! `respond_with_levels` → `stop`, with a watchdog racing every step.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{RequestError, ServerError};
use crate::genome_index::GenomeIndex;
use crate::methylome::Methylome;
use crate::query::QueryContainer;
use crate::request::{Request, REQUEST_BUFFER_SIZE};
use crate::request_handler::{compute_levels, compute_levels_from_query, ComputedLevels, RequestHandler};
use crate::response::{ResponseHeader, RESPONSE_HEADER_BUFFER_SIZE};

/// Running per-connection transfer counters (§3), updated after every
/// non-zero-length read or write.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferStats {
    pub n_transfers: u64,
    pub bytes_total: u64,
    pub min_transfer_size: u64,
    pub max_transfer_size: u64,
}

impl TransferStats {
    fn record(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let n = n as u64;
        self.n_transfers += 1;
        self.bytes_total += n;
        self.min_transfer_size = if self.n_transfers == 1 { n } else { self.min_transfer_size.min(n) };
        self.max_transfer_size = self.max_transfer_size.max(n);
    }
}

enum ConnectionState {
    ReadRequest,
    ParseRequestHeader { buf: Vec<u8> },
    /// §4.5 `handle_request`: validate the request and resolve its index
    /// and methylomes before any query payload is read off the wire, so
    /// that `ReadQuery`'s allocation is always bounded by `max_intervals`
    /// rather than by a not-yet-validated wire `n_intervals`.
    Resolve { request: Request },
    ReadQuery { request: Request, index: Arc<GenomeIndex>, methylomes: Vec<Arc<Methylome>> },
    Compute {
        request: Request,
        index: Arc<GenomeIndex>,
        methylomes: Vec<Arc<Methylome>>,
        query: Option<QueryContainer>,
    },
    RespondWithHeader { header: ResponseHeader, levels: Option<ComputedLevels> },
    RespondWithLevels { levels: ComputedLevels },
    Error(ServerError),
    Stop,
}

/// Watchdog deadlines bracketing a connection's lifetime (§4.5 "Watchdog").
#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub comm_timeout: Duration,
    pub work_timeout: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            comm_timeout: Duration::from_secs(30),
            work_timeout: Duration::from_secs(60),
        }
    }
}

/// Drive one connection to completion. Never returns an `Err` for protocol
/// or application-level failures — those are reported to the client as a
/// response header with the matching status and recorded in the returned
/// stats; an `Err` here means the socket itself became unusable.
pub async fn handle_connection(
    mut socket: TcpStream,
    handler: &RequestHandler,
    watchdog: WatchdogConfig,
) -> std::io::Result<TransferStats> {
    let mut stats = TransferStats::default();
    let mut state = ConnectionState::ReadRequest;

    loop {
        state = match state {
            ConnectionState::ReadRequest => match read_request(&mut socket, &mut stats, watchdog).await {
                Ok(buf) => ConnectionState::ParseRequestHeader { buf },
                Err(_) => ConnectionState::Stop,
            },
            ConnectionState::ParseRequestHeader { buf } => match Request::parse(&buf) {
                Ok(request) => ConnectionState::Resolve { request },
                Err(e) => ConnectionState::Error(request_error_status(e)),
            },
            ConnectionState::Resolve { request } => {
                let result = timeout(watchdog.work_timeout, handler.validate_and_resolve(&request)).await;
                match result {
                    Ok(Ok((index, methylomes))) if request.request_type.is_intervals() => {
                        ConnectionState::ReadQuery { request, index, methylomes }
                    }
                    Ok(Ok((index, methylomes))) => ConnectionState::Compute { request, index, methylomes, query: None },
                    Ok(Err(status)) => ConnectionState::Error(status),
                    Err(_) => ConnectionState::Error(ServerError::ConnectionTimeout),
                }
            }
            ConnectionState::ReadQuery { request, index, methylomes } => {
                match read_query(&mut socket, request.n_intervals(), &mut stats, watchdog).await {
                    Ok(query) => ConnectionState::Compute { request, index, methylomes, query: Some(query) },
                    Err(_) => ConnectionState::Error(ServerError::ServerFailure),
                }
            }
            ConnectionState::Compute { request, index, methylomes, query } => {
                let result = timeout(watchdog.work_timeout, compute(&request, &index, &methylomes, query.as_ref())).await;
                match result {
                    Ok(levels) => {
                        let header = ResponseHeader::ok(
                            request.methylome_names.len() as u32,
                            levels.n_rows() as u32,
                            levels.n_bytes(),
                        );
                        ConnectionState::RespondWithHeader { header, levels: Some(levels) }
                    }
                    Err(_) => ConnectionState::Error(ServerError::ConnectionTimeout),
                }
            }
            ConnectionState::RespondWithHeader { header, levels } => {
                match write_response_header(&mut socket, &header, &mut stats, watchdog).await {
                    Ok(()) => match levels {
                        Some(levels) => ConnectionState::RespondWithLevels { levels },
                        None => ConnectionState::Stop,
                    },
                    Err(_) => ConnectionState::Stop,
                }
            }
            ConnectionState::RespondWithLevels { levels } => {
                let _ = write_levels(&mut socket, &levels, &mut stats, watchdog).await;
                ConnectionState::Stop
            }
            ConnectionState::Error(status) => {
                let header = ResponseHeader::error(status);
                let _ = write_response_header(&mut socket, &header, &mut stats, watchdog).await;
                ConnectionState::Stop
            }
            ConnectionState::Stop => break,
        };
    }

    let _ = socket.shutdown().await;
    Ok(stats)
}

async fn read_request(socket: &mut TcpStream, stats: &mut TransferStats, watchdog: WatchdogConfig) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; REQUEST_BUFFER_SIZE];
    let mut filled = 0usize;
    loop {
        if filled == buf.len() {
            break;
        }
        let n = timeout(watchdog.comm_timeout, socket.read(&mut buf[filled..]))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "comm_timeout"))??;
        if n == 0 {
            break;
        }
        stats.record(n);
        filled += n;
        if buf[..filled].contains(&b'\n') {
            break;
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// §4.4.2: stream `n_intervals * 8` raw bytes, taking whatever chunk size
/// each underlying `read` call returns (the original's "≥256 KiB per read"
/// framing is a hint about the kernel's socket buffer, not a protocol rule
/// this layer needs to enforce itself).
async fn read_query(
    socket: &mut TcpStream,
    n_intervals: u32,
    stats: &mut TransferStats,
    watchdog: WatchdogConfig,
) -> std::io::Result<QueryContainer> {
    let total = n_intervals as usize * 8;
    let mut buf = vec![0u8; total];
    let mut filled = 0usize;
    while filled < total {
        let n = timeout(watchdog.comm_timeout, socket.read(&mut buf[filled..]))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "comm_timeout"))??;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short query payload"));
        }
        stats.record(n);
        filled += n;
    }
    let mut cursor = &buf[..];
    QueryContainer::read_wire(&mut cursor, n_intervals as usize)
}

/// Aggregation only; `index`/`methylomes` have already been validated and
/// resolved by the `Resolve` state, so this step cannot itself fail.
async fn compute(request: &Request, index: &GenomeIndex, methylomes: &[Arc<Methylome>], query: Option<&QueryContainer>) -> ComputedLevels {
    let refs: Vec<&Methylome> = methylomes.iter().map(Arc::as_ref).collect();
    match query {
        Some(q) => compute_levels_from_query(request, &refs, q),
        None => {
            let n_rows = if request.request_type.is_bins() {
                index.n_bins(request.bin_size()) as usize
            } else {
                index.n_windows(request.window_size(), request.window_step()) as usize
            };
            compute_levels(request, index, &refs, n_rows)
        }
    }
}

async fn write_response_header(
    socket: &mut TcpStream,
    header: &ResponseHeader,
    stats: &mut TransferStats,
    watchdog: WatchdogConfig,
) -> std::io::Result<()> {
    let buf = header.compose().map_err(|_| std::io::Error::other("response header too large"))?;
    timeout(watchdog.comm_timeout, socket.write_all(&buf))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "comm_timeout"))??;
    stats.record(buf.len());
    Ok(())
}

async fn write_levels(
    socket: &mut TcpStream,
    levels: &ComputedLevels,
    stats: &mut TransferStats,
    watchdog: WatchdogConfig,
) -> std::io::Result<()> {
    let mut body = Vec::with_capacity(levels.n_bytes() as usize);
    levels.write_wire(&mut body)?;
    timeout(watchdog.comm_timeout, socket.write_all(&body))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "comm_timeout"))??;
    stats.record(body.len());
    Ok(())
}

fn request_error_status(e: RequestError) -> ServerError {
    match e {
        RequestError::ParseErrorRequestType => ServerError::InvalidRequestType,
        RequestError::RequestTooLarge => ServerError::BadRequest,
        _ => ServerError::BadRequest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use crate::genome_index::GenomeIndex;
    use crate::methylome::Methylome;
    use crate::methylome_data::MethylomeData;
    use crate::request::limits;
    use tokio::net::TcpListener;

    async fn fixture() -> (tempfile::TempDir, tempfile::TempDir, GenomeIndex) {
        let index_dir = tempfile::tempdir().unwrap();
        let methylome_dir = tempfile::tempdir().unwrap();
        let index = GenomeIndex::new("toy", vec!["chr1".to_string()], vec![1000], vec![vec![10, 50, 100, 900]]);
        index.write(index_dir.path(), "toy").unwrap();
        let data = MethylomeData::new(vec![(5, 5), (0, 0), (10, 0), (1, 9)]);
        let m = Methylome::build(data, &index, false, "t");
        m.write(methylome_dir.path(), "SRX1").unwrap();
        (index_dir, methylome_dir, index)
    }

    #[serial]
    #[tokio::test]
    async fn test_bins_request_round_trip_over_real_socket() {
        limits::reset_to_defaults();
        let (index_dir, methylome_dir, index) = fixture().await;
        let handler = std::sync::Arc::new(RequestHandler::new(index_dir.path(), methylome_dir.path(), 8, 8));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_handler = std::sync::Arc::clone(&handler);
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(socket, &server_handler, WatchdogConfig::default()).await.unwrap()
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let req = Request::new_bins(false, index.hash, 500, vec!["SRX1".to_string()]);
        client.write_all(&req.compose().unwrap()).await.unwrap();

        let mut header_buf = vec![0u8; RESPONSE_HEADER_BUFFER_SIZE];
        let n = client.read(&mut header_buf).await.unwrap();
        header_buf.truncate(n);
        let header = ResponseHeader::parse(&header_buf).unwrap();
        assert_eq!(header.status, ServerError::Ok);
        assert_eq!(header.cols, 1);

        let mut body = vec![0u8; header.n_bytes as usize];
        client.read_exact(&mut body).await.unwrap();

        let stats = server.await.unwrap();
        assert!(stats.n_transfers > 0);
    }

    #[serial]
    #[tokio::test]
    async fn test_unknown_methylome_reports_error_status() {
        limits::reset_to_defaults();
        let (index_dir, methylome_dir, index) = fixture().await;
        let handler = std::sync::Arc::new(RequestHandler::new(index_dir.path(), methylome_dir.path(), 8, 8));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_handler = std::sync::Arc::clone(&handler);
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(socket, &server_handler, WatchdogConfig::default()).await.unwrap()
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let req = Request::new_bins(false, index.hash, 500, vec!["nope".to_string()]);
        client.write_all(&req.compose().unwrap()).await.unwrap();

        let mut header_buf = vec![0u8; RESPONSE_HEADER_BUFFER_SIZE];
        let n = client.read(&mut header_buf).await.unwrap();
        header_buf.truncate(n);
        let header = ResponseHeader::parse(&header_buf).unwrap();
        assert_eq!(header.status, ServerError::MethylomeNotFound);

        server.await.unwrap();
    }
}

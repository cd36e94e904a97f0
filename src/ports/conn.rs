use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream with independent read and write sides.
///
/// Implemented by anything that is `AsyncRead + AsyncWrite`, notably
/// `tokio::net::TcpStream` and `tokio_rustls` TLS streams. Half-close
/// (signalling end-of-stream while continuing to read) is expressed through
/// `AsyncWrite::poll_shutdown`, which maps to a TCP FIN or a TLS
/// close_notify depending on the concrete stream. Full close is expressed
/// through ownership: dropping the stream closes it.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + std::fmt::Debug> Duplex for T {}

/// An owned, type-erased duplex connection.
pub type DuplexConn = Box<dyn Duplex>;

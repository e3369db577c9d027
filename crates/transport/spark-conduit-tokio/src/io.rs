//! TCP 与 Unix 流共用的读写/半关闭逻辑。

use std::io;

use spark_conduit::{Received, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 读取一次；非空缓冲区上读到 0 字节视为对端结束。
pub(crate) async fn recv<S>(stream: &mut S, buf: &mut [u8]) -> Result<Received, TransportError>
where
    S: AsyncRead + Unpin,
{
    if buf.is_empty() {
        return Ok(Received::Input(0));
    }
    loop {
        match stream.read(buf).await {
            Ok(0) => return Ok(Received::EndOfFlow),
            Ok(n) => return Ok(Received::Input(n)),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
}

/// 写出整个缓冲区。
pub(crate) async fn send<S>(stream: &mut S, buf: &[u8]) -> Result<usize, TransportError>
where
    S: AsyncWrite + Unpin,
{
    if buf.is_empty() {
        return Ok(0);
    }
    stream.write_all(buf).await?;
    Ok(buf.len())
}

/// 写半关闭；对端已断开视为关闭成功。
pub(crate) async fn shutdown<S>(stream: &mut S) -> Result<(), TransportError>
where
    S: AsyncWrite + Unpin,
{
    match stream.shutdown().await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// `accept` 返回的错误是否只属于单条待接受连接（对端在接受前已复位或中止）。
pub(crate) fn is_per_connection(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::NotConnected
    )
}

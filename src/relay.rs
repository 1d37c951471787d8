//! C4: one client's bidirectional byte pump against the currently selected
//! node, with half-close semantics (§4.4, §9's redesign flag).

use std::time::Duration;

use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const BACKEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BUFFER_SIZE: usize = 8 * 1024;

/// Opens a connection to `(ip, port)` and pumps bytes in both directions
/// until each side has EOFed, half-closing the destination's write side as
/// soon as its source reaches EOF (the redesign §9 calls for, replacing the
/// original's "close both on either EOF" behavior). Returns once both
/// halves are done; errors are not surfaced, matching §7's "relay errors
/// are silent".
pub async fn relay(mut client: TcpStream, backend_addr: &str) {
    let backend = match tokio::time::timeout(
        BACKEND_CONNECT_TIMEOUT,
        TcpStream::connect(backend_addr),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        _ => {
            tracing::debug!(addr = backend_addr, "relay: backend connect failed, closing client");
            let _ = client.shutdown().await;
            return;
        }
    };

    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let client_to_backend = pump(client_read, backend_write);
    let backend_to_client = pump(backend_read, client_write);

    let _ = tokio::join!(client_to_backend, backend_to_client);
}

/// One direction of the relay: read from `src`, write all bytes to `dst`,
/// repeat until EOF or error, then half-close `dst`'s write side.
async fn pump(
    mut src: tokio::net::tcp::OwnedReadHalf,
    mut dst: tokio::net::tcp::OwnedWriteHalf,
) -> io::Result<()> {
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
    }
    // Half-close: tell the peer we're done sending, but let the other
    // direction's pump keep running independently.
    let _ = dst.shutdown().await;
    Ok(())
}

//! Minimal client for the hypervisor's control socket.
//!
//! The monitor speaks a line-oriented protocol: it greets on connect and
//! answers one line per request. Requests and responses are treated as
//! opaque text; this client only knows the capability handshake and the
//! shutdown command.

use std::io;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

const CAPABILITIES: &str = r#"{"execute":"qmp_capabilities"}"#;
const POWERDOWN: &str = r#"{"execute":"system_powerdown"}"#;

/// Ask the hypervisor to power the guest down cleanly.
pub(crate) async fn send_shutdown(socket: &Path) -> io::Result<()> {
    let stream = UnixStream::connect(socket).await?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // the monitor speaks first
    let greeting = lines.next_line().await?;
    debug!(?greeting, "Monitor connected");

    writer.write_all(CAPABILITIES.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    let _ = lines.next_line().await?;

    writer.write_all(POWERDOWN.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    let response = lines.next_line().await?;
    debug!(?response, "Shutdown request acknowledged");
    Ok(())
}

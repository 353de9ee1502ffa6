use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::netbios;
use crate::smb::SmbSession;

/// A connection silent for this long is dropped; any half-assembled
/// transaction dies with it in the session teardown.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct ServerConfig {
    pub root_dir: PathBuf,
    pub read_only: bool,
    pub max_xmit: usize,
}

#[derive(Clone)]
pub struct Server {
    pub config: Arc<ServerConfig>,
}

impl Server {
    pub async fn run(&self, host: &str, port: u16) -> anyhow::Result<()> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("listening on {}:{}", host, port);
        let mut next_conn = 0u64;
        loop {
            let (stream, peer) = listener.accept().await?;
            next_conn += 1;
            let conn_id = next_conn;
            info!("conn {} from {}", conn_id, peer);
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(config, stream, conn_id).await {
                    warn!("conn {} ended with error: {}", conn_id, e);
                }
            });
        }
    }
}

/// One task per connection; the session state lives and dies with it.
async fn handle_connection(
    config: Arc<ServerConfig>,
    mut stream: TcpStream,
    conn_id: u64,
) -> anyhow::Result<()> {
    let mut session = SmbSession::new(config, conn_id);
    let result = serve_frames(&mut session, &mut stream).await;
    session.teardown();
    result
}

async fn serve_frames<S>(session: &mut SmbSession, stream: &mut S) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let read = tokio::time::timeout(IDLE_TIMEOUT, netbios::read_frame(stream)).await;
        let Ok(frame) = read else {
            warn!("connection idle for {:?}, dropping", IDLE_TIMEOUT);
            anyhow::bail!("idle timeout");
        };
        let Some((frame_type, payload)) = frame? else {
            debug!("clean disconnect");
            return Ok(());
        };
        match frame_type {
            netbios::SESSION_REQUEST => {
                netbios::write_frame(stream, netbios::SESSION_POSITIVE_RESPONSE, &[]).await?;
            }
            netbios::SESSION_KEEPALIVE => {}
            netbios::SESSION_MESSAGE => match session.handle_frame(&payload) {
                Ok(replies) => {
                    for reply in replies {
                        netbios::write_frame(stream, netbios::SESSION_MESSAGE, &reply).await?;
                    }
                }
                Err(e) => {
                    // Desync: the byte stream can no longer be trusted.
                    error!("aborting connection: {}", e);
                    anyhow::bail!("protocol desync: {}", e);
                }
            },
            other => {
                warn!("unexpected NBT frame type {:#04x}, dropping connection", other);
                anyhow::bail!("unexpected frame type {:#04x}", other);
            }
        }
    }
}

use crate::features::connect_tunnel::repo::ConnectTargetRepository;
use crate::shared::error::TunnelResult;
use devlink_core::CoreError;
use devlink_proto::{parse_handshake, ExtractedTarget, HandshakeOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tracing::debug;

const PIPE_BUFFER_BYTES: usize = 16 * 1024;

/// Outcome of one relayed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelStats {
    pub name: String,
    /// Bytes sent to the instance, including the rewritten handshake.
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub idle_closed: bool,
}

pub struct ConnectTunnelService {
    repo: Arc<dyn ConnectTargetRepository>,
    prefix: String,
    idle_timeout: Duration,
}

impl ConnectTunnelService {
    pub fn new(
        repo: Arc<dyn ConnectTargetRepository>,
        prefix: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            prefix: prefix.into(),
            idle_timeout,
        }
    }

    /// Runs one inbound connection to completion. Errors before the outbound
    /// leg exists leave `inbound` to be dropped, which closes it.
    pub async fn relay(&self, mut inbound: TcpStream) -> TunnelResult<TunnelStats> {
        let target = self.read_handshake(&mut inbound).await?;
        debug!(name = %target.name, kind = ?target.kind, "Tunnel target extracted");

        let address = self.repo.resolve(&target.name).await?;
        let mut outbound = self.repo.dial(&address).await?;
        outbound.write_all(&target.rewritten).await?;

        let (up, down, idle_closed) = pipe(inbound, outbound, self.idle_timeout).await?;
        Ok(TunnelStats {
            name: target.name,
            bytes_up: target.rewritten.len() as u64 + up,
            bytes_down: down,
            idle_closed,
        })
    }

    /// Buffers inbound bytes until a target name can be extracted.
    pub async fn read_handshake<R>(&self, inbound: &mut R) -> TunnelResult<ExtractedTarget>
    where
        R: AsyncRead + Unpin,
    {
        // parse_handshake bounds the buffer at MAX_HANDSHAKE_BYTES.
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 4096];
        loop {
            let read = tokio::time::timeout(self.idle_timeout, inbound.read(&mut chunk))
                .await
                .map_err(|_| CoreError::Timeout("no tunnel handshake received".to_string()))??;
            if read == 0 {
                return Err(CoreError::TunnelHandshakeMalformed(format!(
                    "connection closed after {} bytes without a target name",
                    buf.len()
                ))
                .into());
            }
            buf.extend_from_slice(&chunk[..read]);

            match parse_handshake(&buf, &self.prefix)? {
                HandshakeOutcome::Extracted(target) => return Ok(target),
                HandshakeOutcome::Incomplete => continue,
            }
        }
    }
}

/// Copies bytes both ways. Each direction ends on its own EOF by shutting
/// down the opposite write half, so a half-closed peer still receives the
/// reply. Both halves are closed when nothing moves for `idle` or either
/// direction fails.
pub async fn pipe<A, B>(a: A, b: B, idle: Duration) -> TunnelResult<(u64, u64, bool)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let up = AtomicU64::new(0);
    let down = AtomicU64::new(0);
    let activity = Notify::new();

    let outcome = {
        let transfer = async {
            tokio::try_join!(
                copy_half(&mut a_read, &mut b_write, &up, &activity),
                copy_half(&mut b_read, &mut a_write, &down, &activity),
            )
        };
        let watchdog = async {
            while tokio::time::timeout(idle, activity.notified()).await.is_ok() {}
        };
        let outcome = tokio::select! {
            result = transfer => result.map(|_| false),
            _ = watchdog => Ok(true),
        };
        outcome
    };

    let totals = (up.load(Ordering::Relaxed), down.load(Ordering::Relaxed));
    match outcome {
        Ok(false) => Ok((totals.0, totals.1, false)),
        Ok(true) => {
            let _ = a_write.shutdown().await;
            let _ = b_write.shutdown().await;
            Ok((totals.0, totals.1, true))
        }
        Err(error) => {
            let _ = a_write.shutdown().await;
            let _ = b_write.shutdown().await;
            Err(CoreError::UpstreamReset(error.to_string()).into())
        }
    }
}

async fn copy_half<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: &AtomicU64,
    activity: &Notify,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; PIPE_BUFFER_BYTES];
    loop {
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            writer.shutdown().await?;
            return Ok(());
        }
        writer.write_all(&buf[..read]).await?;
        total.fetch_add(read as u64, Ordering::Relaxed);
        activity.notify_one();
    }
}

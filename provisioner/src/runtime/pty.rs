//! Pseudo-terminal sessions for interactive container shells.
//!
//! The command runs inside a PTY of the requested size. Terminal output is
//! read on a blocking thread and forwarded to the caller's sink; the caller's
//! input is written into the PTY as it arrives.

use std::io::{Read, Write};

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::{InputSource, OutputSink, PtySpec, RuntimeError};

/// End-of-transmission, sent when the caller's input is exhausted
const EOT: u8 = 0x04;

/// Run `program` inside a PTY until it exits, returning its exit code
pub async fn run_in_pty(
    program: &str,
    args: &[String],
    pty: &PtySpec,
    stdin: InputSource<'_>,
    stdout: OutputSink<'_>,
) -> Result<u32, RuntimeError> {
    let pty_system = native_pty_system();

    let pair = pty_system
        .openpty(PtySize {
            rows: pty.height,
            cols: pty.width,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| RuntimeError::Api(format!("openpty failed: {e}")))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    cmd.env("TERM", &pty.term);

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| RuntimeError::Api(format!("spawn_command failed: {e}")))?;
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| RuntimeError::Api(format!("clone_reader failed: {e}")))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| RuntimeError::Api(format!("take_writer failed: {e}")))?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // EIO once the child side closes
                    info!("PTY read loop ended: {}", e);
                    break;
                }
            }
        }
    });

    let mut input = [0u8; 1024];
    let mut stdin_open = true;
    loop {
        tokio::select! {
            chunk = rx.recv() => match chunk {
                Some(data) => stdout.write_all(&data).await?,
                None => break,
            },
            read = stdin.read(&mut input), if stdin_open => match read? {
                0 => {
                    stdin_open = false;
                    if let Err(e) = writer.write_all(&[EOT]) {
                        warn!("Failed to close PTY input: {}", e);
                    }
                }
                n => {
                    writer.write_all(&input[..n])?;
                    writer.flush()?;
                }
            },
        }
    }
    stdout.flush().await?;

    let status = tokio::task::spawn_blocking(move || child.wait())
        .await
        .map_err(|e| RuntimeError::Api(format!("PTY wait task failed: {e}")))??;
    drop(pair.master);

    Ok(status.exit_code())
}

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::Dispatcher;
use crate::error::DispatchFault;

const CTRL_Z: u8 = 0x1A;
const ESC: u8 = 0x1B;
/// How long the line must stay quiet before a resync counts as done.
const RESYNC_QUIET: Duration = Duration::from_millis(200);

/// Minimal AT command channel over any byte stream (serial device file,
/// pty, or an in-memory pipe in tests).
pub struct AtModem<T> {
    io: T,
    buf: Vec<u8>,
    response_timeout: Duration,
}

impl<T: AsyncRead + AsyncWrite + Unpin> AtModem<T> {
    pub fn new(io: T, response_timeout: Duration) -> Self {
        Self { io, buf: Vec::with_capacity(256), response_timeout }
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), DispatchFault> {
        self.io.write_all(bytes).await.map_err(|e| DispatchFault::Link(e.to_string()))?;
        self.io.flush().await.map_err(|e| DispatchFault::Link(e.to_string()))
    }

    /// Sends `cmd` followed by CR and waits for one of `accept`.
    pub async fn command(&mut self, cmd: &str, accept: &[&str]) -> Result<String, DispatchFault> {
        self.buf.clear();
        log::debug!("[MODEM] > {}", cmd);
        self.write_raw(format!("{}\r", cmd).as_bytes()).await?;
        self.expect(accept).await
    }

    /// Aborts a half-finished SMS prompt and throws away whatever the modem
    /// still had queued from an earlier, abandoned exchange.
    pub async fn resync(&mut self) -> Result<(), DispatchFault> {
        self.write_raw(&[ESC]).await?;
        let mut chunk = [0u8; 128];
        loop {
            match timeout(RESYNC_QUIET, self.io.read(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) => return Err(DispatchFault::Link("modem closed the connection".to_string())),
                Ok(Ok(n)) => log::debug!("[MODEM] discarded {} stale bytes", n),
                Ok(Err(e)) => return Err(DispatchFault::Link(e.to_string())),
            }
        }
        self.buf.clear();
        Ok(())
    }

    /// Reads until any `accept` token shows up. `ERROR` (including
    /// `+CMS ERROR: n`) is a rejection.
    pub async fn expect(&mut self, accept: &[&str]) -> Result<String, DispatchFault> {
        let mut chunk = [0u8; 128];
        loop {
            let text = String::from_utf8_lossy(&self.buf).into_owned();
            if text.contains("ERROR") {
                self.buf.clear();
                return Err(DispatchFault::Rejected(text.trim().to_string()));
            }
            if accept.iter().any(|token| text.contains(token)) {
                self.buf.clear();
                log::debug!("[MODEM] < {}", text.trim());
                return Ok(text);
            }

            let n = match timeout(self.response_timeout, self.io.read(&mut chunk)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(DispatchFault::Link(e.to_string())),
                Err(_) => return Err(DispatchFault::Timeout(self.response_timeout)),
            };
            if n == 0 {
                return Err(DispatchFault::Link("modem closed the connection".to_string()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// SMS through a SIM7000-class modem in text mode.
///
/// `ready` is only true between a clean acknowledgement and the next send.
/// A send that errors or is dropped by the caller's timeout leaves it false,
/// so the next send resyncs and re-initialises before touching CMGS.
pub struct Sim7000Dispatcher<T> {
    modem: AtModem<T>,
    ready: bool,
}

impl Sim7000Dispatcher<tokio::fs::File> {
    /// Opens a serial device that is already configured (baud rate etc.).
    pub async fn open(path: &Path, response_timeout: Duration) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new().read(true).write(true).open(path).await?;
        log::info!("[MODEM] opened {}", path.display());
        Ok(Self::new(file, response_timeout))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Sim7000Dispatcher<T> {
    pub fn new(io: T, response_timeout: Duration) -> Self {
        Self { modem: AtModem::new(io, response_timeout), ready: false }
    }

    async fn init(&mut self) -> Result<(), DispatchFault> {
        self.modem.resync().await?;
        self.modem.command("AT", &["OK"]).await?;
        self.modem.command("AT+CMGF=1", &["OK"]).await?;
        self.modem.command("AT+CSCS=\"GSM\"", &["OK"]).await?;
        log::info!("[MODEM] ✓ text mode ready");
        Ok(())
    }

    async fn transmit(&mut self, recipient: &str, text: &str, was_ready: bool) -> Result<(), DispatchFault> {
        if !was_ready {
            self.init().await?;
        }
        self.modem.command(&format!("AT+CMGS=\"{}\"", recipient), &[">"]).await?;

        let mut body = text.as_bytes().to_vec();
        body.push(CTRL_Z);
        self.modem.write_raw(&body).await?;
        // +CMGS: <ref> precedes the final OK
        self.modem.expect(&["OK"]).await?;
        Ok(())
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Dispatcher for Sim7000Dispatcher<T> {
    async fn send(&mut self, recipient: &str, text: &str) -> Result<(), DispatchFault> {
        // cleared up front: if this future is dropped mid-exchange the modem
        // may still be sitting at the text prompt
        let was_ready = std::mem::replace(&mut self.ready, false);
        let result = self.transmit(recipient, text, was_ready).await;
        match &result {
            Ok(()) => self.ready = true,
            Err(e) => log::warn!("[MODEM] ✗ send failed: {}", e),
        }
        result
    }
}

//! Connectivity adapters and the one-shot link selection done at startup.
//!
//! The cellular modem is tried first with an AT handshake over its tty. If
//! it does not answer, Wi-Fi is associated through NetworkManager (`nmcli`).
//! Selection happens once; the loser is never touched again.

use super::ConnectivityProvider;
use crate::error::ConnectivityError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// The link chosen at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Cellular,
    Wifi,
}

/// Picks a link: the modem if it answers, otherwise Wi-Fi.
pub async fn select_link<M, W>(
    modem: Option<&M>,
    wifi: Option<&W>,
) -> Result<LinkKind, ConnectivityError>
where
    M: ConnectivityProvider,
    W: ConnectivityProvider,
{
    if let Some(modem) = modem {
        if modem.is_available().await {
            modem.connect().await?;
            info!("Using {} link.", modem.name());
            return Ok(LinkKind::Cellular);
        }
        warn!("No {} signal.", modem.name());
    }

    let wifi = wifi.ok_or(ConnectivityError::NoLink)?;
    info!("Connecting {} link...", wifi.name());
    wifi.connect().await?;
    info!("Using {} link.", wifi.name());
    Ok(LinkKind::Wifi)
}

const HANDSHAKE: [&str; 4] = ["AT", "AT+CPIN?", "AT+CREG?", "AT+CPSI?"];
const SIGNAL_QUERY: &str = "AT+CSQ";

/// A cellular modem driven with AT commands over a serial device.
#[derive(Debug, Clone)]
pub struct ModemLink {
    device: PathBuf,
    baud_rate: u32,
    response_wait: Duration,
}

impl ModemLink {
    pub fn new(device: impl Into<PathBuf>, baud_rate: u32, response_wait: Duration) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            response_wait,
        }
    }

    fn open(&self) -> Result<SerialStream, ConnectivityError> {
        let device = self.device.to_string_lossy();
        tokio_serial::new(&*device, self.baud_rate)
            .open_native_async()
            .map_err(|source| ConnectivityError::Serial {
                device: device.into_owned(),
                source,
            })
    }
}

/// Runs the AT handshake on one open port. The modem is usable if the final
/// signal query is answered with `OK`.
pub async fn modem_handshake<P>(port: &mut P, response_wait: Duration) -> Result<bool, ConnectivityError>
where
    P: AsyncRead + AsyncWrite + Unpin,
{
    for command in HANDSHAKE {
        exchange(port, command, response_wait).await?;
    }
    let reply = exchange(port, SIGNAL_QUERY, response_wait).await?;
    Ok(reply.contains("OK"))
}

/// Sends one command and collects the reply until a final result code or
/// the end of the response window. Bytes left over from earlier commands are
/// discarded first.
async fn exchange<P>(port: &mut P, command: &str, response_wait: Duration) -> Result<String, ConnectivityError>
where
    P: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 256];
    while let Ok(read) = tokio::time::timeout(Duration::ZERO, port.read(&mut buf)).await {
        if read? == 0 {
            break;
        }
    }

    port.write_all(format!("{command}\r\n").as_bytes()).await?;
    port.flush().await?;

    let deadline = Instant::now() + response_wait;
    let mut reply = Vec::new();
    while !has_final_result(&reply) {
        match tokio::time::timeout_at(deadline, port.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(read)) => reply.extend_from_slice(&buf[..read]),
            Ok(Err(e)) => return Err(e.into()),
        }
    }
    let reply = String::from_utf8_lossy(&reply).trim().to_string();
    debug!("{} -> {:?}", command, reply);
    Ok(reply)
}

fn has_final_result(reply: &[u8]) -> bool {
    String::from_utf8_lossy(reply)
        .lines()
        .any(|line| matches!(line.trim(), "OK" | "ERROR") || line.starts_with("+CME ERROR"))
}

impl ConnectivityProvider for ModemLink {
    fn name(&self) -> &'static str {
        "cellular"
    }

    async fn is_available(&self) -> bool {
        let mut port = match self.open() {
            Ok(port) => port,
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };
        match modem_handshake(&mut port, self.response_wait).await {
            Ok(usable) => usable,
            Err(e) => {
                warn!("Modem at {} failed the handshake: {}", self.device.display(), e);
                false
            }
        }
    }

    async fn connect(&self) -> Result<(), ConnectivityError> {
        // The modem brings its own data session up once registered.
        Ok(())
    }
}

/// Wi-Fi association through NetworkManager.
#[derive(Debug, Clone)]
pub struct WifiLink {
    ssid: String,
    password: String,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl WifiLink {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            connect_timeout,
            poll_interval: Duration::from_millis(500),
        }
    }

    async fn nmcli(args: &[&str]) -> Result<String, ConnectivityError> {
        let output = Command::new("nmcli").args(args).output().await?;
        if !output.status.success() {
            return Err(ConnectivityError::Command {
                command: format!("nmcli {}", args.first().copied().unwrap_or_default()),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn connected() -> bool {
        match Self::nmcli(&["-t", "-f", "STATE", "general"]).await {
            Ok(state) => state.trim_start().starts_with("connected"),
            Err(e) => {
                debug!("nmcli state query failed: {}", e);
                false
            }
        }
    }
}

impl ConnectivityProvider for WifiLink {
    fn name(&self) -> &'static str {
        "wifi"
    }

    async fn is_available(&self) -> bool {
        Self::connected().await
    }

    async fn connect(&self) -> Result<(), ConnectivityError> {
        Self::nmcli(&["device", "wifi", "connect", &self.ssid, "password", &self.password]).await?;

        let started = Instant::now();
        while !Self::connected().await {
            if started.elapsed() >= self.connect_timeout {
                return Err(ConnectivityError::WifiTimeout {
                    ssid: self.ssid.clone(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }
}

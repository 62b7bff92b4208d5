use crate::{BridgeError, Result};
use crate::timeouts::PORT_PROBE_MAX_ATTEMPTS;
use tokio::net::TcpListener;

/// Find a free listening port starting at `start`, probing sequentially.
///
/// A bind failure with `AddrInUse` advances to the next port; any other
/// bind error is fatal and propagates immediately. The probe listener is
/// dropped before returning, so the caller binds the port itself.
pub async fn find_available_port(host: &str, start: u16, max_attempts: u16) -> Result<u16> {
    for offset in 0..max_attempts {
        let port = start
            .checked_add(offset)
            .ok_or(BridgeError::PortExhausted {
                start,
                end: u16::MAX,
            })?;

        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                // Resolves a requested port of 0 to the ephemeral port the
                // OS actually assigned.
                let bound = listener.local_addr()?.port();
                drop(listener);
                if offset > 0 {
                    tracing::info!(requested = start, bound, "Requested port busy, using fallback");
                }
                return Ok(bound);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port in use, trying next");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(BridgeError::PortExhausted {
        start,
        end: start.saturating_add(max_attempts),
    })
}

pub async fn find_available_port_default(host: &str, start: u16) -> Result<u16> {
    find_available_port(host, start, PORT_PROBE_MAX_ATTEMPTS).await
}

use anyhow::{Context, Result};
use std::net::{SocketAddr, TcpListener};

/// Confirms the listen address can be bound right now (port free, interface present).
pub fn check_bindable(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("link.listen is not a socket address: {}", listen))?;
    let sock = TcpListener::bind(addr).with_context(|| format!("cannot bind {}", addr))?;
    drop(sock);
    Ok(())
}

//! Listener configuration

use std::net::SocketAddr;

/// Default streaming port
pub const DEFAULT_STREAM_PORT: u16 = 81;

/// Viewer listener options
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_STREAM_PORT)),
            tcp_nodelay: true,
        }
    }
}

impl ListenerConfig {
    /// Create a config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ListenerConfig::default();

        assert_eq!(config.bind_addr.port(), 81);
        assert!(config.bind_addr.ip().is_unspecified());
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let config = ListenerConfig::default().bind(addr).tcp_nodelay(false);

        assert_eq!(config.bind_addr, addr);
        assert!(!config.tcp_nodelay);
        assert_eq!(ListenerConfig::with_addr(addr).bind_addr, addr);
    }
}

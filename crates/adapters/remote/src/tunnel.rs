//! Tunnel providers expose the local relay listener to remote senders.

use std::future::Future;
use std::net::SocketAddr;

use url::Url;

use crate::error::RemoteError;

/// Something that publishes a local TCP listener under a reachable URL.
pub trait TunnelProvider: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the provider is configured well enough to try. `Err`
    /// carries the reason the adapter is disabled.
    ///
    /// # Errors
    ///
    /// Returns the human-readable reason the provider cannot be used.
    fn ready(&self) -> Result<(), String>;

    /// Start forwarding to `local` and return the public URL.
    fn open(&mut self, local: SocketAddr)
    -> impl Future<Output = Result<Url, RemoteError>> + Send;

    /// Tear the tunnel down. Safe to call when nothing is open.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// No tunnel: the listener address itself is advertised.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectTunnel;

impl TunnelProvider for DirectTunnel {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn ready(&self) -> Result<(), String> {
        Ok(())
    }

    async fn open(&mut self, local: SocketAddr) -> Result<Url, RemoteError> {
        Url::parse(&format!("tcp://{local}")).map_err(RemoteError::tunnel)
    }

    async fn close(&mut self) {}
}

#[cfg(feature = "ngrok")]
pub use self::ngrok_tunnel::NgrokTunnel;

#[cfg(feature = "ngrok")]
mod ngrok_tunnel {
    use std::net::SocketAddr;

    use ngrok::Session;
    use ngrok::config::ForwarderBuilder as _;
    use ngrok::forwarder::Forwarder;
    use ngrok::tunnel::{EndpointInfo as _, TcpTunnel, TunnelInfo as _};
    use url::Url;

    use super::TunnelProvider;
    use crate::error::RemoteError;

    /// Public TCP endpoint through an ngrok agent session.
    pub struct NgrokTunnel {
        authtoken: Option<String>,
        session: Option<Session>,
        forwarder: Option<Forwarder<TcpTunnel>>,
    }

    impl NgrokTunnel {
        #[must_use]
        pub fn new(authtoken: Option<String>) -> Self {
            Self {
                authtoken: authtoken.filter(|t| !t.trim().is_empty()),
                session: None,
                forwarder: None,
            }
        }
    }

    impl TunnelProvider for NgrokTunnel {
        fn name(&self) -> &'static str {
            "ngrok"
        }

        fn ready(&self) -> Result<(), String> {
            match self.authtoken {
                Some(_) => Ok(()),
                None => Err("no ngrok auth token configured".into()),
            }
        }

        async fn open(&mut self, local: SocketAddr) -> Result<Url, RemoteError> {
            let token = self.authtoken.clone().ok_or(RemoteError::MissingToken)?;
            let session = Session::builder()
                .authtoken(token)
                .connect()
                .await
                .map_err(RemoteError::tunnel)?;
            let to = Url::parse(&format!("tcp://{local}")).map_err(RemoteError::tunnel)?;
            let forwarder = session
                .tcp_endpoint()
                .listen_and_forward(to)
                .await
                .map_err(RemoteError::tunnel)?;
            let url = Url::parse(forwarder.url()).map_err(RemoteError::tunnel)?;

            self.session = Some(session);
            self.forwarder = Some(forwarder);
            Ok(url)
        }

        async fn close(&mut self) {
            let forwarder = self.forwarder.take();
            let Some(mut session) = self.session.take() else {
                return;
            };
            if let Some(forwarder) = forwarder {
                if let Err(err) = session.close_tunnel(forwarder.id()).await {
                    tracing::debug!(%err, "failed to close ngrok tunnel");
                }
            }
            if let Err(err) = session.close().await {
                tracing::debug!(%err, "failed to close ngrok session");
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn should_not_be_ready_without_token() {
            assert!(NgrokTunnel::new(None).ready().is_err());
            assert!(NgrokTunnel::new(Some("  ".into())).ready().is_err());
            assert!(NgrokTunnel::new(Some("2abc".into())).ready().is_ok());
        }

        #[tokio::test]
        async fn should_refuse_to_open_without_token() {
            let mut tunnel = NgrokTunnel::new(None);
            let err = tunnel
                .open("127.0.0.1:9010".parse().unwrap())
                .await
                .unwrap_err();
            assert!(matches!(err, RemoteError::MissingToken));
        }
    }
}

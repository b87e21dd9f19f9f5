use std::{future::Future, io, net::SocketAddr, sync::Arc};

use tokio::{
    net::{TcpListener, TcpSocket},
    sync::Semaphore,
};
use tracing::{debug, info, warn};

use crate::{connection::Connection, state::AppState};

/// Accept loop. At most `parallel` connections are served at once; further
/// clients wait in the listen backlog.
pub struct Server {
    listener: TcpListener,
    app: AppState,
    permits: Arc<Semaphore>,
}

impl Server {
    pub async fn bind(app: AppState) -> io::Result<Self> {
        let addr = tokio::net::lookup_host(app.config.bind_addr())
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}", app.config.bind_addr()),
                )
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;

        let parallel = app.config.parallel.max(1);
        let listener = socket.listen(parallel)?;
        info!(%addr, parallel, "listening");

        Ok(Self {
            listener,
            permits: Arc::new(Semaphore::new(parallel as usize)),
            app,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves. Connections already accepted keep
    /// running on their own tasks.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };
            if let Err(err) = stream.set_nodelay(true) {
                debug!(%peer, error = %err, "failed to set TCP_NODELAY");
            }

            let connection = Connection::new(self.app.clone(), stream, peer.to_string());
            tokio::spawn(async move {
                connection.run().await;
                drop(permit);
            });
        }
        info!("server stopped accepting connections");
    }
}

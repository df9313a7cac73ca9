use crate::error::ReplicationResult;
use tokio_postgres::config::ReplicationMode;
use tokio_postgres::{Client, Config, NoTls};
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::error;

fn requires_tls(connection_string: &str) -> bool {
    ["sslmode=require", "sslmode=verify-ca", "sslmode=verify-full"]
        .iter()
        .any(|needle| connection_string.contains(needle))
}

fn root_certs() -> rustls::RootCertStore {
    let mut store = rustls::RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

/// Opens a normal (non-replication) connection, used for catalog metadata
/// queries and for the Runner's liveness-ping session. The connection
/// future is driven on its own task; a dropped connection logs and the
/// `Client` handle simply starts returning errors on next use.
pub async fn connect_metadata(connection_string: &str) -> ReplicationResult<Client> {
    let config: Config = connection_string.parse().map_err(|e: tokio_postgres::Error| {
        crate::error::ReplicationError::InvalidConfig(e.to_string())
    })?;
    connect_with_config(config, connection_string).await
}

/// Opens a replication connection (`replication=database`) used by the
/// Replicator to issue `CREATE_REPLICATION_SLOT`/`START_REPLICATION`.
pub async fn connect_replication(connection_string: &str) -> ReplicationResult<Client> {
    let mut config: Config = connection_string.parse().map_err(|e: tokio_postgres::Error| {
        crate::error::ReplicationError::InvalidConfig(e.to_string())
    })?;
    config.replication_mode(ReplicationMode::Logical);
    connect_with_config(config, connection_string).await
}

async fn connect_with_config(config: Config, connection_string: &str) -> ReplicationResult<Client> {
    let client = if requires_tls(connection_string) {
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_certs())
            .with_no_client_auth();
        let connector = MakeRustlsConnect::new(tls_config);
        let (client, connection) = config.connect(connector).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("replication connection error: {}", e);
            }
        });
        client
    } else {
        let (client, connection) = config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("replication connection error: {}", e);
            }
        });
        client
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_tls_requirement() {
        assert!(requires_tls("host=x sslmode=require"));
        assert!(requires_tls("host=x sslmode=verify-full"));
        assert!(!requires_tls("host=x sslmode=disable"));
        assert!(!requires_tls("host=x"));
    }
}

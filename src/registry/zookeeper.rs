//! Apache ZooKeeper backend.

use parking_lot::Mutex;
use zookeeper_client as zk;

use super::{method_path, service_path, Endpoint, Registry};
use crate::error::RegistryError;
use crate::service::BoxFuture;

/// Registry backed by a ZooKeeper ensemble.
///
/// The client session owns the ephemeral method nodes; closing the registry
/// or dropping it ends the session and ZooKeeper removes them.
pub struct ZkRegistry {
    cluster: String,
    client: Mutex<Option<zk::Client>>,
}

fn map_error(path: &str, err: zk::Error) -> RegistryError {
    match err {
        zk::Error::NoNode => RegistryError::NotFound(path.to_string()),
        zk::Error::NodeExists => RegistryError::NodeExists(path.to_string()),
        zk::Error::ConnectionLoss | zk::Error::SessionExpired => {
            RegistryError::Unreachable(err.to_string())
        }
        other => RegistryError::Backend(other.to_string()),
    }
}

impl ZkRegistry {
    /// Connect to `endpoint` and open a session.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, RegistryError> {
        let cluster = endpoint.to_string();
        let client = zk::Client::connect(&cluster)
            .await
            .map_err(|e| RegistryError::Unreachable(format!("{}: {}", cluster, e)))?;
        tracing::info!("ZooKeeper session opened with {}", cluster);

        Ok(Self {
            cluster,
            client: Mutex::new(Some(client)),
        })
    }

    fn client(&self) -> Result<zk::Client, RegistryError> {
        self.client
            .lock()
            .clone()
            .ok_or_else(|| RegistryError::Backend("registry closed".to_string()))
    }
}

impl Registry for ZkRegistry {
    fn register<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
        endpoint: &'a Endpoint,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            let client = self.client()?;

            let parent = service_path(service_name);
            let persistent = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
            match client.create(&parent, &[], &persistent).await {
                Ok(_) | Err(zk::Error::NodeExists) => {}
                Err(e) => return Err(map_error(&parent, e)),
            }

            let path = method_path(service_name, method_name);
            let ephemeral = zk::CreateMode::Ephemeral.with_acls(zk::Acls::anyone_all());
            client
                .create(&path, endpoint.to_string().as_bytes(), &ephemeral)
                .await
                .map_err(|e| map_error(&path, e))?;
            Ok(())
        })
    }

    fn lookup<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, Result<Endpoint, RegistryError>> {
        Box::pin(async move {
            let client = self.client()?;
            let path = method_path(service_name, method_name);
            let (data, _stat) = client
                .get_data(&path)
                .await
                .map_err(|e| map_error(&path, e))?;
            let text = String::from_utf8(data)
                .map_err(|_| RegistryError::Backend(format!("node {} holds non-UTF-8 data", path)))?;
            text.parse()
        })
    }

    fn unregister<'a>(
        &'a self,
        service_name: &'a str,
        method_name: &'a str,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            let client = self.client()?;
            let path = method_path(service_name, method_name);
            match client.delete(&path, None).await {
                Ok(()) | Err(zk::Error::NoNode) => Ok(()),
                Err(e) => Err(map_error(&path, e)),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.client.lock().take().is_some() {
                tracing::info!("ZooKeeper session with {} closed", self.cluster);
            }
        })
    }
}

impl std::fmt::Debug for ZkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZkRegistry")
            .field("cluster", &self.cluster)
            .finish()
    }
}

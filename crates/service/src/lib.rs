//! The Service Manager: a small dependency-ordered supervisor that boots a
//! fixed set of long-running services, hands each one the capabilities it
//! declared it needs from the services that started before it, and tears
//! them all down in reverse order on shutdown.
//!
//! This is the Rust shape of the source's `Service` interface. The source
//! lets a service expose and consume arbitrary `interface{}` values; here
//! that becomes a `CapabilityMap` of type-erased boxes with a checked
//! downcast on retrieval, per the DESIGN NOTES redesign target.

mod capability;
mod error;
mod migration;

pub use capability::CapabilityMap;
pub use error::ServiceError;
pub use migration::{migrate, Migration};

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use toml::Value;
use tracing::{info, warn};

/// A long-running, independently configured unit of the connector.
///
/// Object-safe by construction (no associated types) so a `ServiceManager`
/// can hold a heterogeneous `Vec<Box<dyn Service>>` of services with
/// unrelated config and capability shapes, matching how the source wires
/// arbitrarily different service structs through one `[]Service` slice.
#[async_trait]
pub trait Service: Send {
    /// Stable identifier used in dependency declarations and log lines.
    fn id(&self) -> &'static str;

    /// Services that must be booted (and have `expose` called) before this
    /// one's `plug`.
    fn needs(&self) -> &'static [&'static str] {
        &[]
    }

    /// Ordered config migrations for this service's TOML subtree, applied
    /// before `set_config`. Empty by default for services with no
    /// versioned config.
    fn migrations(&self) -> &'static [Migration] {
        &[]
    }

    /// Validate and store this service's config subtree, already migrated
    /// to the current `configuration_version`.
    fn set_config(&mut self, config: Value) -> Result<(), ServiceError>;

    /// Wire in the capabilities exposed by services this one `needs()`.
    /// Called after every dependency has booted and exposed, before `run`.
    fn plug(&mut self, capabilities: &CapabilityMap) -> Result<(), ServiceError>;

    /// Build whatever this service wants to `expose()` — opening a
    /// database, constructing a client — before `run` is spawned. Runs
    /// synchronously on the manager's task; keep it non-blocking-long.
    /// Splitting this out of `run` is what lets the manager read `expose()`
    /// before handing the service off to its own task.
    fn prepare(&mut self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Run until `shutdown` is cancelled or the service fails. Must send on
    /// `on_running` once initialization is complete and the service is
    /// ready to serve, or the manager times out the boot.
    async fn run(
        &mut self,
        shutdown: CancellationToken,
        on_running: oneshot::Sender<()>,
    ) -> Result<(), ServiceError>;

    /// Capability this service hands to services that `needs()` it. Called
    /// once, right after `prepare`, before the service is moved into its
    /// own task. `None` for services that expose nothing.
    fn expose(&self) -> Option<Box<dyn std::any::Any + Send + Sync>> {
        None
    }
}

struct Booted {
    id: &'static str,
    handle: JoinHandle<Result<(), ServiceError>>,
}

/// Owns the boot order, the live capability map, and the running tasks.
/// Dropping a `ServiceManager` does not stop its services — call
/// `shutdown` explicitly.
pub struct ServiceManager {
    boot_timeout: Duration,
    capabilities: CapabilityMap,
    shutdown: CancellationToken,
    booted: Vec<Booted>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self {
            boot_timeout: Duration::from_secs(30),
            capabilities: CapabilityMap::new(),
            shutdown: CancellationToken::new(),
            booted: Vec::new(),
        }
    }

    pub fn with_boot_timeout(mut self, timeout: Duration) -> Self {
        self.boot_timeout = timeout;
        self
    }

    /// Topologically order `services` by `needs()`, then boot each one in
    /// turn: migrate its config slice out of `configs`, `set_config`,
    /// `plug` the capabilities exposed so far, spawn `run`, and wait for
    /// its `on_running` signal (or `boot_timeout`) before moving on.
    pub async fn boot(
        &mut self,
        mut services: Vec<Box<dyn Service>>,
        mut configs: HashMap<&'static str, Value>,
    ) -> Result<(), ServiceError> {
        let order = topo_sort(&services)?;

        let mut remaining: HashMap<&'static str, Box<dyn Service>> =
            services.drain(..).map(|s| (s.id(), s)).collect();

        for id in order {
            let mut svc = remaining.remove(id).expect("topo_sort only returns known ids");

            let raw_config = configs.remove(id).unwrap_or(Value::Table(Default::default()));
            let migrated = migration::migrate(id, raw_config, svc.migrations())?;
            svc.set_config(migrated)?;
            svc.plug(&self.capabilities)?;
            svc.prepare()?;
            if let Some(exposed) = svc.expose() {
                self.capabilities.insert(id, exposed);
            }

            let (tx, rx) = oneshot::channel();
            let token = self.shutdown.clone();
            let mut task_svc = svc;
            let handle = tokio::spawn(async move {
                let result = task_svc.run(token, tx).await;
                if let Err(ref e) = result {
                    warn!(service = task_svc.id(), error = %e, "service exited with error");
                }
                result
            });

            match tokio::time::timeout(self.boot_timeout, rx).await {
                Ok(Ok(())) => {}
                _ => {
                    handle.abort();
                    self.shutdown_booted().await;
                    return Err(ServiceError::BootTimeout(id));
                }
            }

            info!(service = id, "service running");
            self.booted.push(Booted { id, handle });
        }

        Ok(())
    }

    /// Expose a capability directly, for services wired outside the boot
    /// sequence (tests, or pre-built shared handles like a `TraceClient`).
    pub fn expose(&mut self, id: &'static str, value: Box<dyn std::any::Any + Send + Sync>) {
        self.capabilities.insert(id, value);
    }

    pub fn capabilities(&self) -> &CapabilityMap {
        &self.capabilities
    }

    /// Cancel the shared shutdown token and await every booted task in
    /// reverse boot order.
    pub async fn shutdown(mut self) -> Result<(), ServiceError> {
        self.shutdown.cancel();
        self.shutdown_booted().await
    }

    async fn shutdown_booted(&mut self) -> Result<(), ServiceError> {
        self.shutdown.cancel();
        let mut first_err = None;
        while let Some(Booted { id, handle }) = self.booted.pop() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(service = id, error = %e, "service reported error during shutdown");
                    first_err.get_or_insert(e);
                }
                Err(_) => {
                    first_err.get_or_insert(ServiceError::Join(id));
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Kahn's algorithm over each service's declared `needs()`.
fn topo_sort(services: &[Box<dyn Service>]) -> Result<Vec<&'static str>, ServiceError> {
    let ids: HashSet<&'static str> = services.iter().map(|s| s.id()).collect();
    for svc in services {
        for dep in svc.needs() {
            if !ids.contains(dep) {
                return Err(ServiceError::MissingDependency(svc.id(), dep));
            }
        }
    }

    let mut in_degree: HashMap<&'static str, usize> =
        services.iter().map(|s| (s.id(), s.needs().len())).collect();
    let mut dependents: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
    for svc in services {
        for dep in svc.needs() {
            dependents.entry(dep).or_default().push(svc.id());
        }
    }

    let mut queue: Vec<&'static str> =
        in_degree.iter().filter(|(_, &deg)| deg == 0).map(|(id, _)| *id).collect();
    queue.sort_unstable();

    let mut order = Vec::with_capacity(services.len());
    while let Some(id) = queue.pop() {
        order.push(id);
        if let Some(next) = dependents.get(id) {
            for &dep_id in next {
                let deg = in_degree.get_mut(dep_id).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    queue.push(dep_id);
                }
            }
        }
    }

    if order.len() != services.len() {
        let stuck: Vec<&'static str> = in_degree
            .into_iter()
            .filter(|(_, deg)| *deg > 0)
            .map(|(id, _)| id)
            .collect();
        return Err(ServiceError::Cycle(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod test {
    use super::*;

    struct Stub {
        id: &'static str,
        needs: &'static [&'static str],
    }

    #[async_trait]
    impl Service for Stub {
        fn id(&self) -> &'static str {
            self.id
        }

        fn needs(&self) -> &'static [&'static str] {
            self.needs
        }

        fn set_config(&mut self, _config: Value) -> Result<(), ServiceError> {
            Ok(())
        }

        fn plug(&mut self, _capabilities: &CapabilityMap) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn run(
            &mut self,
            shutdown: CancellationToken,
            on_running: oneshot::Sender<()>,
        ) -> Result<(), ServiceError> {
            let _ = on_running.send(());
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[test]
    fn topo_sort_orders_dependencies_first() {
        let services: Vec<Box<dyn Service>> = vec![
            Box::new(Stub { id: "b", needs: &["a"] }),
            Box::new(Stub { id: "a", needs: &[] }),
        ];
        let order = topo_sort(&services).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn topo_sort_rejects_missing_dependency() {
        let services: Vec<Box<dyn Service>> = vec![Box::new(Stub { id: "a", needs: &["ghost"] })];
        let err = topo_sort(&services).unwrap_err();
        assert!(matches!(err, ServiceError::MissingDependency("a", "ghost")));
    }

    #[test]
    fn topo_sort_rejects_cycle() {
        let services: Vec<Box<dyn Service>> = vec![
            Box::new(Stub { id: "a", needs: &["b"] }),
            Box::new(Stub { id: "b", needs: &["a"] }),
        ];
        let err = topo_sort(&services).unwrap_err();
        assert!(matches!(err, ServiceError::Cycle(_)));
    }

    #[tokio::test]
    async fn boot_and_shutdown_a_simple_chain() {
        let services: Vec<Box<dyn Service>> = vec![
            Box::new(Stub { id: "a", needs: &[] }),
            Box::new(Stub { id: "b", needs: &["a"] }),
        ];
        let mut manager = ServiceManager::new().with_boot_timeout(Duration::from_secs(1));
        manager.boot(services, HashMap::new()).await.unwrap();
        assert_eq!(manager.booted.len(), 2);
        manager.shutdown().await.unwrap();
    }

    struct NeverRuns;

    #[async_trait]
    impl Service for NeverRuns {
        fn id(&self) -> &'static str {
            "never-runs"
        }

        fn set_config(&mut self, _config: Value) -> Result<(), ServiceError> {
            Ok(())
        }

        fn plug(&mut self, _capabilities: &CapabilityMap) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn run(
            &mut self,
            shutdown: CancellationToken,
            _on_running: oneshot::Sender<()>,
        ) -> Result<(), ServiceError> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn boot_times_out_if_on_running_never_fires() {
        let services: Vec<Box<dyn Service>> = vec![Box::new(NeverRuns)];
        let mut manager = ServiceManager::new().with_boot_timeout(Duration::from_millis(50));
        let err = manager.boot(services, HashMap::new()).await.unwrap_err();
        assert!(matches!(err, ServiceError::BootTimeout("never-runs")));
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("service {0:?} depends on unknown service {1:?}")]
    MissingDependency(&'static str, &'static str),

    #[error("cycle detected among services: {0:?}")]
    Cycle(Vec<&'static str>),

    #[error("service {service:?} requires capability {capability:?} which was never exposed")]
    MissingCapability { service: &'static str, capability: &'static str },

    #[error("service {service:?} requested capability {capability:?} as the wrong type")]
    WrongCapabilityType { service: &'static str, capability: &'static str },

    #[error("configuration error in service {service:?}: {message}")]
    Config { service: &'static str, message: String },

    #[error("service {0:?} failed to signal it was running before boot timed out")]
    BootTimeout(&'static str),

    #[error("service {service:?} exited with a fatal error: {source}")]
    Fatal { service: &'static str, source: Box<dyn std::error::Error + Send + Sync> },

    #[error("service {0:?} panicked or was dropped before completing")]
    Join(&'static str),
}

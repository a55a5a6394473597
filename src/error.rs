use thiserror::Error;

/// Errors surfaced by the driver core.
///
/// Handlers in `serializer` catch these at their boundary (the "fault
/// barrier" of the op loop) and convert them into a log line plus an empty
/// reply; no variant here is allowed to unwind out of the serializer task.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("invalid network configuration: {0}")]
    ConfigInvalid(String),

    #[error("ovs command failed: {0}")]
    Ovs(String),

    #[error("controller rpc failed: {0}")]
    Controller(#[from] tonic::Status),

    #[error("controller transport error: {0}")]
    ControllerTransport(#[from] tonic::transport::Error),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("netlink/netns error: {0}")]
    Netns(String),

    #[error("iptables error: {0}")]
    Iptables(String),

    #[error("network {0} not found")]
    NetworkNotFound(String),

    #[error("endpoint {0} was not joined")]
    EndpointNotJoined(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

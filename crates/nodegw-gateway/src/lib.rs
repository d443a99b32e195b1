//! nodegw-gateway - Node-Invocation Broker
//!
//! This library provides the gateway-side broker for remote execution
//! nodes. The broker tracks live node sessions over an abstract duplex
//! transport, dispatches invoke requests to a specific node, reassembles
//! oversized replies delivered as ordered chunks with integrity
//! verification, and speaks the approval-pending protocol to a local
//! exec-host helper.
//!
//! # Modules
//!
//! - [`broker`]: Node registry, invocation table, chunked-transfer engine
//! - [`config`]: Gateway configuration
//! - [`connection`]: Abstract node connection handle
//! - [`exec`]: Exec-host client with pending timeout extension

pub mod broker;
pub mod config;
pub mod connection;
pub mod exec;

pub use broker::{
    InvokeOptions, NodeBroker, NodeSessionInfo, RegisterError, TransferError, TransferProgress,
    UnregisterReason,
};
pub use config::GatewayConfig;
pub use connection::{ChannelConnection, ConnectionError, NodeConnection};
pub use exec::{ExecClientConfig, ExecHostClient, ExecOutcome};

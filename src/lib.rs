#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

mod error;
mod future;
mod key;
mod node;
mod protocol;
mod routing;

pub use self::error::{ConfigError, RoutingError};
pub use self::future::progress::Progress;
pub use self::future::{Completion, State};
pub use self::key::Key;
pub use self::node::node_data::NodeData;
pub use self::node::Node;
pub use self::routing::config::{RawRoutingConfig, RoutingConfig};
pub use self::routing::{
    start_routing, start_routing_progress, ProbeResult, Prober, RoutingResult, RoutingState,
    RoutingStats,
};

/// The number of bytes in a key.
const KEY_LENGTH: usize = 32;

/// The maximum length of the message in bytes.
const MESSAGE_LENGTH: usize = 8196;

/// The number of closest peers a node returns for a `FIND_NODE` request. Also the default number
/// of results a lookup must gather and the default success tolerance.
pub const REPLICATION_PARAM: usize = 20;

/// The default number of active probes during a lookup.
pub const CONCURRENCY_PARAM: usize = 3;

/// The largest parallelism a `RoutingConfig` accepts.
pub const MAX_PARALLELISM: usize = 64;

/// The maximum number of contacts a node keeps.
const CONTACTS_CAPACITY: usize = 256;

/// Request timeout time in milliseconds
const REQUEST_TIMEOUT: u64 = 5000;

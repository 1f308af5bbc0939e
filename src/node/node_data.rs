use crate::key::Key;
use std::fmt::{Debug, Formatter, Result};

/// A peer in the network: where to reach it and which key identifies it.
#[derive(PartialEq, Eq, Hash, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub addr: String,
    pub id: Key,
}

impl NodeData {
    /// Returns the distance between this peer and `key`.
    pub fn distance(&self, key: &Key) -> Key {
        self.id.distance(key)
    }
}

impl Debug for NodeData {
    fn fmt(&self, f: &mut Formatter) -> Result {
        write!(f, "{} - {:?}", self.addr, self.id)
    }
}

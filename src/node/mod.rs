pub mod node_data;

use std::collections::HashMap;
use std::io;
use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::future::progress::Progress;
use crate::future::Completion;
use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::protocol::{Message, Protocol, Request, Response, Transport};
use crate::routing::config::RoutingConfig;
use crate::routing::{start_routing, start_routing_progress, ProbeResult, Prober, RoutingResult};
use crate::{CONTACTS_CAPACITY, REPLICATION_PARAM, REQUEST_TIMEOUT};

/// A node in the DHT.
///
/// A node answers `FIND_NODE` requests from its contacts and runs lookups by probing other nodes
/// over UDP, or TCP if the routing configuration forces it.
#[derive(Clone)]
pub struct Node {
    node_data: Arc<NodeData>,
    contacts: Arc<Mutex<Vec<NodeData>>>,
    pending_requests: Arc<Mutex<HashMap<Key, Sender<Response>>>>,
    protocol: Arc<Protocol>,
    is_active: Arc<AtomicBool>,
}

impl Node {
    /// Constructs a new `Node` listening for UDP and TCP on a specific ip and port. If
    /// `bootstrap` is not `None`, it becomes the node's first contact.
    pub fn new(ip: &str, port: &str, bootstrap: Option<NodeData>) -> io::Result<Self> {
        let addr = format!("{}:{}", ip, port);
        let socket = UdpSocket::bind(addr)?;
        let local_addr = socket.local_addr()?;
        let listener = TcpListener::bind(local_addr)?;
        let node_data = Arc::new(NodeData {
            addr: local_addr.to_string(),
            id: Key::rand(),
        });
        let (message_tx, message_rx) = channel();
        let protocol = Protocol::new(socket, listener, message_tx);

        let ret = Node {
            node_data,
            contacts: Arc::new(Mutex::new(Vec::new())),
            pending_requests: Arc::new(Mutex::new(HashMap::new())),
            protocol: Arc::new(protocol),
            is_active: Arc::new(AtomicBool::new(true)),
        };
        if let Some(bootstrap_data) = bootstrap {
            ret.add_contact(bootstrap_data);
        }

        ret.start_message_handler(message_rx);
        info!("{} - Started node {:?}", ret.node_data.addr, ret.node_data.id);
        Ok(ret)
    }

    /// Starts a thread that handles incoming messages.
    fn start_message_handler(&self, rx: Receiver<Message>) {
        let node = self.clone();
        thread::spawn(move || {
            for message in rx.iter() {
                match message {
                    Message::Request(request) => node.handle_request(&request),
                    Message::Response(response) => node.handle_response(&response),
                    Message::Kill => {
                        node.is_active.store(false, Ordering::Release);
                        info!("{} - Killed message handler", node.node_data.addr);
                        break;
                    },
                }
            }
        });
    }

    fn lock_contacts(&self) -> MutexGuard<Vec<NodeData>> {
        match self.contacts.lock() {
            Ok(contacts) => contacts,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_pending_requests(&self) -> MutexGuard<HashMap<Key, Sender<Response>>> {
        match self.pending_requests.lock() {
            Ok(pending_requests) => pending_requests,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Upserts a contact. Contacts are kept from least to most recently seen, and the least
    /// recently seen contact is dropped once there are more than `CONTACTS_CAPACITY`.
    pub fn add_contact(&self, node_data: NodeData) {
        if node_data.id == self.node_data.id {
            return;
        }
        debug!("{} updating {}", self.node_data.addr, node_data.addr);
        let mut contacts = self.lock_contacts();
        if let Some(index) = contacts.iter().position(|data| data.id == node_data.id) {
            contacts.remove(index);
        }
        contacts.push(node_data);
        if contacts.len() > CONTACTS_CAPACITY {
            contacts.remove(0);
        }
    }

    fn remove_contact(&self, node_data: &NodeData) {
        let mut contacts = self.lock_contacts();
        if let Some(index) = contacts.iter().position(|data| data == node_data) {
            contacts.remove(index);
        }
    }

    /// Returns the closest `count` contacts to `key`.
    pub fn closest_contacts(&self, key: &Key, count: usize) -> Vec<NodeData> {
        let mut ret = self.lock_contacts().clone();
        ret.sort_by_key(|node_data| node_data.distance(key));
        ret.truncate(count);
        ret
    }

    /// Handles a request RPC by answering with the closest contacts to its target.
    fn handle_request(&self, request: &Request) {
        info!(
            "{} - Receiving request from {} for {:?}",
            self.node_data.addr, request.sender.addr, request.target,
        );
        self.add_contact(request.sender.clone());
        let response = Response {
            request: request.clone(),
            receiver: (*self.node_data).clone(),
            nodes: self.closest_contacts(&request.target, REPLICATION_PARAM),
        };
        self.protocol.send_message(
            &Message::Response(response),
            &request.sender,
            request.transport,
        )
    }

    /// Handles a response RPC. If the id in the response does not match any outgoing request, then
    /// the response will be ignored.
    fn handle_response(&self, response: &Response) {
        self.add_contact(response.receiver.clone());
        let pending_requests = self.lock_pending_requests();
        if let Some(sender) = pending_requests.get(&response.request.id) {
            info!(
                "{} - Receiving response from {} with {} nodes",
                self.node_data.addr,
                response.receiver.addr,
                response.nodes.len(),
            );
            if sender.send(response.clone()).is_err() {
                warn!("{} - Requester stopped waiting", self.node_data.addr);
            }
        } else {
            warn!(
                "{} - Original request not found; irrelevant response or expired request.",
                self.node_data.addr
            );
        }
    }

    /// Sends a `FIND_NODE` request and waits up to `REQUEST_TIMEOUT` for the response.
    fn send_request(&self, dest: &NodeData, target: &Key, transport: Transport) -> Option<Response> {
        info!(
            "{} - Sending request to {} over {:?} for {:?}",
            self.node_data.addr, dest.addr, transport, target
        );
        let (response_tx, response_rx) = channel();
        let mut pending_requests = self.lock_pending_requests();
        let mut token = Key::rand();

        while pending_requests.contains_key(&token) {
            token = Key::rand();
        }
        pending_requests.insert(token, response_tx);
        drop(pending_requests);

        self.protocol.send_message(
            &Message::Request(Request {
                id: token,
                sender: (*self.node_data).clone(),
                target: *target,
                transport,
            }),
            dest,
            transport,
        );

        let response = response_rx.recv_timeout(Duration::from_millis(REQUEST_TIMEOUT));
        self.lock_pending_requests().remove(&token);
        match response {
            Ok(response) => Some(response),
            Err(_) => {
                warn!(
                    "{} - Request to {} timed out after waiting for {} milliseconds",
                    self.node_data.addr, dest.addr, REQUEST_TIMEOUT
                );
                self.remove_contact(dest);
                None
            },
        }
    }

    /// Looks up the nodes closest to `target`, starting from the closest contacts.
    pub fn lookup(&self, target: &Key, config: RoutingConfig) -> Completion<RoutingResult> {
        let seeds = self.closest_contacts(target, REPLICATION_PARAM);
        start_routing(
            *target,
            seeds,
            REPLICATION_PARAM,
            config,
            Arc::new(self.clone()),
        )
    }

    /// Like `lookup`, but also delivers the frontier each time a closer node is found.
    pub fn lookup_progress(&self, target: &Key, config: RoutingConfig) -> Progress<RoutingResult> {
        let seeds = self.closest_contacts(target, REPLICATION_PARAM);
        start_routing_progress(
            *target,
            seeds,
            REPLICATION_PARAM,
            config,
            Arc::new(self.clone()),
        )
    }

    /// Returns the `NodeData` associated with the node.
    pub fn node_data(&self) -> NodeData {
        (*self.node_data).clone()
    }

    /// Returns `true` until the node is killed.
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }

    /// Kills the current node and its receiving threads.
    pub fn kill(&self) {
        self.protocol
            .send_message(&Message::Kill, &self.node_data, Transport::Udp);
        self.protocol
            .send_message(&Message::Kill, &self.node_data, Transport::Tcp);
    }
}

impl Prober for Node {
    /// Sends a `FIND_NODE` request from a worker thread. The probe fails if no response arrives
    /// within `REQUEST_TIMEOUT`, and is a direct hit if the responder is the target.
    fn probe(&self, dest: &NodeData, target: &Key, force_tcp: bool) -> Completion<ProbeResult> {
        let ret = Completion::new();
        let probe = ret.clone();
        let node = self.clone();
        let dest = dest.clone();
        let target = *target;
        let transport = if force_tcp {
            Transport::Tcp
        } else {
            Transport::Udp
        };

        thread::spawn(move || match node.send_request(&dest, &target, transport) {
            Some(response) => {
                let local_id = node.node_data.id;
                let closer_peers = response
                    .nodes
                    .into_iter()
                    .filter(|node_data| node_data.id != local_id)
                    .collect();
                probe.complete(ProbeResult {
                    is_direct_hit: response.receiver.id == target,
                    closer_peers,
                });
            },
            None => {
                probe.fail(format!(
                    "request to {} timed out after {} milliseconds",
                    dest.addr, REQUEST_TIMEOUT
                ));
            },
        });
        ret
    }
}

#[cfg(test)]
mod tests {
    use super::Node;
    use crate::future::progress::Progress;
    use crate::future::Completion;
    use crate::key::Key;
    use crate::node::node_data::NodeData;
    use crate::routing::config::RoutingConfig;
    use crate::routing::{RoutingResult, RoutingState};
    use std::net::UdpSocket;
    use std::sync::mpsc::{channel, Sender};
    use std::time::Duration;

    fn wait(completion: &Completion<RoutingResult>) -> RoutingResult {
        let (tx, rx) = channel();
        completion.add_listener(move |c| {
            tx.send(c.result()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(30))
            .expect("lookup did not finish")
            .expect("lookup failed")
    }

    fn swarm(size: usize) -> Vec<Node> {
        let mut nodes: Vec<Node> = Vec::new();
        for _ in 0..size {
            let bootstrap = nodes.last().map(|node| node.node_data());
            let has_bootstrap = bootstrap.is_some();
            let node = Node::new("127.0.0.1", "0", bootstrap).unwrap();
            if has_bootstrap {
                let own_id = node.node_data().id;
                wait(&node.lookup(&own_id, RoutingConfig::default()));
            }
            nodes.push(node);
        }
        nodes
    }

    fn find_last(force_tcp: bool) {
        let nodes = swarm(5);
        let target = nodes[4].node_data();
        let config = RoutingConfig::default()
            .with_direct_hits(1)
            .with_force_tcp(force_tcp);

        let result = wait(&nodes[0].lookup(&target.id, config));
        assert_eq!(result.state, RoutingState::Converged);
        assert_eq!(result.direct_hits, vec![target.clone()]);
        assert_eq!(result.frontier[0], target);

        for node in &nodes {
            node.kill();
        }
    }

    #[test]
    fn test_lookup_over_udp() {
        find_last(false);
    }

    #[test]
    fn test_lookup_over_tcp() {
        find_last(true);
    }

    #[test]
    fn test_lookup_progress_ends_with_last_link() {
        let nodes = swarm(4);
        let target = nodes[3].node_data().id;
        let config = RoutingConfig::default().with_direct_hits(1);
        let head = nodes[0].lookup_progress(&target, config);

        fn follow(link: Progress<RoutingResult>, tx: Sender<RoutingResult>) {
            let next_link = link.clone();
            link.add_listener(move |c| {
                let result = c.result().unwrap();
                let is_last = result.state.is_terminal();
                tx.send(result).unwrap();
                if !is_last {
                    follow(next_link.next().unwrap(), tx);
                }
            });
        }
        let (tx, rx) = channel();
        follow(head, tx);

        let mut last = rx.recv_timeout(Duration::from_secs(30)).unwrap();
        while !last.state.is_terminal() {
            last = rx.recv_timeout(Duration::from_secs(30)).unwrap();
        }
        assert_eq!(last.state, RoutingState::Converged);

        for node in &nodes {
            node.kill();
        }
    }

    #[test]
    fn test_unreachable_peer_fails_probe() {
        let dead_addr = {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().to_string()
        };
        let dead = NodeData {
            addr: dead_addr,
            id: Key::rand(),
        };
        let node = Node::new("127.0.0.1", "0", Some(dead.clone())).unwrap();
        let config = RoutingConfig::new(5, 0, 3).unwrap();

        let result = wait(&node.lookup(&Key::rand(), config));
        assert_eq!(result.state, RoutingState::Aborted);
        assert_eq!(result.stats.failures, 1);
        assert!(node.closest_contacts(&dead.id, 1).is_empty());
        node.kill();
    }

    #[test]
    fn test_contacts_exclude_self_and_dedupe() {
        let node = Node::new("127.0.0.1", "0", None).unwrap();
        node.add_contact(node.node_data());
        assert!(node.closest_contacts(&Key::rand(), 10).is_empty());

        let other = NodeData {
            addr: String::from("127.0.0.1:1"),
            id: Key::rand(),
        };
        node.add_contact(other.clone());
        node.add_contact(other.clone());
        assert_eq!(node.closest_contacts(&other.id, 10), vec![other]);
        node.kill();
    }
}

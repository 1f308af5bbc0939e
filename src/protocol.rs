use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::key::Key;
use crate::node::node_data::NodeData;
use crate::{MESSAGE_LENGTH, REQUEST_TIMEOUT};

/// The transport a request travels on. Responses use the transport of their request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// A `FIND_NODE` request for the peers closest to `target`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub id: Key,
    pub sender: NodeData,
    pub target: Key,
    pub transport: Transport,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub request: Request,
    pub receiver: NodeData,
    pub nodes: Vec<NodeData>,
}

#[derive(Serialize, Deserialize, Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
    Kill,
}

#[derive(Clone)]
pub struct Protocol {
    socket: Arc<UdpSocket>,
}

impl Protocol {
    /// Starts one thread receiving datagrams from `socket` and one accepting connections on
    /// `listener`. Each connection is read on its own thread, so a silent peer only holds up its
    /// own connection. Everything decoded is forwarded to `tx`.
    pub fn new(socket: UdpSocket, listener: TcpListener, tx: Sender<Message>) -> Protocol {
        let protocol = Protocol {
            socket: Arc::new(socket),
        };

        let ret = protocol.clone();
        let udp_tx = tx.clone();
        thread::spawn(move || {
            let mut buffer = [0u8; MESSAGE_LENGTH];
            loop {
                let len = match protocol.socket.recv_from(&mut buffer) {
                    Ok((len, _src_addr)) => len,
                    Err(err) => {
                        warn!("Protocol: Could not receive datagram: {}", err);
                        continue;
                    },
                };
                let message: Message = match bincode::deserialize(&buffer[..len]) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("Protocol: Dropping malformed datagram: {}", err);
                        continue;
                    },
                };
                if !forward(&udp_tx, message) {
                    break;
                }
            }
        });

        thread::spawn(move || {
            let is_listening = Arc::new(AtomicBool::new(true));
            for stream in listener.incoming() {
                if !is_listening.load(Ordering::Acquire) {
                    break;
                }
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!("Protocol: Could not accept connection: {}", err);
                        continue;
                    },
                };
                let tx = tx.clone();
                let is_listening = Arc::clone(&is_listening);
                thread::spawn(move || match read_frame(stream) {
                    Ok(message) => {
                        if !forward(&tx, message) {
                            is_listening.store(false, Ordering::Release);
                        }
                    },
                    Err(err) => warn!("Protocol: Dropping TCP message: {}", err),
                });
            }
        });
        ret
    }

    /// Sends `message` to `node_data` over `transport`. Delivery is best effort, and TCP frames are
    /// written from a separate thread so that the caller never waits on a connect.
    pub fn send_message(&self, message: &Message, node_data: &NodeData, transport: Transport) {
        let buffer = match bincode::serialize(&message, bincode::Bounded(MESSAGE_LENGTH as u64)) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!("Protocol: Could not encode message: {}", err);
                return;
            },
        };
        let addr = node_data.addr.clone();
        match transport {
            Transport::Udp => {
                if self.socket.send_to(&buffer, &addr).is_err() {
                    warn!("Protocol: Could not send data to {} over UDP.", addr);
                }
            },
            Transport::Tcp => {
                thread::spawn(move || {
                    if let Err(err) = write_frame(&buffer, &addr) {
                        warn!("Protocol: Could not send data to {} over TCP: {}", addr, err);
                    }
                });
            },
        }
    }
}

/// Forwards `message` and returns whether the receiving thread should keep running.
fn forward(tx: &Sender<Message>, message: Message) -> bool {
    let is_kill = match message {
        Message::Kill => true,
        _ => false,
    };
    if tx.send(message).is_err() {
        warn!("Protocol: Connection closed.");
        return false;
    }
    !is_kill
}

fn write_frame(buffer: &[u8], addr: &str) -> io::Result<()> {
    let timeout = Duration::from_millis(REQUEST_TIMEOUT);
    let socket_addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
    })?;
    let mut stream = TcpStream::connect_timeout(&socket_addr, timeout)?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(&(buffer.len() as u32).to_be_bytes())?;
    stream.write_all(buffer)
}

fn read_frame(mut stream: TcpStream) -> Result<Message, ProtocolError> {
    stream.set_read_timeout(Some(Duration::from_millis(REQUEST_TIMEOUT)))?;
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MESSAGE_LENGTH {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut buffer = vec![0u8; len];
    stream.read_exact(&mut buffer)?;
    Ok(bincode::deserialize(&buffer)?)
}

#[cfg(test)]
mod tests {
    use super::{read_frame, write_frame, Message, Protocol, Request, Transport};
    use crate::error::ProtocolError;
    use crate::key::Key;
    use crate::node::node_data::NodeData;
    use crate::{MESSAGE_LENGTH, REQUEST_TIMEOUT};
    use std::io::Write;
    use std::net::{TcpListener, TcpStream, UdpSocket};
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_frame_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let request = Request {
            id: Key::rand(),
            sender: NodeData {
                addr: addr.clone(),
                id: Key::rand(),
            },
            target: Key::rand(),
            transport: Transport::Tcp,
        };
        let message = Message::Request(request.clone());
        let buffer =
            bincode::serialize(&message, bincode::Bounded(MESSAGE_LENGTH as u64)).unwrap();
        let handle = thread::spawn(move || write_frame(&buffer, &addr).unwrap());

        let (stream, _) = listener.accept().unwrap();
        match read_frame(stream).unwrap() {
            Message::Request(received) => {
                assert_eq!(received.id, request.id);
                assert_eq!(received.sender, request.sender);
                assert_eq!(received.target, request.target);
                assert_eq!(received.transport, Transport::Tcp);
            },
            other => panic!("unexpected message {:?}", other),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let len = (MESSAGE_LENGTH as u32 + 1).to_be_bytes();
            stream.write_all(&len).unwrap();
        });

        let (stream, _) = listener.accept().unwrap();
        match read_frame(stream) {
            Err(ProtocolError::FrameTooLarge(len)) => assert_eq!(len, MESSAGE_LENGTH + 1),
            other => panic!("unexpected frame {:?}", other),
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_silent_connection_does_not_block_accept() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = channel();
        let _protocol = Protocol::new(socket, listener, tx);

        let _silent = TcpStream::connect(&addr).unwrap();
        thread::sleep(Duration::from_millis(100));

        let id = Key::rand();
        let message = Message::Request(Request {
            id,
            sender: NodeData {
                addr: addr.clone(),
                id: Key::rand(),
            },
            target: Key::rand(),
            transport: Transport::Tcp,
        });
        let buffer =
            bincode::serialize(&message, bincode::Bounded(MESSAGE_LENGTH as u64)).unwrap();
        write_frame(&buffer, &addr).unwrap();

        match rx.recv_timeout(Duration::from_millis(REQUEST_TIMEOUT / 2)) {
            Ok(Message::Request(received)) => assert_eq!(received.id, id),
            other => panic!("unexpected message {:?}", other),
        }
    }
}

//! A transport backed by plain TCP sockets.
//!
//! TCP is connection-oriented, so a connection must be established between
//! the sending and receiving ends before a stream can be read from or
//! written to. [`ConnectionPool`] amortizes that by caching a `TcpStream`
//! per destination once opened, and accepting inbound connections in the
//! background.

use super::transport::Transport;
use super::util;
use crate::coder::Coder;
use crate::error::AllreduceError;
use crate::wire::{Address, WireMessage};
use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(1);

type SendS = mpsc::Sender<(SocketAddr, Vec<u8>)>;
type SendR = mpsc::Receiver<(SocketAddr, Vec<u8>)>;
type RecvS = mpsc::Sender<Vec<u8>>;
type RecvR = mpsc::Receiver<Vec<u8>>;

/// Maintains a cache of outgoing TCP connections and accepts inbound ones.
///
/// Sending to a peer only opens a new connection on the first call;
/// subsequent sends to the same peer reuse the cached stream. Receiving
/// polls every accepted connection on a short timeout and also keeps
/// accepting new ones, so a peer that connects late is not missed.
pub struct ConnectionPool {
    alive: Arc<AtomicBool>,
    send_s: Option<SendS>,
    recv_r: Option<RecvR>,
    send_thread: Option<thread::JoinHandle<()>>,
    recv_thread: Option<thread::JoinHandle<()>>,
}

impl ConnectionPool {
    fn poll(stream: &mut TcpStream) -> Option<Vec<u8>> {
        util::read_usize_non_blocking(stream).map(|len| util::read_bytes_vec(stream, len))
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        let (send_s, send_r): (SendS, SendR) = mpsc::channel();
        let (recv_s, recv_r): (RecvS, RecvR) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let keep_receiving = alive.clone();

        let send_thread = thread::spawn(move || {
            let mut streams = HashMap::new();
            for (address, message) in send_r {
                let stream = streams
                    .entry(address)
                    .or_insert_with(|| TcpStream::connect(address).unwrap());
                stream.write_all(&message.len().to_le_bytes()).unwrap();
                stream.write_all(&message).unwrap();
            }
        });

        listener.set_nonblocking(true).unwrap();
        let recv_thread = thread::spawn(move || {
            let mut streams = Vec::new();
            while keep_receiving.load(Ordering::Relaxed) {
                for stream in &mut streams {
                    if let Some(message) = Self::poll(stream) {
                        recv_s.send(message).unwrap();
                    }
                }
                if let Ok((stream, _)) = listener.accept() {
                    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
                    streams.push(stream)
                }
            }
        });

        Self {
            alive,
            send_s: Some(send_s),
            recv_r: Some(recv_r),
            send_thread: Some(send_thread),
            recv_thread: Some(recv_thread),
        }
    }

    pub fn recv(&mut self) -> Vec<u8> {
        self.recv_r.as_ref().unwrap().recv().unwrap()
    }

    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.recv_r.as_ref().unwrap().try_recv().ok()
    }

    pub fn send(&mut self, peer: SocketAddr, message: Vec<u8>) {
        self.send_s.as_ref().unwrap().send((peer, message)).unwrap()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.alive.swap(false, Ordering::Relaxed);
        self.send_s.take().unwrap();
        self.send_thread.take().unwrap().join().unwrap();
        self.recv_thread.take().unwrap().join().unwrap();
    }
}

/// A [`Transport`] over TCP sockets, addressing peers by `"host:port"`.
///
/// `connections` is a `Mutex`, not a `RefCell`: a master shares its transport
/// across the thread that drains inbound messages and the thread that
/// reacts to membership events and sends replies (see [`crate::master`]), so
/// this type must be `Sync`.
pub struct TcpTransport<C> {
    address: SocketAddr,
    coder: C,
    connections: Mutex<ConnectionPool>,
}

impl<C: Coder<Type = WireMessage>> TcpTransport<C> {
    pub fn bind(address: SocketAddr, coder: C) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address)?;
        Ok(Self {
            address,
            coder,
            connections: Mutex::new(ConnectionPool::from_listener(listener)),
        })
    }
}

impl<C: Coder<Type = WireMessage>> Transport for TcpTransport<C> {
    fn local_address(&self) -> Address {
        self.address.to_string()
    }

    fn send(&self, dest: &Address, message: WireMessage) -> Result<(), AllreduceError> {
        let dest: SocketAddr = dest
            .parse()
            .map_err(|e| AllreduceError::Transport(format!("bad address {dest}: {e}")))?;
        let bytes = self.coder.encode(&message);
        self.connections.lock().unwrap().send(dest, bytes);
        Ok(())
    }

    fn recv(&self) -> Result<WireMessage, AllreduceError> {
        let bytes = self.connections.lock().unwrap().recv();
        Ok(self.coder.decode(&bytes))
    }

    fn try_recv(&self) -> Result<Option<WireMessage>, AllreduceError> {
        Ok(self
            .connections
            .lock()
            .unwrap()
            .try_recv()
            .map(|bytes| self.coder.decode(&bytes)))
    }
}

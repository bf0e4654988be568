use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::*;

async fn loopback_pair() -> (TcpStream, TcpStream) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let connect = TcpStream::connect(addr);
	let accept = listener.accept();
	let (client, (server, _)) = tokio::join!(connect, accept);
	(client.unwrap(), server)
}

#[tokio::test]
async fn stall_before_any_bytes_arrive() {
	let (client, _server) = loopback_pair().await;
	let mut t = Transport::plain(client, 4096);
	assert!(matches!(t.read().await.unwrap(), TransportFrame::Stall));
}

#[tokio::test]
async fn reads_chunk_after_peer_writes() {
	let (client, mut server) = loopback_pair().await;
	server.write_all(b"hello").await.unwrap();
	let mut t = Transport::plain(client, 4096);
	t.await_readable().await.unwrap();
	match t.read().await.unwrap() {
		TransportFrame::Chunk(b) => assert_eq!(&b[..], b"hello"),
		other => panic!("expected chunk, got {other:?}"),
	}
}

#[tokio::test]
async fn fin_after_peer_shuts_down() {
	let (client, mut server) = loopback_pair().await;
	server.shutdown().await.unwrap();
	let mut t = Transport::plain(client, 4096);
	t.await_readable().await.unwrap();
	assert!(matches!(t.read().await.unwrap(), TransportFrame::Fin));
}

#[tokio::test]
async fn unread_is_returned_before_any_real_read() {
	let (client, _server) = loopback_pair().await;
	let mut t = Transport::plain(client, 4096);
	t.unread(Bytes::from_static(b"pushed-back"));
	match t.read().await.unwrap() {
		TransportFrame::Chunk(b) => assert_eq!(&b[..], b"pushed-back"),
		other => panic!("expected chunk, got {other:?}"),
	}
}

#[tokio::test]
async fn queue_write_then_write_delivers_bytes() {
	let (client, mut server) = loopback_pair().await;
	let mut t = Transport::plain(client, 4096);
	t.queue_write(b"queued");
	let remaining = t.write().await.unwrap();
	assert_eq!(remaining, 0);
	let mut buf = [0u8; 6];
	server.read_exact(&mut buf).await.unwrap();
	assert_eq!(&buf, b"queued");
}

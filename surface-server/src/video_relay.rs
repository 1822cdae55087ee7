//! Video Relay (spec §4.9): a second UDP socket that forwards the
//! subscribed camera's newest frame to each subscribed controller session.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::frame_bus::FrameBus;
use crate::types::CameraId;

/// One task per subscribed session (spec §5 task inventory), tracking
/// which camera (if any) the session currently wants.
pub struct RelaySubscription {
    camera: watch::Sender<Option<CameraId>>,
}

impl RelaySubscription {
    /// Switches (or clears) the subscribed camera. `MC_CA`/`MC_CB` always
    /// toggle the other off (spec §4.9 / §6), so setting `Some(camera)`
    /// here fully replaces any prior subscription.
    pub fn set(&self, camera: Option<CameraId>) {
        self.camera.send_replace(camera);
    }
}

/// Spawns the relay task for one controller session and returns the
/// handle used to change its subscribed camera. `socket` is shared across
/// all sessions (one bound UDP socket per spec §6); `peer` is the
/// destination the session's datagrams are sent to.
pub fn spawn_session(frame_bus: FrameBus, socket: Arc<UdpSocket>, peer: SocketAddr) -> RelaySubscription {
    let (camera_tx, mut camera_rx) = watch::channel(None::<CameraId>);

    tokio::spawn(async move {
        let mut current: Option<CameraId> = None;
        let mut frames = None;

        loop {
            match &mut frames {
                Some(rx) => {
                    tokio::select! {
                        biased;

                        changed = camera_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            current = *camera_rx.borrow();
                            frames = current.map(|c| frame_bus.subscribe(c));
                        }

                        frame = recv_next(rx) => {
                            match frame {
                                Some(frame) => {
                                    let mut datagram = Vec::with_capacity(2 + frame.jpeg.len());
                                    datagram.push(frame.camera_id as u8);
                                    datagram.push(b':');
                                    datagram.extend_from_slice(&frame.jpeg);
                                    if let Err(err) = socket.send_to(&datagram, peer).await {
                                        tracing::warn!(?err, %peer, "video relay send failed");
                                    }
                                }
                                None => frames = None,
                            }
                        }
                    }
                }
                None => {
                    if camera_rx.changed().await.is_err() {
                        break;
                    }
                    current = *camera_rx.borrow();
                    frames = current.map(|c| frame_bus.subscribe(c));
                }
            }
        }
    });

    RelaySubscription { camera: camera_tx }
}

async fn recv_next(rx: &mut tokio::sync::broadcast::Receiver<crate::frame_bus::Frame>) -> Option<crate::frame_bus::Frame> {
    loop {
        match rx.recv().await {
            Ok(frame) => return Some(frame),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn relays_frames_for_subscribed_camera_only() {
        let frame_bus = FrameBus::new(8, Duration::from_secs(2));
        let server_socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let client_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client_socket.local_addr().unwrap();

        let sub = spawn_session(frame_bus.clone(), server_socket, client_addr);
        sub.set(Some('A'));
        tokio::time::sleep(Duration::from_millis(20)).await;

        frame_bus.put('B', 1, Bytes::from_static(b"wrong-camera"));
        frame_bus.put('A', 2, Bytes::from_static(b"jpeg-bytes"));

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(1), client_socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for relay datagram")
            .unwrap();

        assert_eq!(&buf[..n], b"A:jpeg-bytes");
    }
}

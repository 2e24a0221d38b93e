use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval, sleep_until},
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::{placeholder, store::CameraSlot};
use crate::config::{CameraConfig, StreamSettings};

pub const BOUNDARY: &str = "frame";

/// Wraps one JPEG as a `multipart/x-mixed-replace` part.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut chunk = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    chunk.put_slice(header.as_bytes());
    chunk.put_slice(jpeg);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// Per-client source of multipart chunks for one camera.
///
/// Each call to [`next_chunk`](Self::next_chunk) waits for the next tick and
/// yields the latest stored frame, or a throttled placeholder while the camera
/// is disconnected. Returns `None` once no frame has been available for the
/// configured timeout; a new generator is needed to resume.
pub struct StreamGenerator {
    camera_id: u32,
    display_name: String,
    slot: Arc<CameraSlot>,
    settings: StreamSettings,
    ticker: Interval,
    last_emit: Instant,
    last_placeholder: Option<Instant>,
    placeholder: Option<Bytes>,
}

impl StreamGenerator {
    pub fn new(config: &CameraConfig, slot: Arc<CameraSlot>, settings: StreamSettings) -> Self {
        let mut ticker = interval(config.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            camera_id: config.id,
            display_name: config.display_name.clone(),
            slot,
            settings,
            ticker,
            last_emit: Instant::now(),
            last_placeholder: None,
            placeholder: None,
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        loop {
            if !self.slot.status().connected {
                return Some(self.next_placeholder().await);
            }

            self.ticker.tick().await;
            if let Some(frame) = self.slot.get() {
                self.last_emit = Instant::now();
                return Some(multipart_chunk(&frame.jpeg));
            }
            if self.last_emit.elapsed() > self.settings.frame_timeout {
                warn!("stream timeout for camera {}", self.camera_id);
                return None;
            }
        }
    }

    async fn next_placeholder(&mut self) -> Bytes {
        if let Some(previous) = self.last_placeholder {
            sleep_until(previous + self.settings.placeholder_interval).await;
        }
        let now = Instant::now();
        self.last_placeholder = Some(now);
        self.last_emit = now;

        if let Some(chunk) = &self.placeholder {
            return chunk.clone();
        }
        let jpeg = match placeholder::render_jpeg(self.camera_id, &self.display_name) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                warn!("camera {} placeholder encode failed: {err}", self.camera_id);
                Vec::new()
            }
        };
        let chunk = multipart_chunk(&jpeg);
        self.placeholder = Some(chunk.clone());
        chunk
    }
}

/// Drives a generator into a bounded channel for the HTTP body.
///
/// A channel slot is reserved before the next chunk is produced, so a client
/// that stops reading never leaves the task stuck in a send. The task ends as
/// soon as the body is dropped (client gone), the generator times out, or
/// `shutdown` flips to true.
pub fn spawn_stream(
    mut generator: StreamGenerator,
    mut shutdown: watch::Receiver<bool>,
) -> (ReceiverStream<Result<Bytes, std::io::Error>>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(1);
    let camera_id = generator.camera_id;
    let task = tokio::spawn(async move {
        loop {
            let permit = tokio::select! {
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!("camera {camera_id} stream client went away");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if stop_requested(changed, &shutdown) {
                        info!("camera {camera_id} stream cancelled by shutdown");
                        break;
                    }
                    continue;
                }
            };

            tokio::select! {
                _ = tx.closed() => {
                    debug!("camera {camera_id} stream client went away");
                    break;
                }
                changed = shutdown.changed() => {
                    if stop_requested(changed, &shutdown) {
                        info!("camera {camera_id} stream cancelled by shutdown");
                        break;
                    }
                }
                chunk = generator.next_chunk() => {
                    let Some(chunk) = chunk else {
                        break;
                    };
                    permit.send(Ok(chunk));
                }
            }
        }
        info!("camera {camera_id} stream session closed");
    });
    (ReceiverStream::new(rx), task)
}

fn stop_requested(
    changed: Result<(), watch::error::RecvError>,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    changed.is_err() || *shutdown.borrow()
}

//! The phone acting as the candidate's secondary camera.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::signal::{HeartbeatSource, Origin, SignalEvent};
use crate::proctor::error::{SessionError, SessionResult};
use crate::proctor::media::{CaptureError, CaptureRequest, Facing, MediaDevices, MediaStream};
use crate::proctor::ticker::{Ticker, TimerName};
use crate::proctor::transport::SignalTransport;

/// Negotiation messages the admin viewer addressed to this phone.
#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    Answer { sdp: String },
    IceCandidate(JsonValue),
}

pub struct MobilePeer {
    token: String,
    signals: Arc<dyn SignalTransport>,
    stream: Mutex<Option<Arc<dyn MediaStream>>>,
    ticker: Ticker,
    listener: Mutex<Option<JoinHandle<()>>>,
    negotiations: Mutex<Option<mpsc::UnboundedReceiver<Negotiation>>>,
    connected: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MobilePeer {
    /// Opens the rear camera, joins the exam topic, announces itself and
    /// starts heartbeating every 2 seconds.
    pub async fn connect(
        token: impl Into<String>,
        signals: Arc<dyn SignalTransport>,
        media: Arc<dyn MediaDevices>,
    ) -> SessionResult<Self> {
        let token = token.into();
        let request = CaptureRequest {
            video: true,
            audio: false,
            facing: Facing::Environment,
        };
        let stream = media.open(request).await.map_err(|e| match e {
            CaptureError::Camera(msg) | CaptureError::Microphone(msg) => SessionError::CameraDenied(msg),
        })?;

        let mut incoming = match signals.subscribe(&token).await {
            Ok(incoming) => incoming,
            Err(e) => {
                stream.stop();
                return Err(e.into());
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(async move {
            while let Some(envelope) = incoming.next().await {
                if envelope.origin != Origin::Admin {
                    continue;
                }
                let relayed = match envelope.event {
                    SignalEvent::Answer { sdp, peer: Origin::Mobile } => Negotiation::Answer { sdp },
                    SignalEvent::IceCandidate { candidate, peer: Origin::Mobile } => {
                        Negotiation::IceCandidate(candidate)
                    }
                    _ => continue,
                };
                if tx.send(relayed).is_err() {
                    tracing::debug!("Nobody is negotiating, dropping admin message");
                }
            }
        });

        let peer = Self {
            token,
            signals,
            stream: Mutex::new(Some(stream)),
            ticker: Ticker::new(),
            listener: Mutex::new(Some(listener)),
            negotiations: Mutex::new(Some(rx)),
            connected: AtomicBool::new(true),
        };

        peer.send(SignalEvent::MobileConnected).await;
        let signals = peer.signals.clone();
        let token = peer.token.clone();
        peer.ticker.every(
            TimerName::MobileHeartbeat,
            TimerName::MobileHeartbeat.default_period(),
            move || {
                let signals = signals.clone();
                let token = token.clone();
                async move {
                    let beat = SignalEvent::Heartbeat {
                        source: HeartbeatSource::Mobile,
                    };
                    if let Err(e) = signals.publish(&token, Origin::Mobile, beat).await {
                        tracing::warn!("Mobile heartbeat failed: {}", e);
                    }
                }
            },
        );
        tracing::info!("Secondary camera connected");
        Ok(peer)
    }

    /// Answers and ICE candidates from the admin viewer. Available once.
    pub fn take_negotiations(&self) -> Option<mpsc::UnboundedReceiver<Negotiation>> {
        lock(&self.negotiations).take()
    }

    pub fn stream(&self) -> Option<Arc<dyn MediaStream>> {
        lock(&self.stream).clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn publish_offer(&self, sdp: impl Into<String>) -> bool {
        self.send(SignalEvent::Offer { sdp: sdp.into() }).await
    }

    pub async fn publish_ice_candidate(&self, candidate: JsonValue) -> bool {
        self.send(SignalEvent::IceCandidate {
            candidate,
            peer: Origin::Mobile,
        })
        .await
    }

    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.send(SignalEvent::MobileDisconnected).await;
        self.release();
        tracing::info!("Secondary camera disconnected");
    }

    /// Failures are logged and swallowed.
    async fn send(&self, event: SignalEvent) -> bool {
        let name = event.name();
        match self.signals.publish(&self.token, Origin::Mobile, event).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Mobile could not publish {}: {}", name, e);
                false
            }
        }
    }

    fn release(&self) {
        self.ticker.shutdown();
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            listener.abort();
        }
        let stream = lock(&self.stream).take();
        if let Some(stream) = stream {
            stream.stop();
        }
    }
}

impl Drop for MobilePeer {
    fn drop(&mut self) {
        self.release();
    }
}

use crate::error::SignalingError;
use camrelay::message::{IceCandidate, Message, SignalingPayload};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Builds the shared H.264 track every viewer session sends.
pub fn h264_video_track(stream_id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_H264.to_owned(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: String::new(),
            rtcp_feedback: vec![],
        },
        "video".to_owned(),
        stream_id.to_owned(),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiationProgress {
    New,
    RemoteDescriptionSet,
    Answered,
}

static NEXT_PEER_SERIAL: AtomicU64 = AtomicU64::new(1);

/// One viewer's peer connection.
struct PeerSession {
    peer_id: String,
    serial: u64,
    pc: Arc<RTCPeerConnection>,
    progress: StdMutex<NegotiationProgress>,

    // Remote candidates that arrived before the offer was applied.
    pending_candidates: Mutex<Vec<RTCIceCandidateInit>>,
    rtcp_drain: StdMutex<Option<JoinHandle<()>>>,
}

impl PeerSession {
    fn progress(&self) -> MutexGuard<'_, NegotiationProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn add_remote_candidate(&self, init: RTCIceCandidateInit) -> Result<(), SignalingError> {
        let mut pending = self.pending_candidates.lock().await;

        if *self.progress() == NegotiationProgress::New {
            tracing::debug!(peer_id = %self.peer_id, "queueing early ice candidate");
            pending.push(init);
            return Ok(());
        }
        drop(pending);

        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    /// Marks the remote description applied and feeds queued candidates.
    async fn flush_candidates(&self) {
        let queued = {
            let mut pending = self.pending_candidates.lock().await;
            *self.progress() = NegotiationProgress::RemoteDescriptionSet;
            std::mem::take(&mut *pending)
        };

        for init in queued {
            if let Err(err) = self.pc.add_ice_candidate(init).await {
                tracing::warn!(peer_id = %self.peer_id, error = %err, "dropping queued candidate");
            }
        }
    }

    async fn close(&self) {
        if let Some(task) = self
            .rtcp_drain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        if let Err(err) = self.pc.close().await {
            tracing::warn!(peer_id = %self.peer_id, error = %err, "error closing peer connection");
        }
    }
}

type PeerMap = Mutex<HashMap<String, Arc<PeerSession>>>;

/// Answers viewers' WebRTC offers and keeps one peer session per viewer.
///
/// Outgoing signaling (answers, trickled local candidates) is queued on the
/// `outbound` channel; the device agent forwards it through the relay.
pub struct SignalingRelay {
    local_id: String,
    api: API,
    rtc_config: RTCConfiguration,
    video_track: Arc<TrackLocalStaticSample>,
    outbound: mpsc::UnboundedSender<Message>,
    peers: Arc<PeerMap>,
}

impl SignalingRelay {
    pub fn new(
        local_id: impl Into<String>,
        ice_servers: Vec<String>,
        video_track: Arc<TrackLocalStaticSample>,
        outbound: mpsc::UnboundedSender<Message>,
    ) -> Result<Self, SignalingError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: ice_servers,
                ..Default::default()
            }]
        };

        Ok(Self {
            local_id: local_id.into(),
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
            video_track,
            outbound,
            peers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn video_track(&self) -> Arc<TrackLocalStaticSample> {
        self.video_track.clone()
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }

    pub async fn has_peer(&self, peer_id: &str) -> bool {
        self.peers.lock().await.contains_key(peer_id)
    }

    /// Applies one signaling message from viewer `from`.
    pub async fn handle_signal(
        &self,
        from: &str,
        payload: SignalingPayload,
    ) -> Result<(), SignalingError> {
        match payload {
            SignalingPayload::Offer { sdp } => self.handle_offer(from, sdp).await,
            SignalingPayload::Answer { sdp } => {
                let peer = self.peer(from).await?;
                peer.pc
                    .set_remote_description(RTCSessionDescription::answer(sdp)?)
                    .await?;
                peer.flush_candidates().await;
                Ok(())
            }
            SignalingPayload::IceCandidate(candidate) => {
                let peer = self.peer(from).await?;
                peer.add_remote_candidate(RTCIceCandidateInit {
                    candidate: candidate.candidate,
                    sdp_mid: candidate.sdp_mid,
                    sdp_mline_index: candidate.sdp_mline_index,
                    username_fragment: candidate.username_fragment,
                })
                .await
            }
        }
    }

    async fn peer(&self, peer_id: &str) -> Result<Arc<PeerSession>, SignalingError> {
        self.peers
            .lock()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| SignalingError::UnknownPeer(peer_id.to_string()))
    }

    async fn handle_offer(&self, from: &str, sdp: String) -> Result<(), SignalingError> {
        if sdp.trim().is_empty() {
            return Err(SignalingError::EmptyDescription);
        }
        let offer = RTCSessionDescription::offer(sdp)?;

        let peer = self.create_peer(from).await?;

        // Registered before the offer is applied so candidates racing the
        // offer get queued instead of rejected.
        let replaced = self
            .peers
            .lock()
            .await
            .insert(from.to_string(), peer.clone());
        if let Some(previous) = replaced {
            tracing::info!(peer_id = %from, "replacing existing peer session");
            previous.close().await;
        }

        let negotiated = async {
            peer.pc.set_remote_description(offer).await?;
            peer.flush_candidates().await;

            let answer = peer.pc.create_answer(None).await?;
            peer.pc.set_local_description(answer.clone()).await?;

            Ok::<_, SignalingError>(
                peer.pc
                    .local_description()
                    .await
                    .map_or(answer.sdp, |description| description.sdp),
            )
        }
        .await;

        let sdp = match negotiated {
            Ok(sdp) => sdp,
            Err(err) => {
                self.evict_serial(from, peer.serial).await;
                return Err(err);
            }
        };

        *peer.progress() = NegotiationProgress::Answered;
        tracing::info!(peer_id = %from, "answered offer");

        let answer = Message::signaling(&self.local_id, from, SignalingPayload::Answer { sdp });
        if self.outbound.send(answer).is_err() {
            tracing::warn!(peer_id = %from, "outbound queue closed; answer dropped");
        }
        Ok(())
    }

    async fn create_peer(&self, peer_id: &str) -> Result<Arc<PeerSession>, SignalingError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_config.clone())
                .await?,
        );

        let rtp_sender = pc
            .add_track(self.video_track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be read for the interceptors to work.
        let rtcp_drain = tokio::spawn(async move {
            let mut buffer = vec![0u8; 1500];
            while rtp_sender.read(&mut buffer).await.is_ok() {}
        });

        let serial = NEXT_PEER_SERIAL.fetch_add(1, Ordering::Relaxed);

        let outbound = self.outbound.clone();
        let local_id = self.local_id.clone();
        let remote_id = peer_id.to_string();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let outbound = outbound.clone();
            let local_id = local_id.clone();
            let remote_id = remote_id.clone();

            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };

                match candidate.to_json() {
                    Ok(init) => {
                        let trickle = Message::signaling(
                            local_id,
                            remote_id,
                            SignalingPayload::IceCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }),
                        );
                        let _ = outbound.send(trickle);
                    }
                    Err(err) => tracing::warn!(error = %err, "unserializable local candidate"),
                }
            })
        }));

        let peers: Weak<PeerMap> = Arc::downgrade(&self.peers);
        let remote_id = peer_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let peers = peers.clone();
            let remote_id = remote_id.clone();

            Box::pin(async move {
                tracing::info!(peer_id = %remote_id, %state, "peer connection state changed");

                if !matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    return;
                }
                let Some(peers) = peers.upgrade() else {
                    return;
                };

                let evicted = take_if_current(&peers, &remote_id, serial).await;
                if let (Some(peer), RTCPeerConnectionState::Failed) = (evicted, state) {
                    // Closing from inside the connection's own callback would
                    // wait on itself.
                    tokio::spawn(async move { peer.close().await });
                }
            })
        }));

        Ok(Arc::new(PeerSession {
            peer_id: peer_id.to_string(),
            serial,
            pc,
            progress: StdMutex::new(NegotiationProgress::New),
            pending_candidates: Mutex::new(Vec::new()),
            rtcp_drain: StdMutex::new(Some(rtcp_drain)),
        }))
    }

    async fn evict_serial(&self, peer_id: &str, serial: u64) {
        if let Some(peer) = take_if_current(&self.peers, peer_id, serial).await {
            peer.close().await;
        }
    }

    /// Closes and forgets `peer_id`'s session. Returns whether one existed.
    pub async fn evict(&self, peer_id: &str) -> bool {
        let removed = self.peers.lock().await.remove(peer_id);

        match removed {
            Some(peer) => {
                tracing::info!(%peer_id, "evicting peer session");
                peer.close().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.peers.lock().await.drain().map(|(_, peer)| peer).collect();

        for peer in drained {
            peer.close().await;
        }
    }
}

/// Removes `peer_id` only while it still maps to the session with `serial`.
async fn take_if_current(peers: &PeerMap, peer_id: &str, serial: u64) -> Option<Arc<PeerSession>> {
    let mut peers = peers.lock().await;

    if peers.get(peer_id).is_some_and(|peer| peer.serial == serial) {
        peers.remove(peer_id)
    } else {
        None
    }
}

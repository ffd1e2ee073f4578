//! Point-to-point transfer backend.
//!
//! Instead of parking shards in an object store, the mapper pushes them
//! straight to a transfer sink ([`TransferService`]) which keeps them in
//! memory until a reducer pulls them. Every push is answered with an opaque
//! token; the token, not the key, is the handle handed to reducers.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tonic::transport::Channel;
use tonic::{Code, Request, Response, Status};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Blobstore, StoreError};
use crate::proto::transfer_client::TransferClient;
use crate::proto::transfer_server::Transfer;
use crate::proto::{PullReply, PullRequest, PushReply, PushRequest};

/// Client side: a [`Blobstore`] that talks to a remote transfer sink.
#[derive(Clone, Debug)]
pub struct TransferBlobstore {
    client: TransferClient<Channel>,
}

impl TransferBlobstore {
    pub async fn connect(addr: &str) -> Result<Self, tonic::transport::Error> {
        let client = TransferClient::connect(format!("http://{addr}")).await?;
        Ok(Self { client })
    }

    pub fn new(client: TransferClient<Channel>) -> Self {
        Self { client }
    }
}

/// Maps a sink status onto the blobstore taxonomy.
pub fn status_to_store_error(key: &str, status: Status) -> StoreError {
    match status.code() {
        Code::NotFound => StoreError::NotFound(key.to_string()),
        Code::ResourceExhausted => StoreError::QuotaExceeded(format!("{key}: {}", status.message())),
        _ => StoreError::Unavailable(format!("{key}: {status}")),
    }
}

#[tonic::async_trait]
impl Blobstore for TransferBlobstore {
    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StoreError> {
        // The generated client needs `&mut self`; clones share the channel.
        let mut client = self.client.clone();
        let request = Request::new(PullRequest {
            container: container.to_string(),
            token: key.to_string(),
        });
        let reply = client
            .pull(request)
            .await
            .map_err(|status| status_to_store_error(key, status))?;
        Ok(Bytes::from(reply.into_inner().payload))
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<String, StoreError> {
        let mut client = self.client.clone();
        let request = Request::new(PushRequest {
            container: container.to_string(),
            key: key.to_string(),
            payload: data.to_vec(),
        });
        let reply = client
            .push(request)
            .await
            .map_err(|status| status_to_store_error(key, status))?;
        Ok(reply.into_inner().token)
    }

    fn name(&self) -> &'static str {
        "point-to-point"
    }
}

/// Server side: the transfer sink. Payloads stay in memory, bounded by a
/// byte quota. A payload can be pulled by its token or by the key it was
/// last pushed under, so pushing the same key again replaces what a
/// key-based pull returns.
#[derive(Debug)]
pub struct TransferService {
    payloads: DashMap<(String, String), Bytes>,
    aliases: DashMap<(String, String), String>,
    used_bytes: AtomicUsize,
    quota_bytes: usize,
}

impl TransferService {
    pub fn new(quota_bytes: usize) -> Self {
        Self {
            payloads: DashMap::new(),
            aliases: DashMap::new(),
            used_bytes: AtomicUsize::new(0),
            quota_bytes,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::SeqCst)
    }

    fn reserve(&self, len: usize) -> Result<(), Status> {
        let quota = self.quota_bytes;
        self.used_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(len).filter(|total| *total <= quota)
            })
            .map(|_| ())
            .map_err(|used| {
                Status::resource_exhausted(format!("{len} bytes requested, {used} of {quota} in use"))
            })
    }
}

#[tonic::async_trait]
impl Transfer for TransferService {
    async fn push(&self, request: Request<PushRequest>) -> Result<Response<PushReply>, Status> {
        let PushRequest { container, key, payload } = request.into_inner();
        if container.is_empty() {
            return Err(Status::invalid_argument("container must not be empty"));
        }
        self.reserve(payload.len())?;

        let token = Uuid::new_v4().to_string();
        debug!(%container, %key, %token, len = payload.len(), "push");
        self.payloads
            .insert((container.clone(), token.clone()), Bytes::from(payload));
        if !key.is_empty() {
            // Re-pushing a key releases the payload it used to point to.
            if let Some(previous) = self.aliases.insert((container.clone(), key), token.clone()) {
                if let Some((_, old)) = self.payloads.remove(&(container, previous)) {
                    self.used_bytes.fetch_sub(old.len(), Ordering::SeqCst);
                }
            }
        }
        Ok(Response::new(PushReply { token }))
    }

    async fn pull(&self, request: Request<PullRequest>) -> Result<Response<PullReply>, Status> {
        let PullRequest { container, token } = request.into_inner();
        let token = self
            .aliases
            .get(&(container.clone(), token.clone()))
            .map(|t| t.value().clone())
            .unwrap_or(token);
        match self.payloads.get(&(container.clone(), token.clone())) {
            Some(payload) => Ok(Response::new(PullReply {
                payload: payload.value().to_vec(),
            })),
            None => {
                info!(%container, %token, "pull of unknown payload");
                Err(Status::not_found(format!("{container}/{token}")))
            }
        }
    }
}

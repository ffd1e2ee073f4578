//! gRPC front end of the map engine.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Request, Response, Status};
use tracing::info;

use crate::engine::{validate, MapEngine};
use crate::proto::mapper_server::Mapper;
use crate::proto::{MapReply, MapRequest};

/// Serves `RunMap` over one shared engine. A malformed request is rejected
/// with `INVALID_ARGUMENT`; map failures are reported in the reply body, so callers always get counters and
/// a detail message.
#[derive(Clone)]
pub struct MapperService {
    engine: Arc<MapEngine>,
}

impl MapperService {
    pub fn new(engine: Arc<MapEngine>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl Mapper for MapperService {
    async fn run_map(&self, request: Request<MapRequest>) -> Result<Response<MapReply>, Status> {
        let request = request.into_inner();
        let deadline = match request.deadline_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let request = crate::MapRequest::from(request);
        validate(&request).map_err(Status::from)?;
        info!(job = %request.job_id, mapper = %request.mapper_id, "mapper invoked");

        let reply = self.engine.reply(&request, deadline).await;
        Ok(Response::new(reply.into()))
    }
}

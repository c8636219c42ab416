use crate::{
    connection::Connection,
    error::{GrpcServerError, GrpcServerResult},
};
use nodesvc_core::debug;
use nodesvc_grpc_core::protowire::{
    GetMempoolResponseMessage, GetServiceInfoResponseMessage, NodeRequest, NodeResponse, SubscribeResponseMessage,
    SubscriberEntry as ProtoSubscriberEntry, UnsubscribeResponseMessage, node_request, node_response::Payload,
};
use nodesvc_notify::notification::SubscriberEntry;

/// Answers the requests of one connection.
pub struct RequestHandler {
    connection: Connection,
}

impl RequestHandler {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub async fn handle_request(&self, request: NodeRequest) -> GrpcServerResult<NodeResponse> {
        let id = request.id;
        let payload = request.payload.ok_or(GrpcServerError::InvalidRequestPayload)?;
        debug!("gRPC, handling {} request #{} of client {}", payload.name(), id, self.connection);
        let payload = match payload {
            node_request::Payload::SubscribeRequest(request) => {
                let response = match validate(&request.address, request.entry.as_ref()) {
                    Ok(entry) => {
                        SubscribeResponseMessage { added: self.connection.add_subscription(&request.address, entry), error: None }
                    }
                    Err(err) => SubscribeResponseMessage { added: false, error: Some(err.into()) },
                };
                Payload::SubscribeResponse(response)
            }
            node_request::Payload::UnsubscribeRequest(request) => {
                let response = match validate(&request.address, request.entry.as_ref()) {
                    Ok(entry) => UnsubscribeResponseMessage {
                        removed: self.connection.remove_subscription(&request.address, entry),
                        error: None,
                    },
                    Err(err) => UnsubscribeResponseMessage { removed: false, error: Some(err.into()) },
                };
                Payload::UnsubscribeResponse(response)
            }
            node_request::Payload::GetMempoolRequest(_) => {
                let response = match self.connection.server_context().mempool.mempool().await {
                    Ok(records) => GetMempoolResponseMessage { entries: records.iter().map(|x| x.into()).collect(), error: None },
                    Err(err) => GetMempoolResponseMessage { entries: vec![], error: Some(GrpcServerError::from(err).into()) },
                };
                Payload::GetMempoolResponse(response)
            }
            node_request::Payload::GetServiceInfoRequest(_) => {
                let info = &self.connection.server_context().service_info;
                Payload::GetServiceInfoResponse(GetServiceInfoResponseMessage {
                    version: info.version.clone(),
                    branch: info.branch.clone(),
                    commit: info.commit.clone(),
                    build_time: info.build_time.clone(),
                    generation: info.generation,
                    error: None,
                })
            }
        };
        Ok(NodeResponse { id, payload: Some(payload) })
    }
}

fn validate(address: &str, entry: Option<&ProtoSubscriberEntry>) -> GrpcServerResult<SubscriberEntry> {
    if address.is_empty() {
        return Err(GrpcServerError::InvalidSubscription("empty address"));
    }
    let entry = entry.ok_or(GrpcServerError::InvalidSubscription("missing subscriber entry"))?;
    if entry.user_id.is_empty() {
        return Err(GrpcServerError::InvalidSubscription("empty user id"));
    }
    Ok(entry.into())
}

use crate::protowire::{
    GetMempoolRequestMessage, GetServiceInfoRequestMessage, NodeRequest, NodeResponse, SubscribeRequestMessage,
    UnsubscribeRequestMessage, node_request, node_response,
};
use nodesvc_notify::{events::EventType, notification::SubscriberEntry};

impl NodeRequest {
    pub fn subscribe(id: u64, address: impl Into<String>, entry: &SubscriberEntry) -> Self {
        let payload = SubscribeRequestMessage { address: address.into(), entry: Some(entry.into()) };
        NodeRequest { id, payload: Some(node_request::Payload::SubscribeRequest(payload)) }
    }

    pub fn unsubscribe(id: u64, address: impl Into<String>, entry: &SubscriberEntry) -> Self {
        let payload = UnsubscribeRequestMessage { address: address.into(), entry: Some(entry.into()) };
        NodeRequest { id, payload: Some(node_request::Payload::UnsubscribeRequest(payload)) }
    }

    pub fn get_mempool(id: u64) -> Self {
        NodeRequest { id, payload: Some(node_request::Payload::GetMempoolRequest(GetMempoolRequestMessage {})) }
    }

    pub fn get_service_info(id: u64) -> Self {
        NodeRequest { id, payload: Some(node_request::Payload::GetServiceInfoRequest(GetServiceInfoRequestMessage {})) }
    }
}

impl node_request::Payload {
    pub fn name(&self) -> &'static str {
        match self {
            node_request::Payload::SubscribeRequest(_) => "subscribe",
            node_request::Payload::UnsubscribeRequest(_) => "unsubscribe",
            node_request::Payload::GetMempoolRequest(_) => "get-mempool",
            node_request::Payload::GetServiceInfoRequest(_) => "get-service-info",
        }
    }
}

impl NodeResponse {
    pub fn is_notification(&self) -> bool {
        self.notification_type().is_some()
    }

    pub fn notification_type(&self) -> Option<EventType> {
        match self.payload.as_ref()? {
            node_response::Payload::MempoolAddedNotification(_) => Some(EventType::MempoolAdded),
            node_response::Payload::MempoolDeletedNotification(_) => Some(EventType::MempoolDeleted),
            node_response::Payload::SpentOutputNotification(_) => Some(EventType::SpentOutput),
            node_response::Payload::BlockAddedNotification(_) => Some(EventType::BlockAdded),
            node_response::Payload::ResyncNotification(_) => Some(EventType::Resync),
            node_response::Payload::NewTransactionNotification(_) => Some(EventType::NewTransaction),
            _ => None,
        }
    }
}

use crate::{
    convert::message::{subscribers_from_proto, subscribers_into_proto},
    error::{ConversionError, ConversionResult},
    protowire::{self, node_response::Payload},
};
use nodesvc_notify::notification::{
    BlockAdded, MempoolDeleted, MempoolRecord, NewTransaction, Notification, ResyncRequest, SpentOutput,
};

impl From<&Notification> for Payload {
    fn from(item: &Notification) -> Self {
        match item {
            Notification::MempoolAdded(record) => {
                Payload::MempoolAddedNotification(protowire::MempoolAddedNotificationMessage { record: Some(record.into()) })
            }
            Notification::MempoolDeleted(deleted) => {
                Payload::MempoolDeletedNotification(protowire::MempoolDeletedNotificationMessage {
                    transaction_hash: deleted.transaction_hash.clone(),
                })
            }
            Notification::SpentOutput(spent, subscribers) => Payload::SpentOutputNotification(protowire::SpentOutputNotificationMessage {
                address: spent.address.clone(),
                transaction_hash: spent.transaction_hash.clone(),
                output_index: spent.output_index,
                spending_transaction_hash: spent.spending_transaction_hash.clone(),
                amount: spent.amount,
                subscribers: subscribers_into_proto(subscribers),
            }),
            Notification::BlockAdded(block) => {
                Payload::BlockAddedNotification(protowire::BlockAddedNotificationMessage { height: block.height, hash: block.hash.clone() })
            }
            Notification::Resync(resync) => Payload::ResyncNotification(protowire::ResyncNotificationMessage {
                from_height: resync.from_height,
                to_height: resync.to_height,
            }),
            Notification::NewTransaction(transaction, subscribers) => {
                Payload::NewTransactionNotification(protowire::NewTransactionNotificationMessage {
                    address: transaction.address.clone(),
                    transaction_hash: transaction.transaction_hash.clone(),
                    output_index: transaction.output_index,
                    amount: transaction.amount,
                    block_height: transaction.block_height,
                    subscribers: subscribers_into_proto(subscribers),
                })
            }
        }
    }
}

impl From<&Notification> for protowire::NodeResponse {
    fn from(item: &Notification) -> Self {
        Self { id: 0, payload: Some(item.into()) }
    }
}

impl TryFrom<&Payload> for Notification {
    type Error = ConversionError;

    fn try_from(item: &Payload) -> ConversionResult<Self> {
        let notification = match item {
            Payload::MempoolAddedNotification(message) => {
                let record = message.record.as_ref().ok_or(ConversionError::MissingField("record"))?;
                Notification::MempoolAdded(MempoolRecord::from(record))
            }
            Payload::MempoolDeletedNotification(message) => {
                Notification::MempoolDeleted(MempoolDeleted { transaction_hash: message.transaction_hash.clone() })
            }
            Payload::SpentOutputNotification(message) => Notification::SpentOutput(
                SpentOutput {
                    address: message.address.clone(),
                    transaction_hash: message.transaction_hash.clone(),
                    output_index: message.output_index,
                    spending_transaction_hash: message.spending_transaction_hash.clone(),
                    amount: message.amount,
                },
                subscribers_from_proto(&message.subscribers),
            ),
            Payload::BlockAddedNotification(message) => {
                Notification::BlockAdded(BlockAdded { height: message.height, hash: message.hash.clone() })
            }
            Payload::ResyncNotification(message) => {
                Notification::Resync(ResyncRequest { from_height: message.from_height, to_height: message.to_height })
            }
            Payload::NewTransactionNotification(message) => Notification::NewTransaction(
                NewTransaction {
                    address: message.address.clone(),
                    transaction_hash: message.transaction_hash.clone(),
                    output_index: message.output_index,
                    amount: message.amount,
                    block_height: message.block_height,
                },
                subscribers_from_proto(&message.subscribers),
            ),
            Payload::SubscribeResponse(_)
            | Payload::UnsubscribeResponse(_)
            | Payload::GetMempoolResponse(_)
            | Payload::GetServiceInfoResponse(_) => return Err(ConversionError::NotANotification),
        };
        Ok(notification)
    }
}

impl TryFrom<&protowire::NodeResponse> for Notification {
    type Error = ConversionError;

    fn try_from(item: &protowire::NodeResponse) -> ConversionResult<Self> {
        item.payload.as_ref().ok_or(ConversionError::MissingField("payload"))?.try_into()
    }
}

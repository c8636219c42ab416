use crate::protowire;
use nodesvc_notify::notification::{MempoolRecord, SubscriberEntry};

macro_rules! from {
    // Capture
    ($name:ident : $from_type:ty, $to_type:ty, $body:block) => {
        impl From<$from_type> for $to_type {
            fn from($name: $from_type) -> Self {
                $body
            }
        }
    };
}

from!(item: &SubscriberEntry, protowire::SubscriberEntry, {
    Self { user_id: item.user_id.clone(), wallet_index: item.wallet_index, address_index: item.address_index }
});

from!(item: &protowire::SubscriberEntry, SubscriberEntry, {
    Self { user_id: item.user_id.clone(), wallet_index: item.wallet_index, address_index: item.address_index }
});

from!(item: &MempoolRecord, protowire::MempoolRecord, {
    Self { fee_rate: item.fee_rate, transaction_hash: item.transaction_hash.clone() }
});

from!(item: &protowire::MempoolRecord, MempoolRecord, { Self::new(item.fee_rate, item.transaction_hash.clone()) });

from!(message: String, protowire::RpcError, { Self { message } });

from!(message: &str, protowire::RpcError, { Self { message: message.to_string() } });

pub(crate) fn subscribers_into_proto(subscribers: &[SubscriberEntry]) -> Vec<protowire::SubscriberEntry> {
    subscribers.iter().map(|x| x.into()).collect()
}

pub(crate) fn subscribers_from_proto(subscribers: &[protowire::SubscriberEntry]) -> Vec<SubscriberEntry> {
    subscribers.iter().map(|x| x.into()).collect()
}

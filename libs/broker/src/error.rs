use crate::SubscriberId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Unsubscribe of a handle the registry does not hold (already
    /// removed, or never registered with this broker).
    #[error("attempted to unsubscribe {0} which is not subscribed")]
    NotSubscribed(SubscriberId),

    /// The event loop has shut down; the request was never serviced.
    #[error("broker stopped")]
    Stopped,
}

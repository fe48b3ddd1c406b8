pub mod error;

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use error::BrokerError;

/// Буфер очереди запросов к event loop'у. Каждый вызывающий всё равно
/// ждёт ответа, так что это лишь сглаживание всплесков.
const COMMAND_BUFFER: usize = 64;

// ═══════════════════════════════════════════════════════════════
//  Subscriber handle
// ═══════════════════════════════════════════════════════════════

/// Идентификатор подписчика внутри одного broker'а.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "subscriber#{}", self.0)
    }
}

/// Handle подписчика: receiving half канала доставки + id для отписки.
///
/// Sending half принадлежит registry внутри event loop'а; канал
/// закрывается только там (Unsubscribe или shutdown).
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Следующий payload. `None` — канал закрыт broker'ом.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Неблокирующая проверка (для тестов и диагностики).
    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Разобрать handle. Drop'нутый receiver не даёт event loop'у
    /// застрять на доставке, пока идёт отписка.
    pub fn into_parts(self) -> (SubscriberId, mpsc::Receiver<Bytes>) {
        (self.id, self.rx)
    }
}

// ═══════════════════════════════════════════════════════════════
//  State machine
// ═══════════════════════════════════════════════════════════════

/// `Running → ShuttingDown → Stopped`. Переход из `Running` только по
/// отмене shutdown-токена.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Running,
    ShuttingDown,
    Stopped,
}

// ═══════════════════════════════════════════════════════════════
//  Broker — clonable handle to the event loop
// ═══════════════════════════════════════════════════════════════

enum Command {
    Subscribe {
        reply: oneshot::Sender<Subscription>,
    },
    Unsubscribe {
        id: SubscriberId,
        reply: oneshot::Sender<Result<(), BrokerError>>,
    },
    Publish {
        payload: Bytes,
        reply: oneshot::Sender<usize>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Broker одного topic'а.
///
/// Registry подписчиков принадлежит единственной задаче (event loop);
/// все мутации сериализуются через канал запросов, поэтому lock'ов нет.
/// Каждый вызов — запрос + ожидание ответа от loop'а.
#[derive(Clone)]
pub struct Broker {
    topic: String,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<BrokerState>,
}

impl Broker {
    /// Запустить event loop. Loop работает, пока не отменён `shutdown`.
    ///
    /// `subscriber_buffer` — ёмкость канала доставки каждого подписчика.
    pub fn spawn(
        topic: impl Into<String>,
        subscriber_buffer: usize,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let topic = topic.into();
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(BrokerState::Running);

        let event_loop = EventLoop {
            topic: topic.clone(),
            rx,
            users: HashMap::new(),
            next_id: 0,
            subscriber_buffer: subscriber_buffer.max(1),
            state: state_tx,
        };
        let handle = tokio::spawn(event_loop.run(shutdown));

        (Self { topic, commands, state }, handle)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> BrokerState {
        *self.state.borrow()
    }

    /// Зарегистрировать нового подписчика.
    pub async fn subscribe(&self) -> Result<Subscription, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Subscribe { reply }, rx).await
    }

    /// Удалить подписчика и закрыть его канал.
    ///
    /// `NotSubscribed`, если registry его уже не содержит.
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Unsubscribe { id, reply }, rx).await?
    }

    /// Доставить payload всем зарегистрированным подписчикам, по одному.
    ///
    /// Возвращается после доставки; результат — число подписчиков,
    /// принявших payload. Медленный подписчик задерживает остальных.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> Result<usize, BrokerError> {
        let (reply, rx) = oneshot::channel();
        let payload = payload.into();
        self.request(Command::Publish { payload, reply }, rx).await
    }

    pub async fn subscriber_count(&self) -> Result<usize, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Count { reply }, rx).await
    }

    async fn request<T>(&self, command: Command, rx: oneshot::Receiver<T>) -> Result<T, BrokerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BrokerError::Stopped)?;
        rx.await.map_err(|_| BrokerError::Stopped)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Event loop
// ═══════════════════════════════════════════════════════════════

struct EventLoop {
    topic: String,
    rx: mpsc::Receiver<Command>,
    users: HashMap<SubscriberId, mpsc::Sender<Bytes>>,
    next_id: u64,
    subscriber_buffer: usize,
    state: watch::Sender<BrokerState>,
}

impl EventLoop {
    async fn run(mut self, shutdown: CancellationToken) {
        tracing::debug!(topic = %self.topic, "broker running");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command, &shutdown).await,
                    None => break,
                },
            }
        }
        self.shutdown();
    }

    async fn handle(&mut self, command: Command, shutdown: &CancellationToken) {
        match command {
            Command::Subscribe { reply } => {
                let id = SubscriberId(self.next_id);
                self.next_id += 1;
                let (tx, rx) = mpsc::channel(self.subscriber_buffer);
                self.users.insert(id, tx);
                tracing::debug!(topic = %self.topic, %id, subscribers = self.users.len(), "subscribed");
                // A caller gone before the reply leaves a registered
                // subscriber nobody reads; sends to it fail and are skipped.
                let _ = reply.send(Subscription { id, rx });
            }
            Command::Unsubscribe { id, reply } => {
                let result = match self.users.remove(&id) {
                    // Dropping the only sender closes the channel.
                    Some(_tx) => {
                        tracing::debug!(topic = %self.topic, %id, subscribers = self.users.len(), "unsubscribed");
                        Ok(())
                    }
                    None => {
                        tracing::warn!(topic = %self.topic, %id, "unsubscribe of unknown subscriber");
                        Err(BrokerError::NotSubscribed(id))
                    }
                };
                let _ = reply.send(result);
            }
            Command::Publish { payload, reply } => {
                let mut delivered = 0;
                for (id, tx) in &self.users {
                    // A stalled subscriber must not hold up shutdown.
                    let sent = tokio::select! {
                        sent = tx.send(payload.clone()) => sent,
                        _ = shutdown.cancelled() => break,
                    };
                    match sent {
                        Ok(()) => delivered += 1,
                        Err(_) => {
                            tracing::debug!(topic = %self.topic, %id, "subscriber receiver dropped, skipping");
                        }
                    }
                }
                let _ = reply.send(delivered);
            }
            Command::Count { reply } => {
                let _ = reply.send(self.users.len());
            }
        }
    }

    fn shutdown(&mut self) {
        self.state.send_replace(BrokerState::ShuttingDown);
        let closed = self.users.len();
        self.users.clear();
        // Pending requests still queued get their reply senders dropped.
        self.rx.close();
        self.state.send_replace(BrokerState::Stopped);
        tracing::info!(topic = %self.topic, closed, "broker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::error::TryRecvError;

    use super::*;

    fn spawn_broker(buffer: usize) -> (Broker, JoinHandle<()>, CancellationToken) {
        let token = CancellationToken::new();
        let (broker, handle) = Broker::spawn("test", buffer, token.clone());
        (broker, handle, token)
    }

    #[tokio::test]
    async fn publish_reaches_every_registered_subscriber_once() {
        let (broker, _h, _t) = spawn_broker(4);
        let mut a = broker.subscribe().await.unwrap();
        let mut b = broker.subscribe().await.unwrap();
        assert_ne!(a.id(), b.id());

        assert_eq!(broker.publish("hello world").await.unwrap(), 2);

        assert_eq!(a.recv().await.unwrap(), "hello world");
        assert_eq!(b.recv().await.unwrap(), "hello world");
        assert_eq!(a.try_recv().unwrap_err(), TryRecvError::Empty);
        assert_eq!(b.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_publish() {
        let (broker, _h, _t) = spawn_broker(4);
        let mut early = broker.subscribe().await.unwrap();
        broker.publish("first").await.unwrap();

        let mut late = broker.subscribe().await.unwrap();
        assert_eq!(late.try_recv().unwrap_err(), TryRecvError::Empty);

        broker.publish("second").await.unwrap();
        assert_eq!(early.recv().await.unwrap(), "first");
        assert_eq!(early.recv().await.unwrap(), "second");
        assert_eq!(late.recv().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn publish_without_subscribers_delivers_nothing() {
        let (broker, _h, _t) = spawn_broker(1);
        assert_eq!(broker.publish("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_closes_channel() {
        let (broker, _h, _t) = spawn_broker(4);
        let mut sub = broker.subscribe().await.unwrap();

        broker.unsubscribe(sub.id()).await.unwrap();

        assert_eq!(sub.recv().await, None);
        assert_eq!(broker.subscriber_count().await.unwrap(), 0);
        assert_eq!(broker.publish("after").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn double_unsubscribe_is_reported_not_fatal() {
        let (broker, _h, _t) = spawn_broker(4);
        let sub = broker.subscribe().await.unwrap();
        let id = sub.id();

        broker.unsubscribe(id).await.unwrap();
        assert_eq!(broker.unsubscribe(id).await, Err(BrokerError::NotSubscribed(id)));

        // Loop is still serving.
        assert_eq!(broker.state(), BrokerState::Running);
        assert!(broker.subscribe().await.is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_of_foreign_handle_is_not_subscribed() {
        let (one, _h1, _t1) = spawn_broker(4);
        let (other, _h2, _t2) = spawn_broker(4);
        let _keep = one.subscribe().await.unwrap();
        let _keep2 = one.subscribe().await.unwrap();
        let foreign = one.subscribe().await.unwrap();

        assert_eq!(
            other.unsubscribe(foreign.id()).await,
            Err(BrokerError::NotSubscribed(foreign.id()))
        );
        assert_eq!(one.subscriber_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_stall_publish() {
        let (broker, _h, _t) = spawn_broker(1);
        let gone = broker.subscribe().await.unwrap();
        let mut alive = broker.subscribe().await.unwrap();
        let (gone_id, gone_rx) = gone.into_parts();
        drop(gone_rx);

        assert_eq!(broker.publish("one").await.unwrap(), 1);
        assert_eq!(alive.recv().await.unwrap(), "one");

        // Still registered until unsubscribed, exactly once.
        assert_eq!(broker.subscriber_count().await.unwrap(), 2);
        broker.unsubscribe(gone_id).await.unwrap();
        assert_eq!(broker.unsubscribe(gone_id).await, Err(BrokerError::NotSubscribed(gone_id)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_subscriber_blocks_publish() {
        let (broker, _h, _t) = spawn_broker(1);
        let mut stalled = broker.subscribe().await.unwrap();

        broker.publish("fills buffer").await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_secs(5), broker.publish("blocks")).await;
        assert!(blocked.is_err(), "publish must wait for the subscriber");

        // Other requests queue behind the stuck delivery.
        let count = tokio::time::timeout(Duration::from_secs(5), broker.subscriber_count()).await;
        assert!(count.is_err());

        assert_eq!(stalled.recv().await.unwrap(), "fills buffer");
        assert_eq!(stalled.recv().await.unwrap(), "blocks");
    }

    #[tokio::test]
    async fn shutdown_interrupts_blocked_publish() {
        let (broker, handle, token) = spawn_broker(1);
        let _stalled = broker.subscribe().await.unwrap();
        broker.publish("fills buffer").await.unwrap();

        let blocked = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.publish("blocks").await })
        };
        tokio::task::yield_now().await;

        token.cancel();
        handle.await.unwrap();

        assert_eq!(blocked.await.unwrap(), Err(BrokerError::Stopped));
        assert_eq!(broker.state(), BrokerState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_closes_all_and_stops() {
        let (broker, handle, token) = spawn_broker(4);
        let mut a = broker.subscribe().await.unwrap();
        let mut b = broker.subscribe().await.unwrap();

        token.cancel();
        handle.await.unwrap();

        assert_eq!(broker.state(), BrokerState::Stopped);
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, None);
        assert_eq!(broker.publish("late").await, Err(BrokerError::Stopped));
        assert!(matches!(broker.subscribe().await, Err(BrokerError::Stopped)));
        assert_eq!(broker.unsubscribe(a.id()).await, Err(BrokerError::Stopped));
    }
}

//! Очередь уведомлений о событиях жизненного цикла.
//!
//! Уведомления ставятся в очередь только после коммита изменения статуса,
//! обратного влияния на исход операции у них нет. Очередь ограничена;
//! при переполнении уведомление теряется с warn в логе, но сама операция
//! не блокируется и не падает.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    OrderConfirmed {
        order_id: i64,
        user_id: i64,
        event_id: i64,
        ticket_count: usize,
        attendee_email: String,
    },
    OrderCancelled {
        order_id: i64,
        user_id: i64,
        event_id: i64,
        reason: String,
    },
    TicketCheckedIn {
        ticket_id: i64,
        event_id: i64,
        staff_id: i64,
    },
}

#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    /// Очередь с фоновым воркером; живёт до остановки процесса.
    pub fn spawn(queue_capacity: usize) -> Notifier {
        let (notifier, rx) = Notifier::channel(queue_capacity);
        tokio::spawn(dispatch_loop(rx));
        notifier
    }

    /// Очередь без воркера - потребителя забирает вызывающая сторона.
    /// Тесты через неё проверяют, что именно было поставлено в очередь.
    pub fn channel(queue_capacity: usize) -> (Notifier, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        (Notifier { tx }, rx)
    }

    pub fn notify(&self, notification: Notification) {
        if let Err(e) = self.tx.try_send(notification) {
            warn!("notification dropped: {e}");
        }
    }
}

async fn dispatch_loop(mut rx: mpsc::Receiver<Notification>) {
    while let Some(n) = rx.recv().await {
        // Сейчас доставка - структурированная запись в лог; внешние
        // доставщики (email, push) подключаются здесь же.
        let payload = serde_json::to_string(&n).unwrap_or_default();
        info!(target: "kassa::notify", "📨 {payload}");
    }
}

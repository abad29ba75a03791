use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::NewNotification;
use crate::schema::{notifications, users};

/// Hard cap on the feed returned to a client.
pub const FEED_LIMIT: i64 = 50;

const HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PendingApproval,
    Approved,
    Rejected,
    ImprovementFollowUp,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::PendingApproval => "pending_approval",
            NotificationKind::Approved => "approved",
            NotificationKind::Rejected => "rejected",
            NotificationKind::ImprovementFollowUp => "improvement_follow_up",
        }
    }
}

/// Fan-out of "your feed changed" signals to live subscribers.
#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<Uuid>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, user_id: Uuid) {
        // No live subscribers is the common case.
        let _ = self.sender.send(user_id);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Uuid> {
        self.sender.subscribe()
    }
}

pub struct NewFeedEntry<'a> {
    pub kind: NotificationKind,
    pub title: &'a str,
    pub message: &'a str,
    pub document_id: Option<Uuid>,
}

/// Inserts one notification per recipient. Failures are logged and
/// reported as zero inserted rows; callers never fail because of them.
pub fn notify_users(
    conn: &mut PgConnection,
    hub: &NotificationHub,
    recipients: &[Uuid],
    entry: NewFeedEntry<'_>,
) -> usize {
    if recipients.is_empty() {
        return 0;
    }

    let rows: Vec<NewNotification> = recipients
        .iter()
        .map(|user_id| NewNotification {
            id: Uuid::new_v4(),
            user_id: *user_id,
            notification_type: entry.kind.as_str().to_string(),
            title: entry.title.to_string(),
            message: entry.message.to_string(),
            document_id: entry.document_id,
        })
        .collect();

    match diesel::insert_into(notifications::table)
        .values(&rows)
        .execute(conn)
    {
        Ok(inserted) => {
            for user_id in recipients {
                hub.publish(*user_id);
            }
            debug!(
                kind = entry.kind.as_str(),
                inserted,
                document_id = ?entry.document_id,
                "notifications inserted"
            );
            inserted
        }
        Err(err) => {
            warn!(
                kind = entry.kind.as_str(),
                error = %err,
                document_id = ?entry.document_id,
                "failed to insert notifications"
            );
            0
        }
    }
}

/// Active users with a reviewer role, as `(id, email)`.
pub fn reviewer_audience(conn: &mut PgConnection) -> QueryResult<Vec<(Uuid, String)>> {
    users::table
        .filter(users::is_active.eq(true))
        .filter(users::role.eq_any(crate::permissions::Role::reviewer_roles()))
        .order(users::created_at.asc())
        .select((users::id, users::email))
        .load(conn)
}

/// Recipient email for a single user, skipping deactivated accounts.
pub fn active_user_email(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Option<String>> {
    users::table
        .find(user_id)
        .filter(users::is_active.eq(true))
        .select(users::email)
        .first(conn)
        .optional()
}

/// Unread entries within an already fetched page.
pub fn unread_in_page<T>(page: &[T], is_read: impl Fn(&T) -> bool) -> usize {
    page.iter().filter(|entry| !is_read(entry)).count()
}

//! Participant liveness and cursors.
//!
//! ```text
//! join(user, name)
//!       │  pick first free palette color
//!       ▼
//! presence/<user> = {displayName, color, lastSeen}   armed: removed on disconnect
//!       │
//!       ├── reconnect ──► rearm(): rewrite record, arm again
//!       └── leave()   ──► remove record, cancel hook, clear cursor
//!
//! update_cursor(x, y)   (rate-limited: 30fps)
//!       ▼
//! cursors/<user> = {x, y, name, color, timestamp}    armed on first write
//! ```
//!
//! A user is online exactly when a presence record exists for them.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tessera_core::UserId;
use tokio::time::Instant;
use uuid::Uuid;

use crate::channel::{Namespace, RealtimeChannel, Records, Subscription};
use crate::error::ChannelError;

// ───────────────────────────────────────────────────────────────────
// Records
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub display_name: String,
    pub color: String,
    /// Milliseconds since the Unix epoch
    pub last_seen: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorRecord {
    pub x: f64,
    pub y: f64,
    pub name: String,
    pub color: String,
    pub timestamp: u64,
}

/// One online participant.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub display_name: String,
    pub color: String,
    pub last_seen: u64,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Decode presence records, skipping malformed ones.
pub fn online_users(records: &Records) -> Vec<OnlineUser> {
    records
        .iter()
        .filter_map(|(user_id, value)| {
            let record: PresenceRecord = serde_json::from_value(value.clone())
                .map_err(|e| log::debug!("Skipping presence record {user_id}: {e}"))
                .ok()?;
            Some(OnlineUser {
                user_id: user_id.clone(),
                display_name: record.display_name,
                color: record.color,
                last_seen: record.last_seen,
            })
        })
        .collect()
}

/// Decode cursor records of everyone except `exclude`.
pub fn remote_cursors(records: &Records, exclude: &str) -> Vec<(UserId, CursorRecord)> {
    records
        .iter()
        .filter(|(user_id, _)| user_id.as_str() != exclude)
        .filter_map(|(user_id, value)| {
            serde_json::from_value(value.clone())
                .ok()
                .map(|cursor| (user_id.clone(), cursor))
        })
        .collect()
}

/// Color for a joining user.
///
/// `own` (the user's color from an earlier session still on record) wins;
/// then the first palette entry nobody else holds; then a random entry.
pub fn pick_color(palette: &[String], taken: &HashSet<&str>, own: Option<&str>) -> String {
    if let Some(own) = own {
        return own.to_string();
    }
    if let Some(free) = palette.iter().find(|c| !taken.contains(c.as_str())) {
        return free.clone();
    }
    let bits = Uuid::new_v4().as_u128();
    match palette.len() {
        0 => format!("#{:06X}", bits & 0xFF_FFFF),
        n => palette[(bits % n as u128) as usize].clone(),
    }
}

/// Live list of online users.
pub struct OnlineUsers {
    feed: Subscription<Arc<Records>>,
}

impl OnlineUsers {
    /// Current list first, then one list per change. `None` once the
    /// channel is gone.
    pub async fn next(&mut self) -> Option<Vec<OnlineUser>> {
        self.feed.changed().await.map(|records| online_users(&records))
    }

    pub fn current(&self) -> Vec<OnlineUser> {
        online_users(&self.feed.current())
    }
}

// ───────────────────────────────────────────────────────────────────
// Service
// ───────────────────────────────────────────────────────────────────

struct Joined {
    user_id: UserId,
    display_name: String,
    color: String,
}

/// Presence for the local user of one session.
pub struct PresenceService<R> {
    channel: Arc<R>,
    palette: Vec<String>,
    cursor_interval: Duration,
    joined: Option<Joined>,
    last_cursor: Option<Instant>,
    cursor_armed: bool,
}

impl<R: RealtimeChannel> PresenceService<R> {
    pub fn new(channel: Arc<R>, palette: Vec<String>, cursor_interval: Duration) -> Self {
        Self {
            channel,
            palette,
            cursor_interval,
            joined: None,
            last_cursor: None,
            cursor_armed: false,
        }
    }

    /// Announce `user_id` and return their color.
    pub async fn join(&mut self, user_id: &str, display_name: &str) -> Result<String, ChannelError> {
        let records = self.channel.subscribe(Namespace::Presence).await?.current();
        let users = online_users(&records);
        let own = users
            .iter()
            .find(|u| u.user_id == user_id)
            .map(|u| u.color.as_str());
        let taken: HashSet<&str> = users
            .iter()
            .filter(|u| u.user_id != user_id)
            .map(|u| u.color.as_str())
            .collect();
        let color = pick_color(&self.palette, &taken, own);

        self.joined = Some(Joined {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            color: color.clone(),
        });
        self.write_presence().await?;
        log::info!("{display_name} ({user_id}) joined with color {color}");
        Ok(color)
    }

    async fn write_presence(&self) -> Result<(), ChannelError> {
        let Some(joined) = &self.joined else {
            return Ok(());
        };
        let record = PresenceRecord {
            display_name: joined.display_name.clone(),
            color: joined.color.clone(),
            last_seen: now_millis(),
        };
        self.channel
            .put(Namespace::Presence, &joined.user_id, serde_json::to_value(&record)?)
            .await?;
        self.channel
            .arm_on_disconnect(Namespace::Presence, &joined.user_id)
            .await
    }

    /// Rewrite the presence record and re-arm every disconnect hook.
    /// Call after each reconnect; hooks do not survive the old connection.
    pub async fn rearm(&self) -> Result<(), ChannelError> {
        let Some(joined) = &self.joined else {
            return Ok(());
        };
        log::info!("Re-arming presence for {}", joined.user_id);
        self.write_presence().await?;
        if self.cursor_armed {
            self.channel
                .arm_on_disconnect(Namespace::Cursors, &joined.user_id)
                .await?;
        }
        Ok(())
    }

    /// Graceful sign-out.
    pub async fn leave(&mut self) -> Result<(), ChannelError> {
        self.clear_cursor().await?;
        let Some(joined) = self.joined.take() else {
            return Ok(());
        };
        self.channel
            .cancel_on_disconnect(Namespace::Presence, &joined.user_id)
            .await?;
        self.channel.remove(Namespace::Presence, &joined.user_id).await?;
        log::info!("{} ({}) left", joined.display_name, joined.user_id);
        Ok(())
    }

    pub async fn list_online(&self) -> Result<OnlineUsers, ChannelError> {
        Ok(OnlineUsers {
            feed: self.channel.subscribe(Namespace::Presence).await?,
        })
    }

    /// Broadcast the cursor unless the last write was under the interval
    /// ago. Returns whether a write happened.
    pub async fn update_cursor(&mut self, x: f64, y: f64) -> Result<bool, ChannelError> {
        if let Some(last) = self.last_cursor {
            if last.elapsed() < self.cursor_interval {
                return Ok(false);
            }
        }
        self.force_cursor(x, y).await?;
        Ok(true)
    }

    /// Broadcast the cursor regardless of rate limiting.
    pub async fn force_cursor(&mut self, x: f64, y: f64) -> Result<(), ChannelError> {
        let Some(joined) = &self.joined else {
            return Ok(());
        };
        let record = CursorRecord {
            x,
            y,
            name: joined.display_name.clone(),
            color: joined.color.clone(),
            timestamp: now_millis(),
        };
        self.last_cursor = Some(Instant::now());
        log::trace!("Cursor {} at ({x:.1}, {y:.1})", joined.user_id);
        self.channel
            .put(Namespace::Cursors, &joined.user_id, serde_json::to_value(&record)?)
            .await?;
        if !self.cursor_armed {
            self.channel.arm_on_disconnect(Namespace::Cursors, &joined.user_id).await?;
            self.cursor_armed = true;
        }
        Ok(())
    }

    pub async fn clear_cursor(&mut self) -> Result<(), ChannelError> {
        let Some(joined) = &self.joined else {
            return Ok(());
        };
        if self.cursor_armed {
            self.channel
                .cancel_on_disconnect(Namespace::Cursors, &joined.user_id)
                .await?;
            self.cursor_armed = false;
        }
        self.last_cursor = None;
        self.channel.remove(Namespace::Cursors, &joined.user_id).await
    }

    /// Renew the connection lease.
    pub async fn heartbeat(&self) -> Result<(), ChannelError> {
        self.channel.heartbeat().await
    }

    pub fn color(&self) -> Option<&str> {
        self.joined.as_ref().map(|j| j.color.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.joined.as_ref().map(|j| j.user_id.as_str())
    }
}

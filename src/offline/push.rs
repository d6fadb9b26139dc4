/// Push notification presentation
///
/// Purely decorative: a payload becomes a notification, a click on the
/// view-details action routes to a fixed in-page anchor.
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::NotificationConfig;

pub const ACTION_EXPLORE: &str = "explore";
pub const ACTION_CLOSE: &str = "close";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
    #[serde(skip)]
    closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    /// Milliseconds since the Unix epoch
    pub date_of_arrival: i64,
    pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

impl Notification {
    /// Decorate a push payload
    pub fn from_push(config: &NotificationConfig, payload: &str, now: DateTime<Utc>) -> Self {
        let icons = &config.action_icons;
        Self {
            title: config.title.clone(),
            body: payload.to_string(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: now.timestamp_millis(),
                primary_key: 1,
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_EXPLORE.to_string(),
                    title: "View Details".to_string(),
                    icon: format!("{icons}#view"),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: "Close".to_string(),
                    icon: format!("{icons}#close"),
                },
            ],
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle a click: the notification always closes; the target to open
    /// is returned only for the view-details action.
    pub fn click<'a>(&mut self, config: &'a NotificationConfig, action: Option<&str>) -> Option<&'a str> {
        self.closed = true;
        match action {
            Some(ACTION_EXPLORE) => Some(config.click_target.as_str()),
            _ => None,
        }
    }
}

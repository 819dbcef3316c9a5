//! Weekly live-show reminders.
//!
//! The scheduler asks the notification center for permission once, then
//! registers one repeating alert per entry of `live_show_alerts()`.  It runs
//! independently of playback.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc, Weekday};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::NotificationError;

/// Moscow time, where the show is broadcast from.
const SHOW_UTC_OFFSET_SECS: i32 = 3 * 3600;

/// Repeats every week at a fixed wall-clock time in a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyTrigger {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
    pub utc_offset_secs: i32,
}

impl WeeklyTrigger {
    /// First firing strictly after `now`, or `None` when the trigger does
    /// not describe a valid time.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let offset = FixedOffset::east_opt(self.utc_offset_secs)?;
        let local = now.with_timezone(&offset);
        let days_ahead = (7 + self.weekday.num_days_from_monday()
            - local.weekday().num_days_from_monday())
            % 7;
        let date = local.date_naive() + Duration::days(i64::from(days_ahead));
        let mut at = date
            .and_hms_opt(self.hour, self.minute, 0)?
            .and_local_timezone(offset)
            .single()?;
        if at <= local {
            at += Duration::days(7);
        }
        Some(at.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRequest {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub trigger: WeeklyTrigger,
}

/// The two Saturday alerts: a reminder before the show and one at its start.
pub fn live_show_alerts() -> Vec<AlertRequest> {
    let at = |hour, minute| WeeklyTrigger {
        weekday: Weekday::Sat,
        hour,
        minute,
        utc_offset_secs: SHOW_UTC_OFFSET_SECS,
    };
    vec![
        AlertRequest {
            identifier: "radio-t-live-15min".to_string(),
            title: "Radio-T".to_string(),
            body: "Трансляция начнется через 15 минут".to_string(),
            trigger: at(22, 45),
        },
        AlertRequest {
            identifier: "radio-t-live-start".to_string(),
            title: "Radio-T".to_string(),
            body: "Трансляция началась".to_string(),
            trigger: at(23, 0),
        },
    ]
}

#[async_trait]
pub trait NotificationCenter: Send + Sync {
    async fn request_authorization(&self) -> Result<(), NotificationError>;

    /// Register `request`.  An alert with the same identifier is replaced.
    async fn add(&self, request: AlertRequest) -> Result<(), NotificationError>;

    async fn pending(&self) -> Vec<AlertRequest>;
}

// ── desktop center ────────────────────────────────────────────────────────────

/// Alerts are tokio timer tasks shown through the desktop notification
/// service.  They only fire while the daemon is running.
pub struct DesktopNotificationCenter {
    enabled: bool,
    pending: Mutex<HashMap<String, (AlertRequest, AbortHandle)>>,
}

impl DesktopNotificationCenter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl NotificationCenter for DesktopNotificationCenter {
    async fn request_authorization(&self) -> Result<(), NotificationError> {
        if !self.enabled {
            return Err(NotificationError::AuthorizationDenied(
                "disabled in config".to_string(),
            ));
        }
        probe_notification_server().await
    }

    async fn add(&self, request: AlertRequest) -> Result<(), NotificationError> {
        let first = request
            .trigger
            .next_after(Utc::now())
            .ok_or_else(|| NotificationError::SchedulingFailed {
                identifier: request.identifier.clone(),
                reason: "trigger is not a valid time".to_string(),
            })?;
        debug!("[alerts] {} next at {}", request.identifier, first);

        let alert = request.clone();
        let handle = tokio::spawn(async move { fire_weekly(alert).await });

        let mut pending = self.pending.lock().await;
        if let Some((_, old)) = pending.insert(
            request.identifier.clone(),
            (request, handle.abort_handle()),
        ) {
            old.abort();
        }
        Ok(())
    }

    async fn pending(&self) -> Vec<AlertRequest> {
        let mut alerts: Vec<_> = self
            .pending
            .lock()
            .await
            .values()
            .map(|(r, _)| r.clone())
            .collect();
        alerts.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        alerts
    }
}

impl Drop for DesktopNotificationCenter {
    fn drop(&mut self) {
        for (_, handle) in self.pending.get_mut().values() {
            handle.abort();
        }
    }
}

async fn fire_weekly(alert: AlertRequest) {
    loop {
        let now = Utc::now();
        let Some(next) = alert.trigger.next_after(now) else {
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        info!("[alerts] firing {}", alert.identifier);
        let (title, body) = (alert.title.clone(), alert.body.clone());
        let shown = tokio::task::spawn_blocking(move || {
            notify_rust::Notification::new()
                .summary(&title)
                .body(&body)
                .appname("onair")
                .show()
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await;
        match shown {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[alerts] could not show {}: {}", alert.identifier, e),
            Err(e) => warn!("[alerts] notification task failed: {}", e),
        }
        // avoid firing twice within the same minute
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
async fn probe_notification_server() -> Result<(), NotificationError> {
    let probe = tokio::task::spawn_blocking(|| {
        notify_rust::get_capabilities().map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| NotificationError::AuthorizationDenied(e.to_string()))?;
    match probe {
        Ok(caps) => {
            debug!("[alerts] notification server capabilities: {:?}", caps);
            Ok(())
        }
        Err(e) => Err(NotificationError::AuthorizationDenied(format!(
            "no notification server: {}",
            e
        ))),
    }
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
async fn probe_notification_server() -> Result<(), NotificationError> {
    Ok(())
}

// ── scheduler ─────────────────────────────────────────────────────────────────

pub struct NotificationScheduler {
    center: Arc<dyn NotificationCenter>,
}

impl NotificationScheduler {
    pub fn new(center: Arc<dyn NotificationCenter>) -> Self {
        Self { center }
    }

    /// Authorize, then register every weekly alert.  Individual failures are
    /// logged and skipped.  Returns how many alerts were registered.
    pub async fn schedule_weekly(&self) -> Result<usize, NotificationError> {
        if let Err(e) = self.center.request_authorization().await {
            warn!("[alerts] {}", e);
            return Err(e);
        }

        let mut scheduled = 0;
        for alert in live_show_alerts() {
            let id = alert.identifier.clone();
            match self.center.add(alert).await {
                Ok(()) => {
                    scheduled += 1;
                    info!("[alerts] scheduled {}", id);
                }
                Err(e) => warn!("[alerts] {}", e),
            }
        }
        Ok(scheduled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn show_start() -> WeeklyTrigger {
        live_show_alerts()[1].trigger
    }

    #[test]
    fn test_next_after_same_week() {
        // Wed 2026-10-14 12:00 UTC → Sat 2026-10-17 23:00 MSK = 20:00 UTC
        let next = show_start().next_after(utc(2026, 10, 14, 12, 0)).unwrap();
        assert_eq!(next, utc(2026, 10, 17, 20, 0));
    }

    #[test]
    fn test_next_after_rolls_over_to_next_week() {
        let next = show_start().next_after(utc(2026, 10, 17, 20, 0)).unwrap();
        assert_eq!(next, utc(2026, 10, 24, 20, 0));

        // Saturday 23:30 Moscow time is already past the start
        let next = show_start().next_after(utc(2026, 10, 17, 20, 30)).unwrap();
        assert_eq!(next, utc(2026, 10, 24, 20, 0));
    }

    #[test]
    fn test_next_after_uses_show_timezone_day() {
        // Sat 22:00 UTC is already Sunday 01:00 in Moscow
        let reminder = live_show_alerts()[0].trigger;
        let next = reminder.next_after(utc(2026, 10, 17, 22, 0)).unwrap();
        assert_eq!(next, utc(2026, 10, 24, 19, 45));
    }

    #[test]
    fn test_invalid_trigger() {
        let bad = WeeklyTrigger {
            hour: 25,
            ..show_start()
        };
        assert!(bad.next_after(Utc::now()).is_none());
    }

    #[test]
    fn test_live_show_alerts() {
        let alerts = live_show_alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].identifier, "radio-t-live-15min");
        assert_eq!(alerts[1].identifier, "radio-t-live-start");
        assert!(alerts.iter().all(|a| a.title == "Radio-T"));
        assert!(alerts.iter().all(|a| a.trigger.weekday == Weekday::Sat));
    }

    #[tokio::test]
    async fn test_same_identifier_replaces_pending_alert() {
        let center = DesktopNotificationCenter::new(true);
        let first = live_show_alerts().remove(0);
        let second = AlertRequest {
            body: "changed".to_string(),
            ..first.clone()
        };
        center.add(first).await.unwrap();
        center.add(second).await.unwrap();

        let pending = center.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].body, "changed");
    }

    #[tokio::test]
    async fn test_add_invalid_trigger_fails() {
        let center = DesktopNotificationCenter::new(true);
        let mut alert = live_show_alerts().remove(0);
        alert.trigger.minute = 90;
        let err = center.add(alert).await.unwrap_err();
        assert!(matches!(err, NotificationError::SchedulingFailed { .. }));
        assert!(center.pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_center_denies_and_schedules_nothing() {
        let center = Arc::new(DesktopNotificationCenter::new(false));
        let scheduler = NotificationScheduler::new(center.clone());
        let err = scheduler.schedule_weekly().await.unwrap_err();
        assert!(matches!(err, NotificationError::AuthorizationDenied(_)));
        assert!(center.pending().await.is_empty());
    }

    struct FlakyCenter {
        inner: DesktopNotificationCenter,
    }

    #[async_trait]
    impl NotificationCenter for FlakyCenter {
        async fn request_authorization(&self) -> Result<(), NotificationError> {
            Ok(())
        }

        async fn add(&self, request: AlertRequest) -> Result<(), NotificationError> {
            if request.identifier.ends_with("15min") {
                return Err(NotificationError::SchedulingFailed {
                    identifier: request.identifier,
                    reason: "quota".to_string(),
                });
            }
            self.inner.add(request).await
        }

        async fn pending(&self) -> Vec<AlertRequest> {
            self.inner.pending().await
        }
    }

    #[tokio::test]
    async fn test_scheduling_failure_does_not_stop_other_alerts() {
        let center = Arc::new(FlakyCenter {
            inner: DesktopNotificationCenter::new(true),
        });
        let scheduled = NotificationScheduler::new(center.clone())
            .schedule_weekly()
            .await
            .unwrap();
        assert_eq!(scheduled, 1);
        let pending = center.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].identifier, "radio-t-live-start");
    }

    #[tokio::test]
    async fn test_rescheduling_is_idempotent() {
        let center = Arc::new(FlakyCenter {
            inner: DesktopNotificationCenter::new(true),
        });
        let scheduler = NotificationScheduler::new(center.clone());
        scheduler.schedule_weekly().await.unwrap();
        scheduler.schedule_weekly().await.unwrap();
        assert_eq!(center.pending().await.len(), 1);
    }
}

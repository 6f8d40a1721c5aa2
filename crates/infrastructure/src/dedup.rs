use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// 去重令牌窗口
///
/// 记录令牌与首次发送得到的消息ID，超过窗口的令牌在下次查询时清除。
#[derive(Debug, Default)]
pub(crate) struct DedupWindow {
    entries: HashMap<String, (String, Instant)>,
}

impl DedupWindow {
    /// 令牌仍在窗口内时返回之前的消息ID
    pub(crate) fn check(&mut self, token: &str, window: Duration, now: Instant) -> Option<String> {
        self.entries
            .retain(|_, (_, sent_at)| now.duration_since(*sent_at) < window);
        self.entries.get(token).map(|(message_id, _)| message_id.clone())
    }

    pub(crate) fn record(&mut self, token: &str, message_id: &str, now: Instant) {
        self.entries
            .insert(token.to_string(), (message_id.to_string(), now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_within_window_returns_first_message_id() {
        let mut dedup = DedupWindow::default();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        assert_eq!(dedup.check("t1", window, now), None);
        dedup.record("t1", "m1", now);

        assert_eq!(
            dedup.check("t1", window, now + Duration::from_secs(30)),
            Some("m1".to_string())
        );
        assert_eq!(dedup.check("t2", window, now), None);
    }

    #[test]
    fn test_token_expires_after_window() {
        let mut dedup = DedupWindow::default();
        let now = Instant::now();
        dedup.record("t1", "m1", now);

        assert_eq!(
            dedup.check("t1", Duration::from_secs(5), now + Duration::from_secs(5)),
            None
        );
        assert!(dedup.entries.is_empty());
    }
}

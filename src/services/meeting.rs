use chrono::Utc;
use sha2::{Digest, Sha256};

/// Длина идентификатора встречи в hex-символах.
pub const MEETING_ID_LEN: usize = 12;

/// Генерирует короткий непрозрачный идентификатор встречи:
/// первые 12 hex-символов `SHA-256(seed + timestamp)`.
///
/// Результат не детерминирован между вызовами, поэтому вызывается не более
/// одного раза на бронь; сохранённое значение защищено `BookingStore::confirm`.
#[derive(Debug, Clone)]
pub struct MeetingIdGenerator {
    base_url: String,
}

impl MeetingIdGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn generate(&self, identity_seed: &str) -> String {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        derive_meeting_id(identity_seed, timestamp)
    }

    /// Ссылка для подключения к сессии.
    pub fn join_link(&self, meeting_id: &str) -> String {
        format!("{}/{}", self.base_url, meeting_id)
    }
}

fn derive_meeting_id(identity_seed: &str, timestamp: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(identity_seed.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..MEETING_ID_LEN].to_string()
}

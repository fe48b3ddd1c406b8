use std::time::Duration;

/// Текущее Unix-время в наносекундах.
pub fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Unix-время истечения записи, созданной сейчас: `now + window`.
pub fn expires_at_ns(window: Duration) -> i64 {
    now_ns().saturating_add(window.as_nanos().min(i64::MAX as u128) as i64)
}

/// Нормализовать адрес хранилища: `host:port` → `redis://host:port`.
pub fn with_default_scheme(url: &str, scheme: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("{scheme}://{url}")
    }
}

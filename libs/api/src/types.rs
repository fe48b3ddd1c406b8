use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Record
// ════════════════════════════════════════════════════════════════

/// Одна строка upstream-потока: `{"data": "...", "offset": 123}`.
///
/// `offset` назначает upstream; он не убывает внутри topic'а, но может
/// повторяться и иметь пропуски. `data` — непрозрачный сериализованный
/// delta, кэш и broker его не разбирают.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub data: String,
    pub offset: i64,
}

impl Record {
    /// Разобрать одну строку upstream-потока (без `\n`). Байты, а не
    /// `&str`: невалидный UTF-8 это такая же битая запись, как и не-JSON.
    pub fn from_line(line: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(line)
    }
}

// ════════════════════════════════════════════════════════════════
//  Compaction
// ════════════════════════════════════════════════════════════════

/// Итог одного прохода `CacheStore::delete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Compaction {
    /// Сколько TTL-ссылок истекло и было удалено из TTL-индекса.
    pub expired: usize,
    /// Сколько записей удалено из основного набора.
    pub evicted: usize,
    /// Включительный диапазон offset'ов, который вычищался.
    pub range: Option<(i64, i64)>,
}

impl Compaction {
    /// Ничего не истекло — проход был no-op.
    pub fn is_noop(&self) -> bool {
        self.expired == 0
    }
}

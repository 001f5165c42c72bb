//! Info Cache (C2): a bounded positive LRU plus an independent
//! negative-failure map with escalating cool-down.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::ErrorKind;
use crate::probe::ProbeResult;

const DEFAULT_CAPACITY: usize = 50;
const DEFAULT_TTL: Duration = Duration::from_secs(3600);
const ESCALATE_THRESHOLD: u32 = 3;
const BASE_COOLDOWN: Duration = Duration::from_secs(180);
const ESCALATED_COOLDOWN: Duration = Duration::from_secs(420);
/// Short, non-escalating cooldown for URLs the extractor can't ever handle --
/// retrying sooner is pointless, but there's no reason to punish it like a
/// transient failure either.
const UNSUPPORTED_URL_COOLDOWN: Duration = Duration::from_secs(30);

struct PositiveEntry {
    result: ProbeResult,
    inserted_at: Instant,
}

/// A bounded LRU keyed by URL, ordered by most-recently-used at the back.
struct Lru {
    capacity: usize,
    ttl: Duration,
    order: Vec<String>,
    entries: HashMap<String, PositiveEntry>,
}

impl Lru {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<ProbeResult> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|e| e.inserted_at.elapsed() > self.ttl);
        if expired {
            self.remove(key);
            return None;
        }
        if self.entries.contains_key(key) {
            self.bump(key);
        }
        self.entries.get(key).map(|e| e.result.clone())
    }

    fn set(&mut self, key: String, result: ProbeResult) {
        if self.entries.contains_key(&key) {
            self.bump(&key);
        } else {
            self.order.push(key.clone());
        }
        self.entries.insert(
            key,
            PositiveEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
        while self.entries.len() > self.capacity {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    fn bump(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push(key.to_string());
    }
}

struct NegativeEntry {
    last_error: String,
    inserted_at: Instant,
    count: u32,
    kind: ErrorKind,
}

/// Outcome of a negative-cache lookup.
pub struct CoolDown {
    pub last_error: String,
    pub fail_count: u32,
    pub retry_after_secs: u64,
}

struct Negative {
    entries: HashMap<String, NegativeEntry>,
}

impl Negative {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    fn record_failure(&mut self, key: &str, error: impl Into<String>, kind: ErrorKind) {
        let entry = self.entries.entry(key.to_string()).or_insert(NegativeEntry {
            last_error: String::new(),
            inserted_at: Instant::now(),
            count: 0,
            kind,
        });
        entry.last_error = error.into();
        entry.inserted_at = Instant::now();
        entry.count += 1;
        entry.kind = kind;
    }

    fn clear(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn check(&mut self, key: &str) -> Option<CoolDown> {
        let entry = self.entries.get(key)?;
        let cooldown = if entry.kind == ErrorKind::UnsupportedUrl {
            UNSUPPORTED_URL_COOLDOWN
        } else if entry.count < ESCALATE_THRESHOLD {
            BASE_COOLDOWN
        } else {
            ESCALATED_COOLDOWN
        };
        let elapsed = entry.inserted_at.elapsed();
        if elapsed >= cooldown {
            self.entries.remove(key);
            return None;
        }
        Some(CoolDown {
            last_error: entry.last_error.clone(),
            fail_count: entry.count,
            retry_after_secs: (cooldown - elapsed).as_secs().max(1),
        })
    }
}

/// Info Cache (C2): thread-safe positive + negative maps.
pub struct InfoCache {
    positive: Mutex<Lru>,
    negative: Mutex<Negative>,
}

impl Default for InfoCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl InfoCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            positive: Mutex::new(Lru::new(capacity, ttl)),
            negative: Mutex::new(Negative::new()),
        }
    }

    pub fn get(&self, url: &str) -> Option<ProbeResult> {
        self.positive.lock().get(url)
    }

    pub fn set(&self, url: &str, result: ProbeResult) {
        self.positive.lock().set(url.to_string(), result);
        self.negative.lock().clear(url);
    }

    pub fn record_failure(&self, url: &str, error: impl Into<String>, kind: ErrorKind) {
        self.negative.lock().record_failure(url, error, kind);
    }

    pub fn check_cooldown(&self, url: &str) -> Option<CoolDown> {
        self.negative.lock().check(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeResult;

    fn sample_result() -> ProbeResult {
        ProbeResult {
            title: "t".to_string(),
            id: "id".to_string(),
            uploader: None,
            duration: None,
            thumbnail: None,
            formats: vec![],
            subtitles: vec![],
            auto_subtitles: vec![],
            capabilities: Default::default(),
            quality_pairs: Default::default(),
        }
    }

    #[test]
    fn positive_cache_roundtrips() {
        let cache = InfoCache::default();
        cache.set("https://example.com/1", sample_result());
        assert!(cache.get("https://example.com/1").is_some());
        assert!(cache.get("https://example.com/unknown").is_none());
    }

    #[test]
    fn positive_cache_evicts_oldest_over_capacity() {
        let cache = InfoCache::new(2, Duration::from_secs(3600));
        cache.set("a", sample_result());
        cache.set("b", sample_result());
        cache.set("c", sample_result());
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn negative_cache_escalates_after_threshold() {
        let cache = InfoCache::default();
        for _ in 0..3 {
            cache.record_failure("u", "boom", ErrorKind::Unknown);
        }
        let cooldown = cache.check_cooldown("u").unwrap();
        assert_eq!(cooldown.fail_count, 3);
        assert!(cooldown.retry_after_secs > BASE_COOLDOWN.as_secs() - 5);
    }

    #[test]
    fn success_clears_negative_entry() {
        let cache = InfoCache::default();
        cache.record_failure("u", "boom", ErrorKind::Unknown);
        assert!(cache.check_cooldown("u").is_some());
        cache.set("u", sample_result());
        assert!(cache.check_cooldown("u").is_none());
    }

    #[test]
    fn unsupported_url_gets_short_non_escalating_cooldown() {
        let cache = InfoCache::default();
        for _ in 0..5 {
            cache.record_failure("u", "no extractor for this site", ErrorKind::UnsupportedUrl);
        }
        let cooldown = cache.check_cooldown("u").unwrap();
        assert_eq!(cooldown.fail_count, 5);
        assert!(cooldown.retry_after_secs <= UNSUPPORTED_URL_COOLDOWN.as_secs());
    }
}

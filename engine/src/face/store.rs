use sha1::{Digest, Sha1};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use visage_types::{Face, Frame};

/// How frame pixels are reduced to a cache key. FNV-1a is the fast default;
/// SHA-1 stays stable across process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashStrategy {
    #[default]
    Fnv1a,
    Sha1,
}

#[derive(Debug, Clone)]
pub struct FaceStoreOptions {
    pub hash_strategy: HashStrategy,
    pub enable_lru: bool,
    pub max_capacity: usize,
}

impl Default for FaceStoreOptions {
    fn default() -> Self {
        Self {
            hash_strategy: HashStrategy::Fnv1a,
            enable_lru: true,
            max_capacity: 64,
        }
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x1_0000_0000_01b3;

fn fnv1a_hash(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

struct StoreInner {
    cache: HashMap<String, Vec<Face>>,
    // Front = most recently used.
    lru_order: VecDeque<String>,
}

/// Bounded frame-keyed face cache with a secondary name keyspace for
/// reference sets (e.g. "source"). Reads take shared locks when LRU
/// promotion is off; promotion requires the exclusive path.
pub struct FaceStore {
    options: FaceStoreOptions,
    inner: RwLock<StoreInner>,
}

impl Default for FaceStore {
    fn default() -> Self {
        Self::new(FaceStoreOptions::default())
    }
}

impl FaceStore {
    pub fn new(options: FaceStoreOptions) -> Self {
        Self {
            options,
            inner: RwLock::new(StoreInner {
                cache: HashMap::new(),
                lru_order: VecDeque::new(),
            }),
        }
    }

    pub fn frame_key(&self, frame: &Frame) -> String {
        let data: Vec<u8>;
        let bytes: &[u8] = match frame.as_slice() {
            Some(slice) => slice,
            None => {
                data = frame.iter().copied().collect();
                &data
            }
        };
        match self.options.hash_strategy {
            HashStrategy::Fnv1a => format!("{:016x}", fnv1a_hash(bytes)),
            HashStrategy::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(bytes);
                format!("{:x}", hasher.finalize())
            }
        }
    }

    pub fn insert_faces(&self, frame: &Frame, faces: &[Face]) {
        self.insert_named(&self.frame_key(frame), faces);
    }

    pub fn insert_named(&self, key: &str, faces: &[Face]) {
        if faces.is_empty() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.cache.contains_key(key) {
            inner.cache.insert(key.to_string(), faces.to_vec());
            Self::promote(&mut inner.lru_order, key, self.options.enable_lru);
            return;
        }
        self.evict_if_needed(&mut inner);
        inner.lru_order.push_front(key.to_string());
        inner.cache.insert(key.to_string(), faces.to_vec());
    }

    pub fn get_faces(&self, frame: &Frame) -> Option<Vec<Face>> {
        self.get_named(&self.frame_key(frame))
    }

    pub fn get_named(&self, key: &str) -> Option<Vec<Face>> {
        if self.options.enable_lru {
            let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            let faces = inner.cache.get(key).cloned();
            if faces.is_some() {
                Self::promote(&mut inner.lru_order, key, true);
            }
            faces
        } else {
            self.inner
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .cache
                .get(key)
                .cloned()
        }
    }

    pub fn remove_faces(&self, frame: &Frame) {
        self.remove_named(&self.frame_key(frame));
    }

    pub fn remove_named(&self, key: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.cache.remove(key).is_some() {
            inner.lru_order.retain(|k| k != key);
        }
    }

    pub fn is_contains(&self, frame: &Frame) -> bool {
        self.contains_named(&self.frame_key(frame))
    }

    pub fn contains_named(&self, key: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cache
            .contains_key(key)
    }

    pub fn clear_faces(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.cache.clear();
        inner.lru_order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cache
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn promote(order: &mut VecDeque<String>, key: &str, enable_lru: bool) {
        if !enable_lru || order.front().map(String::as_str) == Some(key) {
            return;
        }
        order.retain(|k| k != key);
        order.push_front(key.to_string());
    }

    fn evict_if_needed(&self, inner: &mut StoreInner) {
        if !self.options.enable_lru || self.options.max_capacity == 0 {
            return;
        }
        while inner.cache.len() >= self.options.max_capacity {
            match inner.lru_order.pop_back() {
                Some(oldest) => {
                    inner.cache.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;
    use visage_types::BBox;

    fn frame(fill: u8) -> Frame {
        Array3::from_elem((8, 8, 3), fill)
    }

    fn face(score: f32) -> Face {
        Face {
            bbox: BBox::from_xywh(0.0, 0.0, 10.0, 10.0),
            detector_score: score,
            ..Default::default()
        }
    }

    #[test]
    fn insert_then_get_returns_the_same_faces() {
        let store = FaceStore::default();
        let f = frame(7);
        store.insert_faces(&f, &[face(0.9), face(0.8)]);
        let cached = store.get_faces(&f).expect("faces should be cached");
        assert_eq!(cached.len(), 2);
        assert!(store.is_contains(&f));

        store.clear_faces();
        assert!(!store.is_contains(&f));
    }

    #[test]
    fn distinct_frames_have_distinct_keys() {
        let store = FaceStore::default();
        assert_ne!(store.frame_key(&frame(1)), store.frame_key(&frame(2)));
    }

    #[test]
    fn sha1_keys_are_stable_hex_digests() {
        let store = FaceStore::new(FaceStoreOptions {
            hash_strategy: HashStrategy::Sha1,
            ..Default::default()
        });
        let key = store.frame_key(&frame(0));
        assert_eq!(key.len(), 40);
        assert_eq!(key, store.frame_key(&frame(0)));
    }

    #[test]
    fn named_reference_sets_live_alongside_frames() {
        let store = FaceStore::default();
        store.insert_named("source", &[face(1.0)]);
        assert!(store.contains_named("source"));
        assert_eq!(store.get_named("source").unwrap().len(), 1);
        store.remove_named("source");
        assert!(!store.contains_named("source"));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let store = FaceStore::new(FaceStoreOptions {
            max_capacity: 2,
            ..Default::default()
        });
        store.insert_named("a", &[face(0.1)]);
        store.insert_named("b", &[face(0.2)]);
        // Touch "a" so "b" is the eviction candidate.
        store.get_named("a");
        store.insert_named("c", &[face(0.3)]);

        assert!(store.contains_named("a"));
        assert!(!store.contains_named("b"));
        assert!(store.contains_named("c"));
    }
}

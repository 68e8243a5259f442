//! Open-addressing, double-hashing, string-keyed map with delayed (tombstone) deletion and a
//! tiered size table, in the style of the C hash table this crate's host adapter talks to on
//! the wire -- reimplemented here as an owning, memory-safe structure rather than a table of
//! borrowed pointers.

mod tiers;

use tiers::{tier_for, TIERS};

#[derive(Debug, Eq, PartialEq)]
pub enum HMapError {
    /// The map is already at its largest tier and cannot grow further.
    CapacityExceeded,
}

impl std::fmt::Display for HMapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HMapError::CapacityExceeded => write!(f, "hash map is at its largest tier"),
        }
    }
}

impl std::error::Error for HMapError {}

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(key: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in key.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

enum Slot<V> {
    Empty,
    Tombstone,
    Occupied { hash: u32, key: String, value: V },
}

impl<V> Slot<V> {
    fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

pub struct HMap<V> {
    slots: Vec<Slot<V>>,
    tier: usize,
    n_active: usize,
    n_removed: usize,
}

impl<V> HMap<V> {
    pub fn new() -> HMap<V> {
        HMap::with_capacity_hint(0)
    }

    /// Starts the map at the smallest tier whose `max_entries` covers `hint`.
    pub fn with_capacity_hint(hint: usize) -> HMap<V> {
        let tier = tier_for(hint).unwrap_or(TIERS.len() - 1);
        let size = TIERS[tier].size;
        HMap {
            slots: (0..size).map(|_| Slot::Empty).collect(),
            tier,
            n_active: 0,
            n_removed: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.n_active
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_active == 0
    }

    fn probe_sequence(&self, hash: u32) -> impl Iterator<Item = usize> + '_ {
        let size = self.slots.len();
        let rehash = TIERS[self.tier].rehash as usize;
        let start = hash as usize % size;
        let step = 1 + (hash as usize % rehash);
        (0..size).map(move |i| (start + i * step) % size)
    }

    /// Inserts `key`/`value`, returning the previous value if `key` was already present.
    /// Fails if the map is at its highest tier and cannot accommodate a new entry.
    pub fn insert(&mut self, key: &str, value: V) -> Result<Option<V>, HMapError> {
        let hash = fnv1a(key);

        // Replace in place if the key already exists; this does not consume table headroom.
        if let Some(index) = self.find_slot(key, hash) {
            if let Slot::Occupied { value: slot_value, .. } = &mut self.slots[index] {
                return Ok(Some(std::mem::replace(slot_value, value)));
            }
        }

        if self.n_active + self.n_removed >= TIERS[self.tier].max_entries {
            self.grow_or_rehash()?;
        }

        let hash = fnv1a(key);
        for index in self.probe_sequence(hash) {
            if self.slots[index].is_empty() {
                self.slots[index] = Slot::Occupied {
                    hash,
                    key: key.to_string(),
                    value,
                };
                self.n_active += 1;
                return Ok(None);
            }
        }

        Err(HMapError::CapacityExceeded)
    }

    /// Looks up `key`. On a hit, relocates the entry into the first tombstone seen along the
    /// probe chain (if any), shortening the chain for future lookups of the same key.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let hash = fnv1a(key);
        let mut first_tombstone: Option<usize> = None;

        for index in self.probe_sequence(hash) {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Slot::Occupied { hash: slot_hash, key: slot_key, .. } => {
                    if *slot_hash == hash && slot_key == key {
                        if let Some(dest) = first_tombstone {
                            let moved = std::mem::replace(&mut self.slots[index], Slot::Tombstone);
                            self.slots[dest] = moved;
                            return match &self.slots[dest] {
                                Slot::Occupied { value, .. } => Some(value),
                                _ => unreachable!(),
                            };
                        }
                        return match &self.slots[index] {
                            Slot::Occupied { value, .. } => Some(value),
                            _ => unreachable!(),
                        };
                    }
                }
            }
        }

        None
    }

    /// Non-relocating lookup, used internally where a fresh hash has already been computed
    /// and no mutable borrow of `self` is available.
    fn find_slot(&self, key: &str, hash: u32) -> Option<usize> {
        for index in self.probe_sequence(hash) {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Tombstone => continue,
                Slot::Occupied { hash: slot_hash, key: slot_key, .. } => {
                    if *slot_hash == hash && slot_key == key {
                        return Some(index);
                    }
                }
            }
        }
        None
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let hash = fnv1a(key);
        let index = self.find_slot(key, hash)?;
        match std::mem::replace(&mut self.slots[index], Slot::Tombstone) {
            Slot::Occupied { value, .. } => {
                self.n_active -= 1;
                self.n_removed += 1;
                Some(value)
            }
            _ => unreachable!(),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.find_slot(key, fnv1a(key)).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value, .. } => Some((key.as_str(), value)),
            _ => None,
        })
    }

    /// Either grows to the next tier (when tombstones are scarce relative to the tier's
    /// `max_removed` budget) or rehashes in place at the same tier (when tombstones dominate
    /// and reclaiming them is enough to make room).
    fn grow_or_rehash(&mut self) -> Result<(), HMapError> {
        if self.n_removed <= TIERS[self.tier].max_removed {
            if self.tier + 1 >= TIERS.len() {
                return Err(HMapError::CapacityExceeded);
            }
            self.tier += 1;
        }
        self.rehash();
        Ok(())
    }

    fn rehash(&mut self) {
        let size = TIERS[self.tier].size;
        let rehash_const = TIERS[self.tier].rehash as usize;
        let mut new_slots: Vec<Slot<V>> = (0..size).map(|_| Slot::Empty).collect();

        for slot in self.slots.drain(..) {
            if let Slot::Occupied { hash, key, value } = slot {
                let start = hash as usize % size;
                let step = 1 + (hash as usize % rehash_const);
                let mut index = start;
                loop {
                    if new_slots[index].is_empty() {
                        new_slots[index] = Slot::Occupied { hash, key, value };
                        break;
                    }
                    index = (index + step) % size;
                }
            }
        }

        self.slots = new_slots;
        self.n_removed = 0;
    }
}

impl<V> Default for HMap<V> {
    fn default() -> Self {
        HMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut map: HMap<i32> = HMap::new();
        for (i, key) in ["FZ1", "XU42", "A24", "ZZ333", "FOO", "YPP453"].iter().enumerate() {
            map.insert(key, i as i32).unwrap();
        }
        assert_eq!(map.len(), 6);
        assert_eq!(map.iter().count(), 6);
        assert!(map.get("nope").is_none());

        for key in ["FZ1", "XU42", "A24", "ZZ333", "FOO", "YPP453"].iter() {
            assert!(map.remove(key).is_some());
        }
        assert_eq!(map.len(), 0);
        for key in ["FZ1", "XU42", "A24", "ZZ333", "FOO", "YPP453"].iter() {
            assert!(map.get(key).is_none());
        }
    }

    #[test]
    fn test_grows_past_initial_tier() {
        let mut map: HMap<usize> = HMap::with_capacity_hint(8);
        for i in 0..64 {
            map.insert(&format!("A{}", i), i).unwrap();
        }
        assert_eq!(map.len(), 64);
        assert!(TIERS[map.tier].max_entries >= 64);
        for i in 0..64 {
            assert_eq!(*map.get(&format!("A{}", i)).unwrap(), i);
        }
    }

    #[test]
    fn test_replace_does_not_grow_counters() {
        let mut map: HMap<i32> = HMap::new();
        map.insert("k", 1).unwrap();
        let prev = map.insert("k", 2).unwrap();
        assert_eq!(prev, Some(1));
        assert_eq!(map.len(), 1);
        assert_eq!(*map.get("k").unwrap(), 2);
    }

    #[test]
    fn test_rehash_reclaims_tombstones_without_losing_keys() {
        let mut map: HMap<i32> = HMap::with_capacity_hint(8);
        for i in 0..6 {
            map.insert(&format!("k{}", i), i).unwrap();
        }
        for i in 0..4 {
            map.remove(&format!("k{}", i));
        }
        // Re-inserting churns past max_removed without growing the active count, which should
        // trigger an in-place rehash rather than a tier bump.
        for i in 6..9 {
            map.insert(&format!("k{}", i), i).unwrap();
        }
        assert_eq!(map.n_removed, 0);
        for i in 4..9 {
            assert!(map.get(&format!("k{}", i)).is_some());
        }
    }

    #[test]
    fn test_relocation_shortens_future_probe() {
        let mut map: HMap<i32> = HMap::with_capacity_hint(8);
        // Force some collisions by inserting enough keys in the smallest tier.
        for i in 0..5 {
            map.insert(&format!("key{}", i), i).unwrap();
        }
        map.remove("key0");
        map.remove("key1");
        assert!(map.get("key4").is_some());
        assert!(map.get("key4").is_some());
    }
}

//! In-memory page records and their fixed-size on-disk layout.
//!
//! `INTERNAL` and `LEAF` are the tree's fan-out parameters (`kInternalSize`
//! and `kLeafSize` in the original design): the child/separator count at
//! which an internal node must split, and the slot count at which a leaf
//! must split. Both are const generics so the persisted record size is
//! known at compile time and `heapless::Vec` can bound each page's slots
//! without a heap allocation per page.
use heapless::Vec as HVec;

use super::codec::FixedWidth;
use crate::errors::Error;

/// A routing node. `son[i]` points at a child in the tree file when
/// `!is_leaf`, or at a leaf in the leaf file when `is_leaf`.
#[derive(Clone)]
pub struct Internal<K: FixedWidth, const INTERNAL: usize> {
    pub is_leaf: bool,
    pub pos: u32,
    pub son: HVec<u32, INTERNAL>,
    pub key: HVec<K, INTERNAL>,
}

impl<K: FixedWidth + Ord, const INTERNAL: usize> Internal<K, INTERNAL> {
    pub fn new(pos: u32, is_leaf: bool) -> Self {
        Internal {
            is_leaf,
            pos,
            son: HVec::new(),
            key: HVec::new(),
        }
    }

    pub fn num(&self) -> usize {
        self.son.len()
    }

    pub fn is_full(&self) -> bool {
        self.num() == INTERNAL
    }

    /// Smallest `i` such that `key <= self.key[i]`, or `num - 1` if no such
    /// separator exists. Selects `son[i]` as the descent target; ties route
    /// left.
    pub fn search(&self, key: &K) -> usize {
        let mut l: isize = -1;
        let mut r: isize = self.num() as isize - 2;
        while l < r {
            let mid = (l + r + 1) >> 1;
            if *key <= self.key[mid as usize] {
                r = mid - 1;
            } else {
                l = mid;
            }
        }
        (l + 1) as usize
    }

    pub const ENCODED_LEN: usize = 1 + 4 + 4 + INTERNAL * 4 + INTERNAL * K::ENCODED_LEN;

    pub fn encode(&self, out: &mut [u8]) {
        let mut off = 0;
        out[off] = self.is_leaf as u8;
        off += 1;
        out[off..off + 4].copy_from_slice(&self.pos.to_le_bytes());
        off += 4;
        out[off..off + 4].copy_from_slice(&(self.num() as u32).to_le_bytes());
        off += 4;
        for i in 0..INTERNAL {
            let v = self.son.get(i).copied().unwrap_or(0);
            out[off..off + 4].copy_from_slice(&v.to_le_bytes());
            off += 4;
        }
        for i in 0..INTERNAL {
            let mut kb = vec![0u8; K::ENCODED_LEN];
            if let Some(k) = self.key.get(i) {
                k.encode(&mut kb);
            }
            out[off..off + K::ENCODED_LEN].copy_from_slice(&kb);
            off += K::ENCODED_LEN;
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(Error::Storage("short internal record".into()));
        }
        let mut off = 0;
        let is_leaf = buf[off] != 0;
        off += 1;
        let pos = u32::decode(&buf[off..off + 4]);
        off += 4;
        let num = u32::decode(&buf[off..off + 4]) as usize;
        off += 4;
        let mut son = HVec::new();
        for i in 0..INTERNAL {
            let v = u32::decode(&buf[off + i * 4..off + i * 4 + 4]);
            if i < num {
                son.push(v)
                    .map_err(|_| Error::Storage("internal son overflow".into()))?;
            }
        }
        off += INTERNAL * 4;
        let mut key = HVec::new();
        let ksz = K::ENCODED_LEN;
        for i in 0..INTERNAL {
            let k = K::decode(&buf[off + i * ksz..off + i * ksz + ksz]);
            if i + 1 < num {
                key.push(k)
                    .map_err(|_| Error::Storage("internal key overflow".into()))?;
            }
        }
        Ok(Internal {
            is_leaf,
            pos,
            son,
            key,
        })
    }
}

/// A storage node holding sorted key-value slots plus a forward pointer to
/// the next leaf in ascending key order (`0` if this is the last leaf).
#[derive(Clone)]
pub struct Leaf<K: FixedWidth, V: FixedWidth, const LEAF: usize> {
    pub pos: u32,
    pub nxt: u32,
    pub val: HVec<(K, V), LEAF>,
}

impl<K: FixedWidth + Ord, V: FixedWidth, const LEAF: usize> Leaf<K, V, LEAF> {
    pub fn new(pos: u32, nxt: u32) -> Self {
        Leaf {
            pos,
            nxt,
            val: HVec::new(),
        }
    }

    pub fn num(&self) -> usize {
        self.val.len()
    }

    pub fn is_full(&self) -> bool {
        self.num() == LEAF
    }

    /// Smallest `i` such that `key <= val[i].0`, or `num` if no such slot
    /// exists.
    pub fn search(&self, key: &K) -> usize {
        let mut l: isize = -1;
        let mut r: isize = self.num() as isize - 1;
        while l < r {
            let mid = (l + r + 1) >> 1;
            if *key <= self.val[mid as usize].0 {
                r = mid - 1;
            } else {
                l = mid;
            }
        }
        (l + 1) as usize
    }

    pub const ENCODED_LEN: usize =
        4 + 4 + 4 + LEAF * (K::ENCODED_LEN + V::ENCODED_LEN);

    pub fn encode(&self, out: &mut [u8]) {
        let mut off = 0;
        out[off..off + 4].copy_from_slice(&self.pos.to_le_bytes());
        off += 4;
        out[off..off + 4].copy_from_slice(&self.nxt.to_le_bytes());
        off += 4;
        out[off..off + 4].copy_from_slice(&(self.num() as u32).to_le_bytes());
        off += 4;
        let cell = K::ENCODED_LEN + V::ENCODED_LEN;
        for i in 0..LEAF {
            if let Some((k, v)) = self.val.get(i) {
                k.encode(&mut out[off..off + K::ENCODED_LEN]);
                v.encode(&mut out[off + K::ENCODED_LEN..off + cell]);
            } else {
                out[off..off + cell].iter_mut().for_each(|b| *b = 0);
            }
            off += cell;
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < Self::ENCODED_LEN {
            return Err(Error::Storage("short leaf record".into()));
        }
        let mut off = 0;
        let pos = u32::decode(&buf[off..off + 4]);
        off += 4;
        let nxt = u32::decode(&buf[off..off + 4]);
        off += 4;
        let num = u32::decode(&buf[off..off + 4]) as usize;
        off += 4;
        let cell = K::ENCODED_LEN + V::ENCODED_LEN;
        let mut val = HVec::new();
        for i in 0..LEAF {
            if i < num {
                let base = off + i * cell;
                let k = K::decode(&buf[base..base + K::ENCODED_LEN]);
                let v = V::decode(&buf[base + K::ENCODED_LEN..base + cell]);
                val.push((k, v))
                    .map_err(|_| Error::Storage("leaf val overflow".into()))?;
            }
        }
        Ok(Leaf { pos, nxt, val })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::FixedString;

    type K = FixedString<8>;

    #[test]
    fn internal_search_routes_ties_left() {
        let mut n: Internal<K, 4> = Internal::new(1, true);
        n.son.push(10).unwrap();
        n.son.push(11).unwrap();
        n.son.push(12).unwrap();
        n.key.push(K::new("k05")).unwrap();
        n.key.push(K::new("k10")).unwrap();

        assert_eq!(n.search(&K::new("k01")), 0);
        assert_eq!(n.search(&K::new("k05")), 0); // tie routes left
        assert_eq!(n.search(&K::new("k06")), 1);
        assert_eq!(n.search(&K::new("k10")), 1);
        assert_eq!(n.search(&K::new("k11")), 2);
    }

    #[test]
    fn internal_round_trip() {
        let mut n: Internal<K, 4> = Internal::new(3, false);
        n.son.push(7).unwrap();
        n.son.push(8).unwrap();
        n.key.push(K::new("m")).unwrap();

        let mut buf = vec![0u8; Internal::<K, 4>::ENCODED_LEN];
        n.encode(&mut buf);
        let back = Internal::<K, 4>::decode(&buf).unwrap();
        assert_eq!(back.pos, 3);
        assert_eq!(back.is_leaf, false);
        assert_eq!(back.num(), 2);
        assert_eq!(back.son[0], 7);
        assert_eq!(back.son[1], 8);
        assert_eq!(back.key[0].as_str(), "m");
    }

    #[test]
    fn leaf_search_and_round_trip() {
        let mut l: Leaf<K, i64, 10> = Leaf::new(2, 9);
        l.val.push((K::new("k01"), 1)).unwrap();
        l.val.push((K::new("k03"), 3)).unwrap();
        l.val.push((K::new("k05"), 5)).unwrap();

        assert_eq!(l.search(&K::new("k03")), 1);
        assert_eq!(l.search(&K::new("k04")), 2);
        assert_eq!(l.search(&K::new("k99")), 3);

        let mut buf = vec![0u8; Leaf::<K, i64, 10>::ENCODED_LEN];
        l.encode(&mut buf);
        let back = Leaf::<K, i64, 10>::decode(&buf).unwrap();
        assert_eq!(back.nxt, 9);
        assert_eq!(back.num(), 3);
        assert_eq!(back.val[1].0.as_str(), "k03");
        assert_eq!(back.val[1].1, 3);
    }
}

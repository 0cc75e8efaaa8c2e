//! Owns the two page files and routes reads/writes through the buffer
//! pools that sit in front of them.
//!
//! Layout per §4.1/§6: each file opens with an 8-byte header (two
//! little-endian `u32`s), followed by fixed-size slotted records starting
//! at page id `1`. `tree.dat` holds `[root_pos, last_internal]` and one
//! `Internal` record per slot; `leaf.dat` holds `[last_leaf, size]` and one
//! `Leaf` record per slot. The store is the only code that touches the
//! files directly; the tree engine only ever sees `Internal`/`Leaf` values.
use std::fs::{File, OpenOptions};
use std::io::{Read as IoRead, Seek, SeekFrom, Write as IoWrite};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::buffer_pool::BufferPool;
use super::codec::FixedWidth;
use super::page::{Internal, Leaf};
use crate::errors::Error;

const HEADER_LEN: u64 = 8;

pub struct PageStore<K, V, const INTERNAL: usize, const LEAF: usize>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
{
    tree_file: File,
    leaf_file: File,
    internal_pool: BufferPool<Internal<K, INTERNAL>>,
    leaf_pool: BufferPool<Leaf<K, V, LEAF>>,
    pub last_internal: u32,
    pub last_leaf: u32,
    pub size: u64,
}

impl<K, V, const INTERNAL: usize, const LEAF: usize> PageStore<K, V, INTERNAL, LEAF>
where
    K: FixedWidth + Ord,
    V: FixedWidth,
{
    /// Opens `{prefix}tree.dat`/`{prefix}leaf.dat`, creating and
    /// initializing them on first use (§4.1). Returns the store plus the
    /// in-memory root record the tree engine should hold onto.
    pub fn open(
        prefix: &Path,
        pool_capacity: usize,
    ) -> Result<(Self, Internal<K, INTERNAL>), Error> {
        let tree_path = with_suffix(prefix, "tree.dat");
        let leaf_path = with_suffix(prefix, "leaf.dat");
        let first_open = !tree_path.exists() && !leaf_path.exists();

        let mut tree_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&tree_path)?;
        let mut leaf_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&leaf_path)?;

        if first_open {
            debug!(prefix = %prefix.display(), "initializing fresh tree");
            let root = Internal::<K, INTERNAL> {
                is_leaf: true,
                pos: 1,
                son: {
                    let mut v = heapless::Vec::new();
                    v.push(1).ok();
                    v
                },
                key: heapless::Vec::new(),
            };
            let leaf: Leaf<K, V, LEAF> = Leaf::new(1, 0);

            write_u32_pair(&mut tree_file, root.pos, 1)?;
            write_record(&mut tree_file, root.pos, &root, Internal::<K, INTERNAL>::ENCODED_LEN)?;
            write_u32_pair(&mut leaf_file, 1, 0)?;
            write_record(&mut leaf_file, leaf.pos, &leaf, Leaf::<K, V, LEAF>::ENCODED_LEN)?;
            tree_file.flush()?;
            leaf_file.flush()?;

            let store = PageStore {
                tree_file,
                leaf_file,
                internal_pool: BufferPool::new(pool_capacity),
                leaf_pool: BufferPool::new(pool_capacity),
                last_internal: 1,
                last_leaf: 1,
                size: 0,
            };
            return Ok((store, root));
        }

        let (root_pos, last_internal) = read_u32_pair(&mut tree_file)?;
        let (last_leaf, size) = read_u32_pair(&mut leaf_file)?;
        let root = read_record::<Internal<K, INTERNAL>>(
            &mut tree_file,
            root_pos,
            Internal::<K, INTERNAL>::ENCODED_LEN,
        )?;
        debug!(root_pos, last_internal, last_leaf, size, "reopened tree");

        let store = PageStore {
            tree_file,
            leaf_file,
            internal_pool: BufferPool::new(pool_capacity),
            leaf_pool: BufferPool::new(pool_capacity),
            last_internal,
            last_leaf,
            size: size as u64,
        };
        Ok((store, root))
    }

    pub fn alloc_internal(&mut self) -> u32 {
        self.last_internal += 1;
        self.last_internal
    }

    pub fn alloc_leaf(&mut self) -> u32 {
        self.last_leaf += 1;
        self.last_leaf
    }

    pub fn read_internal(&mut self, pos: u32) -> Result<Internal<K, INTERNAL>, Error> {
        if let Some(n) = self.internal_pool.find(pos) {
            return Ok(n.clone());
        }
        read_record(&mut self.tree_file, pos, Internal::<K, INTERNAL>::ENCODED_LEN)
    }

    pub fn read_leaf(&mut self, pos: u32) -> Result<Leaf<K, V, LEAF>, Error> {
        if let Some(l) = self.leaf_pool.find(pos) {
            return Ok(l.clone());
        }
        read_record(&mut self.leaf_file, pos, Leaf::<K, V, LEAF>::ENCODED_LEN)
    }

    pub fn write_internal(&mut self, node: &Internal<K, INTERNAL>) -> Result<(), Error> {
        if let Some((evicted_pos, evicted)) = self.internal_pool.insert(node.pos, node.clone()) {
            debug!(evicted_pos, "internal pool eviction, flushing to tree.dat");
            write_record(
                &mut self.tree_file,
                evicted_pos,
                &evicted,
                Internal::<K, INTERNAL>::ENCODED_LEN,
            )?;
        }
        Ok(())
    }

    pub fn write_leaf(&mut self, leaf: &Leaf<K, V, LEAF>) -> Result<(), Error> {
        if let Some((evicted_pos, evicted)) = self.leaf_pool.insert(leaf.pos, leaf.clone()) {
            debug!(evicted_pos, "leaf pool eviction, flushing to leaf.dat");
            write_record(
                &mut self.leaf_file,
                evicted_pos,
                &evicted,
                Leaf::<K, V, LEAF>::ENCODED_LEN,
            )?;
        }
        Ok(())
    }

    /// Drops a merged-away page from the pool without flushing it. Its id
    /// becomes a permanent hole in the file; nothing reclaims it (§9).
    pub fn remove_internal(&mut self, pos: u32) {
        self.internal_pool.remove(pos);
    }

    pub fn remove_leaf(&mut self, pos: u32) {
        self.leaf_pool.remove(pos);
    }

    /// Flushes headers, the root record, and every still-dirty pooled page.
    pub fn close(&mut self, root: &Internal<K, INTERNAL>) -> Result<(), Error> {
        write_u32_pair(&mut self.tree_file, root.pos, self.last_internal)?;
        write_record(
            &mut self.tree_file,
            root.pos,
            root,
            Internal::<K, INTERNAL>::ENCODED_LEN,
        )?;
        for (pos, node) in self.internal_pool.drain() {
            write_record(
                &mut self.tree_file,
                pos,
                &node,
                Internal::<K, INTERNAL>::ENCODED_LEN,
            )?;
        }
        write_u32_pair(&mut self.leaf_file, self.last_leaf, self.size as u32)?;
        for (pos, leaf) in self.leaf_pool.drain() {
            write_record(&mut self.leaf_file, pos, &leaf, Leaf::<K, V, LEAF>::ENCODED_LEN)?;
        }
        self.tree_file.flush()?;
        self.leaf_file.flush()?;
        debug!(last_internal = self.last_internal, last_leaf = self.last_leaf, size = self.size, "tree closed");
        Ok(())
    }
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn read_u32_pair(file: &mut File) -> Result<(u32, u32), Error> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok((
        u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        u32::from_le_bytes(buf[4..8].try_into().unwrap()),
    ))
}

fn write_u32_pair(file: &mut File, a: u32, b: u32) -> Result<(), Error> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&a.to_le_bytes());
    buf[4..8].copy_from_slice(&b.to_le_bytes());
    file.write_all(&buf)?;
    Ok(())
}

trait Record: Sized {
    fn encode_into(&self, out: &mut [u8]);
    fn decode_from(buf: &[u8]) -> Result<Self, Error>;
}

impl<K: FixedWidth + Ord, const INTERNAL: usize> Record for Internal<K, INTERNAL> {
    fn encode_into(&self, out: &mut [u8]) {
        self.encode(out)
    }
    fn decode_from(buf: &[u8]) -> Result<Self, Error> {
        Internal::decode(buf)
    }
}

impl<K: FixedWidth + Ord, V: FixedWidth, const LEAF: usize> Record for Leaf<K, V, LEAF> {
    fn encode_into(&self, out: &mut [u8]) {
        self.encode(out)
    }
    fn decode_from(buf: &[u8]) -> Result<Self, Error> {
        Leaf::decode(buf)
    }
}

fn write_record<R: Record>(
    file: &mut File,
    pos: u32,
    record: &R,
    record_len: usize,
) -> Result<(), Error> {
    let offset = HEADER_LEN + pos as u64 * record_len as u64;
    let mut buf = vec![0u8; record_len];
    record.encode_into(&mut buf);
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&buf)?;
    Ok(())
}

fn read_record<R: Record>(file: &mut File, pos: u32, record_len: usize) -> Result<R, Error> {
    let offset = HEADER_LEN + pos as u64 * record_len as u64;
    let mut buf = vec![0u8; record_len];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Storage(format!("short read for page {} at offset {}", pos, offset))
        } else {
            Error::Io(e)
        }
    })?;
    R::decode_from(&buf)
}

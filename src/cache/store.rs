//! The bounded ring-allocated on-disk range cache (spec §4.5).
//!
//! Entries live in an arena (`Vec<Slot>` plus a free list) rather than a
//! linked list of owned nodes, per spec §9 "Pointer graph in the cache".
//! `head` is the oldest surviving entry, `last` the most recently
//! inserted; `Slot::next` threads the ring from `head` to `last` in
//! insertion order, which is also the order the whole index file is
//! rewritten in on every insert.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::cache::entry::RangeEntry;
use crate::digest::Digest;
use crate::error::{Error, Result};

const INDEX_RECORD_LEN: usize = 8 + 8 + 8 + 32;
const INDEX_HEADER_LEN: usize = 8 + 8;

struct Slot {
    entry: RangeEntry,
    next: Option<usize>,
}

pub struct RangeCache {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    last: Option<usize>,
    max_size: u64,
    data_file: File,
    index_file: File,
}

impl RangeCache {
    /// Open (or create) the data and index files at `data_path` and
    /// `data_path` + `.idx`, and rebuild the in-memory list from the
    /// index (spec §4.5 "Index file layout").
    pub fn open(data_path: impl AsRef<Path>, max_size: u64) -> Result<Self> {
        let data_path = data_path.as_ref();
        let index_path = {
            let mut p = data_path.as_os_str().to_owned();
            p.push(".idx");
            std::path::PathBuf::from(p)
        };

        let mut open_opts = OpenOptions::new();
        open_opts.read(true).write(true).create(true);
        #[cfg(unix)]
        open_opts.mode(0o600);

        let data_file = open_opts
            .open(data_path)
            .map_err(|e| Error::Io(format!("opening cache data file: {}", e)))?;
        let index_file = open_opts
            .open(&index_path)
            .map_err(|e| Error::Io(format!("opening cache index file: {}", e)))?;

        let mut cache = RangeCache {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            last: None,
            max_size,
            data_file,
            index_file,
        };
        cache.load_index()?;
        Ok(cache)
    }

    fn load_index(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        self.index_file
            .seek(SeekFrom::Start(0))
            .map_err(Error::from)?;
        self.index_file.read_to_end(&mut raw).map_err(Error::from)?;
        if raw.len() < INDEX_HEADER_LEN {
            return Ok(()); // fresh, empty index
        }

        let count = u64::from_le_bytes(raw[0..8].try_into().unwrap()) as usize;
        let _last_index = i64::from_le_bytes(raw[8..16].try_into().unwrap());

        let mut offset = INDEX_HEADER_LEN;
        let mut prev: Option<usize> = None;
        for _ in 0..count {
            if offset + INDEX_RECORD_LEN > raw.len() {
                break; // truncated index: crash-safety means trust what parses (spec §5)
            }
            let start = u64::from_le_bytes(raw[offset..offset + 8].try_into().unwrap());
            let size = u64::from_le_bytes(raw[offset + 8..offset + 16].try_into().unwrap());
            let cstart = u64::from_le_bytes(raw[offset + 16..offset + 24].try_into().unwrap());
            let md5_hex = std::str::from_utf8(&raw[offset + 24..offset + 24 + 32])
                .map_err(|_| Error::Io("corrupt index: non-UTF8 digest".to_owned()))?;
            let md5 = Digest::from_hex(md5_hex)?;
            offset += INDEX_RECORD_LEN;

            let idx = self.slots.len();
            self.slots.push(Slot {
                entry: RangeEntry { start, size, cstart, md5 },
                next: None,
            });
            if let Some(p) = prev {
                self.slots[p].next = Some(idx);
            } else {
                self.head = Some(idx);
            }
            prev = Some(idx);
        }
        // Driven by the last record actually parsed, not the declared
        // `count`: a torn write leaves `count` larger than what's present
        // (spec §5 "a subsequent startup rebuilds the list from the index
        // at its previous state"), and `head`/`last` must still both be
        // `Some` (or both `None`) for `insert`'s placement logic to hold.
        self.last = prev;
        Ok(())
    }

    fn save_index(&mut self) -> Result<()> {
        let mut out = Vec::new();
        let chain = self.chain_indices();
        out.extend_from_slice(&(chain.len() as u64).to_le_bytes());
        let last_index = chain.len().saturating_sub(1) as i64;
        out.extend_from_slice(&last_index.to_le_bytes());
        for idx in chain {
            let e = &self.slots[idx].entry;
            out.extend_from_slice(&e.start.to_le_bytes());
            out.extend_from_slice(&e.size.to_le_bytes());
            out.extend_from_slice(&e.cstart.to_le_bytes());
            out.extend_from_slice(e.md5.to_hex().as_bytes());
        }

        self.index_file.seek(SeekFrom::Start(0)).map_err(Error::from)?;
        self.index_file.write_all(&out).map_err(Error::from)?;
        self.index_file.set_len(out.len() as u64).map_err(Error::from)?;
        self.index_file.flush().map_err(Error::from)?;
        Ok(())
    }

    fn chain_indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.head;
        while let Some(idx) = cur {
            out.push(idx);
            cur = self.slots[idx].next;
        }
        out
    }

    fn alloc_slot(&mut self, entry: RangeEntry, next: Option<usize>) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Slot { entry, next };
            idx
        } else {
            self.slots.push(Slot { entry, next });
            self.slots.len() - 1
        }
    }

    fn read_digest_at(&mut self, offset: u64) -> Result<String> {
        let mut buf = [0u8; 32];
        self.data_file.seek(SeekFrom::Start(offset)).map_err(Error::from)?;
        self.data_file.read_exact(&mut buf).map_err(Error::from)?;
        String::from_utf8(buf.to_vec()).map_err(|_| Error::Io("corrupt cache digest".to_owned()))
    }

    /// `get(url, start, rsize)`: spec §4.5 "Lookup". Returns `None` on a
    /// miss, including when the matching entry is found corrupt (in which
    /// case it is evicted as a side effect before returning).
    pub fn lookup(&mut self, start: u64, rsize: u64) -> Result<Option<Vec<u8>>> {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        let found = loop {
            match cur {
                None => break None,
                Some(idx) => {
                    if self.slots[idx].entry.covers(start, rsize) {
                        break Some((idx, prev));
                    }
                    prev = Some(idx);
                    cur = self.slots[idx].next;
                }
            }
        };

        let (idx, prev) = match found {
            Some(pair) => pair,
            None => return Ok(None),
        };

        let entry = self.slots[idx].entry;
        let want = entry.md5.to_hex();
        let leader = self.read_digest_at(entry.cstart)?;
        let trailer = self.read_digest_at(entry.cstart + 32 + entry.size)?;

        if leader != want || trailer != want {
            if Some(idx) == self.head && prev.is_none() {
                self.slots[idx].entry = RangeEntry::zeroed_head();
            } else {
                self.unlink(idx, prev);
            }
            return Ok(None);
        }

        let body_offset = entry.cstart + 32 + (start - entry.start);
        let mut body = vec![0u8; rsize as usize];
        self.data_file
            .seek(SeekFrom::Start(body_offset))
            .map_err(Error::from)?;
        self.data_file.read_exact(&mut body).map_err(Error::from)?;
        Ok(Some(body))
    }

    fn unlink(&mut self, idx: usize, prev: Option<usize>) {
        let next = self.slots[idx].next;
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        if self.last == Some(idx) {
            self.last = prev;
        }
        self.free.push(idx);
    }

    /// `put(url, start, rsize, md5)`: spec §4.5 "Insert".
    pub fn insert(&mut self, start: u64, md5: Digest, body: &[u8]) -> Result<()> {
        let rsize = body.len() as u64;
        let footprint = 32 + rsize + 32;
        let base = RangeEntry { start, size: rsize, cstart: 0, md5 };

        let new_last = match (self.head, self.last) {
            (None, None) => {
                let entry = RangeEntry { cstart: 0, ..base };
                let idx = self.alloc_slot(entry, None);
                self.head = Some(idx);
                self.last = Some(idx);
                idx
            }
            (Some(head_idx), Some(last_idx)) => {
                let last_entry = self.slots[last_idx].entry;
                let last_end = last_entry.cstart + last_entry.footprint();

                if last_end + footprint > self.max_size {
                    let old_head_next = self.slots[head_idx].next;
                    let entry = RangeEntry { cstart: 0, ..base };
                    self.slots[head_idx] = Slot { entry, next: None };
                    if last_idx != head_idx {
                        self.slots[last_idx].next = Some(head_idx);
                    }
                    self.last = Some(head_idx);
                    self.head = old_head_next.unwrap_or(head_idx);
                    head_idx
                } else if self.slots[last_idx].next.is_none() {
                    let entry = RangeEntry { cstart: last_end, ..base };
                    let idx = self.alloc_slot(entry, None);
                    self.slots[last_idx].next = Some(idx);
                    self.last = Some(idx);
                    idx
                } else {
                    let next_idx = self.slots[last_idx].next.unwrap();
                    let next_cstart = self.slots[next_idx].entry.cstart;
                    if next_cstart > last_end + footprint {
                        let entry = RangeEntry { cstart: last_end, ..base };
                        let idx = self.alloc_slot(entry, Some(next_idx));
                        self.slots[last_idx].next = Some(idx);
                        self.last = Some(idx);
                        idx
                    } else {
                        let entry = RangeEntry { cstart: last_end, ..base };
                        let next_next = self.slots[next_idx].next;
                        self.slots[next_idx] = Slot { entry, next: next_next };
                        self.last = Some(next_idx);
                        next_idx
                    }
                }
            }
            _ => unreachable!("head and last are always both set or both unset"),
        };

        self.evict_overlapping(new_last, footprint);

        let cstart = self.slots[new_last].entry.cstart;
        self.data_file.seek(SeekFrom::Start(cstart)).map_err(Error::from)?;
        self.data_file.write_all(md5.to_hex().as_bytes()).map_err(Error::from)?;
        self.data_file.write_all(body).map_err(Error::from)?;
        self.data_file.write_all(md5.to_hex().as_bytes()).map_err(Error::from)?;
        self.data_file.flush().map_err(Error::from)?;

        self.save_index()
    }

    /// Evict every *other* live entry whose footprint physically overlaps
    /// `new_last`'s (spec §4.5 step 3). Scans the whole chain rather than
    /// just the entries following `new_last` in insertion order: a ring
    /// wrap reuses the head's slot at `cstart = 0`, which is the smallest
    /// offset in the file but the *newest* entry in insertion order, so the
    /// entries it can physically overlap (the old head's immediate
    /// successors) sit earlier in the chain, not later.
    fn evict_overlapping(&mut self, new_last: usize, footprint: u64) {
        let range_start = self.slots[new_last].entry.cstart;
        let range_end = range_start + footprint;

        let mut prev: Option<usize> = None;
        let mut cur = self.head;
        while let Some(idx) = cur {
            let next = self.slots[idx].next;
            if idx == new_last {
                prev = Some(idx);
                cur = next;
                continue;
            }

            let cand = self.slots[idx].entry;
            let overlaps = cand.cstart < range_end && cand.cstart + cand.footprint() > range_start;
            if overlaps {
                match prev {
                    Some(p) => self.slots[p].next = next,
                    None => self.head = next,
                }
                if self.last == Some(idx) {
                    self.last = prev;
                }
                self.free.push(idx);
            } else {
                prev = Some(idx);
            }
            cur = next;
        }
    }

    /// The data file offset one past the last live entry's footprint, for
    /// diagnostics and tests (spec §8 invariant 3).
    pub fn high_water_mark(&self) -> u64 {
        self.last
            .map(|idx| {
                let e = &self.slots[idx].entry;
                e.cstart + e.footprint()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(byte: u8, len: usize) -> Vec<u8> {
        vec![byte; len]
    }

    #[test]
    fn simple_hit_after_insert() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = RangeCache::open(dir.path().join("data"), 1 << 20).unwrap();

        assert!(cache.lookup(0, 1024).unwrap().is_none());
        let b = body(0xAB, 1024);
        cache.insert(0, Digest::of(&b), &b).unwrap();

        let hit = cache.lookup(0, 1024).unwrap().unwrap();
        assert_eq!(hit, b);
    }

    #[test]
    fn ring_wraps_and_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        // Matches spec §8 scenario 2: three 512-byte ranges, cache sized
        // for exactly two plus slack, third insert wraps to cstart=0.
        let max_size = 2 * (32 + 512 + 32) + 100;
        let mut cache = RangeCache::open(dir.path().join("data"), max_size as u64).unwrap();

        let b0 = body(1, 512);
        let b1 = body(2, 512);
        let b2 = body(3, 512);

        cache.insert(0, Digest::of(&b0), &b0).unwrap();
        cache.insert(512, Digest::of(&b1), &b1).unwrap();
        cache.insert(1024, Digest::of(&b2), &b2).unwrap();

        assert!(cache.lookup(0, 512).unwrap().is_none());
        assert_eq!(cache.lookup(512, 512).unwrap().unwrap(), b1);
        assert_eq!(cache.lookup(1024, 512).unwrap().unwrap(), b2);
    }

    #[test]
    fn ring_wrap_evicts_entries_overlapped_by_a_larger_wrapped_range() {
        let dir = tempfile::tempdir().unwrap();
        // Two 64-byte entries (footprint 128 each) fill cstart 0..256. A
        // cache sized to reject a third 64-byte entry but still force a
        // wrap (rather than a splice) means the third insert reuses the
        // head's slot at cstart 0. Making the third range *larger* than
        // a uniform range would be (150 bytes, footprint 214) means its
        // footprint at cstart 0..214 physically overlaps the second
        // entry's 128..256 footprint, which must be evicted even though
        // it is not "next" after the reused slot was severed from the
        // chain.
        let max_size = 300u64;
        let mut cache = RangeCache::open(dir.path().join("data"), max_size).unwrap();

        let b0 = body(1, 64);
        let b1 = body(2, 64);
        let b2 = body(3, 150);

        cache.insert(0, Digest::of(&b0), &b0).unwrap();
        cache.insert(64, Digest::of(&b1), &b1).unwrap();
        cache.insert(128, Digest::of(&b2), &b2).unwrap();

        assert!(cache.lookup(0, 64).unwrap().is_none());
        // b1 physically overlaps b2's new footprint and must have been
        // evicted, not just left dangling off the chain.
        assert!(cache.lookup(64, 64).unwrap().is_none());
        assert_eq!(cache.lookup(128, 150).unwrap().unwrap(), b2);
    }

    #[test]
    fn corrupted_non_head_entry_is_evicted_on_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = RangeCache::open(dir.path().join("data"), 1 << 20).unwrap();

        let a = body(1, 64);
        let b = body(2, 64);
        cache.insert(0, Digest::of(&a), &a).unwrap();
        cache.insert(64, Digest::of(&b), &b).unwrap();

        // Corrupt the second entry's body in place without updating its digest.
        cache.data_file.seek(SeekFrom::Start(32 + 32 + 64 + 32)).unwrap();
        cache.data_file.write_all(&[0xffu8; 64]).unwrap();

        assert!(cache.lookup(64, 64).unwrap().is_none());
        // Evicted, so a second lookup still misses rather than re-reading stale data.
        assert!(cache.lookup(64, 64).unwrap().is_none());
        // Unrelated entry remains intact.
        assert_eq!(cache.lookup(0, 64).unwrap().unwrap(), a);
    }

    #[test]
    fn truncated_index_does_not_panic_on_next_insert() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data");
        let a = body(9, 64);
        let b = body(7, 64);
        {
            let mut cache = RangeCache::open(&data_path, 1 << 20).unwrap();
            cache.insert(0, Digest::of(&a), &a).unwrap();
            cache.insert(64, Digest::of(&b), &b).unwrap();
        }

        // Simulate a crash mid-write-of-the-second-record: truncate the
        // index file's header to claim two records while only the first
        // record's bytes are actually present (spec §5).
        let index_path = {
            let mut p = data_path.as_os_str().to_owned();
            p.push(".idx");
            std::path::PathBuf::from(p)
        };
        let full_len = std::fs::metadata(&index_path).unwrap().len();
        let one_record_len = (8 + 8) + (8 + 8 + 8 + 32);
        assert!(full_len as usize > one_record_len);
        let index_file = OpenOptions::new().write(true).open(&index_path).unwrap();
        index_file.set_len(one_record_len as u64).unwrap();

        let mut reopened = RangeCache::open(&data_path, 1 << 20).unwrap();
        // Previously: `self.last` stayed `None` while `self.head` was
        // `Some`, and this insert hit the `unreachable!()` placement arm.
        let c = body(5, 64);
        reopened.insert(128, Digest::of(&c), &c).unwrap();
        assert_eq!(reopened.lookup(0, 64).unwrap().unwrap(), a);
        assert_eq!(reopened.lookup(128, 64).unwrap().unwrap(), c);
    }

    #[test]
    fn index_reload_reproduces_chain() {
        let dir = tempfile::tempdir().unwrap();
        let data_path = dir.path().join("data");
        let a = body(9, 128);
        {
            let mut cache = RangeCache::open(&data_path, 1 << 20).unwrap();
            cache.insert(0, Digest::of(&a), &a).unwrap();
        }
        let mut reopened = RangeCache::open(&data_path, 1 << 20).unwrap();
        assert_eq!(reopened.lookup(0, 128).unwrap().unwrap(), a);
    }
}

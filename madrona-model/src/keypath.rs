//! Hierarchical byte-string keys addressing nodes in a state tree.
//!
//! A keypath is a flat byte string whose components are separated by `/`.
//! Indices into ordered sequences are a distinct separator byte followed
//! by an 8-byte big-endian integer, so sequence siblings collate
//! numerically and never collide with string keys. The empty keypath is
//! the tree root.
//!
//! Ordering invariant: if A is a part-aligned prefix of B, then A < B in
//! plain lexicographic byte order. Subtree reads are therefore prefix
//! scans over an ordered key space.

use std::fmt;

/// Separator between string-keyed components.
pub const KEYPATH_SEPARATOR: u8 = b'/';

/// Separator preceding an 8-byte big-endian sequence index. Sorts below
/// `/` and below all printable bytes used in map keys.
pub const INDEX_SEPARATOR: u8 = 0x1e;

/// One component of a keypath.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Part<'a> {
    Key(&'a [u8]),
    Index(u64),
}

#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keypath(Vec<u8>);

impl Keypath {
    /// The empty keypath: the root of a tree.
    pub fn root() -> Keypath {
        Keypath(Vec::new())
    }

    pub fn new(bytes: impl Into<Vec<u8>>) -> Keypath {
        Keypath(bytes.into())
    }

    pub fn from_parts<I, P>(parts: I) -> Keypath
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let mut kp = Keypath::root();
        for part in parts {
            kp = kp.push(part.as_ref());
        }
        kp
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a string-keyed component. Pure.
    pub fn push(&self, part: &[u8]) -> Keypath {
        let mut bytes = Vec::with_capacity(self.0.len() + part.len() + 1);
        bytes.extend_from_slice(&self.0);
        if !self.0.is_empty() {
            bytes.push(KEYPATH_SEPARATOR);
        }
        bytes.extend_from_slice(part);
        Keypath(bytes)
    }

    /// Append a sequence index component. Pure. The index separator is
    /// always written, even at the root, so parsing stays unambiguous.
    pub fn push_index(&self, index: u64) -> Keypath {
        let mut bytes = Vec::with_capacity(self.0.len() + 9);
        bytes.extend_from_slice(&self.0);
        bytes.push(INDEX_SEPARATOR);
        bytes.extend_from_slice(&index.to_be_bytes());
        Keypath(bytes)
    }

    /// Split off the final component. Returns `None` on the root.
    pub fn pop(&self) -> Option<(Keypath, Part<'_>)> {
        let boundaries = self.part_boundaries();
        let &(start, end) = boundaries.last()?;
        // the separator (if any) sits right before the part payload
        let parent_end = start.saturating_sub(1);
        let part = self.part_at(start, end);
        Some((Keypath(self.0[..parent_end].to_vec()), part))
    }

    /// Split off a final index component. Returns `None` if the last
    /// component is not an index.
    pub fn pop_index(&self) -> Option<(Keypath, u64)> {
        match self.pop()? {
            (parent, Part::Index(i)) => Some((parent, i)),
            _ => None,
        }
    }

    /// The parent keypath, or `None` on the root.
    pub fn parent(&self) -> Option<Keypath> {
        self.pop().map(|(parent, _)| parent)
    }

    /// Part-aligned prefix test: a byte prefix match where the next byte
    /// (if any) is a separator, so `foo` never matches `foobar`.
    pub fn starts_with(&self, prefix: &Keypath) -> bool {
        if prefix.0.is_empty() {
            return true;
        }
        if !self.0.starts_with(&prefix.0) {
            return false;
        }
        self.0.len() == prefix.0.len()
            || self.0[prefix.0.len()] == KEYPATH_SEPARATOR
            || self.0[prefix.0.len()] == INDEX_SEPARATOR
    }

    /// Strip a part-aligned prefix, yielding the relative remainder.
    pub fn strip_prefix(&self, prefix: &Keypath) -> Option<Keypath> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.0.is_empty() {
            return Some(self.clone());
        }
        let rest = &self.0[prefix.0.len()..];
        match rest.first() {
            None => Some(Keypath::root()),
            Some(&KEYPATH_SEPARATOR) => Some(Keypath(rest[1..].to_vec())),
            _ => Some(Keypath(rest.to_vec())), // index part keeps its separator
        }
    }

    /// Longest shared part-aligned prefix of two keypaths.
    pub fn common_ancestor(&self, other: &Keypath) -> Keypath {
        let mut end = 0usize;
        for (_, part_end) in self.part_boundaries() {
            let prefix = &self.0[..part_end];
            if other.0.len() < part_end || &other.0[..part_end] != prefix {
                break;
            }
            // aligned in other as well?
            let aligned = other.0.len() == part_end
                || other.0[part_end] == KEYPATH_SEPARATOR
                || other.0[part_end] == INDEX_SEPARATOR;
            if !aligned {
                break;
            }
            end = part_end;
        }
        Keypath(self.0[..end].to_vec())
    }

    /// Number of components; zero for the root.
    pub fn num_parts(&self) -> usize {
        self.part_boundaries().len()
    }

    /// Iterate the components in order.
    pub fn parts(&self) -> Vec<Part<'_>> {
        self.part_boundaries()
            .into_iter()
            .map(|(start, end)| self.part_at(start, end))
            .collect()
    }

    /// Append a whole relative keypath to this one.
    pub fn join(&self, rel: &Keypath) -> Keypath {
        if self.0.is_empty() {
            return rel.clone();
        }
        if rel.0.is_empty() {
            return self.clone();
        }
        let mut bytes = Vec::with_capacity(self.0.len() + rel.0.len() + 1);
        bytes.extend_from_slice(&self.0);
        if rel.0[0] != INDEX_SEPARATOR {
            bytes.push(KEYPATH_SEPARATOR);
        }
        bytes.extend_from_slice(&rel.0);
        Keypath(bytes)
    }

    /// Dotted rendering used by permission regexes: `.refs.heads`, with
    /// sequence indices as `[n]`. The root renders as the empty string.
    pub fn dotted(&self) -> String {
        let mut out = String::new();
        for part in self.parts() {
            match part {
                Part::Key(k) => {
                    out.push('.');
                    out.push_str(&String::from_utf8_lossy(k));
                }
                Part::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    /// All ancestors from this keypath up to and including the root,
    /// innermost first.
    pub fn ancestors_including_self(&self) -> Vec<Keypath> {
        let mut out = vec![self.clone()];
        let mut cur = self.clone();
        while let Some(parent) = cur.parent() {
            out.push(parent.clone());
            cur = parent;
        }
        out
    }

    // (start, end) byte offsets of each part's payload, in order.
    fn part_boundaries(&self) -> Vec<(usize, usize)> {
        let bytes = &self.0;
        let mut out = Vec::new();
        let mut pos = 0usize;
        let mut first = true;
        while pos < bytes.len() {
            if bytes[pos] == INDEX_SEPARATOR {
                let start = pos + 1;
                let end = (start + 8).min(bytes.len());
                out.push((start, end));
                pos = end;
                first = false;
            } else {
                if !first && bytes[pos] == KEYPATH_SEPARATOR {
                    pos += 1;
                }
                let start = pos;
                while pos < bytes.len()
                    && bytes[pos] != KEYPATH_SEPARATOR
                    && bytes[pos] != INDEX_SEPARATOR
                {
                    pos += 1;
                }
                out.push((start, pos));
                first = false;
            }
        }
        out
    }

    fn part_at(&self, start: usize, end: usize) -> Part<'_> {
        if start > 0 && self.0[start - 1] == INDEX_SEPARATOR && end - start == 8 {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&self.0[start..end]);
            Part::Index(u64::from_be_bytes(buf))
        } else {
            Part::Key(&self.0[start..end])
        }
    }
}

impl From<&str> for Keypath {
    fn from(s: &str) -> Keypath {
        Keypath(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Keypath {
    fn from(bytes: &[u8]) -> Keypath {
        Keypath(bytes.to_vec())
    }
}

impl AsRef<[u8]> for Keypath {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypath(")?;
        fmt::Display::fmt(self, f)?;
        write!(f, ")")
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in self.parts() {
            if !first {
                write!(f, "/")?;
            }
            match part {
                Part::Key(k) => write!(f, "{}", String::from_utf8_lossy(k))?,
                Part::Index(i) => write!(f, "[{}]", i)?,
            }
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_round_trip() {
        let kp = Keypath::root().push(b"foo").push(b"bar");
        assert_eq!(kp.as_bytes(), b"foo/bar");
        let (parent, last) = kp.pop().unwrap();
        assert_eq!(parent.as_bytes(), b"foo");
        assert_eq!(last, Part::Key(b"bar"));
        let (parent, last) = parent.pop().unwrap();
        assert!(parent.is_root());
        assert_eq!(last, Part::Key(b"foo"));
        assert!(parent.pop().is_none());
    }

    #[test]
    fn test_push_index_round_trip() {
        let kp = Keypath::from("flox").push_index(1).push(b"yup");
        let (parent, last) = kp.pop().unwrap();
        assert_eq!(last, Part::Key(b"yup"));
        let (parent, idx) = parent.pop_index().unwrap();
        assert_eq!(idx, 1);
        assert_eq!(parent.as_bytes(), b"flox");
    }

    #[test]
    fn test_prefix_ordering_invariant() {
        // any part-aligned extension sorts after its prefix
        let base = Keypath::from("foo/bar");
        for ext in [
            base.push(b"baz"),
            base.push_index(0),
            base.push_index(u64::MAX),
        ] {
            assert!(base.as_bytes() < ext.as_bytes());
        }
    }

    #[test]
    fn test_index_ordering_is_numeric() {
        let kp = Keypath::from("slice");
        let a = kp.push_index(2);
        let b = kp.push_index(10);
        let c = kp.push_index(300);
        assert!(a.as_bytes() < b.as_bytes());
        assert!(b.as_bytes() < c.as_bytes());
    }

    #[test]
    fn test_starts_with_is_part_aligned() {
        let foo = Keypath::from("foo");
        assert!(Keypath::from("foo/bar").starts_with(&foo));
        assert!(Keypath::from("foo").push_index(3).starts_with(&foo));
        assert!(foo.starts_with(&foo));
        assert!(!Keypath::from("foobar").starts_with(&foo));
        assert!(Keypath::from("anything").starts_with(&Keypath::root()));
    }

    #[test]
    fn test_strip_prefix() {
        let kp = Keypath::from("foo/bar/baz");
        assert_eq!(
            kp.strip_prefix(&Keypath::from("foo")).unwrap().as_bytes(),
            b"bar/baz"
        );
        assert!(kp.strip_prefix(&Keypath::from("fo")).is_none());
        let idx = Keypath::from("foo").push_index(2);
        let rel = idx.strip_prefix(&Keypath::from("foo")).unwrap();
        assert_eq!(rel.pop_index().unwrap().1, 2);
    }

    #[test]
    fn test_common_ancestor() {
        let a = Keypath::from("foo/bar/one");
        let b = Keypath::from("foo/bar/two/deep");
        assert_eq!(a.common_ancestor(&b).as_bytes(), b"foo/bar");
        assert_eq!(a.common_ancestor(&Keypath::from("zzz")).as_bytes(), b"");
        // not fooled by shared byte prefixes of differing parts
        let c = Keypath::from("foo/barn");
        assert_eq!(a.common_ancestor(&c).as_bytes(), b"foo");
    }

    #[test]
    fn test_num_parts() {
        assert_eq!(Keypath::root().num_parts(), 0);
        assert_eq!(Keypath::from("a").num_parts(), 1);
        assert_eq!(Keypath::from("a/b").push_index(0).num_parts(), 3);
    }

    #[test]
    fn test_dotted() {
        assert_eq!(Keypath::from("refs/heads/master").dotted(), ".refs.heads.master");
        assert_eq!(Keypath::from("text").push_index(3).dotted(), ".text[3]");
        assert_eq!(Keypath::root().dotted(), "");
    }

    #[test]
    fn test_join() {
        let root = Keypath::from("data");
        assert_eq!(root.join(&Keypath::from("flox")).as_bytes(), b"data/flox");
        let idx_rel = Keypath::root().push_index(1);
        let joined = root.join(&idx_rel);
        assert_eq!(joined.pop_index().unwrap().1, 1);
        assert_eq!(Keypath::root().join(&root).as_bytes(), b"data");
    }
}

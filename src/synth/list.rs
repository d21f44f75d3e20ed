//! Ordered list of a channel's active voices.
//!
//! Links are stored per voice slot, so prepend, append and removal by
//! identity are all constant time and no voice can appear twice.

use super::pool::VoiceId;

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<VoiceId>,
    next: Option<VoiceId>,
    linked: bool,
}

#[derive(Debug, Clone)]
pub struct VoiceList {
    links: Vec<Link>,
    head: Option<VoiceId>,
    tail: Option<VoiceId>,
    len: usize,
}

impl VoiceList {
    /// `capacity` is the number of voice slots in the pool.
    pub fn new(capacity: usize) -> Self {
        Self {
            links: vec![Link::default(); capacity],
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn first(&self) -> Option<VoiceId> {
        self.head
    }

    pub fn last(&self) -> Option<VoiceId> {
        self.tail
    }

    pub fn next(&self, id: VoiceId) -> Option<VoiceId> {
        self.links.get(id.index()).and_then(|link| link.next)
    }

    pub fn contains(&self, id: VoiceId) -> bool {
        self.links.get(id.index()).is_some_and(|link| link.linked)
    }

    /// Returns false if `id` is already listed or out of range.
    pub fn prepend(&mut self, id: VoiceId) -> bool {
        if !self.can_link(id) {
            return false;
        }
        let old_head = self.head;
        self.links[id.index()] = Link {
            prev: None,
            next: old_head,
            linked: true,
        };
        match old_head {
            Some(old) => self.links[old.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
        true
    }

    /// Returns false if `id` is already listed or out of range.
    pub fn append(&mut self, id: VoiceId) -> bool {
        if !self.can_link(id) {
            return false;
        }
        let old_tail = self.tail;
        self.links[id.index()] = Link {
            prev: old_tail,
            next: None,
            linked: true,
        };
        match old_tail {
            Some(old) => self.links[old.index()].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
        true
    }

    pub fn remove(&mut self, id: VoiceId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let Link { prev, next, .. } = self.links[id.index()];
        match prev {
            Some(prev) => self.links[prev.index()].next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.links[next.index()].prev = prev,
            None => self.tail = prev,
        }
        self.links[id.index()] = Link::default();
        self.len -= 1;
        true
    }

    pub fn take_first(&mut self) -> Option<VoiceId> {
        let first = self.head?;
        self.remove(first);
        Some(first)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    fn can_link(&self, id: VoiceId) -> bool {
        match self.links.get(id.index()) {
            Some(link) => !link.linked,
            None => false,
        }
    }
}

pub struct Iter<'a> {
    list: &'a VoiceList,
    cursor: Option<VoiceId>,
}

impl Iterator for Iter<'_> {
    type Item = VoiceId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        self.cursor = self.list.next(current);
        Some(current)
    }
}

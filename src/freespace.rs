//! The free-space list: a doubly-linked list of disjoint, resource-contiguous
//! free rectangles `[first, last] x [now, now + length)`, ordered by resource
//! index.
//!
//! Mirrors the shape of [`crate::interval`] but carries an extra `length`
//! field (how long the space stays free for, `INFINITY` until a reservation
//! carves a time ceiling into it) and different merge/assign semantics suited
//! to the backfill placement heuristic, so it is kept as its own type rather
//! than built atop the interval container.
//!
//! Developers, never forget: two adjacent nodes are allowed to share a
//! boundary resource index while backfilling is in flight (e.g. during
//! [`FreeSpaceList::assign`]); nodes only collapse into each other through
//! [`FreeSpaceList::unassign`]'s explicit merge checks.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::job::{ResIdx, Time};

/// Sentinel meaning "free for the foreseeable future" (no reservation has
/// carved a time ceiling into this space yet).
pub const INFINITY: Time = Time::INFINITY;

struct Node {
    first: ResIdx,
    last: ResIdx,
    length: Time,
    prev: Option<Weak<RefCell<Node>>>,
    next: Option<Rc<RefCell<Node>>>,
}

impl Node {
    fn resources(&self) -> usize {
        self.last - self.first + 1
    }
}

/// A single free rectangle, as handed back to callers who need to inspect
/// (not mutate) the list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeSpace {
    pub first: ResIdx,
    pub last: ResIdx,
    pub length: Time,
}

impl FreeSpace {
    pub fn resources(&self) -> usize {
        self.last - self.first + 1
    }
}

/// An opaque handle to a node in the list, returned by traversal so that
/// callers can hand it back to [`FreeSpaceList::assign`]/`remove` without the
/// list needing to search for it again.
#[derive(Clone)]
pub struct Handle(Rc<RefCell<Node>>);

impl Handle {
    pub fn view(&self) -> FreeSpace {
        let n = self.0.borrow();
        FreeSpace {
            first: n.first,
            last: n.last,
            length: n.length,
        }
    }

    pub fn set_length(&self, length: Time) {
        self.0.borrow_mut().length = length;
    }
}

pub struct FreeSpaceList {
    head: Option<Rc<RefCell<Node>>>,
}

impl FreeSpaceList {
    /// One big free space spanning the whole cluster, as it looks right
    /// after startup.
    pub fn new(total_resources: usize) -> Self {
        assert!(total_resources > 0);
        Self {
            head: Some(Rc::new(RefCell::new(Node {
                first: 0,
                last: total_resources - 1,
                length: INFINITY,
                prev: None,
                next: None,
            }))),
        }
    }

    /// In-order traversal of the list. Safe to call `assign`/`remove` on the
    /// handles it yields while iterating, since the iterator holds strong
    /// references to nodes it has already visited rather than re-deriving
    /// position from an index.
    pub fn generator(&self) -> impl Iterator<Item = Handle> + '_ {
        let mut cur = self.head.clone();
        std::iter::from_fn(move || {
            let node = cur.take()?;
            cur = node.borrow().next.clone();
            Some(Handle(node))
        })
    }

    pub fn to_vec(&self) -> Vec<FreeSpace> {
        self.generator().map(|h| h.view()).collect()
    }

    /// Removes `item` from the list.
    pub fn remove(&mut self, item: &Handle) {
        let prev = item.0.borrow().prev.clone().and_then(|w| w.upgrade());
        let next = item.0.borrow().next.clone();
        match &prev {
            Some(p) => p.borrow_mut().next = next.clone(),
            None => self.head = next.clone(),
        }
        if let Some(n) = &next {
            n.borrow_mut().prev = prev.as_ref().map(Rc::downgrade);
        }
    }

    fn assign_beginning(&mut self, item: &Handle, resources_needed: usize) -> Vec<ResIdx> {
        let mut n = item.0.borrow_mut();
        let alloc: Vec<ResIdx> = (n.first..n.first + resources_needed).collect();
        n.first += resources_needed;
        let empty = n.first > n.last;
        drop(n);
        if empty {
            self.remove(item);
        }
        alloc
    }

    fn assign_ending(&mut self, item: &Handle, resources_needed: usize) -> Vec<ResIdx> {
        let mut n = item.0.borrow_mut();
        let alloc: Vec<ResIdx> = (n.last + 1 - resources_needed..=n.last).collect();
        n.last -= resources_needed;
        let empty = n.first > n.last;
        drop(n);
        if empty {
            self.remove(item);
        }
        alloc
    }

    /// Carves `resources_needed` resource indices out of `item`, per the
    /// placement heuristic: prefer the edges of the cluster (to reduce
    /// fragmentation), then a boundary shared with a neighboring occupied
    /// region, and otherwise default to the low end of the space.
    pub fn assign(&mut self, item: &Handle, resources_needed: usize) -> Result<Vec<ResIdx>> {
        let available = item.0.borrow().resources();
        if resources_needed > available {
            return Err(Error::InsufficientResources {
                requested: resources_needed,
                available,
            });
        }

        let has_prev = item.0.borrow().prev.as_ref().and_then(|w| w.upgrade()).is_some();
        let has_next = item.0.borrow().next.is_some();
        let adjacent_to_prev = item
            .0
            .borrow()
            .prev
            .as_ref()
            .and_then(|w| w.upgrade())
            .map(|p| p.borrow().last + 1 == item.0.borrow().first)
            .unwrap_or(false);
        let adjacent_to_next = item
            .0
            .borrow()
            .next
            .as_ref()
            .map(|n| item.0.borrow().last + 1 == n.borrow().first)
            .unwrap_or(false);

        let alloc = if !has_prev {
            self.assign_beginning(item, resources_needed)
        } else if !has_next {
            self.assign_ending(item, resources_needed)
        } else if adjacent_to_prev {
            self.assign_beginning(item, resources_needed)
        } else if adjacent_to_next {
            self.assign_ending(item, resources_needed)
        } else {
            self.assign_beginning(item, resources_needed)
        };
        Ok(alloc)
    }

    /// Finds the two nodes immediately surrounding `alloc` (by resource
    /// index), i.e. the would-be predecessor/successor of a freshly freed
    /// space at that position.
    fn surrounding(&self, alloc_first: ResIdx) -> (Option<Handle>, Option<Handle>) {
        let mut prev = None;
        for h in self.generator() {
            if h.view().first > alloc_first {
                return (prev, Some(h));
            }
            prev = Some(h);
        }
        (prev, None)
    }

    /// Returns `alloc`'s resources to the list, merging with neighboring
    /// free spaces where the boundaries touch. Returns a handle to the
    /// (possibly newly created, possibly widened) free space that now
    /// covers `alloc`.
    pub fn unassign(&mut self, alloc_first: ResIdx, alloc_last: ResIdx) -> Handle {
        let resources = alloc_last - alloc_first + 1;
        let (l1, l2) = self.surrounding(alloc_first);

        let merge_l1 = l1.as_ref().map(|h| h.view().last + 1 == alloc_first).unwrap_or(false);
        let merge_l2 = l2.as_ref().map(|h| h.view().first == alloc_last + 1).unwrap_or(false);

        match (merge_l1, merge_l2) {
            (true, true) => {
                let l1 = l1.unwrap();
                let l2 = l2.unwrap();
                let l2_next = l2.0.borrow().next.clone();
                l1.0.borrow_mut().next = l2_next.clone();
                if let Some(n) = &l2_next {
                    n.borrow_mut().prev = Some(Rc::downgrade(&l1.0));
                }
                l1.0.borrow_mut().last = l2.view().last;
                l1
            }
            (true, false) => {
                let l1 = l1.unwrap();
                l1.0.borrow_mut().last += resources;
                l1
            }
            (false, true) => {
                let l2 = l2.unwrap();
                l2.0.borrow_mut().first -= resources;
                l2
            }
            (false, false) => {
                let prev_rc = l1.as_ref().map(|h| h.0.clone());
                let next_rc = l2.as_ref().map(|h| h.0.clone());
                let fresh = Rc::new(RefCell::new(Node {
                    first: alloc_first,
                    last: alloc_last,
                    length: INFINITY,
                    prev: prev_rc.as_ref().map(Rc::downgrade),
                    next: next_rc.clone(),
                }));
                match &prev_rc {
                    Some(p) => p.borrow_mut().next = Some(fresh.clone()),
                    None => self.head = Some(fresh.clone()),
                }
                if let Some(n) = &next_rc {
                    n.borrow_mut().prev = Some(Rc::downgrade(&fresh));
                }
                Handle(fresh)
            }
        }
    }

    /// Splices a brand-new `[first, last]` space (length `length`) in
    /// immediately before `before`, used by reservation carving to split a
    /// free space into a short-but-wide part and a tall-but-narrow part.
    pub fn insert_before(
        &mut self,
        first: ResIdx,
        last: ResIdx,
        length: Time,
        before: &Handle,
    ) -> Handle {
        let prev = before.0.borrow().prev.clone();
        let fresh = Rc::new(RefCell::new(Node {
            first,
            last,
            length,
            prev: prev.clone(),
            next: Some(before.0.clone()),
        }));
        match prev.and_then(|w| w.upgrade()) {
            Some(p) => p.borrow_mut().next = Some(fresh.clone()),
            None => self.head = Some(fresh.clone()),
        }
        before.0.borrow_mut().prev = Some(Rc::downgrade(&fresh));
        Handle(fresh)
    }
}

impl Clone for FreeSpaceList {
    /// Deep clone: an independent list with the same `(first, last, length)`
    /// sequence, used to snapshot the list before projecting a reservation
    /// (see `policy::project_reservation`).
    fn clone(&self) -> Self {
        let mut out = Self { head: None };
        let mut tail: Option<Rc<RefCell<Node>>> = None;
        for h in self.generator() {
            let v = h.view();
            let fresh = Rc::new(RefCell::new(Node {
                first: v.first,
                last: v.last,
                length: v.length,
                prev: tail.as_ref().map(Rc::downgrade),
                next: None,
            }));
            match &tail {
                Some(t) => t.borrow_mut().next = Some(fresh.clone()),
                None => out.head = Some(fresh.clone()),
            }
            tail = Some(fresh);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_from_lone_space_takes_beginning() {
        let mut l = FreeSpaceList::new(8);
        let h = l.generator().next().unwrap();
        let alloc = l.assign(&h, 3).unwrap();
        assert_eq!(alloc, vec![0, 1, 2]);
        assert_eq!(l.to_vec(), vec![FreeSpace { first: 3, last: 7, length: INFINITY }]);
    }

    #[test]
    fn assign_more_than_available_errors() {
        let mut l = FreeSpaceList::new(4);
        let h = l.generator().next().unwrap();
        assert!(matches!(l.assign(&h, 5), Err(Error::InsufficientResources { .. })));
    }

    #[test]
    fn assign_prefers_ending_when_adjacent_to_next_occupied() {
        // [0,7] total; carve [0,1] out first, leaving [2,7]. [2,7] has no
        // next but has a prev; prev.last+1 (1+1=2) == first (2), so it's
        // adjacent to prev and a second assign should still take from the
        // beginning (no next node exists, so ending/beginning coincide at
        // the single remaining space boundary check order).
        let mut l = FreeSpaceList::new(8);
        let h0 = l.generator().next().unwrap();
        l.assign(&h0, 2).unwrap();
        let h1 = l.generator().next().unwrap();
        let alloc = l.assign(&h1, 2).unwrap();
        assert_eq!(alloc, vec![2, 3]);
    }

    #[test]
    fn unassign_merges_with_both_neighbors() {
        let mut l = FreeSpaceList::new(10);
        let h = l.generator().next().unwrap();
        l.assign(&h, 10).unwrap(); // fully occupied, list empty
        assert!(l.to_vec().is_empty());

        l.unassign(2, 4);
        assert_eq!(l.to_vec(), vec![FreeSpace { first: 2, last: 4, length: INFINITY }]);
        l.unassign(6, 8);
        assert_eq!(
            l.to_vec(),
            vec![
                FreeSpace { first: 2, last: 4, length: INFINITY },
                FreeSpace { first: 6, last: 8, length: INFINITY },
            ]
        );
        // bridges [2,4] and [6,8] via [5,5], merging all three into one.
        l.unassign(5, 5);
        assert_eq!(l.to_vec(), vec![FreeSpace { first: 2, last: 8, length: INFINITY }]);
    }

    #[test]
    fn insert_before_splices_in_order() {
        let mut l = FreeSpaceList::new(10);
        let h = l.generator().next().unwrap();
        l.insert_before(0, 3, 5.0, &h);
        h.set_length(7.0);
        assert_eq!(
            l.to_vec(),
            vec![
                FreeSpace { first: 0, last: 3, length: 5.0 },
                FreeSpace { first: 0, last: 9, length: 7.0 },
            ]
        );
    }

    #[test]
    fn clone_is_a_deep_independent_copy() {
        let mut l = FreeSpaceList::new(10);
        let h = l.generator().next().unwrap();
        l.assign(&h, 4).unwrap();
        let snapshot = l.clone();

        let h2 = l.generator().next().unwrap();
        l.assign(&h2, 2).unwrap();

        assert_eq!(snapshot.to_vec(), vec![FreeSpace { first: 4, last: 9, length: INFINITY }]);
        assert_eq!(l.to_vec(), vec![FreeSpace { first: 6, last: 9, length: INFINITY }]);
    }

    proptest::proptest! {
        /// `unassign(assign(node, job))` is the identity on the list's
        /// structural contents, for any cluster size and any allocation
        /// that fits inside it (`spec.md` §8's "round-trips" property).
        #[test]
        fn assign_then_unassign_restores_the_lone_free_space(
            total in 1usize..64,
            needed in 1usize..64,
        ) {
            proptest::prop_assume!(needed <= total);
            let mut l = FreeSpaceList::new(total);
            let before = l.to_vec();
            let h = l.generator().next().unwrap();
            let alloc = l.assign(&h, needed).unwrap();
            let first = *alloc.first().unwrap();
            let last = *alloc.last().unwrap();
            l.unassign(first, last);
            proptest::prop_assert_eq!(l.to_vec(), before);
        }
    }
}

//! A generic ordered container of disjoint, non-adjacent integer intervals.
//!
//! Used by richer policies (and by tests) as a primitive for reasoning about
//! ranges of resource indices; the EASY-backfill policy itself only uses
//! [`crate::freespace`], which is a specialized sibling of this structure.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};
use crate::job::ResIdx;

struct Node {
    begin: ResIdx,
    end: ResIdx,
    prev: Option<Weak<RefCell<Node>>>,
    next: Option<Rc<RefCell<Node>>>,
}

/// A doubly-linked list of disjoint `[begin, end]` intervals, kept sorted
/// ascending by `begin`. No two intervals are ever adjacent or overlapping
/// after a successful mutation.
#[derive(Default)]
pub struct IntervalContainer {
    head: Option<Rc<RefCell<Node>>>,
}

impl IntervalContainer {
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Snapshot of the current intervals, in ascending order. Mostly useful
    /// for tests and invariant checks.
    pub fn to_vec(&self) -> Vec<(ResIdx, ResIdx)> {
        let mut res = vec![];
        let mut cur = self.head.clone();
        while let Some(node) = cur {
            let n = node.borrow();
            res.push((n.begin, n.end));
            cur = n.next.clone();
        }
        res
    }

    /// Inserts `[a, b]`, merging with any touching/overlapping neighbors.
    ///
    /// Only a single predecessor and a single successor may touch the new
    /// interval; if the new interval would span two or more *existing*
    /// intervals (with a gap between them), that is an `unsupported-merge`
    /// per the interval container's documented limitation.
    pub fn add(&mut self, a: ResIdx, b: ResIdx) -> Result<()> {
        assert!(a <= b, "bad interval (a > b)");

        // Find the first node with begin >= a, and remember its predecessor.
        let mut prev: Option<Rc<RefCell<Node>>> = None;
        let mut next = self.head.clone();
        while let Some(n) = next.clone() {
            if n.borrow().begin >= a {
                break;
            }
            prev = Some(n.clone());
            next = n.borrow().next.clone();
        }

        let (mut new_begin, mut new_end) = (a, b);
        let mut new_node: Option<Rc<RefCell<Node>>> = None;

        // Merge with predecessor?
        if let Some(p) = &prev {
            let merges = p.borrow().end + 1 >= new_begin;
            if merges {
                new_begin = p.borrow().begin.min(new_begin);
                new_end = p.borrow().end.max(new_end);
                new_node = Some(p.clone());
            }
        }

        // Does the new range also reach the successor?
        if let Some(n) = &next {
            let touches = n.borrow().begin as i128 - 1 <= new_end as i128;
            if touches {
                // If we already merged with `prev`, and `next` also touches,
                // and `next.next` *also* touches, that would mean the new
                // interval spans three or more original intervals - reject.
                if let Some(nn) = &n.borrow().next {
                    if nn.borrow().begin as i128 - 1 <= new_end as i128 {
                        return Err(Error::UnsupportedMerge(format!(
                            "[{a},{b}] touches more than two existing intervals"
                        )));
                    }
                }
                new_end = new_end.max(n.borrow().end);
                new_begin = new_begin.min(n.borrow().begin);

                if let Some(existing) = &new_node {
                    // Merge prev, new range, and next all into `existing`.
                    existing.borrow_mut().begin = new_begin;
                    existing.borrow_mut().end = new_end;
                    let next_next = n.borrow().next.clone();
                    existing.borrow_mut().next = next_next.clone();
                    if let Some(nn) = &next_next {
                        nn.borrow_mut().prev = Some(Rc::downgrade(existing));
                    }
                    return Ok(());
                } else {
                    // Merge new range into `next` in place.
                    n.borrow_mut().begin = new_begin;
                    n.borrow_mut().end = new_end;
                    new_node = Some(n.clone());
                    // fall through to relink against `prev` below.
                }
            }
        }

        match new_node {
            Some(node) => {
                // Node already lives in the list (it's `prev` or `next`,
                // possibly widened). Commit the merged bounds - the
                // predecessor-only merge above never wrote them into `node`.
                node.borrow_mut().begin = new_begin;
                node.borrow_mut().end = new_end;
                // Ensure `prev`'s `next` pointer is correct and the list
                // head is correct.
                if !Rc::ptr_eq(&node, prev.as_ref().unwrap_or(&node)) {
                    // `node` is `next`, widened; link it behind `prev`.
                    if let Some(p) = &prev {
                        p.borrow_mut().next = Some(node.clone());
                        node.borrow_mut().prev = Some(Rc::downgrade(p));
                    } else {
                        self.head = Some(node.clone());
                        node.borrow_mut().prev = None;
                    }
                }
                Ok(())
            }
            None => {
                // Brand new node, spliced in between `prev` and `next`.
                let fresh = Rc::new(RefCell::new(Node {
                    begin: a,
                    end: b,
                    prev: prev.as_ref().map(Rc::downgrade),
                    next: next.clone(),
                }));
                if let Some(p) = &prev {
                    p.borrow_mut().next = Some(fresh.clone());
                } else {
                    self.head = Some(fresh.clone());
                }
                if let Some(n) = &next {
                    n.borrow_mut().prev = Some(Rc::downgrade(&fresh));
                }
                Ok(())
            }
        }
    }

    /// Removes `[a, b]` (inclusive) from the container, splitting or
    /// shrinking nodes as needed.
    pub fn remove(&mut self, a: ResIdx, b: ResIdx) {
        assert!(a <= b, "bad interval (a > b)");
        let mut cur = self.head.clone();
        while let Some(node) = cur {
            let next = node.borrow().next.clone();
            let (begin, end) = (node.borrow().begin, node.borrow().end);

            if a <= begin && end <= b {
                // Fully contained: unlink.
                let prev = node.borrow().prev.clone().and_then(|w| w.upgrade());
                match &prev {
                    Some(p) => p.borrow_mut().next = next.clone(),
                    None => self.head = next.clone(),
                }
                if let Some(n) = &next {
                    n.borrow_mut().prev = prev.as_ref().map(Rc::downgrade);
                }
            } else if begin < a && b < end {
                // Strictly splits into [begin, a-1] and [b+1, end].
                let new_node = Rc::new(RefCell::new(Node {
                    begin: b + 1,
                    end,
                    prev: Some(Rc::downgrade(&node)),
                    next: next.clone(),
                }));
                if let Some(n) = &next {
                    n.borrow_mut().prev = Some(Rc::downgrade(&new_node));
                }
                node.borrow_mut().end = a - 1;
                node.borrow_mut().next = Some(new_node);
                return;
            } else if a <= begin && begin <= b {
                // Left-overlap: advance begin past b.
                node.borrow_mut().begin = b + 1;
                return;
            } else if a <= end && end <= b {
                // Right-overlap: retreat end below a.
                node.borrow_mut().end = a - 1;
            }

            cur = next;
        }
    }

    /// Returns the ordered sequence of sub-ranges of `[a, b]` that the
    /// container currently holds, clipped to `[a, b]`.
    pub fn intersection(&self, a: ResIdx, b: ResIdx) -> Vec<(ResIdx, ResIdx)> {
        assert!(a <= b, "bad interval (a > b)");
        let mut res = vec![];
        let mut cur = self.head.clone();
        while let Some(node) = cur {
            let (begin, end) = (node.borrow().begin, node.borrow().end);
            if a <= begin && end <= b {
                res.push((begin, end));
            } else if begin < a && b < end {
                res.push((a, b));
                return res;
            } else if a <= begin && begin <= b {
                res.push((begin, b));
                return res;
            } else if a <= end && end <= b {
                res.push((a, end));
            }
            cur = node.borrow().next.clone();
        }
        res
    }

    /// Returns the single contiguous sub-range of `[a, b]` that lies
    /// outside the container, or `None` if `[a, b]` is fully covered.
    ///
    /// Only the single-range case is supported; if `[a, b]` straddles more
    /// than one gap between existing intervals, that is an
    /// `unsupported-multi-difference`.
    pub fn difference(&self, a: ResIdx, b: ResIdx) -> Result<Option<(ResIdx, ResIdx)>> {
        assert!(a <= b, "bad interval (a > b)");
        let mut prev: Option<Rc<RefCell<Node>>> = None;
        let mut next = self.head.clone();
        while let Some(n) = next.clone() {
            if a <= n.borrow().begin {
                break;
            }
            prev = Some(n.clone());
            next = n.borrow().next.clone();
        }

        let mut lo = a;
        let mut hi = b;
        if let Some(p) = &prev {
            let p = p.borrow();
            if lo < p.begin {
                return Err(Error::UnsupportedMultiDifference(format!(
                    "[{a},{b}] starts before its covering interval [{},{}]",
                    p.begin, p.end
                )));
            }
            lo = lo.max(p.end + 1);
        }
        if let Some(n) = &next {
            let n = n.borrow();
            if hi > n.end {
                return Err(Error::UnsupportedMultiDifference(format!(
                    "[{a},{b}] ends after the next interval [{},{}]",
                    n.begin, n.end
                )));
            }
            hi = hi.min(n.begin.saturating_sub(1));
        }

        if hi < lo {
            Ok(None)
        } else {
            Ok(Some((lo, hi)))
        }
    }
}

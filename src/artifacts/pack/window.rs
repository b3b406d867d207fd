//! The sliding delta window
//!
//! Holds the last few unpacked objects in sort order. Each slot keeps the
//! payload together with its block index, built once when the object enters
//! the window and reused for every later target it is tried against.

use crate::artifacts::pack::delta::XDelta;
use bytes::Bytes;
use std::collections::VecDeque;

pub struct Unpacked {
    pub entry_index: usize,
    pub data: Bytes,
    index: XDelta,
}

impl Unpacked {
    pub fn new(entry_index: usize, data: Bytes) -> Self {
        let index = XDelta::create_index(data.clone());
        Unpacked {
            entry_index,
            data,
            index,
        }
    }

    pub fn index(&self) -> &XDelta {
        &self.index
    }
}

pub struct Window {
    objects: VecDeque<Unpacked>,
    size: usize,
}

impl Window {
    pub fn new(size: usize) -> Self {
        Window {
            objects: VecDeque::with_capacity(size),
            size,
        }
    }

    /// Add an object, evicting the oldest when full
    pub fn push(&mut self, unpacked: Unpacked) {
        if self.objects.len() == self.size {
            self.objects.pop_back();
        }
        self.objects.push_front(unpacked);
    }

    /// Previously added objects, most recent first
    pub fn iter(&self) -> impl Iterator<Item = &Unpacked> {
        self.objects.iter()
    }
}

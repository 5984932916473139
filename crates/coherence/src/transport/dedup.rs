// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Generation-bounded duplicate window.
//!
//! Identities are inserted into the current generation. After
//! `ops_per_generation` marks, or once the current generation is older than
//! `generation_ttl`, a fresh generation starts and the oldest one beyond
//! `generations` is dropped wholesale. An identity seen a second time is
//! removed: two transports deliver each message at most twice, so the second
//! sighting is the last one.

use crate::config::DuplicateWindowConfig;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Identity of one wire send.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageIdentity {
    pub subject: String,
    pub sender_id: u64,
    pub sequence: u64,
}

struct Generation {
    started: Instant,
    marks: usize,
    ids: HashSet<MessageIdentity>,
}

impl Generation {
    fn new(now: Instant) -> Self {
        Self {
            started: now,
            marks: 0,
            ids: HashSet::new(),
        }
    }
}

/// Thread-safe duplicate window shared by both sides of a dual adapter.
pub struct DuplicateWindow {
    generations: Mutex<VecDeque<Generation>>,
    max_generations: usize,
    ops_per_generation: usize,
    generation_ttl: Duration,
}

impl DuplicateWindow {
    pub fn new(config: &DuplicateWindowConfig) -> Self {
        let mut generations = VecDeque::with_capacity(config.generations);
        generations.push_back(Generation::new(Instant::now()));
        Self {
            generations: Mutex::new(generations),
            max_generations: config.generations.max(1),
            ops_per_generation: config.ops_per_generation.max(1),
            generation_ttl: Duration::from_millis(config.generation_ttl_ms),
        }
    }

    /// Record `identity`. Returns `true` the first time it is seen.
    pub fn mark(&self, identity: &MessageIdentity) -> bool {
        let now = Instant::now();
        let mut generations = self.generations.lock();

        for generation in generations.iter_mut() {
            if generation.ids.remove(identity) {
                return false;
            }
        }

        let rotate = match generations.back() {
            Some(current) => {
                current.marks >= self.ops_per_generation
                    || (!self.generation_ttl.is_zero()
                        && now.duration_since(current.started) >= self.generation_ttl)
            }
            None => true,
        };
        if rotate {
            generations.push_back(Generation::new(now));
            while generations.len() > self.max_generations {
                generations.pop_front();
            }
        }

        if let Some(current) = generations.back_mut() {
            current.marks += 1;
            current.ids.insert(identity.clone());
        }
        true
    }

    /// Identities currently remembered.
    pub fn len(&self) -> usize {
        self.generations.lock().iter().map(|g| g.ids.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DuplicateWindow {
    fn default() -> Self {
        Self::new(&DuplicateWindowConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn id(seq: u64) -> MessageIdentity {
        MessageIdentity {
            subject: "orders".into(),
            sender_id: 7,
            sequence: seq,
        }
    }

    #[test]
    fn test_second_sighting_is_duplicate_and_removes() {
        let window = DuplicateWindow::default();
        assert!(window.mark(&id(1)));
        assert!(!window.mark(&id(1)));
        assert!(window.is_empty());
    }

    #[test]
    fn test_identity_fields_distinguish() {
        let window = DuplicateWindow::default();
        assert!(window.mark(&id(1)));
        let mut other = id(1);
        other.sender_id = 8;
        assert!(window.mark(&other));
        other.subject = "trades".into();
        assert!(window.mark(&other));
    }

    #[test]
    fn test_oldest_generation_expires() {
        let window = DuplicateWindow::new(&DuplicateWindowConfig {
            generations: 2,
            ops_per_generation: 2,
            generation_ttl_ms: 0,
        });
        assert!(window.mark(&id(1)));
        assert!(window.mark(&id(2)));
        // third mark rotates; generation {1,2} is still retained
        assert!(window.mark(&id(3)));
        assert!(window.mark(&id(4)));
        // fifth mark rotates again and drops {1,2}
        assert!(window.mark(&id(5)));
        assert!(window.mark(&id(1)));
        assert!(!window.mark(&id(4)));
    }

    #[test]
    fn test_concurrent_marks_single_winner() {
        let window = Arc::new(DuplicateWindow::default());
        let winners: usize = (0..2)
            .map(|_| {
                let window = Arc::clone(&window);
                std::thread::spawn(move || (0..500).filter(|&s| window.mark(&id(s))).count())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(winners, 500);
    }
}

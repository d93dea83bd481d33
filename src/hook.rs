// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Hooks
//!
//! A client notifies its registered hooks once a delivery has been fully settled
//! (acknowledged, requeued or dead-lettered). Hooks only observe: they see the raw
//! content and the outcome, but cannot change either.

use crate::{consumer::DeliveryOutcome, errors::AmqpError};
use chrono::{DateTime, Utc};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

/// A delivery after the delivery handler settled it.
#[derive(Debug)]
pub struct HandledDelivery<'d> {
    pub topic: &'d str,
    pub content: &'d [u8],
    pub timestamp: DateTime<Utc>,
    pub outcome: &'d Result<DeliveryOutcome, AmqpError>,
}

/// Whether a hook stays registered after observing a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDisposition {
    Keep,
    Remove,
}

pub trait DeliveryHook: Send + Sync {
    fn after_handled(&self, delivery: &HandledDelivery<'_>) -> HookDisposition;
}

/// Identifies a registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Hooks registered on a client. Empty by default, which makes notification a no-op.
#[derive(Default)]
pub struct DeliveryHooks {
    next_id: AtomicU64,
    hooks: Mutex<Vec<(HookId, Arc<dyn DeliveryHook>)>>,
}

impl DeliveryHooks {
    pub fn new() -> DeliveryHooks {
        DeliveryHooks::default()
    }

    pub fn register(&self, hook: Arc<dyn DeliveryHook>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, hook));
        id
    }

    /// Unregisters a hook. Returns false if it was already gone.
    pub fn remove(&self, id: HookId) -> bool {
        let mut hooks = self.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs every hook against `delivery`. Hooks are called outside the lock so they
    /// may register or remove hooks themselves.
    pub(crate) fn notify(&self, delivery: &HandledDelivery<'_>) {
        let snapshot: Vec<(HookId, Arc<dyn DeliveryHook>)> = self.lock().clone();
        if snapshot.is_empty() {
            return;
        }

        let finished: Vec<HookId> = snapshot
            .into_iter()
            .filter(|(_, hook)| hook.after_handled(delivery) == HookDisposition::Remove)
            .map(|(id, _)| id)
            .collect();

        if !finished.is_empty() {
            self.lock().retain(|(id, _)| !finished.contains(id));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(HookId, Arc<dyn DeliveryHook>)>> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

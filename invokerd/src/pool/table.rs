/* -------------------------------------------------------------------------- *\
 *   Licensed under the Apache License, Version 2.0 (the "License");          *
 *   you may not use this file except in compliance with the License.        *
 *   You may obtain a copy of the License at                                 *
 *                                                                            *
 *       http://www.apache.org/licenses/LICENSE-2.0                          *
 *                                                                            *
 *   Unless required by applicable law or agreed to in writing, software     *
 *   distributed under the License is distributed on an "AS IS" BASIS,       *
 *   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.*
 *   See the License for the specific language governing permissions and     *
 *   limitations under the License.                                          *
\* -------------------------------------------------------------------------- */

//! The pool's own bookkeeping: who is free (indexed for warm-hit lookup and
//! LRU eviction), who is busy, and the live set of container proxies. All of
//! this lives behind the single lock the pool takes for its decision step
//! (spec §5: "the Container Pool has one serialisation point").

use crate::accountant::ResourceAccountant;
use crate::action::{ActionKey, ContainerKind};
use crate::driver::ContainerHandle;
use crate::proxy::ContainerProxy;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Denormalized view of an idle container, kept in sync by whoever moves a
/// container into or out of `free`. Avoids locking every proxy just to scan
/// for a selection candidate.
#[derive(Debug, Clone)]
pub struct FreeEntry {
    pub id: ContainerHandle,
    pub kind: ContainerKind,
    pub memory_mb: u32,
    /// `Some` for a warm Initialized container, `None` for a bare Prewarmed one.
    pub warm_for: Option<(ActionKey, u64)>,
    pub last_used_at: Instant,
    pub created_at: Instant,
}

pub struct PoolTable {
    pub accountant: ResourceAccountant,
    pub free: Vec<FreeEntry>,
    pub busy: HashMap<ContainerHandle, (ContainerKind, u32)>,
    pub containers: HashMap<ContainerHandle, std::sync::Arc<Mutex<ContainerProxy>>>,
}

impl PoolTable {
    pub fn new(memory_limit_mb: u32) -> Self {
        Self {
            accountant: ResourceAccountant::new(memory_limit_mb),
            free: Vec::new(),
            busy: HashMap::new(),
            containers: HashMap::new(),
        }
    }

    pub fn prewarm_count(&self, kind: &ContainerKind) -> usize {
        self.free.iter().filter(|e| &e.kind == kind && e.warm_for.is_none()).count()
    }

    /// Exact `(kind, action, revision)` match, preferred by most-recent use.
    pub fn find_warm_hit(&self, kind: &ContainerKind, action: &ActionKey, revision: u64) -> Option<usize> {
        self.free
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                &e.kind == kind && e.warm_for.as_ref().map(|(a, r)| a == action && *r == revision).unwrap_or(false)
            })
            .max_by_key(|(_, e)| e.last_used_at)
            .map(|(i, _)| i)
    }

    pub fn find_prewarm_hit(&self, kind: &ContainerKind) -> Option<usize> {
        self.free.iter().position(|e| &e.kind == kind && e.warm_for.is_none())
    }

    /// Picks the smallest prefix of `free`, ordered by ascending
    /// `last_used_at` (LRU) or `created_at` (FIFO) per `eviction_lru`,
    /// whose combined memory covers `need_mb`; `None` if `free` as a whole
    /// can't cover it.
    pub fn pick_eviction_candidates(&self, need_mb: u32, eviction_lru: bool) -> Option<Vec<ContainerHandle>> {
        let mut candidates: Vec<&FreeEntry> = self.free.iter().collect();
        if eviction_lru {
            candidates.sort_by_key(|e| e.last_used_at);
        } else {
            candidates.sort_by_key(|e| e.created_at);
        }

        let mut reclaimed = 0u32;
        let mut chosen = Vec::new();
        for entry in candidates {
            if reclaimed >= need_mb {
                break;
            }
            reclaimed += entry.memory_mb;
            chosen.push(entry.id.clone());
        }
        if reclaimed >= need_mb {
            Some(chosen)
        } else {
            None
        }
    }

    pub fn remove_from_free(&mut self, id: &ContainerHandle) -> Option<FreeEntry> {
        let idx = self.free.iter().position(|e| &e.id == id)?;
        Some(self.free.remove(idx))
    }
}

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

//! Tracks aggregate memory in use against the configured budget. Lives
//! exclusively inside the pool's decision step; there is deliberately no
//! `Arc<Mutex<_>>` here because only one task ever touches it (see
//! spec §5, "the accountant is the only contended global").

/// `try_reserve`/`release` are totally ordered by virtue of single-writer
/// access; the pool is the sole owner of an accountant instance.
#[derive(Debug, Clone, Copy)]
pub struct ResourceAccountant {
    memory_used_mb: u32,
    memory_limit_mb: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AccountantError {
    /// Releasing more memory than is currently accounted as in-use. This
    /// can only mean a bookkeeping bug elsewhere in the pool and is fatal
    /// (spec §7: "process exits with code 4").
    #[error(
        "accountant underflow: tried to release {requested} MB but only {in_use} MB is in use"
    )]
    Underflow { requested: u32, in_use: u32 },
}

impl ResourceAccountant {
    pub fn new(memory_limit_mb: u32) -> Self {
        Self { memory_used_mb: 0, memory_limit_mb }
    }

    pub fn memory_used_mb(&self) -> u32 {
        self.memory_used_mb
    }

    pub fn memory_limit_mb(&self) -> u32 {
        self.memory_limit_mb
    }

    pub fn free_mb(&self) -> u32 {
        self.memory_limit_mb.saturating_sub(self.memory_used_mb)
    }

    /// Reserves `n` MB if the budget allows it. Returns the shortfall (0 on
    /// success) so the caller can decide how much idle memory it needs to
    /// reclaim before retrying.
    pub fn try_reserve(&mut self, n: u32) -> u32 {
        let free = self.free_mb();
        if n <= free {
            self.memory_used_mb += n;
            0
        } else {
            n - free
        }
    }

    pub fn release(&mut self, n: u32) -> Result<(), AccountantError> {
        if n > self.memory_used_mb {
            return Err(AccountantError::Underflow { requested: n, in_use: self.memory_used_mb });
        }
        self.memory_used_mb -= n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_within_budget_succeeds() {
        let mut a = ResourceAccountant::new(512);
        assert_eq!(a.try_reserve(256), 0);
        assert_eq!(a.memory_used_mb(), 256);
        assert_eq!(a.free_mb(), 256);
    }

    #[test]
    fn reserve_over_budget_reports_shortfall() {
        let mut a = ResourceAccountant::new(256);
        assert_eq!(a.try_reserve(256), 0);
        assert_eq!(a.try_reserve(128), 128);
        // A failed reservation must not partially commit.
        assert_eq!(a.memory_used_mb(), 256);
    }

    #[test]
    fn release_then_reserve_round_trips() {
        let mut a = ResourceAccountant::new(256);
        assert_eq!(a.try_reserve(256), 0);
        a.release(256).expect("release");
        assert_eq!(a.memory_used_mb(), 0);
        assert_eq!(a.try_reserve(256), 0);
    }

    #[test]
    fn release_more_than_in_use_is_an_error() {
        let mut a = ResourceAccountant::new(256);
        assert_eq!(a.try_reserve(128), 0);
        let err = a.release(256).unwrap_err();
        assert!(matches!(err, AccountantError::Underflow { requested: 256, in_use: 128 }));
    }
}

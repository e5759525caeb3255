use std::collections::VecDeque;

use crate::asm::Reg;
use crate::{BackendError, BackendResult};

/// General purpose registers handed out to expression values.
pub const ALLOCATABLE: [Reg; 7] = [
    Reg::R0,
    Reg::R1,
    Reg::R2,
    Reg::R3,
    Reg::R4,
    Reg::R5,
    Reg::R6,
];

/// A fixed set of registers. Freed registers go to the back of the queue.
#[derive(Debug, Clone)]
pub struct RegisterPool {
    free: VecDeque<Reg>,
    used: Vec<Reg>,

    allocs: usize,
    frees: usize,
}

impl RegisterPool {
    pub fn new() -> Self {
        Self {
            free: ALLOCATABLE.into_iter().collect(),
            used: vec![],
            allocs: 0,
            frees: 0,
        }
    }

    pub fn alloc(&mut self) -> BackendResult<Reg> {
        let Some(reg) = self.free.pop_front() else {
            tracing::warn!("register pool exhausted");
            return Err(BackendError::RegistersExhausted);
        };

        self.used.push(reg);
        self.allocs += 1;

        Ok(reg)
    }

    pub fn free(&mut self, reg: Reg) -> BackendResult<()> {
        let Some(index) = self.used.iter().position(|&used| used == reg) else {
            return Err(BackendError::RegisterNotAllocated(reg));
        };

        self.used.swap_remove(index);
        self.free.push_back(reg);
        self.frees += 1;

        Ok(())
    }

    /// Allocated registers, in ascending order.
    pub fn in_use(&self) -> Vec<Reg> {
        let mut used = self.used.clone();
        used.sort_unstable();
        used
    }

    /// Allocated argument registers other than `except`. These are the live
    /// values a C library call may clobber.
    pub fn live_arguments(&self, except: &[Reg]) -> Vec<Reg> {
        self.in_use()
            .into_iter()
            .filter(|reg| Reg::ARGUMENTS.contains(reg) && !except.contains(reg))
            .collect()
    }

    /// `(allocations, frees)` made so far.
    pub fn counts(&self) -> (usize, usize) {
        (self.allocs, self.frees)
    }
}

impl Default for RegisterPool {
    fn default() -> Self {
        Self::new()
    }
}

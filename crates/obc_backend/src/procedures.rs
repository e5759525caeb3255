use std::collections::{HashSet, VecDeque};

use obc_ir::symbols::{Entry, EntryId, ScopeId, Symbols};

use crate::ProcedureEmission;

/// Procedures whose bodies still have to be generated. Each procedure is
/// queued at most once, however often it is called.
#[derive(Debug, Default)]
pub struct ProcedureQueue {
    queued: HashSet<EntryId>,
    pending: VecDeque<EntryId>,
}

impl ProcedureQueue {
    pub fn new(mode: ProcedureEmission, symbols: &Symbols) -> Self {
        let mut queue = Self::default();

        if mode == ProcedureEmission::Eager {
            let mut all = vec![];
            collect(symbols, symbols.root, &mut all);
            for id in all {
                queue.request(id);
            }
        }

        queue
    }

    /// Queues `id` unless it was queued before.
    pub fn request(&mut self, id: EntryId) {
        if self.queued.insert(id) {
            tracing::trace!("queued procedure {id:?}");
            self.pending.push_back(id);
        }
    }

    pub fn next(&mut self) -> Option<EntryId> {
        self.pending.pop_front()
    }
}

/// Procedures declared in `scope` in name order, each followed by the ones
/// nested in it.
fn collect(symbols: &Symbols, scope: ScopeId, out: &mut Vec<EntryId>) {
    for &id in symbols.scope(scope).table.values() {
        if let Entry::Procedure(proc) = symbols.entry(id) {
            out.push(id);
            collect(symbols, proc.scope, out);
        }
    }
}

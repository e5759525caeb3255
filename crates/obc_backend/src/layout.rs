//! Storage allocation for globals and record fields.

use obc_ir::symbols::{Entry, EntryId, ScopeId, Symbols, TypeDef, TypeId, TypeKind, VariableKind};

/// Assigns every global variable its offset in the global data block and
/// fixes the size of every type. Returns the size of the block.
///
/// Globals are laid out in name order, so the result only depends on the
/// program and not on declaration order.
pub fn allocate(symbols: &mut Symbols) -> u32 {
    let root = symbols.root;
    let mut offset = 0u32;

    for (name, id) in variables_in(symbols, root) {
        let Some(var) = symbols.variable(id).copied() else {
            continue;
        };
        if var.kind != VariableKind::Global {
            continue;
        }

        let size = size_of(symbols, var.ty);
        set_offset(symbols, id, offset);
        tracing::debug!("global {name} at {offset}, {size} bytes");

        offset = offset.saturating_add(size);
    }

    // Types only reachable through formals or locals.
    for ty in symbols.types.keys().collect::<Vec<_>>() {
        size_of(symbols, ty);
    }

    tracing::debug!("global data block is {offset} bytes");
    offset
}

/// The size of a type in bytes, computing and recording it on first use.
/// Record fields get their offsets when the record is first sized.
pub fn size_of(symbols: &mut Symbols, ty: TypeId) -> u32 {
    let TypeDef { kind, size } = *symbols.ty(ty);
    if let Some(size) = size {
        return size;
    }

    let size = match kind {
        TypeKind::Integer => 4,
        TypeKind::Array { element, length } => size_of(symbols, element).saturating_mul(length),
        TypeKind::Record { scope } => layout_record(symbols, scope),
    };

    symbols.types[ty].size = Some(size);
    size
}

fn layout_record(symbols: &mut Symbols, scope: ScopeId) -> u32 {
    let mut offset = 0u32;

    for (_, id) in variables_in(symbols, scope) {
        let Some(field) = symbols.variable(id).copied() else {
            continue;
        };

        let size = size_of(symbols, field.ty);
        set_offset(symbols, id, offset);
        offset = offset.saturating_add(size);
    }

    offset
}

/// The variables declared directly in `scope`, in name order.
pub(crate) fn variables_in(symbols: &Symbols, scope: ScopeId) -> Vec<(String, EntryId)> {
    symbols
        .scope(scope)
        .table
        .iter()
        .filter(|(_, id)| matches!(symbols.entry(**id), Entry::Variable(_)))
        .map(|(name, id)| (name.clone(), *id))
        .collect()
}

pub(crate) fn set_offset(symbols: &mut Symbols, id: EntryId, offset: u32) {
    if let Entry::Variable(var) = &mut symbols.entries[id] {
        var.offset = Some(offset);
    }
}

/// Whether values of `ty` are arrays or records.
pub fn is_aggregate(symbols: &Symbols, ty: TypeId) -> bool {
    symbols.ty(ty).kind.is_aggregate()
}

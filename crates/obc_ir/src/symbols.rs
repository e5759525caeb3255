use std::collections::BTreeMap;

use obc_utils::keyvec::{declare_key_type, KeyVec};

use crate::ast::{Expression, Instruction};
use crate::{Node, NodeCopy};

declare_key_type! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub struct TypeId;
}

declare_key_type! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub struct EntryId;
}

declare_key_type! {
    #[derive(serde::Serialize, serde::Deserialize)]
    pub struct ScopeId;
}

/// The program symbol table.
///
/// Types, entries and scopes live in arenas and refer to each other by id,
/// so an array's element type is shared by every array built over it.
#[derive(Node!)]
pub struct Symbols {
    pub types: KeyVec<TypeId, TypeDef>,
    pub entries: KeyVec<EntryId, Entry>,
    pub scopes: KeyVec<ScopeId, Scope>,

    /// The program scope, holding globals, constants, types and procedures.
    pub root: ScopeId,
}

impl Symbols {
    /// The `INTEGER` singleton, always the first type.
    pub const INTEGER: TypeId = TypeId(0);

    pub fn new() -> Self {
        let mut types = KeyVec::new();
        let integer = types.insert(TypeDef {
            kind: TypeKind::Integer,
            size: Some(4),
        });
        debug_assert_eq!(integer, Self::INTEGER);

        let mut scopes = KeyVec::new();
        let root = scopes.insert(Scope::new(None));

        Self {
            types,
            entries: KeyVec::new(),
            scopes,
            root,
        }
    }

    pub fn ty(&self, id: TypeId) -> &TypeDef {
        &self.types[id]
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.entries[id]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn variable(&self, id: EntryId) -> Option<&Variable> {
        match self.entries.get(id)? {
            Entry::Variable(var) => Some(var),
            _ => None,
        }
    }

    pub fn procedure(&self, id: EntryId) -> Option<&Procedure> {
        match self.entries.get(id)? {
            Entry::Procedure(proc) => Some(proc),
            _ => None,
        }
    }

    pub fn procedure_mut(&mut self, id: EntryId) -> Option<&mut Procedure> {
        match self.entries.get_mut(id)? {
            Entry::Procedure(proc) => Some(proc),
            _ => None,
        }
    }

    /// Resolves `name` in `scope` and then outward through enclosing scopes.
    pub fn find(&self, scope: ScopeId, name: &str) -> Option<EntryId> {
        let mut current = Some(scope);

        while let Some(id) = current {
            let scope = self.scopes.get(id)?;
            if let Some(entry) = scope.table.get(name) {
                return Some(*entry);
            }
            current = scope.outer;
        }

        None
    }

    /// Resolves `name` in `scope` only.
    pub fn local(&self, scope: ScopeId, name: &str) -> Option<EntryId> {
        self.scopes.get(scope)?.table.get(name).copied()
    }

    /// The element type of an array type.
    pub fn element_type(&self, ty: TypeId) -> Option<TypeId> {
        match self.types.get(ty)?.kind {
            TypeKind::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Looks a field up by name in a record type.
    pub fn field(&self, ty: TypeId, name: &str) -> Option<EntryId> {
        match self.types.get(ty)?.kind {
            TypeKind::Record { scope } => self.local(scope, name),
            _ => None,
        }
    }

    pub fn array_type(&mut self, element: TypeId, length: u32) -> TypeId {
        self.types.insert(TypeDef {
            kind: TypeKind::Array { element, length },
            size: None,
        })
    }

    pub fn record_type(&mut self, fields: &[(&str, TypeId)]) -> TypeId {
        let scope = self.scopes.insert(Scope::new(None));
        for &(name, ty) in fields {
            self.declare(scope, name, Entry::Variable(Variable::new(VariableKind::Field, ty)));
        }

        self.types.insert(TypeDef {
            kind: TypeKind::Record { scope },
            size: None,
        })
    }

    pub fn declare_type(&mut self, scope: ScopeId, name: &str, ty: TypeId) -> EntryId {
        self.declare(scope, name, Entry::Type(ty))
    }

    pub fn declare_constant(&mut self, scope: ScopeId, name: &str, value: i64) -> EntryId {
        self.declare(
            scope,
            name,
            Entry::Constant(Constant {
                ty: Self::INTEGER,
                value: value as i32,
            }),
        )
    }

    pub fn declare_global(&mut self, name: &str, ty: TypeId) -> EntryId {
        let root = self.root;
        self.declare(root, name, Entry::Variable(Variable::new(VariableKind::Global, ty)))
    }

    /// Declares a procedure in `outer` together with its own scope of formals
    /// and locals. The body is attached later with [`Symbols::define_procedure`],
    /// once the front end has the ids of the formals and locals to refer to.
    pub fn declare_procedure(
        &mut self,
        outer: ScopeId,
        name: &str,
        params: &[(&str, TypeId)],
        locals: &[(&str, TypeId)],
        return_type: Option<TypeId>,
    ) -> EntryId {
        let scope = self.scopes.insert(Scope::new(Some(outer)));

        let params = params
            .iter()
            .map(|&(name, ty)| {
                self.declare(scope, name, Entry::Variable(Variable::new(VariableKind::Formal, ty)))
            })
            .collect();

        for &(name, ty) in locals {
            self.declare(scope, name, Entry::Variable(Variable::new(VariableKind::Local, ty)));
        }

        self.declare(
            outer,
            name,
            Entry::Procedure(Procedure {
                name: name.to_owned(),
                scope,
                params,
                return_type,
                body: None,
                return_expr: None,
                frame_size: None,
            }),
        )
    }

    /// Attaches a body and optional return expression to a declared procedure.
    /// Returns `false` if `id` is not a procedure.
    pub fn define_procedure(
        &mut self,
        id: EntryId,
        body: Option<Instruction>,
        return_expr: Option<Expression>,
    ) -> bool {
        match self.procedure_mut(id) {
            Some(proc) => {
                proc.body = body;
                proc.return_expr = return_expr;
                true
            }
            None => false,
        }
    }

    fn declare(&mut self, scope: ScopeId, name: &str, entry: Entry) -> EntryId {
        let id = self.entries.insert(entry);
        self.scopes[scope].table.insert(name.to_owned(), id);
        id
    }
}

impl Default for Symbols {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(NodeCopy!)]
pub struct TypeDef {
    pub kind: TypeKind,

    /// Size in bytes. Fixed by storage allocation for arrays and records.
    pub size: Option<u32>,
}

#[derive(NodeCopy!)]
pub enum TypeKind {
    Integer,
    Array { element: TypeId, length: u32 },
    Record { scope: ScopeId },
}

impl TypeKind {
    pub fn is_aggregate(&self) -> bool {
        !matches!(self, Self::Integer)
    }
}

#[derive(Node!)]
pub enum Entry {
    Constant(Constant),
    Type(TypeId),
    Variable(Variable),
    Procedure(Procedure),
}

#[derive(NodeCopy!)]
pub struct Constant {
    pub ty: TypeId,
    pub value: i32,
}

#[derive(NodeCopy!)]
pub enum VariableKind {
    Global,
    Local,
    Formal,

    /// A record field. Its offset is relative to the start of the record.
    Field,
}

#[derive(NodeCopy!)]
pub struct Variable {
    pub kind: VariableKind,
    pub ty: TypeId,

    /// Set once, by storage allocation or by the owning procedure's frame
    /// layout. Frame offsets are distances below the frame pointer.
    pub offset: Option<u32>,
}

impl Variable {
    pub fn new(kind: VariableKind, ty: TypeId) -> Self {
        Self {
            kind,
            ty,
            offset: None,
        }
    }
}

#[derive(Node!)]
pub struct Procedure {
    pub name: String,
    pub scope: ScopeId,

    /// Formals in declaration order.
    pub params: Vec<EntryId>,
    pub return_type: Option<TypeId>,

    pub body: Option<Instruction>,
    pub return_expr: Option<Expression>,

    /// Bytes reserved below the saved frame pointer, set by frame layout.
    pub frame_size: Option<u32>,
}

#[derive(Node!)]
pub struct Scope {
    pub outer: Option<ScopeId>,

    /// Name keyed, so iteration is in name order.
    pub table: BTreeMap<String, EntryId>,
}

impl Scope {
    pub fn new(outer: Option<ScopeId>) -> Self {
        Self {
            outer,
            table: BTreeMap::new(),
        }
    }
}

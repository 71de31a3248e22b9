//! Scopes: ordered instruction sequences plus the variable/child-scope
//! ownership relation described in spec §3 ("RectifiedScope").

use crate::ir::value::{InstructionId, ScopeId, VariableId};
use crate::types::TypeDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRole {
    Main,
    Plain,
    If,
    Else,
    While,
}

pub struct Scope {
    pub id: ScopeId,
    pub parent: Option<ScopeId>,
    pub role: ScopeRole,
    pub instructions: Vec<InstructionId>,
    pub variables: Vec<VariableId>,
}

impl Scope {
    pub(crate) fn new(id: ScopeId, parent: Option<ScopeId>, role: ScopeRole) -> Self {
        Scope { id, parent, role, instructions: Vec::new(), variables: Vec::new() }
    }
}

pub struct VariableDecl {
    pub ty: TypeDescriptor,
    pub parent_scope: ScopeId,
}

pub(crate) struct ScopeArena {
    pub(crate) scopes: Vec<Scope>,
    pub(crate) variables: Vec<VariableDecl>,
}

impl ScopeArena {
    pub(crate) fn new() -> Self {
        let mut arena = ScopeArena { scopes: Vec::new(), variables: Vec::new() };
        let main = ScopeId(0);
        arena.scopes.push(Scope::new(main, None, ScopeRole::Main));
        arena
    }

    pub(crate) fn main_scope(&self) -> ScopeId {
        ScopeId(0)
    }

    pub(crate) fn create_scope(&mut self, parent: ScopeId, role: ScopeRole) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(id, Some(parent), role));
        id
    }

    pub(crate) fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    pub(crate) fn declare_variable(&mut self, scope: ScopeId, ty: TypeDescriptor) -> VariableId {
        let id = VariableId(self.variables.len() as u32);
        self.variables.push(VariableDecl { ty, parent_scope: scope });
        self.scope_mut(scope).variables.push(id);
        id
    }

    pub(crate) fn variable(&self, id: VariableId) -> &VariableDecl {
        &self.variables[id.0 as usize]
    }

    /// A scope "owns" a variable iff the variable's declared parent scope is
    /// exactly this scope.
    pub(crate) fn owns(&self, scope: ScopeId, var: VariableId) -> bool {
        self.variable(var).parent_scope == scope
    }

    /// A scope owns a variable "in all-scope" iff it owns it directly or any
    /// transitive ancestor does.
    pub(crate) fn owns_in_all_scope(&self, scope: ScopeId, var: VariableId) -> bool {
        let target = self.variable(var).parent_scope;
        let mut cur = Some(scope);
        while let Some(s) = cur {
            if s == target {
                return true;
            }
            cur = self.scope(s).parent;
        }
        false
    }
}

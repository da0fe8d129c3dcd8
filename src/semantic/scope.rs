use std::collections::HashMap;

use crate::{
    semantic::tree::{ClassId, MethodId},
    util::intern::Name,
};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ScopeId(u32);

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct VariableId(u32);

/// A local variable (or an implicit one: `this`, `result`).
pub struct Variable {
    pub name: Name,
    pub ty: ClassId,
    pub scope: ScopeId,
    /// Position in the declaration order of the owning scope.
    index: usize,
}

/// One namespace node in the tree of nested declaration contexts.
///
/// Lookups check the local maps first and then delegate to the parent;
/// "not found" only surfaces at the root. Insertion never checks for
/// duplicates; callers that want to reject redeclarations probe the
/// `find_*_local` accessors first.
#[derive(Default)]
struct ScopeData {
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    /// Variables in declaration order. Order is load-bearing: it determines
    /// the stack slots assigned by [`FrameLayout`].
    variables: Vec<VariableId>,
    variable_links: HashMap<Name, VariableId>,
    method_links: HashMap<Name, MethodId>,
    class_links: HashMap<Name, ClassId>,
}

/// Arena of scopes. Nodes are referenced by [`ScopeId`]; a parent owns its
/// children, so dropping the tree drops every scope and variable at once.
#[derive(Default)]
pub struct ScopeTree {
    scopes: Vec<ScopeData>,
    variables: Vec<Variable>,
}

impl ScopeTree {
    pub fn new() -> ScopeTree {
        ScopeTree::default()
    }

    /// Creates a new scope. Passing a parent registers the new scope as its
    /// child; passing `None` creates a root (the global scope).
    pub fn add_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(u32::try_from(self.scopes.len()).expect("scope arena out of ids"));
        self.scopes.push(ScopeData {
            parent,
            ..ScopeData::default()
        });
        if let Some(parent) = parent {
            self.scope_mut(parent).children.push(id);
        }
        id
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.scope(scope).parent
    }

    pub fn children(&self, scope: ScopeId) -> &[ScopeId] {
        &self.scope(scope).children
    }

    pub fn add_variable(&mut self, scope: ScopeId, name: Name, ty: ClassId) -> VariableId {
        let id = VariableId(u32::try_from(self.variables.len()).expect("variable arena out of ids"));
        let index = self.scope(scope).variables.len();
        self.variables.push(Variable {
            name,
            ty,
            scope,
            index,
        });
        let data = self.scope_mut(scope);
        data.variables.push(id);
        data.variable_links.insert(name, id);
        id
    }

    pub fn add_method(&mut self, scope: ScopeId, name: Name, method: MethodId) {
        self.scope_mut(scope).method_links.insert(name, method);
    }

    pub fn add_class(&mut self, scope: ScopeId, name: Name, class: ClassId) {
        self.scope_mut(scope).class_links.insert(name, class);
    }

    pub fn find_variable(&self, scope: ScopeId, name: Name) -> Option<VariableId> {
        self.find(scope, |data| data.variable_links.get(&name).copied())
    }

    pub fn find_method(&self, scope: ScopeId, name: Name) -> Option<MethodId> {
        self.find(scope, |data| data.method_links.get(&name).copied())
    }

    pub fn find_class(&self, scope: ScopeId, name: Name) -> Option<ClassId> {
        self.find(scope, |data| data.class_links.get(&name).copied())
    }

    pub fn find_variable_local(&self, scope: ScopeId, name: Name) -> Option<VariableId> {
        self.scope(scope).variable_links.get(&name).copied()
    }

    pub fn find_method_local(&self, scope: ScopeId, name: Name) -> Option<MethodId> {
        self.scope(scope).method_links.get(&name).copied()
    }

    pub fn find_class_local(&self, scope: ScopeId, name: Name) -> Option<ClassId> {
        self.scope(scope).class_links.get(&name).copied()
    }

    /// Walks from `scope` through the parent chain, returning the nearest
    /// hit of `get`.
    fn find<T>(&self, scope: ScopeId, get: impl Fn(&ScopeData) -> Option<T>) -> Option<T> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let data = self.scope(id);
            if let Some(found) = get(data) {
                return Some(found);
            }
            current = data.parent;
        }
        None
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    /// Variables of `scope` in declaration order.
    pub fn variables(&self, scope: ScopeId) -> &[VariableId] {
        &self.scope(scope).variables
    }

    pub fn variable_count(&self, scope: ScopeId) -> usize {
        self.scope(scope).variables.len()
    }

    /// The index of a variable counted from the top of its own scope's
    /// variable stack: the most recently declared variable has index 0, the
    /// first declared has `count - 1`.
    pub fn stack_index(&self, id: VariableId) -> usize {
        let variable = self.variable(id);
        self.variable_count(variable.scope) - variable.index - 1
    }

    /// Computes the frame layout for the subtree rooted at `root`: every
    /// variable of `root` and its descendants gets a slot, assigned in scope
    /// preorder and declaration order. Sibling scopes do not share slots.
    pub fn frame_layout(&self, root: ScopeId) -> FrameLayout {
        let mut slots = HashMap::new();
        let mut stack = vec![root];
        let mut order = Vec::new();
        while let Some(scope) = stack.pop() {
            order.push(scope);
            // Children are pushed in reverse so that preorder visits them in
            // creation order.
            for &child in self.scope(scope).children.iter().rev() {
                stack.push(child);
            }
        }
        let mut next = 0;
        for scope in order {
            for &variable in self.variables(scope) {
                slots.insert(variable, next);
                next += 1;
            }
        }
        FrameLayout { total: next, slots }
    }

    fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.0 as usize]
    }

    fn scope_mut(&mut self, id: ScopeId) -> &mut ScopeData {
        &mut self.scopes[id.0 as usize]
    }
}

/// Slot assignment for one subroutine frame.
pub struct FrameLayout {
    total: usize,
    slots: HashMap<VariableId, usize>,
}

impl FrameLayout {
    /// Number of variable slots the frame holds.
    pub fn local_count(&self) -> usize {
        self.total
    }

    /// The variable's index counted from the top of the variable stack, as
    /// consumed by the load/store stack-machine instructions.
    pub fn from_top(&self, variable: VariableId) -> usize {
        let slot = self.slots[&variable];
        self.total - 1 - slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::tree::ClassId;
    use crate::util::intern::Interner;

    fn fixture() -> (ScopeTree, Interner, ClassId) {
        let tree = ScopeTree::new();
        let interner = Interner::with_capacity(16);
        (tree, interner, ClassId::testing(0))
    }

    #[test]
    fn lookup_walks_parent_chain() {
        let (mut tree, mut i, ty) = fixture();
        let global = tree.add_scope(None);
        let outer = tree.add_scope(Some(global));
        let inner = tree.add_scope(Some(outer));

        let a = i.intern("a");
        let declared = tree.add_variable(outer, a, ty);

        assert_eq!(tree.find_variable(inner, a), Some(declared));
        assert_eq!(tree.find_variable(outer, a), Some(declared));
        assert_eq!(tree.find_variable(global, a), None);
    }

    #[test]
    fn child_declaration_shadows_parent() {
        let (mut tree, mut i, ty) = fixture();
        let outer = tree.add_scope(None);
        let inner = tree.add_scope(Some(outer));

        let n = i.intern("n");
        let outer_n = tree.add_variable(outer, n, ty);
        let inner_n = tree.add_variable(inner, n, ty);

        assert_eq!(tree.find_variable(inner, n), Some(inner_n));
        assert_eq!(tree.find_variable(outer, n), Some(outer_n));
    }

    #[test]
    fn stack_indices_count_down_to_zero() {
        let (mut tree, mut i, ty) = fixture();
        let scope = tree.add_scope(None);

        let k = 4;
        let declared: Vec<_> = (0..k)
            .map(|n| tree.add_variable(scope, i.intern(&format!("v{n}")), ty))
            .collect();

        for (n, &variable) in declared.iter().enumerate() {
            assert_eq!(tree.stack_index(variable), k - n - 1);
        }
    }

    #[test]
    fn frame_layout_covers_nested_scopes() {
        let (mut tree, mut i, ty) = fixture();
        let method = tree.add_scope(None);
        let body = tree.add_scope(Some(method));
        let nested = tree.add_scope(Some(body));

        let this = tree.add_variable(method, i.intern("this"), ty);
        let a = tree.add_variable(body, i.intern("a"), ty);
        let b = tree.add_variable(body, i.intern("b"), ty);
        let c = tree.add_variable(nested, i.intern("c"), ty);

        let layout = tree.frame_layout(method);
        assert_eq!(layout.local_count(), 4);
        assert_eq!(layout.from_top(this), 3);
        assert_eq!(layout.from_top(a), 2);
        assert_eq!(layout.from_top(b), 1);
        assert_eq!(layout.from_top(c), 0);
    }

    #[test]
    fn sibling_scopes_keep_distinct_slots() {
        let (mut tree, mut i, ty) = fixture();
        let method = tree.add_scope(None);
        let first = tree.add_scope(Some(method));
        let second = tree.add_scope(Some(method));

        let x = tree.add_variable(first, i.intern("x"), ty);
        let y = tree.add_variable(second, i.intern("y"), ty);

        let layout = tree.frame_layout(method);
        assert_eq!(layout.local_count(), 2);
        assert_ne!(layout.from_top(x), layout.from_top(y));
    }
}

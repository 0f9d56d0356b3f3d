//! Leaf and near-leaf expression kinds: constants, variables, array element
//! references, and the read-only `Alias` wrapper (spec.md section 3).

use super::{Assignable, ExprGraph, Expression};
use crate::ids::ExprId;
use crate::value::{Typ, Value};

/// A fixed value. Always known, always active, never assignable -- the
/// teacher's `ExprKind::Constant` plays the same role for literals in the
/// dataflow graph.
#[derive(Debug)]
pub struct Constant {
    value: Value,
}

impl Constant {
    pub fn new(value: Value) -> Self {
        Constant { value }
    }
}

impl Expression for Constant {
    fn value_type(&self) -> Typ {
        self.value.typ()
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        true
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        Some(self.value.clone())
    }

    fn is_constant(&self) -> bool {
        true
    }

    fn activate(&mut self, _graph: &mut ExprGraph) -> u32 {
        1
    }

    fn deactivate(&mut self, _graph: &mut ExprGraph) -> u32 {
        1
    }

    fn active(&self) -> bool {
        true
    }
}

/// An assignable scalar variable with an optional one-shot initializer.
#[derive(Debug)]
pub struct UserVariable {
    typ: Typ,
    value: Option<Value>,
    initializer: Option<ExprId>,
    initializer_owned: bool,
    active_count: u32,
}

impl UserVariable {
    pub fn new(typ: Typ, initial: Option<Value>) -> Self {
        UserVariable {
            typ,
            value: initial,
            initializer: None,
            initializer_owned: false,
            active_count: 0,
        }
    }

    pub fn initializer_owned(&self) -> Option<(ExprId, bool)> {
        self.initializer.map(|id| (id, self.initializer_owned))
    }
}

impl Expression for UserVariable {
    fn value_type(&self) -> Typ {
        self.typ.clone()
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        self.value.is_some()
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        self.value.clone()
    }

    fn is_assignable(&self) -> bool {
        true
    }

    fn activate(&mut self, graph: &mut ExprGraph) -> u32 {
        self.active_count += 1;
        if self.active_count == 1 {
            if let Some(init) = self.initializer {
                graph.activate(init);
                if self.value.is_none() {
                    self.value = graph.get_value(init);
                }
            }
        }
        self.active_count
    }

    fn deactivate(&mut self, graph: &mut ExprGraph) -> u32 {
        if self.active_count > 0 {
            self.active_count -= 1;
        }
        if self.active_count == 0 {
            if let Some(init) = self.initializer {
                graph.deactivate(init);
            }
        }
        self.active_count
    }

    fn active(&self) -> bool {
        self.active_count > 0
    }

    fn children(&self) -> &[ExprId] {
        match &self.initializer {
            Some(_) => std::slice::from_ref(self.initializer.as_ref().unwrap()),
            None => &[],
        }
    }

    fn as_assignable(&self) -> Option<&dyn Assignable> {
        Some(self)
    }

    fn as_assignable_mut(&mut self) -> Option<&mut dyn Assignable> {
        Some(self)
    }
}

impl Assignable for UserVariable {
    fn set_value(&mut self, _graph: &mut ExprGraph, v: Value) -> bool {
        if !crate::value::types_compatible(&self.typ, &v.typ()) {
            return false;
        }
        self.value = Some(v);
        true
    }

    fn set_unknown(&mut self, _graph: &mut ExprGraph) {
        self.value = None;
    }

    fn set_initializer(&mut self, init: ExprId, owned: bool) {
        self.initializer = Some(init);
        self.initializer_owned = owned;
    }
}

/// A fixed-capacity assignable array variable.
#[derive(Debug)]
pub struct ArrayVariable {
    element_type: Typ,
    max_size: usize,
    elements: Option<Vec<Value>>,
    active_count: u32,
}

impl ArrayVariable {
    pub fn new(element_type: Typ, max_size: usize, initial: Option<Vec<Value>>) -> Self {
        ArrayVariable { element_type, max_size, elements: initial, active_count: 0 }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn element_type(&self) -> &Typ {
        &self.element_type
    }

    pub fn get_element(&self, index: usize) -> Option<&Value> {
        self.elements.as_ref().and_then(|v| v.get(index))
    }

    pub fn set_element(&mut self, index: usize, v: Value) -> bool {
        match &mut self.elements {
            Some(vs) if index < vs.len() => {
                vs[index] = v;
                true
            }
            _ => false,
        }
    }
}

impl Expression for ArrayVariable {
    fn value_type(&self) -> Typ {
        Typ::Array(Box::new(self.element_type.clone()))
    }

    fn is_known(&self, _graph: &ExprGraph) -> bool {
        self.elements.is_some()
    }

    fn get_value(&self, _graph: &ExprGraph) -> Option<Value> {
        self.elements.clone().map(Value::Array)
    }

    fn is_assignable(&self) -> bool {
        true
    }

    fn activate(&mut self, _graph: &mut ExprGraph) -> u32 {
        self.active_count += 1;
        self.active_count
    }

    fn deactivate(&mut self, _graph: &mut ExprGraph) -> u32 {
        if self.active_count > 0 {
            self.active_count -= 1;
        }
        self.active_count
    }

    fn active(&self) -> bool {
        self.active_count > 0
    }

    fn as_assignable(&self) -> Option<&dyn Assignable> {
        Some(self)
    }

    fn as_assignable_mut(&mut self) -> Option<&mut dyn Assignable> {
        Some(self)
    }
}

impl Assignable for ArrayVariable {
    fn set_value(&mut self, _graph: &mut ExprGraph, v: Value) -> bool {
        let Value::Array(vs) = &v else { return false };
        if vs.len() > self.max_size {
            return false;
        }
        self.elements = Some(vs.clone());
        true
    }

    fn set_unknown(&mut self, _graph: &mut ExprGraph) {
        self.elements = None;
    }

    fn set_initializer(&mut self, _init: ExprId, _owned: bool) {
        // Arrays are initialized directly at declaration time (spec.md
        // section 6.3, DeclareArray's InitialValue); they don't defer to a
        // lazily-evaluated initializer expression the way scalars can.
    }
}

/// An assignable view of one slot of an array variable.
#[derive(Debug)]
pub struct ArrayElementReference {
    array: ExprId,
    index: ExprId,
    element_type: Typ,
}

impl ArrayElementReference {
    pub fn new(array: ExprId, index: ExprId, element_type: Typ) -> Self {
        ArrayElementReference { array, index, element_type }
    }
}

impl Expression for ArrayElementReference {
    fn value_type(&self) -> Typ {
        self.element_type.clone()
    }

    fn is_known(&self, graph: &ExprGraph) -> bool {
        self.resolve(graph).is_some()
    }

    fn get_value(&self, graph: &ExprGraph) -> Option<Value> {
        self.resolve(graph)
    }

    fn is_assignable(&self) -> bool {
        true
    }

    fn activate(&mut self, graph: &mut ExprGraph) -> u32 {
        graph.activate(self.array);
        graph.activate(self.index);
        1
    }

    fn deactivate(&mut self, graph: &mut ExprGraph) -> u32 {
        graph.deactivate(self.array);
        graph.deactivate(self.index);
        0
    }

    fn active(&self) -> bool {
        true
    }

    fn children(&self) -> &[ExprId] {
        std::slice::from_ref(&self.array)
    }

    fn as_assignable(&self) -> Option<&dyn Assignable> {
        Some(self)
    }

    fn as_assignable_mut(&mut self) -> Option<&mut dyn Assignable> {
        Some(self)
    }
}

impl ArrayElementReference {
    fn resolve(&self, graph: &ExprGraph) -> Option<Value> {
        let idx = graph.get_value(self.index)?.as_integer()? as usize;
        let arr = graph.get_value(self.array)?;
        arr.as_array()?.get(idx).cloned()
    }

    fn resolve_index(&self, graph: &ExprGraph) -> Option<usize> {
        graph.get_value(self.index)?.as_integer().map(|i| i as usize)
    }
}

impl Assignable for ArrayElementReference {
    fn set_value(&mut self, graph: &mut ExprGraph, v: Value) -> bool {
        let Some(idx) = self.resolve_index(graph) else { return false };
        let Some(Value::Array(mut vs)) = graph.get_value(self.array) else { return false };
        if idx >= vs.len() || vs[idx].typ() != v.typ() {
            return false;
        }
        vs[idx] = v;
        graph.set_value(self.array, Value::Array(vs))
    }

    fn set_unknown(&mut self, _graph: &mut ExprGraph) {
        // A single array slot cannot be made unknown independently of the
        // rest of the array in this value model (`Value` has no per-element
        // unknown marker); only whole-array unassignment is supported.
    }

    fn base_variable(&self, _self_id: ExprId) -> ExprId {
        self.array
    }

    fn set_initializer(&mut self, _init: ExprId, _owned: bool) {}
}

/// A read-only wrapper around another expression (spec.md glossary).
/// Used to present an ancestor's or caller's variable to a callee as an `In`
/// parameter without letting the callee write through it.
#[derive(Debug)]
pub struct Alias {
    target: ExprId,
    typ: Typ,
    owns_target: bool,
}

impl Alias {
    pub fn new(target: ExprId, typ: Typ, owns_target: bool) -> Self {
        Alias { target, typ, owns_target }
    }

    pub fn owns_target(&self) -> bool {
        self.owns_target
    }

    pub fn target(&self) -> ExprId {
        self.target
    }
}

impl Expression for Alias {
    fn value_type(&self) -> Typ {
        self.typ.clone()
    }

    fn is_known(&self, graph: &ExprGraph) -> bool {
        graph.is_known(self.target)
    }

    fn get_value(&self, graph: &ExprGraph) -> Option<Value> {
        graph.get_value(self.target)
    }

    fn is_assignable(&self) -> bool {
        false
    }

    fn activate(&mut self, graph: &mut ExprGraph) -> u32 {
        graph.activate(self.target);
        1
    }

    fn deactivate(&mut self, graph: &mut ExprGraph) -> u32 {
        graph.deactivate(self.target);
        0
    }

    fn active(&self) -> bool {
        true
    }

    fn children(&self) -> &[ExprId] {
        std::slice::from_ref(&self.target)
    }
}

//! Insertion-point IR builder.
//!
//! A builder is a cursor over a [`Module`]: it remembers where the next
//! instruction goes and provides `emit_*` helpers that allocate, type, and
//! place instructions in one step. Passes that must emit at a second
//! location without disturbing their main cursor open a nested builder over
//! a reborrow of the module.

use super::{Inst, InstId, Module, Op};

/// Where the builder places the next emitted instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPoint {
    /// No position selected; emitting is a bug.
    Nowhere,
    /// Insert immediately before the given instruction.
    Before(InstId),
    /// Append at the end of the given block.
    AtEnd(InstId),
}

pub struct Builder<'m> {
    pub module: &'m mut Module,
    insert_point: InsertPoint,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Builder {
            module,
            insert_point: InsertPoint::Nowhere,
        }
    }

    pub fn insert_point(&self) -> InsertPoint {
        self.insert_point
    }

    pub fn set_insert_point(&mut self, point: InsertPoint) {
        self.insert_point = point;
    }

    pub fn set_insert_before(&mut self, inst: InstId) {
        self.insert_point = InsertPoint::Before(inst);
    }

    pub fn set_insert_at_end_of(&mut self, block: InstId) {
        self.insert_point = InsertPoint::AtEnd(block);
    }

    fn emit(&mut self, inst: Inst) -> InstId {
        let id = self.module.alloc(inst);
        match self.insert_point {
            InsertPoint::Before(anchor) => self.module.insert_before(id, anchor),
            InsertPoint::AtEnd(block) => self.module.append_to_block(block, id),
            InsertPoint::Nowhere => panic!("BUG: builder has no insertion point"),
        }
        id
    }

    pub fn emit_load(&mut self, ptr: InstId) -> InstId {
        let ptr_ty = self.module.full_type(ptr);
        let (_, value_ty) = self
            .module
            .ptr_like(ptr_ty)
            .unwrap_or_else(|| panic!("BUG: load from non-pointer {}", ptr));
        self.emit(Inst::new(Op::Load, Some(value_ty), vec![ptr]))
    }

    pub fn emit_store(&mut self, ptr: InstId, value: InstId) -> InstId {
        self.emit(Inst::new(Op::Store, None, vec![ptr, value]))
    }

    pub fn emit_field_extract(&mut self, ty: InstId, base: InstId, key: InstId) -> InstId {
        self.emit(Inst::new(Op::FieldExtract, Some(ty), vec![base, key]))
    }

    pub fn emit_field_address(&mut self, ptr_ty: InstId, base: InstId, key: InstId) -> InstId {
        self.emit(Inst::new(Op::FieldAddress, Some(ptr_ty), vec![base, key]))
    }

    pub fn emit_element_extract(&mut self, ty: InstId, base: InstId, index: InstId) -> InstId {
        self.emit(Inst::new(Op::ElementExtract, Some(ty), vec![base, index]))
    }

    pub fn emit_element_address(&mut self, ptr_ty: InstId, base: InstId, index: InstId) -> InstId {
        self.emit(Inst::new(Op::ElementAddress, Some(ptr_ty), vec![base, index]))
    }

    pub fn emit_make_array(&mut self, array_ty: InstId, elements: Vec<InstId>) -> InstId {
        self.emit(Inst::new(Op::MakeArray, Some(array_ty), elements))
    }

    /// A constructor-style conversion/aggregation producing `ty`.
    pub fn emit_construct(&mut self, ty: InstId, arguments: Vec<InstId>) -> InstId {
        self.emit(Inst::new(Op::Construct, Some(ty), arguments))
    }

    /// A local variable holding a value of `value_ty`; the result is its
    /// address.
    pub fn emit_var(&mut self, value_ty: InstId) -> InstId {
        let ptr_ty = self.module.ptr_type(value_ty);
        self.emit(Inst::new(Op::Var, Some(ptr_ty), vec![]))
    }

    pub fn emit_undefined(&mut self, ty: InstId) -> InstId {
        self.emit(Inst::new(Op::Undefined, Some(ty), vec![]))
    }

    pub fn emit_call(&mut self, result_ty: InstId, callee: InstId, args: &[InstId]) -> InstId {
        let mut operands = vec![callee];
        operands.extend_from_slice(args);
        self.emit(Inst::new(Op::Call, Some(result_ty), operands))
    }

    pub fn emit_return_val(&mut self, value: InstId) -> InstId {
        self.emit(Inst::new(Op::ReturnVal, None, vec![value]))
    }

    pub fn emit_return_void(&mut self) -> InstId {
        self.emit(Inst::new(Op::ReturnVoid, None, vec![]))
    }
}

//! IR substrate for backend legalization passes.
//!
//! A module is a flat arena of instructions referenced by [`InstId`], with
//! explicit parent/child links for the containers (module scope, functions,
//! blocks). Types and integer constants are instructions too; structural
//! types are interned so that type equality is `InstId` equality. Struct
//! types and struct keys are nominal and never interned.
//!
//! The substrate deliberately provides only the primitives the legalization
//! passes need: ordered insertion, removal, use replacement and counting,
//! iteration, and decorations. It is not an optimizer's IR.

use std::collections::HashMap;
use std::rc::Rc;

use crate::IdArena;
use crate::layout::{EntryPointLayout, VarLayout};

pub mod builder;


// =============================================================================
// ID Types
// =============================================================================

/// An instruction in a module. Types, constants, globals, functions, blocks,
/// parameters, and ordinary instructions are all insts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for InstId {
    fn from(id: u32) -> Self {
        InstId(id)
    }
}

impl std::fmt::Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

// =============================================================================
// Opcodes
// =============================================================================

/// Scalar element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Bool,
    Int,
    UInt,
    Float,
}

/// The flavor of a pointer-like type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrKind {
    /// A plain pointer (local variables).
    Ptr,
    /// An `out` parameter wrapper.
    Out,
    /// An `in out` parameter wrapper.
    InOut,
}

/// Instruction opcodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    // -------------------------------------------------------------------------
    // Types (types are values; structural ones are interned)
    // -------------------------------------------------------------------------
    VoidType,
    BasicType(BaseType),
    /// operands: [element type, element count]
    VectorType,
    /// operands: [element type, row count, column count]
    MatrixType,
    /// operands: [element type, element count]
    ArrayType,
    /// operands: [value type]
    PtrType,
    /// operands: [value type]
    OutType,
    /// operands: [value type]
    InOutType,
    /// Geometry output stream; operands: [element type]
    StreamOutputType,
    /// operands: [result type, param types...]
    FuncType,
    /// Nominal; operands are StructField insts.
    StructType,
    /// Identity of a struct field, shared by all uses of that field.
    StructKey,
    /// operands: [key, field type]
    StructField,

    // -------------------------------------------------------------------------
    // Constants
    // -------------------------------------------------------------------------
    IntLit(i64),

    // -------------------------------------------------------------------------
    // Declarations and containers
    // -------------------------------------------------------------------------
    /// A module-scope shader parameter.
    GlobalParam,
    /// A function; children are blocks.
    Func,
    /// A basic block; children are params followed by ordinary insts.
    Block,
    /// A function/block parameter pseudo-op.
    Param,
    /// A local variable; its type is a pointer to the stored value type.
    Var,
    /// A generic (parameterized) value; children hold its body.
    Generic,

    // -------------------------------------------------------------------------
    // Ordinary instructions
    // -------------------------------------------------------------------------
    Undefined,
    /// operands: [callee, args...]
    Call,
    /// operands: [generic, specialization args...]
    Specialize,
    /// operands: [ptr]
    Load,
    /// operands: [ptr, value]
    Store,
    /// operands: [base, key]
    FieldExtract,
    /// operands: [base, key]
    FieldAddress,
    /// operands: [base, index]
    ElementExtract,
    /// operands: [base, index]
    ElementAddress,
    /// operands: elements
    MakeArray,
    /// Generic constructor/conversion; operands: arguments.
    Construct,
    /// operands: [value]
    ReturnVal,
    ReturnVoid,
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::ReturnVal | Op::ReturnVoid)
    }
}

// =============================================================================
// Decorations
// =============================================================================

/// Layout metadata attached through a layout decoration.
#[derive(Debug, Clone)]
pub enum LayoutAttachment {
    Var(Rc<VarLayout>),
    EntryPoint(Rc<EntryPointLayout>),
}

/// Side information attached to an instruction.
#[derive(Debug, Clone)]
pub enum Decoration {
    Layout(LayoutAttachment),
    /// The target-language name this value imports (e.g. a GLSL built-in).
    Import(String),
    /// Name of the outer array wrapping a GLSL built-in (geometry inputs).
    GlslOuterArray(String),
    /// Keeps the referenced value alive even if unused (payload linkage).
    DependsOn(InstId),
    /// A target-specific intrinsic definition for this function.
    TargetIntrinsic { target: String, definition: String },
    /// Name hint for debugging and emission.
    Name(String),
}

// =============================================================================
// Instructions
// =============================================================================

/// One instruction. Operands reference other insts; containers additionally
/// keep an ordered child list.
#[derive(Debug, Clone)]
pub struct Inst {
    pub op: Op,
    /// The type of the value this inst produces, if any (a type inst).
    pub full_type: Option<InstId>,
    pub operands: Vec<InstId>,
    /// The container this inst currently lives in, if any.
    pub parent: Option<InstId>,
    children: Vec<InstId>,
    decorations: Vec<Decoration>,
}

impl Inst {
    pub fn new(op: Op, full_type: Option<InstId>, operands: Vec<InstId>) -> Self {
        Inst {
            op,
            full_type,
            operands,
            parent: None,
            children: Vec::new(),
            decorations: Vec::new(),
        }
    }
}

// =============================================================================
// Module
// =============================================================================

/// A module: the instruction arena plus the ordered list of module-scope
/// values (global parameters and functions).
#[derive(Debug, Default)]
pub struct Module {
    insts: IdArena<InstId, Inst>,
    globals: Vec<InstId>,
    interner: HashMap<(Op, Option<InstId>, Vec<InstId>), InstId>,
}

impl Module {
    pub fn new() -> Self {
        Module {
            insts: IdArena::new(),
            globals: Vec::new(),
            interner: HashMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    pub fn inst(&self, id: InstId) -> &Inst {
        self.insts.get(id).expect("BUG: dangling InstId")
    }

    fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        self.insts.get_mut(id).expect("BUG: dangling InstId")
    }

    pub fn op(&self, id: InstId) -> &Op {
        &self.inst(id).op
    }

    /// The type of a value-producing inst. Panics if the inst has none.
    pub fn full_type(&self, id: InstId) -> InstId {
        self.inst(id)
            .full_type
            .unwrap_or_else(|| panic!("BUG: inst {} has no type", id))
    }

    pub fn operand(&self, id: InstId, index: usize) -> InstId {
        self.inst(id).operands[index]
    }

    pub fn operands(&self, id: InstId) -> &[InstId] {
        &self.inst(id).operands
    }

    pub fn children(&self, id: InstId) -> &[InstId] {
        &self.inst(id).children
    }

    pub fn globals(&self) -> &[InstId] {
        &self.globals
    }

    pub fn set_full_type(&mut self, id: InstId, ty: InstId) {
        self.inst_mut(id).full_type = Some(ty);
    }

    // -------------------------------------------------------------------------
    // Allocation and interning
    // -------------------------------------------------------------------------

    /// Allocate a detached instruction.
    pub fn alloc(&mut self, inst: Inst) -> InstId {
        self.insts.alloc(inst)
    }

    fn intern(&mut self, op: Op, full_type: Option<InstId>, operands: Vec<InstId>) -> InstId {
        let key = (op.clone(), full_type, operands.clone());
        if let Some(&id) = self.interner.get(&key) {
            return id;
        }
        let id = self.insts.alloc(Inst::new(op, full_type, operands));
        self.interner.insert(key, id);
        id
    }

    // -------------------------------------------------------------------------
    // Types
    // -------------------------------------------------------------------------

    pub fn void_type(&mut self) -> InstId {
        self.intern(Op::VoidType, None, vec![])
    }

    pub fn basic_type(&mut self, base: BaseType) -> InstId {
        self.intern(Op::BasicType(base), None, vec![])
    }

    pub fn bool_type(&mut self) -> InstId {
        self.basic_type(BaseType::Bool)
    }

    pub fn int_type(&mut self) -> InstId {
        self.basic_type(BaseType::Int)
    }

    pub fn uint_type(&mut self) -> InstId {
        self.basic_type(BaseType::UInt)
    }

    pub fn float_type(&mut self) -> InstId {
        self.basic_type(BaseType::Float)
    }

    pub fn vector_type(&mut self, element: InstId, count: usize) -> InstId {
        let int_ty = self.int_type();
        let count = self.const_int(int_ty, count as i64);
        self.intern(Op::VectorType, None, vec![element, count])
    }

    pub fn matrix_type(&mut self, element: InstId, rows: usize, cols: usize) -> InstId {
        let int_ty = self.int_type();
        let rows = self.const_int(int_ty, rows as i64);
        let cols = self.const_int(int_ty, cols as i64);
        self.intern(Op::MatrixType, None, vec![element, rows, cols])
    }

    /// Array type with an explicit element-count constant.
    pub fn array_type(&mut self, element: InstId, element_count: InstId) -> InstId {
        self.intern(Op::ArrayType, None, vec![element, element_count])
    }

    pub fn ptr_type(&mut self, value_type: InstId) -> InstId {
        self.intern(Op::PtrType, None, vec![value_type])
    }

    pub fn out_type(&mut self, value_type: InstId) -> InstId {
        self.intern(Op::OutType, None, vec![value_type])
    }

    pub fn inout_type(&mut self, value_type: InstId) -> InstId {
        self.intern(Op::InOutType, None, vec![value_type])
    }

    /// Pointer-like type of the given flavor.
    pub fn ptr_type_with_kind(&mut self, kind: PtrKind, value_type: InstId) -> InstId {
        match kind {
            PtrKind::Ptr => self.ptr_type(value_type),
            PtrKind::Out => self.out_type(value_type),
            PtrKind::InOut => self.inout_type(value_type),
        }
    }

    pub fn stream_output_type(&mut self, element: InstId) -> InstId {
        self.intern(Op::StreamOutputType, None, vec![element])
    }

    pub fn func_type(&mut self, result: InstId, params: &[InstId]) -> InstId {
        let mut operands = vec![result];
        operands.extend_from_slice(params);
        self.intern(Op::FuncType, None, operands)
    }

    /// A fresh struct key. Keys are nominal: two keys with the same name are
    /// distinct fields.
    pub fn struct_key(&mut self, name: &str) -> InstId {
        let id = self.alloc(Inst::new(Op::StructKey, None, vec![]));
        self.add_decoration(id, Decoration::Name(name.to_string()));
        id
    }

    /// A fresh (nominal) struct type from (key, field type) pairs.
    pub fn struct_type(&mut self, fields: &[(InstId, InstId)]) -> InstId {
        let mut field_insts = Vec::with_capacity(fields.len());
        for &(key, ty) in fields {
            field_insts.push(self.alloc(Inst::new(Op::StructField, None, vec![key, ty])));
        }
        self.alloc(Inst::new(Op::StructType, None, field_insts))
    }

    // -------------------------------------------------------------------------
    // Type queries
    // -------------------------------------------------------------------------

    pub fn is_void(&self, ty: InstId) -> bool {
        matches!(self.op(ty), Op::VoidType)
    }

    /// If `ty` is pointer-like, its flavor and value type.
    pub fn ptr_like(&self, ty: InstId) -> Option<(PtrKind, InstId)> {
        match self.op(ty) {
            Op::PtrType => Some((PtrKind::Ptr, self.operand(ty, 0))),
            Op::OutType => Some((PtrKind::Out, self.operand(ty, 0))),
            Op::InOutType => Some((PtrKind::InOut, self.operand(ty, 0))),
            _ => None,
        }
    }

    /// If `ty` is an `out` or `in out` wrapper, its flavor and value type.
    pub fn out_like(&self, ty: InstId) -> Option<(PtrKind, InstId)> {
        match self.op(ty) {
            Op::OutType => Some((PtrKind::Out, self.operand(ty, 0))),
            Op::InOutType => Some((PtrKind::InOut, self.operand(ty, 0))),
            _ => None,
        }
    }

    pub fn array_element_type(&self, ty: InstId) -> InstId {
        match self.op(ty) {
            Op::ArrayType => self.operand(ty, 0),
            _ => panic!("BUG: {} is not an array type", ty),
        }
    }

    pub fn array_element_count(&self, ty: InstId) -> InstId {
        match self.op(ty) {
            Op::ArrayType => self.operand(ty, 1),
            _ => panic!("BUG: {} is not an array type", ty),
        }
    }

    /// The (key, field type) pairs of a struct type, in declaration order.
    pub fn struct_fields(&self, struct_ty: InstId) -> Vec<(InstId, InstId)> {
        match self.op(struct_ty) {
            Op::StructType => self
                .operands(struct_ty)
                .iter()
                .map(|&f| (self.operand(f, 0), self.operand(f, 1)))
                .collect(),
            _ => panic!("BUG: {} is not a struct type", struct_ty),
        }
    }

    /// The type of the field identified by `key` in `struct_ty`.
    pub fn field_type(&self, struct_ty: InstId, key: InstId) -> InstId {
        for (field_key, field_ty) in self.struct_fields(struct_ty) {
            if field_key == key {
                return field_ty;
            }
        }
        panic!("BUG: no field {} in struct type {}", key, struct_ty);
    }

    pub fn func_type_result(&self, func_ty: InstId) -> InstId {
        match self.op(func_ty) {
            Op::FuncType => self.operand(func_ty, 0),
            _ => panic!("BUG: {} is not a function type", func_ty),
        }
    }

    pub fn func_type_params(&self, func_ty: InstId) -> &[InstId] {
        match self.op(func_ty) {
            Op::FuncType => &self.operands(func_ty)[1..],
            _ => panic!("BUG: {} is not a function type", func_ty),
        }
    }

    /// The result type of a function value.
    pub fn result_type_of_func(&self, func: InstId) -> InstId {
        let func_ty = self.full_type(func);
        self.func_type_result(func_ty)
    }

    // -------------------------------------------------------------------------
    // Constants
    // -------------------------------------------------------------------------

    pub fn const_int(&mut self, ty: InstId, value: i64) -> InstId {
        self.intern(Op::IntLit(value), Some(ty), vec![])
    }

    /// The value of an integer constant.
    pub fn int_value(&self, id: InstId) -> i64 {
        match self.op(id) {
            Op::IntLit(v) => *v,
            _ => panic!("BUG: {} is not an integer constant", id),
        }
    }

    // -------------------------------------------------------------------------
    // Module-scope construction
    // -------------------------------------------------------------------------

    /// Create a module-scope shader parameter at the end of module scope.
    pub fn create_global_param(&mut self, ty: InstId) -> InstId {
        let id = self.alloc(Inst::new(Op::GlobalParam, Some(ty), vec![]));
        self.globals.push(id);
        id
    }

    /// Create a function at the end of module scope.
    pub fn create_func(&mut self, func_ty: InstId) -> InstId {
        let id = self.alloc(Inst::new(Op::Func, Some(func_ty), vec![]));
        self.globals.push(id);
        id
    }

    /// Create a generic wrapper value at the end of module scope.
    pub fn create_generic(&mut self) -> InstId {
        let id = self.alloc(Inst::new(Op::Generic, None, vec![]));
        self.globals.push(id);
        id
    }

    /// Append a new block to a function.
    pub fn create_block(&mut self, func: InstId) -> InstId {
        let id = self.alloc(Inst::new(Op::Block, None, vec![]));
        self.inst_mut(func).children.push(id);
        self.inst_mut(id).parent = Some(func);
        id
    }

    /// Append a new parameter to a block, after any existing parameters.
    pub fn create_param(&mut self, block: InstId, ty: InstId) -> InstId {
        let id = self.alloc(Inst::new(Op::Param, Some(ty), vec![]));
        let pos = self
            .inst(block)
            .children
            .iter()
            .take_while(|&&c| matches!(self.inst(c).op, Op::Param))
            .count();
        self.inst_mut(block).children.insert(pos, id);
        self.inst_mut(id).parent = Some(block);
        id
    }

    // -------------------------------------------------------------------------
    // Placement
    // -------------------------------------------------------------------------

    /// Move a module-scope value so it precedes another module-scope value.
    pub fn move_before(&mut self, value: InstId, before: InstId) {
        let from = self
            .globals
            .iter()
            .position(|&g| g == value)
            .unwrap_or_else(|| panic!("BUG: {} is not at module scope", value));
        self.globals.remove(from);
        let to = self
            .globals
            .iter()
            .position(|&g| g == before)
            .unwrap_or_else(|| panic!("BUG: {} is not at module scope", before));
        self.globals.insert(to, value);
    }

    /// Insert a detached inst into a container, before `anchor`.
    pub fn insert_before(&mut self, inst: InstId, anchor: InstId) {
        let parent = self
            .inst(anchor)
            .parent
            .unwrap_or_else(|| panic!("BUG: insertion anchor {} is not in a container", anchor));
        let pos = self
            .inst(parent)
            .children
            .iter()
            .position(|&c| c == anchor)
            .expect("BUG: anchor not among its parent's children");
        self.inst_mut(parent).children.insert(pos, inst);
        self.inst_mut(inst).parent = Some(parent);
    }

    /// Append a detached inst at the end of a block.
    pub fn append_to_block(&mut self, block: InstId, inst: InstId) {
        self.inst_mut(block).children.push(inst);
        self.inst_mut(inst).parent = Some(block);
    }

    /// Detach an inst from its container. The inst stays allocated but is no
    /// longer reachable from module scope.
    pub fn remove_from_parent(&mut self, inst: InstId) {
        if let Some(parent) = self.inst(inst).parent {
            let pos = self
                .inst(parent)
                .children
                .iter()
                .position(|&c| c == inst)
                .expect("BUG: inst not among its parent's children");
            self.inst_mut(parent).children.remove(pos);
            self.inst_mut(inst).parent = None;
        } else if let Some(pos) = self.globals.iter().position(|&g| g == inst) {
            self.globals.remove(pos);
        }
    }

    // -------------------------------------------------------------------------
    // Structure queries
    // -------------------------------------------------------------------------

    /// Snapshot of a function's blocks, in order.
    pub fn blocks_of(&self, func: InstId) -> Vec<InstId> {
        self.inst(func).children.clone()
    }

    pub fn first_block(&self, func: InstId) -> Option<InstId> {
        self.inst(func).children.first().copied()
    }

    /// Snapshot of a block's instructions (params included), in order.
    ///
    /// A snapshot, so the caller can insert and remove while walking without
    /// ever observing a removed instruction.
    pub fn insts_of(&self, block: InstId) -> Vec<InstId> {
        self.inst(block).children.clone()
    }

    /// Snapshot of a block's leading parameter pseudo-ops.
    pub fn params_of(&self, block: InstId) -> Vec<InstId> {
        self.inst(block)
            .children
            .iter()
            .copied()
            .take_while(|&c| matches!(self.inst(c).op, Op::Param))
            .collect()
    }

    /// The first non-parameter instruction of a block, if any.
    pub fn first_ordinary_inst(&self, block: InstId) -> Option<InstId> {
        self.inst(block)
            .children
            .iter()
            .copied()
            .find(|&c| !matches!(self.inst(c).op, Op::Param))
    }

    /// The block's terminator: its last instruction, when it is one.
    pub fn terminator_of(&self, block: InstId) -> Option<InstId> {
        let last = self.inst(block).children.last().copied()?;
        if self.inst(last).op.is_terminator() {
            Some(last)
        } else {
            None
        }
    }

    // -------------------------------------------------------------------------
    // Uses
    // -------------------------------------------------------------------------

    /// All insts reachable from module scope, containers included.
    fn attached_insts(&self) -> Vec<InstId> {
        let mut out = Vec::new();
        let mut stack: Vec<InstId> = self.globals.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.inst(id).children.iter().rev().copied());
        }
        out
    }

    /// Number of operand uses of `target` among attached insts.
    pub fn use_count(&self, target: InstId) -> usize {
        self.attached_insts()
            .iter()
            .map(|&id| self.inst(id).operands.iter().filter(|&&o| o == target).count())
            .sum()
    }

    /// Rewrite every operand use of `old` among attached insts to `new`.
    pub fn replace_all_uses(&mut self, old: InstId, new: InstId) {
        for id in self.attached_insts() {
            for operand in &mut self.inst_mut(id).operands {
                if *operand == old {
                    *operand = new;
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Decorations
    // -------------------------------------------------------------------------

    pub fn add_decoration(&mut self, inst: InstId, decoration: Decoration) {
        self.inst_mut(inst).decorations.push(decoration);
    }

    pub fn decorations(&self, inst: InstId) -> &[Decoration] {
        &self.inst(inst).decorations
    }

    pub fn add_var_layout_decoration(&mut self, inst: InstId, layout: Rc<VarLayout>) {
        self.add_decoration(inst, Decoration::Layout(LayoutAttachment::Var(layout)));
    }

    pub fn add_entry_point_layout_decoration(&mut self, inst: InstId, layout: Rc<EntryPointLayout>) {
        self.add_decoration(inst, Decoration::Layout(LayoutAttachment::EntryPoint(layout)));
    }

    pub fn add_import_decoration(&mut self, inst: InstId, name: &str) {
        self.add_decoration(inst, Decoration::Import(name.to_string()));
    }

    pub fn add_glsl_outer_array_decoration(&mut self, inst: InstId, name: &str) {
        self.add_decoration(inst, Decoration::GlslOuterArray(name.to_string()));
    }

    pub fn add_depends_on_decoration(&mut self, inst: InstId, dependency: InstId) {
        self.add_decoration(inst, Decoration::DependsOn(dependency));
    }

    pub fn add_target_intrinsic_decoration(&mut self, inst: InstId, target: &str, definition: &str) {
        self.add_decoration(
            inst,
            Decoration::TargetIntrinsic {
                target: target.to_string(),
                definition: definition.to_string(),
            },
        );
    }

    pub fn find_var_layout(&self, inst: InstId) -> Option<Rc<VarLayout>> {
        self.decorations(inst).iter().find_map(|d| match d {
            Decoration::Layout(LayoutAttachment::Var(l)) => Some(l.clone()),
            _ => None,
        })
    }

    pub fn find_entry_point_layout(&self, inst: InstId) -> Option<Rc<EntryPointLayout>> {
        self.decorations(inst).iter().find_map(|d| match d {
            Decoration::Layout(LayoutAttachment::EntryPoint(l)) => Some(l.clone()),
            _ => None,
        })
    }

    pub fn find_import(&self, inst: InstId) -> Option<&str> {
        self.decorations(inst).iter().find_map(|d| match d {
            Decoration::Import(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn find_glsl_outer_array(&self, inst: InstId) -> Option<&str> {
        self.decorations(inst).iter().find_map(|d| match d {
            Decoration::GlslOuterArray(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// The intrinsic definition string registered for `target`, if any.
    pub fn find_target_intrinsic(&self, inst: InstId, target: &str) -> Option<&str> {
        self.decorations(inst).iter().find_map(|d| match d {
            Decoration::TargetIntrinsic { target: t, definition } if t == target => {
                Some(definition.as_str())
            }
            _ => None,
        })
    }

    pub fn depends_on(&self, inst: InstId) -> Vec<InstId> {
        self.decorations(inst)
            .iter()
            .filter_map(|d| match d {
                Decoration::DependsOn(dep) => Some(*dep),
                _ => None,
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Generics
    // -------------------------------------------------------------------------

    /// The value a generic's body returns, if the body is well-formed.
    pub fn find_generic_return_val(&self, generic: InstId) -> Option<InstId> {
        for &block in self.inst(generic).children.iter() {
            for &inst in self.inst(block).children.iter() {
                if matches!(self.inst(inst).op, Op::ReturnVal) {
                    return Some(self.operand(inst, 0));
                }
            }
        }
        None
    }
}

//! Layout metadata attached to entry points and their parameters.
//!
//! Layout computation itself happens earlier in the pipeline; backend passes
//! only read these records (and occasionally build derived ones, e.g. when an
//! aggregate varying is scalarized and each leaf needs its own fresh layout).
//!
//! Layouts are shared through `Rc`: a struct field's layout is referenced
//! both from the parent's type layout and from any derived leaf layouts.

use std::rc::Rc;

use crate::diag::SourceLoc;

/// The pipeline stage an entry point (or one of its varyings) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Hull,
    Domain,
    Geometry,
    Fragment,
    Compute,
    RayGeneration,
    Intersection,
    AnyHit,
    ClosestHit,
    Miss,
    Callable,
}

impl Stage {
    /// Ray-tracing stages legalize their parameters as payloads rather than
    /// as scalarized varyings.
    pub fn is_ray_tracing(self) -> bool {
        matches!(
            self,
            Stage::RayGeneration
                | Stage::Intersection
                | Stage::AnyHit
                | Stage::ClosestHit
                | Stage::Miss
                | Stage::Callable
        )
    }
}

/// Which resource a layout entry consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutResourceKind {
    VaryingInput,
    VaryingOutput,
}

/// The layout rule family a type layout was computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutRules {
    Varying,
    Std140,
    Std430,
}

/// How many units of a given resource kind a variable occupies, and where it
/// starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    pub kind: LayoutResourceKind,
    pub index: usize,
    pub count: usize,
}

/// Total resource usage of a type, per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceUsage {
    pub kind: LayoutResourceKind,
    pub count: usize,
}

/// Layout of a type: its rule family, its total resource usage, and the
/// shape-specific detail.
#[derive(Debug, Clone)]
pub struct TypeLayout {
    pub rules: LayoutRules,
    pub usages: Vec<ResourceUsage>,
    pub kind: TypeLayoutKind,
}

#[derive(Debug, Clone)]
pub enum TypeLayoutKind {
    /// Scalars, vectors, matrices, resource handles: no internal structure
    /// the varying legalizer cares about.
    Simple,
    /// An array; `uniform_stride` is zero for varying data.
    Array {
        element: Rc<TypeLayout>,
        uniform_stride: usize,
    },
    /// A struct, one var-layout per field in declaration order.
    Struct { fields: Vec<Rc<VarLayout>> },
    /// A geometry output stream; layout-wise transparent around its element.
    Stream { element: Rc<TypeLayout> },
}

impl TypeLayout {
    pub fn simple(rules: LayoutRules) -> TypeLayout {
        TypeLayout {
            rules,
            usages: Vec::new(),
            kind: TypeLayoutKind::Simple,
        }
    }

    pub fn find_usage(&self, kind: LayoutResourceKind) -> Option<&ResourceUsage> {
        self.usages.iter().find(|u| u.kind == kind)
    }

    pub fn add_usage(&mut self, kind: LayoutResourceKind, count: usize) {
        if let Some(u) = self.usages.iter_mut().find(|u| u.kind == kind) {
            u.count += count;
        } else {
            self.usages.push(ResourceUsage { kind, count });
        }
    }

}

/// Layout of one variable: a parameter, a return slot, or a struct field.
#[derive(Debug, Clone)]
pub struct VarLayout {
    pub type_layout: Rc<TypeLayout>,
    pub flags: u32,
    /// User-facing semantic attached to the declaration, if any.
    pub semantic_name: Option<String>,
    pub semantic_index: usize,
    /// System-value semantic (e.g. "SV_Position"), original spelling.
    pub system_value_semantic: Option<String>,
    pub system_value_semantic_index: usize,
    /// The stage this varying is associated with, when it differs from the
    /// enclosing entry point's.
    pub stage: Option<Stage>,
    pub resource_infos: Vec<ResourceInfo>,
    /// Location of the originating declaration, for diagnostics.
    pub loc: SourceLoc,
}

impl VarLayout {
    /// A var layout with no semantics and no resource claims.
    pub fn new(type_layout: Rc<TypeLayout>) -> VarLayout {
        VarLayout {
            type_layout,
            flags: 0,
            semantic_name: None,
            semantic_index: 0,
            system_value_semantic: None,
            system_value_semantic_index: 0,
            stage: None,
            resource_infos: Vec::new(),
            loc: SourceLoc::UNKNOWN,
        }
    }

    pub fn find_resource_info(&self, kind: LayoutResourceKind) -> Option<&ResourceInfo> {
        self.resource_infos.iter().find(|r| r.kind == kind)
    }

    pub fn add_resource_info(&mut self, kind: LayoutResourceKind, index: usize) {
        self.resource_infos.push(ResourceInfo {
            kind,
            index,
            count: 1,
        });
    }
}

/// Layout of a whole entry point: the stage it runs at, per-parameter
/// layouts, and the layout of the return slot.
#[derive(Debug, Clone)]
pub struct EntryPointLayout {
    pub stage: Stage,
    pub params: Vec<Rc<VarLayout>>,
    pub result: Rc<VarLayout>,
}

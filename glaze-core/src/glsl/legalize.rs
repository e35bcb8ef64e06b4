//! Entry-point legalization for GLSL-family targets.
//!
//! The source model expresses stage I/O as entry-point parameters and return
//! values carrying semantic annotations. GLSL instead wants module-scope
//! `in`/`out` variables and a nullary `void main()`. This pass rewrites an
//! entry-point function from the former shape into the latter:
//!
//! - every varying parameter and the return value become module-scope
//!   parameters, recursively scalarized (GLSL forbids varying structs, and
//!   arrays of structs must become struct-of-arrays so each leaf gets its
//!   own location);
//! - system-value semantics map to GLSL built-in names, with implicit
//!   conversions inserted where the built-in's type differs from the
//!   declared one;
//! - the function body is rewritten to read and write the new globals, and
//!   its signature becomes `() -> void`.
//!
//! Geometry output streams, `out`/`in out` reference parameters, and
//! ray-tracing payloads each have their own rewrite rules; see
//! [`legalize_entry_point_for_glsl`].

use std::rc::Rc;

use log::trace;

use crate::Session;
use crate::diag::{DiagnosticKind, DiagnosticSink};
use crate::ir::builder::Builder;
use crate::ir::{InstId, Module, Op, PtrKind};
use crate::layout::{
    LayoutResourceKind, Stage, TypeLayout, TypeLayoutKind, VarLayout,
};

use super::ext::{ExtensionUsageTracker, ProfileVersion};

// =============================================================================
// Scalarized values
// =============================================================================

// When scalarizing shader inputs/outputs for GLSL we need a way to refer to
// a conceptual "value" that might comprise multiple IR-level values. We
// could in principle introduce tuple types into the IR so that everything
// stays at the IR level, but it is easier to layer this over the top.
//
// `ScalarizedVal` answers both the "tuple or single value?" question and the
// "l-value or r-value?" question.

/// The representation of one logical varying during legalization.
#[derive(Debug, Clone)]
pub enum ScalarizedVal {
    /// No value at all (a `void` or empty-struct varying).
    None,
    /// A single IR value.
    Value(InstId),
    /// The address of the actual value.
    Address(InstId),
    /// Zero or more keyed sub-values standing in for an aggregate.
    Tuple(Rc<ScalarizedTupleVal>),
    /// A value stored with one type but presented as another, converted
    /// implicitly on read or write.
    TypeAdapter(Rc<ScalarizedTypeAdapterVal>),
}

#[derive(Debug)]
pub struct ScalarizedTupleVal {
    /// The aggregate type this tuple stands in for, outer array wrappers
    /// included.
    pub ty: InstId,
    pub elements: Vec<TupleElement>,
}

#[derive(Debug, Clone)]
pub struct TupleElement {
    /// The struct field key this element corresponds to.
    pub key: InstId,
    pub val: ScalarizedVal,
}

#[derive(Debug)]
pub struct ScalarizedTypeAdapterVal {
    pub val: ScalarizedVal,
    /// The type the underlying storage really has.
    pub actual_type: InstId,
    /// The type this value pretends to have.
    pub pretend_type: InstId,
}

// =============================================================================
// Declarators
// =============================================================================

/// Pending wrappers to apply when scalarization reaches a leaf. Built on the
/// recursion's own stack; only arrays exist today, the enum reserves room
/// for future flavors.
enum GlobalVaryingDeclarator<'a> {
    Array {
        element_count: InstId,
        next: Option<&'a GlobalVaryingDeclarator<'a>>,
    },
}

// =============================================================================
// Pass context
// =============================================================================

struct GlslLegalizationContext<'a> {
    session: &'a Session,
    stage: Stage,
    sink: &'a mut DiagnosticSink,
    extensions: &'a mut ExtensionUsageTracker,
    /// The entry-point function being rewritten.
    func: InstId,
}

impl GlslLegalizationContext<'_> {
    fn require_glsl_extension(&mut self, name: &str) {
        self.extensions.require_glsl_extension(name);
    }

    fn require_glsl_version(&mut self, version: ProfileVersion) {
        self.extensions.require_glsl_version(version);
    }
}

// =============================================================================
// System-value mapping
// =============================================================================

/// How a recognized system-value semantic maps onto GLSL.
struct GlslSystemValueInfo {
    /// The GLSL built-in variable name.
    name: &'static str,
    /// Name of an outer array wrapping the variable (geometry inputs).
    outer_array_name: Option<&'static str>,
    /// The type GLSL requires the built-in to have, when it overrides the
    /// declared type.
    required_type: Option<InstId>,
}

/// Result of looking up a system-value semantic.
enum SystemValueLookup {
    /// Not a system value, or one the target handles as an ordinary
    /// location-based varying (`sv_target`).
    Ordinary,
    /// A recognized GLSL built-in.
    Mapped(GlslSystemValueInfo),
    /// Unrecognized semantic; a diagnostic has been reported.
    Unknown,
}

/// Map a layout's system-value semantic to its GLSL built-in, recording any
/// extension/version requirements along the way.
fn glsl_system_value_info(
    ctx: &mut GlslLegalizationContext,
    b: &mut Builder,
    var_layout: &VarLayout,
    kind: LayoutResourceKind,
    stage: Stage,
) -> SystemValueLookup {
    let Some(spelling) = var_layout.system_value_semantic.as_deref() else {
        return SystemValueLookup::Ordinary;
    };
    if spelling.is_empty() {
        return SystemValueLookup::Ordinary;
    }
    let semantic_name = spelling.to_lowercase();

    let m = &mut *b.module;
    let mut name: Option<&'static str> = None;
    let mut outer_array_name: Option<&'static str> = None;
    let mut required_type: Option<InstId> = None;

    match semantic_name.as_str() {
        "sv_position" => {
            // Works like `gl_FragCoord` as a fragment input and like
            // `gl_Position` everywhere else. This is not simply
            // input-vs-output: a geometry shader reads the previous stage's
            // `gl_Position` through the `gl_in[...]` array.
            if stage == Stage::Fragment && kind == LayoutResourceKind::VaryingInput {
                name = Some("gl_FragCoord");
            } else if stage == Stage::Geometry && kind == LayoutResourceKind::VaryingInput {
                // As a GS input the correct syntax is `gl_in[...].gl_Position`,
                // so the outer array dimension must be picked later.
                outer_array_name = Some("gl_in");
                name = Some("gl_Position");
            } else {
                name = Some("gl_Position");
            }
            let float_ty = m.float_type();
            required_type = Some(m.vector_type(float_ty, 4));
        }
        "sv_target" => {
            // Render-target outputs are ordinary `out` variables with
            // ordinary locations as far as GLSL is concerned.
            return SystemValueLookup::Ordinary;
        }
        "sv_clipdistance" => {
            name = Some("gl_ClipDistance");
            required_type = Some(m.float_type());
        }
        "sv_culldistance" => {
            ctx.require_glsl_extension("ARB_cull_distance");
            name = Some("gl_CullDistance");
            required_type = Some(m.float_type());
        }
        "sv_coverage" => {
            // uint in the source model, int in GLSL.
            name = Some("gl_SampleMask");
            required_type = Some(m.int_type());
        }
        "sv_depth" | "sv_depthgreaterequal" | "sv_depthlessequal" => {
            name = Some("gl_FragDepth");
            required_type = Some(m.float_type());
        }
        "sv_dispatchthreadid" => {
            name = Some("gl_GlobalInvocationID");
            let uint_ty = m.uint_type();
            required_type = Some(m.vector_type(uint_ty, 3));
        }
        "sv_domainlocation" => {
            name = Some("gl_TessCoord");
            let float_ty = m.float_type();
            required_type = Some(m.vector_type(float_ty, 3));
        }
        "sv_groupid" => {
            name = Some("gl_WorkGroupID");
            let uint_ty = m.uint_type();
            required_type = Some(m.vector_type(uint_ty, 3));
        }
        "sv_groupindex" => {
            name = Some("gl_LocalInvocationIndex");
            required_type = Some(m.uint_type());
        }
        "sv_groupthreadid" => {
            name = Some("gl_LocalInvocationID");
            let uint_ty = m.uint_type();
            required_type = Some(m.vector_type(uint_ty, 3));
        }
        "sv_gsinstanceid" => {
            name = Some("gl_InvocationID");
            required_type = Some(m.int_type());
        }
        "sv_instanceid" => {
            name = Some("gl_InstanceIndex");
            required_type = Some(m.int_type());
        }
        "sv_isfrontface" => {
            name = Some("gl_FrontFacing");
            required_type = Some(m.bool_type());
        }
        "sv_outputcontrolpointid" => {
            name = Some("gl_InvocationID");
            required_type = Some(m.int_type());
        }
        "sv_pointsize" => {
            name = Some("gl_PointSize");
            required_type = Some(m.float_type());
        }
        "sv_primitiveid" => {
            name = Some("gl_PrimitiveID");
            required_type = Some(m.int_type());
        }
        "sv_rendertargetarrayindex" => {
            match ctx.stage {
                Stage::Geometry => ctx.require_glsl_version(ProfileVersion::Glsl150),
                Stage::Fragment => ctx.require_glsl_version(ProfileVersion::Glsl430),
                _ => {
                    ctx.require_glsl_version(ProfileVersion::Glsl450);
                    ctx.require_glsl_extension("GL_ARB_shader_viewport_layer_array");
                }
            }
            name = Some("gl_Layer");
            required_type = Some(m.int_type());
        }
        "sv_sampleindex" => {
            name = Some("gl_SampleID");
            required_type = Some(m.int_type());
        }
        "sv_stencilref" => {
            ctx.require_glsl_extension("ARB_shader_stencil_export");
            name = Some("gl_FragStencilRef");
            required_type = Some(m.int_type());
        }
        "sv_tessfactor" => {
            // The source type may be a shorter float array; GLSL always has
            // float[4]. TODO: the SOA path does not convert short arrays
            // correctly yet.
            name = Some("gl_TessLevelOuter");
            let float_ty = m.float_type();
            let int_ty = m.int_type();
            let four = m.const_int(int_ty, 4);
            required_type = Some(m.array_type(float_ty, four));
        }
        "sv_vertexid" => {
            name = Some("gl_VertexIndex");
            required_type = Some(m.int_type());
        }
        "sv_viewportarrayindex" => {
            name = Some("gl_ViewportIndex");
            required_type = Some(m.int_type());
        }
        "nv_x_right" => {
            ctx.require_glsl_version(ProfileVersion::Glsl450);
            ctx.require_glsl_extension("GL_NVX_multiview_per_view_attributes");
            // The GLSL output is `vec4 gl_PositionPerViewNV[]` over an
            // arbitrary number of views while the source model just declares
            // a second position output, so map to one element of the array.
            name = Some("gl_PositionPerViewNV[1]");
        }
        "nv_viewport_mask" => {
            ctx.require_glsl_version(ProfileVersion::Glsl450);
            ctx.require_glsl_extension("GL_NVX_multiview_per_view_attributes");
            name = Some("gl_ViewportMaskPerViewNV");
        }
        _ => {}
    }

    match name {
        Some(name) => SystemValueLookup::Mapped(GlslSystemValueInfo {
            name,
            outer_array_name,
            required_type,
        }),
        None => {
            ctx.sink.diagnose(
                var_layout.loc,
                DiagnosticKind::UnknownSystemValueSemantic(spelling.to_string()),
            );
            SystemValueLookup::Unknown
        }
    }
}

// =============================================================================
// Varying construction
// =============================================================================

/// Create one module-scope varying for a leaf type, applying any pending
/// array declarators and system-value mapping.
fn create_simple_glsl_global_varying(
    ctx: &mut GlslLegalizationContext,
    b: &mut Builder,
    in_type: InstId,
    in_var_layout: &Rc<VarLayout>,
    in_type_layout: &Rc<TypeLayout>,
    kind: LayoutResourceKind,
    stage: Stage,
    binding_index: usize,
    declarator: Option<&GlobalVaryingDeclarator>,
) -> ScalarizedVal {
    let system_value_info = match glsl_system_value_info(ctx, b, in_var_layout, kind, stage) {
        SystemValueLookup::Mapped(info) => Some(info),
        SystemValueLookup::Ordinary => None,
        // An unrecognized semantic gets no global at all; compilation
        // continues with that varying unbound.
        SystemValueLookup::Unknown => return ScalarizedVal::None,
    };

    // A system-value semantic may override the type the user declared.
    let mut ty = in_type;
    if let Some(info) = &system_value_info {
        if let Some(required) = info.required_type {
            ty = required;
        }
    }

    // Construct the actual type and type layout for the global variable,
    // applying declarators innermost first.
    let mut type_layout = in_type_layout.clone();
    let mut dd = declarator;
    while let Some(GlobalVaryingDeclarator::Array { element_count, next }) = dd {
        let array_ty = b.module.array_type(ty, *element_count);

        let mut array_layout = TypeLayout {
            rules: type_layout.rules,
            usages: Vec::new(),
            kind: TypeLayoutKind::Array {
                element: type_layout.clone(),
                uniform_stride: 0,
            },
        };
        if let Some(usage) = in_type_layout.find_usage(kind) {
            let element_count = b.module.int_value(*element_count) as usize;
            array_layout.add_usage(kind, usage.count * element_count);
        }

        ty = array_ty;
        type_layout = Rc::new(array_layout);
        dd = *next;
    }

    // A fresh layout for the variable even when the original had one: an
    // `in out` parameter shows up here twice, once per kind, and each copy
    // must carry its own binding index.
    let mut var_layout = VarLayout::new(type_layout);
    var_layout.flags = in_var_layout.flags;
    var_layout.semantic_name = in_var_layout.semantic_name.clone();
    var_layout.semantic_index = in_var_layout.semantic_index;
    var_layout.system_value_semantic = in_var_layout.system_value_semantic.clone();
    var_layout.system_value_semantic_index = in_var_layout.system_value_semantic_index;
    var_layout.stage = in_var_layout.stage;
    var_layout.loc = in_var_layout.loc;
    var_layout.add_resource_info(kind, binding_index);
    let var_layout = Rc::new(var_layout);

    // Module-scope shader parameters are read-only the way function
    // parameters are; varying outputs need an `out` wrapper type.
    let is_output = kind == LayoutResourceKind::VaryingOutput;
    let param_type = if is_output { b.module.out_type(ty) } else { ty };

    let global_param = b.module.create_global_param(param_type);
    b.module.move_before(global_param, ctx.func);

    let mut val = if is_output {
        ScalarizedVal::Address(global_param)
    } else {
        ScalarizedVal::Value(global_param)
    };

    if let Some(info) = &system_value_info {
        b.module.add_import_decoration(global_param, info.name);

        if let Some(required) = info.required_type {
            // Adapt between the declared type and the actual type of the
            // GLSL built-in.
            if required != in_type {
                val = ScalarizedVal::TypeAdapter(Rc::new(ScalarizedTypeAdapterVal {
                    val,
                    actual_type: required,
                    pretend_type: in_type,
                }));
            }
        }

        if let Some(outer_array_name) = info.outer_array_name {
            b.module
                .add_glsl_outer_array_decoration(global_param, outer_array_name);
        }
    }

    b.module.add_var_layout_decoration(global_param, var_layout);

    val
}

fn create_glsl_global_varyings_impl(
    ctx: &mut GlslLegalizationContext,
    b: &mut Builder,
    ty: InstId,
    var_layout: &Rc<VarLayout>,
    type_layout: &Rc<TypeLayout>,
    kind: LayoutResourceKind,
    stage: Stage,
    binding_index: usize,
    declarator: Option<&GlobalVaryingDeclarator>,
) -> ScalarizedVal {
    let op = b.module.op(ty).clone();
    match op {
        Op::VoidType => ScalarizedVal::None,

        Op::BasicType(_) | Op::VectorType | Op::MatrixType => create_simple_glsl_global_varying(
            ctx,
            b,
            ty,
            var_layout,
            type_layout,
            kind,
            stage,
            binding_index,
            declarator,
        ),

        Op::ArrayType => {
            // SOA-ize nested types: push a declarator and descend into the
            // element type.
            let element_type = b.module.array_element_type(ty);
            let element_count = b.module.array_element_count(ty);
            let element_layout = match &type_layout.kind {
                TypeLayoutKind::Array { element, .. } => element.clone(),
                _ => panic!("BUG: array varying without an array type layout"),
            };

            let array_declarator = GlobalVaryingDeclarator::Array {
                element_count,
                next: declarator,
            };

            create_glsl_global_varyings_impl(
                ctx,
                b,
                element_type,
                var_layout,
                &element_layout,
                kind,
                stage,
                binding_index,
                Some(&array_declarator),
            )
        }

        Op::StreamOutputType => {
            // A stream legalizes as plain scalarized output of its element.
            let element_type = b.module.operand(ty, 0);
            let element_layout = match &type_layout.kind {
                TypeLayoutKind::Stream { element } => element.clone(),
                _ => panic!("BUG: stream varying without a stream type layout"),
            };

            create_glsl_global_varyings_impl(
                ctx,
                b,
                element_type,
                var_layout,
                &element_layout,
                kind,
                stage,
                binding_index,
                declarator,
            )
        }

        Op::StructType => {
            // Recurse into the individual fields and generate a variable
            // for each.
            let field_layouts = match &type_layout.kind {
                TypeLayoutKind::Struct { fields } => fields.clone(),
                _ => panic!("BUG: struct varying without a struct type layout"),
            };

            // The type the tuple stands in for, outer arrays included.
            let mut full_type = ty;
            let mut dd = declarator;
            while let Some(GlobalVaryingDeclarator::Array { element_count, next }) = dd {
                full_type = b.module.array_type(full_type, *element_count);
                dd = *next;
            }

            let mut elements = Vec::new();
            for (field_index, (key, field_ty)) in
                b.module.struct_fields(ty).into_iter().enumerate()
            {
                let field_layout = &field_layouts[field_index];

                let mut field_binding_index = binding_index;
                if let Some(res) = field_layout.find_resource_info(kind) {
                    field_binding_index += res.index;
                }

                let field_val = create_glsl_global_varyings_impl(
                    ctx,
                    b,
                    field_ty,
                    field_layout,
                    &field_layout.type_layout,
                    kind,
                    stage,
                    field_binding_index,
                    declarator,
                );
                if !matches!(field_val, ScalarizedVal::None) {
                    elements.push(TupleElement {
                        key,
                        val: field_val,
                    });
                }
            }

            ScalarizedVal::Tuple(Rc::new(ScalarizedTupleVal {
                ty: full_type,
                elements,
            }))
        }

        // Resource handles and anything else occupy a single varying slot.
        _ => create_simple_glsl_global_varying(
            ctx,
            b,
            ty,
            var_layout,
            type_layout,
            kind,
            stage,
            binding_index,
            declarator,
        ),
    }
}

fn create_glsl_global_varyings(
    ctx: &mut GlslLegalizationContext,
    b: &mut Builder,
    ty: InstId,
    layout: &Rc<VarLayout>,
    kind: LayoutResourceKind,
    stage: Stage,
) -> ScalarizedVal {
    let binding_index = layout.find_resource_info(kind).map(|r| r.index).unwrap_or(0);
    create_glsl_global_varyings_impl(
        ctx,
        b,
        ty,
        layout,
        &layout.type_layout,
        kind,
        stage,
        binding_index,
        None,
    )
}

// =============================================================================
// Scalarized-value operations
// =============================================================================

/// Descend into the field `field_key` (at position `field_index`) of a
/// scalarized value.
pub fn extract_field(
    b: &mut Builder,
    val: &ScalarizedVal,
    field_index: usize,
    field_key: InstId,
) -> ScalarizedVal {
    match val {
        ScalarizedVal::Value(v) => {
            let base_ty = b.module.full_type(*v);
            let field_ty = b.module.field_type(base_ty, field_key);
            ScalarizedVal::Value(b.emit_field_extract(field_ty, *v, field_key))
        }

        ScalarizedVal::Address(v) => {
            let ptr_ty = b.module.full_type(*v);
            let (ptr_kind, value_ty) = b
                .module
                .ptr_like(ptr_ty)
                .expect("BUG: scalarized address whose IR type is not pointer-like");
            let field_ty = b.module.field_type(value_ty, field_key);
            let field_ptr_ty = b.module.ptr_type_with_kind(ptr_kind, field_ty);
            ScalarizedVal::Address(b.emit_field_address(field_ptr_ty, *v, field_key))
        }

        ScalarizedVal::Tuple(tuple) => {
            let element = &tuple.elements[field_index];
            debug_assert_eq!(element.key, field_key, "tuple element key mismatch");
            element.val.clone()
        }

        // Scalarization reaches leaves before any field extraction happens,
        // so an adapted aggregate here is an upstream bug.
        _ => panic!("BUG: extract_field on an unsupported scalarized value"),
    }
}

fn adapt_type_raw(b: &mut Builder, val: InstId, to_type: InstId) -> ScalarizedVal {
    // A plain constructor-style conversion. GLSL's implicit scalar
    // conversions cover the common cases (signedness, widening); per-case
    // handling of vectors and arrays is a future refinement.
    ScalarizedVal::Value(b.emit_construct(to_type, vec![val]))
}

/// Convert a scalarized value from `from_type` to `to_type`.
pub fn adapt_type(
    b: &mut Builder,
    val: &ScalarizedVal,
    to_type: InstId,
    from_type: InstId,
) -> ScalarizedVal {
    match val {
        ScalarizedVal::Value(v) => adapt_type_raw(b, *v, to_type),
        ScalarizedVal::Address(v) => {
            let loaded = b.emit_load(*v);
            adapt_type_raw(b, loaded, to_type)
        }
        _ => panic!(
            "BUG: adapt_type from {} on a non-leaf scalarized value",
            from_type
        ),
    }
}

/// Store `right` into `left`, descending through tuples and adapters.
pub fn assign(b: &mut Builder, left: &ScalarizedVal, right: &ScalarizedVal) {
    match left {
        ScalarizedVal::Address(left_addr) => match right {
            ScalarizedVal::Value(v) => {
                b.emit_store(*left_addr, *v);
            }
            ScalarizedVal::Address(right_addr) => {
                let loaded = b.emit_load(*right_addr);
                b.emit_store(*left_addr, loaded);
            }
            ScalarizedVal::Tuple(right_tuple) => {
                // Assigning a tuple into a non-tuple destination: go
                // element by element.
                let right_tuple = right_tuple.clone();
                for (index, element) in right_tuple.elements.iter().enumerate() {
                    let left_element = extract_field(b, left, index, element.key);
                    assign(b, &left_element, &element.val);
                }
            }
            _ => panic!("BUG: assign from an unsupported scalarized value"),
        },

        ScalarizedVal::Tuple(left_tuple) => {
            // Assign each constituent field.
            let left_tuple = left_tuple.clone();
            for (index, element) in left_tuple.elements.iter().enumerate() {
                let right_element = extract_field(b, right, index, element.key);
                assign(b, &element.val, &right_element);
            }
        }

        ScalarizedVal::TypeAdapter(adapter) => {
            // Convert to the actual type of the GLSL variable from the
            // type the value pretended to have, then store.
            let adapter = adapter.clone();
            let adapted = adapt_type(b, right, adapter.actual_type, adapter.pretend_type);
            assign(b, &adapter.val, &adapted);
        }

        _ => panic!("BUG: assign into an unsupported scalarized value"),
    }
}

/// Subscript a scalarized value at `index`, producing an element of
/// `element_type`.
pub fn get_subscript_val(
    b: &mut Builder,
    element_type: InstId,
    val: &ScalarizedVal,
    index: InstId,
) -> ScalarizedVal {
    match val {
        ScalarizedVal::Value(v) => {
            ScalarizedVal::Value(b.emit_element_extract(element_type, *v, index))
        }

        ScalarizedVal::Address(v) => {
            let ptr_ty = b.module.ptr_type(element_type);
            ScalarizedVal::Address(b.emit_element_address(ptr_ty, *v, index))
        }

        ScalarizedVal::Tuple(tuple) => {
            // Subscripting a struct-of-arrays tuple yields a tuple of the
            // same shape over the element struct.
            let tuple = tuple.clone();
            let fields = b.module.struct_fields(element_type);
            assert_eq!(
                fields.len(),
                tuple.elements.len(),
                "BUG: tuple shape does not match element struct"
            );

            let mut elements = Vec::with_capacity(fields.len());
            for (element_index, (_, field_ty)) in fields.into_iter().enumerate() {
                let input_element = &tuple.elements[element_index];
                elements.push(TupleElement {
                    key: input_element.key,
                    val: get_subscript_val(b, field_ty, &input_element.val, index),
                });
            }

            ScalarizedVal::Tuple(Rc::new(ScalarizedTupleVal {
                ty: element_type,
                elements,
            }))
        }

        _ => panic!("BUG: get_subscript_val on an unsupported scalarized value"),
    }
}

fn get_subscript_val_at(
    b: &mut Builder,
    element_type: InstId,
    val: &ScalarizedVal,
    index: usize,
) -> ScalarizedVal {
    let int_ty = b.module.int_type();
    let index = b.module.const_int(int_ty, index as i64);
    get_subscript_val(b, element_type, val, index)
}

fn materialize_tuple_value(b: &mut Builder, val: &ScalarizedVal) -> InstId {
    let tuple = match val {
        ScalarizedVal::Tuple(tuple) => tuple.clone(),
        _ => panic!("BUG: materialize_tuple_value on a non-tuple"),
    };

    let ty = tuple.ty;
    if matches!(b.module.op(ty), Op::ArrayType) {
        // The tuple stands in for an array, so the individual elements
        // yield arrays as well: extract a value per array element and
        // rebuild the array.
        let element_type = b.module.array_element_type(ty);
        let count_inst = b.module.array_element_count(ty);
        let element_count = b.module.int_value(count_inst) as usize;

        let mut element_vals = Vec::with_capacity(element_count);
        for index in 0..element_count {
            let element_pseudo_val = get_subscript_val_at(b, element_type, val, index);
            element_vals.push(materialize_value(b, &element_pseudo_val));
        }

        b.emit_make_array(ty, element_vals)
    } else {
        // An aggregate value: materialize the elements and construct it.
        let mut element_vals = Vec::with_capacity(tuple.elements.len());
        for element in &tuple.elements {
            element_vals.push(materialize_value(b, &element.val));
        }
        b.emit_construct(ty, element_vals)
    }
}

/// Turn a scalarized value into a single IR value, loading and rebuilding
/// aggregates as needed.
pub fn materialize_value(b: &mut Builder, val: &ScalarizedVal) -> InstId {
    match val {
        ScalarizedVal::Value(v) => *v,

        ScalarizedVal::Address(v) => b.emit_load(*v),

        ScalarizedVal::Tuple(_) => materialize_tuple_value(b, val),

        ScalarizedVal::TypeAdapter(adapter) => {
            // The value is being read at its pretend type; adapt from the
            // actual storage type first.
            let adapter = adapter.clone();
            let adapted = adapt_type(b, &adapter.val, adapter.pretend_type, adapter.actual_type);
            materialize_value(b, &adapted)
        }

        ScalarizedVal::None => panic!("BUG: materialize_value on an empty scalarized value"),
    }
}

// =============================================================================
// Parameter legalization
// =============================================================================

/// Ray-tracing payload parameters legalize to a single global of the exact
/// parameter type; payload linkage between stages is by type, not by use.
fn legalize_ray_tracing_entry_point_parameter(
    ctx: &mut GlslLegalizationContext,
    b: &mut Builder,
    param: InstId,
    param_layout: Rc<VarLayout>,
) {
    // The parameter might be `in`, `out`, or `in out`; in the latter cases
    // its IR type carries the pointer-like wrapper. Global shader
    // parameters are read-only the same way function parameters are, so a
    // global with exactly the original parameter type does the job.
    let param_type = b.module.full_type(param);
    let global_param = b.module.create_global_param(param_type);
    b.module.add_var_layout_decoration(global_param, param_layout);
    b.module.move_before(global_param, ctx.func);
    b.module.replace_all_uses(param, global_param);

    // It would be an error to eliminate the global even if the entry point
    // never touches it, so record the dependency on the function where
    // dead-code elimination will see it.
    b.module.add_depends_on_decoration(ctx.func, global_param);
}

fn legalize_entry_point_parameter(
    ctx: &mut GlslLegalizationContext,
    b: &mut Builder,
    param: InstId,
    param_layout: &Rc<VarLayout>,
) {
    let stage = ctx.stage;
    let param_type = b.module.full_type(param);

    // Ray-tracing stages keep their payloads packaged as structs, and an
    // `in out` payload is one read/write variable rather than an input
    // set plus an output set.
    if stage.is_ray_tracing() {
        legalize_ray_tracing_entry_point_parameter(ctx, b, param, param_layout.clone());
        return;
    }

    if let Some((ptr_kind, value_type)) = b.module.out_like(param_type) {
        // Geometry output streams don't fit the standard varying model:
        // `TriangleStream<Foo> out` more or less translates into `out Foo`
        // plus scalarization, written at each append call site.
        if matches!(b.module.op(value_type), Op::StreamOutputType) {
            let global_output_val =
                create_glsl_global_varyings(ctx, b, value_type, param_layout, LayoutResourceKind::VaryingOutput, stage);

            // A stream could in principle be passed on to other functions;
            // for now only direct append calls in this entry point are
            // handled. The append operation is recognized through the
            // target-intrinsic definition given to it.
            for block in b.module.blocks_of(ctx.func) {
                for inst in b.module.insts_of(block) {
                    if !matches!(b.module.op(inst), Op::Call) {
                        continue;
                    }

                    // Resolve the callee through `specialize(x, ...)`
                    // wrappers and generic bodies.
                    let mut callee = b.module.operand(inst, 0);
                    loop {
                        match b.module.op(callee) {
                            Op::Specialize => {
                                callee = b.module.operand(callee, 0);
                                continue;
                            }
                            Op::Generic => {
                                if let Some(result) = b.module.find_generic_return_val(callee) {
                                    callee = result;
                                    continue;
                                }
                            }
                            _ => {}
                        }
                        break;
                    }
                    if !matches!(b.module.op(callee), Op::Func) {
                        continue;
                    }

                    let is_append = b
                        .module
                        .find_target_intrinsic(callee, &ctx.session.target_intrinsic_key)
                        .map(|definition| definition == "EmitVertex()")
                        .unwrap_or(false);
                    if !is_append {
                        continue;
                    }

                    // Write the appended vertex value to the scalarized
                    // outputs right before the emit call.
                    b.set_insert_before(inst);
                    let appended = b.module.operand(inst, 2);
                    if !matches!(global_output_val, ScalarizedVal::None) {
                        assign(b, &global_output_val, &ScalarizedVal::Value(appended));
                    }
                }
            }

            // The `EmitVertex` calls still reference the parameter and
            // nothing of the right type exists to stand in for it, so
            // substitute an undefined value the emitter will never print.
            let first_block = b
                .module
                .first_block(ctx.func)
                .expect("BUG: entry point has no blocks");
            match b.module.first_ordinary_inst(first_block) {
                Some(anchor) => b.set_insert_before(anchor),
                None => b.set_insert_at_end_of(first_block),
            }
            let undefined = b.emit_undefined(param_type);
            b.module.replace_all_uses(param, undefined);

            return;
        }

        // The parameter is passed by reference: create a local variable of
        // the pointed-to type to replace it, plus globals for the actual
        // input and/or output.
        let local_variable = b.emit_var(value_type);
        let local_val = ScalarizedVal::Address(local_variable);

        if ptr_kind == PtrKind::InOut {
            // `in out` needs both an input set and an output set of
            // globals; initialize the local from the inputs on entry.
            let global_input_val =
                create_glsl_global_varyings(ctx, b, value_type, param_layout, LayoutResourceKind::VaryingInput, stage);
            if !matches!(global_input_val, ScalarizedVal::None) {
                assign(b, &local_val, &global_input_val);
            }
        }

        // The local variable is itself an address, so uses of the pointer
        // parameter can refer to it directly.
        b.module.replace_all_uses(param, local_variable);

        let global_output_val =
            create_glsl_global_varyings(ctx, b, value_type, param_layout, LayoutResourceKind::VaryingOutput, stage);
        if matches!(global_output_val, ScalarizedVal::None) {
            return;
        }

        // Write the local out at every return site. A nested builder keeps
        // the parameter-initialization insertion point undisturbed.
        for block in b.module.blocks_of(ctx.func) {
            let Some(terminator) = b.module.terminator_of(block) else {
                continue;
            };
            match b.module.op(terminator) {
                Op::ReturnVal | Op::ReturnVoid => {}
                _ => continue,
            }

            let mut terminator_builder = Builder::new(&mut *b.module);
            terminator_builder.set_insert_before(terminator);
            assign(&mut terminator_builder, &global_output_val, &local_val);
        }
    } else {
        // A plain input: create globals for it, materialize them at the
        // start of the function, and use that value everywhere the
        // parameter was used.
        let global_value =
            create_glsl_global_varyings(ctx, b, param_type, param_layout, LayoutResourceKind::VaryingInput, stage);

        if matches!(global_value, ScalarizedVal::None) {
            // Nothing was created (a diagnosed unknown semantic); the uses
            // still have to go away so the parameter list can be deleted.
            let undefined = b.emit_undefined(param_type);
            b.module.replace_all_uses(param, undefined);
            return;
        }

        let materialized = materialize_value(b, &global_value);
        b.module.replace_all_uses(param, materialized);
    }
}

// =============================================================================
// Entry point
// =============================================================================

/// Rewrite an entry point into GLSL shape: varying parameters and the
/// return value become module-scope parameters, and the signature becomes
/// `() -> void`.
///
/// The function must carry an entry-point layout decoration and must have
/// no uses; a function that is simultaneously an ordinary callee and an
/// entry point has to be duplicated by the caller first.
pub fn legalize_entry_point_for_glsl(
    session: &Session,
    module: &mut Module,
    func: InstId,
    sink: &mut DiagnosticSink,
    extension_usage_tracker: &mut ExtensionUsageTracker,
) {
    let entry_point_layout = module
        .find_entry_point_layout(func)
        .expect("BUG: entry point carries no entry-point layout decoration");
    let stage = entry_point_layout.stage;

    // Rewriting the signature would invalidate existing call sites.
    assert_eq!(module.use_count(func), 0, "BUG: entry point still has uses");

    trace!("legalizing entry point {} for {:?}", func, stage);

    let mut ctx = GlslLegalizationContext {
        session,
        stage,
        sink,
        extensions: extension_usage_tracker,
        func,
    };
    let mut builder = Builder::new(module);
    let b = &mut builder;

    // Start with the return value; a `void` result needs no work and, with
    // no parameters either, lets us bail out before touching anything.
    let result_type = b.module.result_type_of_func(func);
    if b.module.is_void(result_type) {
        let param_count = b
            .module
            .first_block(func)
            .map(|block| b.module.params_of(block).len())
            .unwrap_or(0);
        if param_count == 0 {
            // Already legal, at least in terms of signature.
            return;
        }
    } else {
        // The function returns a value: introduce globals to hold it and
        // replace every `return v` with a write plus a `return`.
        let result_global = create_glsl_global_varyings(
            &mut ctx,
            b,
            result_type,
            &entry_point_layout.result,
            LayoutResourceKind::VaryingOutput,
            stage,
        );

        for block in b.module.blocks_of(func) {
            // insts_of is a snapshot, so removing the old return below
            // cannot trip the traversal.
            for inst in b.module.insts_of(block) {
                if !matches!(b.module.op(inst), Op::ReturnVal) {
                    continue;
                }
                let return_value = b.module.operand(inst, 0);

                b.set_insert_at_end_of(block);
                if !matches!(result_global, ScalarizedVal::None) {
                    assign(b, &result_global, &ScalarizedVal::Value(return_value));
                }
                b.emit_return_void();
                b.module.remove_from_parent(inst);
            }
        }
    }

    // Turn the parameters into global variables. Initialization code goes
    // before the first ordinary instruction of the entry block.
    if let Some(first_block) = b.module.first_block(func) {
        match b.module.first_ordinary_inst(first_block) {
            Some(anchor) => b.set_insert_before(anchor),
            None => b.set_insert_at_end_of(first_block),
        }

        for param in b.module.params_of(first_block) {
            // Layout information on entry-point parameters is kept
            // up-to-date by every pass that touches the parameter list.
            let param_layout = b
                .module
                .find_var_layout(param)
                .expect("BUG: entry-point parameter carries no layout decoration");
            legalize_entry_point_parameter(&mut ctx, b, param, &param_layout);
        }

        // All uses of the parameters are gone now, and the entry block is
        // never a branch target, so the parameter list itself can go.
        for param in b.module.params_of(first_block) {
            b.module.remove_from_parent(param);
        }
    }

    // Patch up the type of the entry point: it is `() -> void` now.
    let void_ty = b.module.void_type();
    let void_func_ty = b.module.func_type(void_ty, &[]);
    b.module.set_full_type(func, void_func_ty);
}

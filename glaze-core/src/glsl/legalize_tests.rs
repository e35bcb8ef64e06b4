use std::rc::Rc;

use crate::Session;
use crate::diag::{DiagnosticKind, DiagnosticSink, SourceLoc};
use crate::ir::builder::Builder;
use crate::ir::{Inst, InstId, Module, Op};
use crate::layout::{
    EntryPointLayout, LayoutResourceKind, LayoutRules, Stage, TypeLayout, TypeLayoutKind, VarLayout,
};

use super::ext::{ExtensionUsageTracker, ProfileVersion};
use super::legalize::{ScalarizedVal, assign, legalize_entry_point_for_glsl};

fn run_pass(module: &mut Module, func: InstId) -> (DiagnosticSink, ExtensionUsageTracker) {
    let _ = env_logger::builder().is_test(true).try_init();
    let session = Session::new();
    let mut sink = DiagnosticSink::new();
    let mut tracker = ExtensionUsageTracker::new();
    legalize_entry_point_for_glsl(&session, module, func, &mut sink, &mut tracker);
    (sink, tracker)
}

fn simple_layout() -> Rc<TypeLayout> {
    Rc::new(TypeLayout::simple(LayoutRules::Varying))
}

fn make_var_layout(
    type_layout: Rc<TypeLayout>,
    system_value: Option<&str>,
    resources: &[(LayoutResourceKind, usize)],
) -> Rc<VarLayout> {
    let mut layout = VarLayout::new(type_layout);
    layout.system_value_semantic = system_value.map(|s| s.to_string());
    for &(kind, index) in resources {
        layout.add_resource_info(kind, index);
    }
    Rc::new(layout)
}

fn system_value_layout(semantic: &str) -> Rc<VarLayout> {
    make_var_layout(simple_layout(), Some(semantic), &[])
}

fn location_layout(kind: LayoutResourceKind, index: usize) -> Rc<VarLayout> {
    make_var_layout(simple_layout(), None, &[(kind, index)])
}

fn struct_type_layout(fields: &[Rc<VarLayout>]) -> Rc<TypeLayout> {
    Rc::new(TypeLayout {
        rules: LayoutRules::Varying,
        usages: Vec::new(),
        kind: TypeLayoutKind::Struct {
            fields: fields.to_vec(),
        },
    })
}

fn array_type_layout(element: Rc<TypeLayout>) -> Rc<TypeLayout> {
    Rc::new(TypeLayout {
        rules: LayoutRules::Varying,
        usages: Vec::new(),
        kind: TypeLayoutKind::Array {
            element,
            uniform_stride: 0,
        },
    })
}

fn stream_type_layout(element: Rc<TypeLayout>) -> Rc<TypeLayout> {
    Rc::new(TypeLayout {
        rules: LayoutRules::Varying,
        usages: Vec::new(),
        kind: TypeLayoutKind::Stream { element },
    })
}

/// Create an entry-point function with one block, decorated parameters, and
/// an entry-point layout.
fn entry_point(
    m: &mut Module,
    stage: Stage,
    result_ty: InstId,
    result_layout: Rc<VarLayout>,
    params: &[(InstId, Rc<VarLayout>)],
) -> (InstId, InstId, Vec<InstId>) {
    let param_tys: Vec<InstId> = params.iter().map(|(ty, _)| *ty).collect();
    let func_ty = m.func_type(result_ty, &param_tys);
    let func = m.create_func(func_ty);
    m.add_entry_point_layout_decoration(
        func,
        Rc::new(EntryPointLayout {
            stage,
            params: params.iter().map(|(_, l)| l.clone()).collect(),
            result: result_layout,
        }),
    );
    let block = m.create_block(func);
    let mut param_ids = Vec::new();
    for (ty, layout) in params {
        let param = m.create_param(block, *ty);
        m.add_var_layout_decoration(param, layout.clone());
        param_ids.push(param);
    }
    (func, block, param_ids)
}

fn created_globals(m: &Module) -> Vec<InstId> {
    m.globals()
        .iter()
        .copied()
        .filter(|&g| matches!(m.op(g), Op::GlobalParam))
        .collect()
}

fn assert_nullary_void(m: &Module, func: InstId) {
    let func_ty = m.full_type(func);
    assert!(m.func_type_params(func_ty).is_empty());
    assert!(m.is_void(m.func_type_result(func_ty)));
}

fn find_op(m: &Module, block: InstId, op: Op) -> Option<InstId> {
    m.insts_of(block).into_iter().find(|&i| *m.op(i) == op)
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[test]
fn compute_kernel_with_dispatch_thread_id() {
    let mut m = Module::new();
    let uint_ty = m.uint_type();
    let uint3 = m.vector_type(uint_ty, 3);
    let void_ty = m.void_type();

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Compute,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(uint3, system_value_layout("SV_DispatchThreadID"))],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let local = b.emit_var(uint3);
    b.emit_store(local, params[0]);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert_nullary_void(&m, func);

    let globals = created_globals(&m);
    assert_eq!(globals.len(), 1);
    let global = globals[0];
    // An input varying keeps the plain type; no `out` wrapper.
    assert_eq!(m.full_type(global), uint3);
    assert_eq!(m.find_import(global), Some("gl_GlobalInvocationID"));
    let layout = m.find_var_layout(global).unwrap();
    assert_eq!(
        layout
            .find_resource_info(LayoutResourceKind::VaryingInput)
            .unwrap()
            .index,
        0
    );

    // The declared type matches the built-in's type, so uses of the
    // parameter go straight to the global.
    assert_eq!(m.use_count(params[0]), 0);
    let store = find_op(&m, block, Op::Store).unwrap();
    assert_eq!(m.operand(store, 1), global);
}

#[test]
fn fragment_position_input_and_target_output() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let float4 = m.vector_type(float_ty, 4);

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Fragment,
        float4,
        make_var_layout(
            simple_layout(),
            Some("SV_Target"),
            &[(LayoutResourceKind::VaryingOutput, 0)],
        ),
        &[(float4, system_value_layout("SV_Position"))],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    b.emit_return_val(params[0]);

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert_nullary_void(&m, func);

    let globals = created_globals(&m);
    assert_eq!(globals.len(), 2);

    let out_float4 = m.out_type(float4);
    let output = globals
        .iter()
        .copied()
        .find(|&g| m.full_type(g) == out_float4)
        .unwrap();
    let input = globals
        .iter()
        .copied()
        .find(|&g| m.full_type(g) == float4)
        .unwrap();

    // sv_target is an ordinary location-based output: no import name.
    assert_eq!(m.find_import(output), None);
    let output_layout = m.find_var_layout(output).unwrap();
    assert_eq!(
        output_layout
            .find_resource_info(LayoutResourceKind::VaryingOutput)
            .unwrap()
            .index,
        0
    );

    assert_eq!(m.find_import(input), Some("gl_FragCoord"));

    // `return v` became a store to the output global plus `return`.
    assert!(find_op(&m, block, Op::ReturnVal).is_none());
    let store = find_op(&m, block, Op::Store).unwrap();
    assert_eq!(m.operand(store, 0), output);
    assert_eq!(m.operand(store, 1), input);
    assert_eq!(m.terminator_of(block).map(|t| m.op(t).clone()), Some(Op::ReturnVoid));
}

#[test]
fn geometry_inout_struct_parameter() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let float4 = m.vector_type(float_ty, 4);
    let float2 = m.vector_type(float_ty, 2);
    let void_ty = m.void_type();

    let pos_key = m.struct_key("pos");
    let uv_key = m.struct_key("uv");
    let payload = m.struct_type(&[(pos_key, float4), (uv_key, float2)]);
    let param_ty = m.inout_type(payload);

    let pos_layout = system_value_layout("SV_Position");
    let uv_layout = make_var_layout(
        simple_layout(),
        None,
        &[
            (LayoutResourceKind::VaryingInput, 1),
            (LayoutResourceKind::VaryingOutput, 1),
        ],
    );
    let param_layout = make_var_layout(
        struct_type_layout(&[pos_layout, uv_layout]),
        None,
        &[
            (LayoutResourceKind::VaryingInput, 0),
            (LayoutResourceKind::VaryingOutput, 0),
        ],
    );

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Geometry,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(param_ty, param_layout)],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert_nullary_void(&m, func);
    assert_eq!(m.use_count(params[0]), 0);

    // Two input globals and two output globals, one per leaf per direction.
    let globals = created_globals(&m);
    assert_eq!(globals.len(), 4);

    let inputs: Vec<InstId> = globals
        .iter()
        .copied()
        .filter(|&g| m.out_like(m.full_type(g)).is_none())
        .collect();
    let outputs: Vec<InstId> = globals
        .iter()
        .copied()
        .filter(|&g| m.out_like(m.full_type(g)).is_some())
        .collect();
    assert_eq!(inputs.len(), 2);
    assert_eq!(outputs.len(), 2);

    let pos_in = inputs
        .iter()
        .copied()
        .find(|&g| m.find_import(g).is_some())
        .unwrap();
    let uv_in = inputs
        .iter()
        .copied()
        .find(|&g| m.find_import(g).is_none())
        .unwrap();
    // Geometry-stage position input reads through the gl_in outer array.
    assert_eq!(m.find_import(pos_in), Some("gl_Position"));
    assert_eq!(m.find_glsl_outer_array(pos_in), Some("gl_in"));
    assert_eq!(m.full_type(uv_in), float2);
    assert_eq!(
        m.find_var_layout(uv_in)
            .unwrap()
            .find_resource_info(LayoutResourceKind::VaryingInput)
            .unwrap()
            .index,
        1
    );

    let pos_out = outputs
        .iter()
        .copied()
        .find(|&g| m.find_import(g).is_some())
        .unwrap();
    let uv_out = outputs
        .iter()
        .copied()
        .find(|&g| m.find_import(g).is_none())
        .unwrap();
    assert_eq!(m.find_import(pos_out), Some("gl_Position"));
    assert_eq!(m.find_glsl_outer_array(pos_out), None);
    let out_float2 = m.out_type(float2);
    assert_eq!(m.full_type(uv_out), out_float2);

    // The parameter became a local of the payload type, initialized from
    // the inputs on entry and written to the outputs at the return.
    let insts = m.insts_of(block);
    let local = insts[0];
    assert_eq!(*m.op(local), Op::Var);
    let payload_ptr = m.ptr_type(payload);
    assert_eq!(m.full_type(local), payload_ptr);
    assert!(matches!(m.op(*insts.last().unwrap()), Op::ReturnVoid));
}

#[test]
fn geometry_output_stream_appends() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let float4 = m.vector_type(float_ty, 4);
    let void_ty = m.void_type();

    let pos_key = m.struct_key("pos");
    let vertex = m.struct_type(&[(pos_key, float4)]);
    let stream_ty = m.stream_output_type(vertex);
    let param_ty = m.out_type(stream_ty);

    let pos_layout = location_layout(LayoutResourceKind::VaryingOutput, 0);
    let param_layout = make_var_layout(
        stream_type_layout(struct_type_layout(&[pos_layout])),
        None,
        &[(LayoutResourceKind::VaryingOutput, 0)],
    );

    // The append operation is recognized by its GLSL intrinsic definition.
    let append_ty = m.func_type(void_ty, &[param_ty, vertex]);
    let append_func = m.create_func(append_ty);
    m.add_target_intrinsic_decoration(append_func, "glsl", "EmitVertex()");

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Geometry,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(param_ty, param_layout)],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let vertex_val = b.emit_undefined(vertex);
    let call = b.emit_call(void_ty, append_func, &[params[0], vertex_val]);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert_nullary_void(&m, func);
    assert_eq!(m.use_count(params[0]), 0);

    // One output global per leaf of the vertex type; no local for the
    // stream itself.
    let globals = created_globals(&m);
    assert_eq!(globals.len(), 1);
    let out_float4 = m.out_type(float4);
    assert_eq!(m.full_type(globals[0]), out_float4);
    assert_eq!(m.find_import(globals[0]), None);
    assert!(find_op(&m, block, Op::Var).is_none());

    // The appended value is written to the scalarized output right before
    // the call, and the stream argument is now an undefined value.
    let insts = m.insts_of(block);
    let call_pos = insts.iter().position(|&i| i == call).unwrap();
    let store = find_op(&m, block, Op::Store).unwrap();
    assert!(insts.iter().position(|&i| i == store).unwrap() < call_pos);
    assert_eq!(m.operand(store, 0), globals[0]);

    let extract = find_op(&m, block, Op::FieldExtract).unwrap();
    assert_eq!(m.operand(extract, 0), vertex_val);
    assert_eq!(m.operand(store, 1), extract);

    let stream_arg = m.operand(call, 1);
    assert!(matches!(m.op(stream_arg), Op::Undefined));
    assert_eq!(m.operand(call, 2), vertex_val);
}

#[test]
fn stream_append_through_specialize_and_generic() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let float4 = m.vector_type(float_ty, 4);
    let void_ty = m.void_type();

    let pos_key = m.struct_key("pos");
    let vertex = m.struct_type(&[(pos_key, float4)]);
    let stream_ty = m.stream_output_type(vertex);
    let param_ty = m.out_type(stream_ty);

    let pos_layout = location_layout(LayoutResourceKind::VaryingOutput, 0);
    let param_layout = make_var_layout(
        stream_type_layout(struct_type_layout(&[pos_layout])),
        None,
        &[(LayoutResourceKind::VaryingOutput, 0)],
    );

    let append_ty = m.func_type(void_ty, &[param_ty, vertex]);
    let append_func = m.create_func(append_ty);
    m.add_target_intrinsic_decoration(append_func, "glsl", "EmitVertex()");

    // Wrap the append function in a generic whose body returns it, then in
    // a specialize of that generic; the pass must see through both.
    let generic = m.create_generic();
    let generic_body = m.create_block(generic);
    let specialized = m.alloc(Inst::new(Op::Specialize, Some(append_ty), vec![generic]));

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Geometry,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(param_ty, param_layout)],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(generic_body);
    b.emit_return_val(append_func);
    b.set_insert_at_end_of(block);
    let vertex_val = b.emit_undefined(vertex);
    b.emit_call(void_ty, specialized, &[params[0], vertex_val]);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());

    let globals = created_globals(&m);
    assert_eq!(globals.len(), 1);
    let store = find_op(&m, block, Op::Store).unwrap();
    assert_eq!(m.operand(store, 0), globals[0]);
}

#[test]
fn ray_tracing_payload_parameter() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let float4 = m.vector_type(float_ty, 4);
    let void_ty = m.void_type();

    let color_key = m.struct_key("color");
    let payload = m.struct_type(&[(color_key, float4)]);
    let param_ty = m.inout_type(payload);
    let param_layout = location_layout(LayoutResourceKind::VaryingInput, 0);

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Miss,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(param_ty, param_layout.clone())],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let value = b.emit_undefined(payload);
    b.emit_store(params[0], value);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert_nullary_void(&m, func);

    // Payloads stay packaged: one global with the exact parameter type,
    // `in out` wrapper included, carrying the parameter's own layout.
    let globals = created_globals(&m);
    assert_eq!(globals.len(), 1);
    let global = globals[0];
    assert_eq!(m.full_type(global), param_ty);
    assert!(Rc::ptr_eq(&m.find_var_layout(global).unwrap(), &param_layout));

    // Linkage is by type, so the function must keep the global alive.
    assert_eq!(m.depends_on(func), vec![global]);

    let store = find_op(&m, block, Op::Store).unwrap();
    assert_eq!(m.operand(store, 0), global);
    assert_eq!(m.use_count(params[0]), 0);
}

#[test]
fn unknown_semantic_diagnosed_without_global() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let float2 = m.vector_type(float_ty, 2);
    let void_ty = m.void_type();

    let mut unknown_layout = VarLayout::new(simple_layout());
    unknown_layout.system_value_semantic = Some("SV_NoSuchThing".to_string());
    unknown_layout.loc = SourceLoc(42);
    let unknown_layout = Rc::new(unknown_layout);

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Fragment,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[
            (float_ty, unknown_layout),
            (float2, location_layout(LayoutResourceKind::VaryingInput, 0)),
        ],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let local_a = b.emit_var(float_ty);
    b.emit_store(local_a, params[0]);
    let local_b = b.emit_var(float2);
    b.emit_store(local_b, params[1]);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);

    assert_eq!(sink.len(), 1);
    let diagnostic = &sink.diagnostics()[0];
    assert_eq!(diagnostic.loc, SourceLoc(42));
    assert_eq!(
        diagnostic.kind,
        DiagnosticKind::UnknownSystemValueSemantic("SV_NoSuchThing".to_string())
    );

    // No global for the unknown leaf; the other parameter still legalizes.
    let globals = created_globals(&m);
    assert_eq!(globals.len(), 1);
    assert_eq!(m.full_type(globals[0]), float2);

    assert_nullary_void(&m, func);
    assert_eq!(m.use_count(params[0]), 0);
    assert_eq!(m.use_count(params[1]), 0);

    // Uses of the unbound parameter fall back to an undefined value.
    let store_a = find_op(&m, block, Op::Store).unwrap();
    assert!(matches!(m.op(m.operand(store_a, 1)), Op::Undefined));
}

// =============================================================================
// Type adaptation
// =============================================================================

#[test]
fn vertex_id_type_adapter_conversion() {
    let mut m = Module::new();
    let uint_ty = m.uint_type();
    let int_ty = m.int_type();
    let void_ty = m.void_type();

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Vertex,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(uint_ty, system_value_layout("SV_VertexID"))],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let local = b.emit_var(uint_ty);
    b.emit_store(local, params[0]);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());

    // The global takes the built-in's type, and reads of the parameter go
    // through a conversion back to the declared type.
    let globals = created_globals(&m);
    assert_eq!(globals.len(), 1);
    assert_eq!(m.full_type(globals[0]), int_ty);
    assert_eq!(m.find_import(globals[0]), Some("gl_VertexIndex"));

    let store = find_op(&m, block, Op::Store).unwrap();
    let converted = m.operand(store, 1);
    assert_eq!(*m.op(converted), Op::Construct);
    assert_eq!(m.full_type(converted), uint_ty);
    assert_eq!(m.operand(converted, 0), globals[0]);
}

// =============================================================================
// Scalarization shapes
// =============================================================================

#[test]
fn array_of_struct_scalarizes_per_leaf() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let int_ty = m.int_type();
    let void_ty = m.void_type();

    let a_key = m.struct_key("a");
    let b_key = m.struct_key("b");
    let elem = m.struct_type(&[(a_key, float_ty), (b_key, float_ty)]);
    let two = m.const_int(int_ty, 2);
    let arr_ty = m.array_type(elem, two);

    let a_layout = location_layout(LayoutResourceKind::VaryingInput, 0);
    let b_layout = location_layout(LayoutResourceKind::VaryingInput, 1);
    let param_layout = make_var_layout(
        array_type_layout(struct_type_layout(&[a_layout, b_layout])),
        None,
        &[(LayoutResourceKind::VaryingInput, 3)],
    );

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Vertex,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(arr_ty, param_layout)],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let local = b.emit_var(arr_ty);
    b.emit_store(local, params[0]);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());

    // Struct-of-arrays: one global per leaf, each wrapped in an array of
    // the outer length, with bindings offset from the parameter's base.
    let globals = created_globals(&m);
    assert_eq!(globals.len(), 2);
    let float_arr2 = m.array_type(float_ty, two);
    let mut indices = Vec::new();
    for &g in &globals {
        assert_eq!(m.full_type(g), float_arr2);
        indices.push(
            m.find_var_layout(g)
                .unwrap()
                .find_resource_info(LayoutResourceKind::VaryingInput)
                .unwrap()
                .index,
        );
    }
    assert_eq!(indices, vec![3, 4]);

    // The materialized replacement rebuilds the array-of-structs value.
    let store = find_op(&m, block, Op::Store).unwrap();
    let rebuilt = m.operand(store, 1);
    assert_eq!(*m.op(rebuilt), Op::MakeArray);
    assert_eq!(m.full_type(rebuilt), arr_ty);
    assert_eq!(m.use_count(params[0]), 0);
}

#[test]
fn empty_struct_parameter_creates_no_globals() {
    let mut m = Module::new();
    let void_ty = m.void_type();

    let empty = m.struct_type(&[]);
    let param_layout = make_var_layout(
        struct_type_layout(&[]),
        None,
        &[(LayoutResourceKind::VaryingInput, 0)],
    );

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Vertex,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(empty, param_layout)],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let local = b.emit_var(empty);
    b.emit_store(local, params[0]);
    b.emit_return_void();

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert_nullary_void(&m, func);

    assert!(created_globals(&m).is_empty());

    // The empty tuple still materializes, as an empty constructor.
    let store = find_op(&m, block, Op::Store).unwrap();
    let value = m.operand(store, 1);
    assert_eq!(*m.op(value), Op::Construct);
    assert!(m.operands(value).is_empty());
    assert_eq!(m.use_count(params[0]), 0);
}

#[test]
fn scalar_system_value_return() {
    let mut m = Module::new();
    let float_ty = m.float_type();

    let (func, block, _) = entry_point(
        &mut m,
        Stage::Fragment,
        float_ty,
        system_value_layout("SV_Depth"),
        &[],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let value = b.emit_undefined(float_ty);
    b.emit_return_val(value);

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert_nullary_void(&m, func);

    let globals = created_globals(&m);
    assert_eq!(globals.len(), 1);
    let out_float = m.out_type(float_ty);
    assert_eq!(m.full_type(globals[0]), out_float);
    assert_eq!(m.find_import(globals[0]), Some("gl_FragDepth"));
}

#[test]
fn every_return_site_is_rewritten() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let float4 = m.vector_type(float_ty, 4);

    let (func, block_a, _) = entry_point(
        &mut m,
        Stage::Fragment,
        float4,
        make_var_layout(
            simple_layout(),
            Some("SV_Target"),
            &[(LayoutResourceKind::VaryingOutput, 0)],
        ),
        &[],
    );
    let block_b = m.create_block(func);

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block_a);
    let value_a = b.emit_undefined(float4);
    b.emit_return_val(value_a);
    b.set_insert_at_end_of(block_b);
    let value_b = b.emit_undefined(float4);
    b.emit_return_val(value_b);

    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());

    for block in [block_a, block_b] {
        assert!(find_op(&m, block, Op::ReturnVal).is_none());
        assert!(find_op(&m, block, Op::Store).is_some());
        assert_eq!(
            m.terminator_of(block).map(|t| m.op(t).clone()),
            Some(Op::ReturnVoid)
        );
    }
}

// =============================================================================
// Idempotence
// =============================================================================

#[test]
fn already_legal_entry_point_is_untouched() {
    let mut m = Module::new();
    let void_ty = m.void_type();

    let (func, block, _) = entry_point(
        &mut m,
        Stage::Compute,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    b.emit_return_void();

    let func_ty_before = m.full_type(func);
    let (sink, _) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert!(created_globals(&m).is_empty());
    assert_eq!(m.full_type(func), func_ty_before);
    assert_eq!(m.insts_of(block).len(), 1);
}

#[test]
fn rerunning_on_legalized_output_is_a_no_op() {
    let mut m = Module::new();
    let uint_ty = m.uint_type();
    let uint3 = m.vector_type(uint_ty, 3);
    let void_ty = m.void_type();

    let (func, block, params) = entry_point(
        &mut m,
        Stage::Compute,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(uint3, system_value_layout("SV_DispatchThreadID"))],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let local = b.emit_var(uint3);
    b.emit_store(local, params[0]);
    b.emit_return_void();

    run_pass(&mut m, func);
    let globals_after_first = created_globals(&m).len();
    let insts_after_first = m.insts_of(block).len();

    run_pass(&mut m, func);
    assert_eq!(created_globals(&m).len(), globals_after_first);
    assert_eq!(m.insts_of(block).len(), insts_after_first);
}

// =============================================================================
// Extension and version tracking
// =============================================================================

#[test]
fn cull_distance_requires_extension() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let void_ty = m.void_type();

    let (func, block, _) = entry_point(
        &mut m,
        Stage::Fragment,
        void_ty,
        location_layout(LayoutResourceKind::VaryingOutput, 0),
        &[(float_ty, system_value_layout("SV_CullDistance"))],
    );

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    b.emit_return_void();

    let (sink, tracker) = run_pass(&mut m, func);
    assert!(sink.is_empty());
    assert!(tracker.has_extension("ARB_cull_distance"));
}

#[test]
fn render_target_array_index_version_requirements() {
    // Fragment needs 430; geometry only 150; anything else needs 450 plus
    // the viewport-layer-array extension.
    let cases = [
        (Stage::Fragment, ProfileVersion::Glsl430, false),
        (Stage::Geometry, ProfileVersion::Glsl150, false),
        (Stage::Vertex, ProfileVersion::Glsl450, true),
    ];

    for (stage, expected_version, needs_extension) in cases {
        let mut m = Module::new();
        let int_ty = m.int_type();
        let void_ty = m.void_type();

        let (func, block, _) = entry_point(
            &mut m,
            stage,
            void_ty,
            location_layout(LayoutResourceKind::VaryingOutput, 0),
            &[(int_ty, system_value_layout("SV_RenderTargetArrayIndex"))],
        );

        let mut b = Builder::new(&mut m);
        b.set_insert_at_end_of(block);
        b.emit_return_void();

        let (sink, tracker) = run_pass(&mut m, func);
        assert!(sink.is_empty());
        assert_eq!(tracker.required_version(), Some(expected_version));
        assert_eq!(
            tracker.has_extension("GL_ARB_shader_viewport_layer_array"),
            needs_extension
        );
    }
}

// =============================================================================
// Scalarized-value operations
// =============================================================================

#[test]
fn assign_between_addresses_loads_then_stores() {
    let mut m = Module::new();
    let float_ty = m.float_type();
    let void_ty = m.void_type();
    let func_ty = m.func_type(void_ty, &[]);
    let func = m.create_func(func_ty);
    let block = m.create_block(func);

    let mut b = Builder::new(&mut m);
    b.set_insert_at_end_of(block);
    let dst = b.emit_var(float_ty);
    let src = b.emit_var(float_ty);
    assign(
        &mut b,
        &ScalarizedVal::Address(dst),
        &ScalarizedVal::Address(src),
    );

    let insts = m.insts_of(block);
    assert_eq!(insts.len(), 4);
    let load = insts[2];
    let store = insts[3];
    assert_eq!(*m.op(load), Op::Load);
    assert_eq!(m.operand(load, 0), src);
    assert_eq!(*m.op(store), Op::Store);
    assert_eq!(m.operand(store, 0), dst);
    assert_eq!(m.operand(store, 1), load);
}

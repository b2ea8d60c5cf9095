//! Reflection queries, dropping reflection, and cloning.

use effect_runtime::container::builder::{
    AnnotationSpec, AssignmentSpec, BufferSpec, GroupSpec, ObjectInit, ObjectSpec, PassSpec, TechniqueSpec,
    VariableSpec,
};
use effect_runtime::types::{NumericType, ObjectKind, ScalarKind, ShaderStage};
use effect_runtime::{
    AnnotationOwner, ContainerBuilder, Effect, Error, FormatVersion, LoadOptions, NopBackend, ScalarValue,
};

fn annotated() -> Effect {
    let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
    let float = builder.numeric_type("float", NumericType::scalar(ScalarKind::Float), 0).unwrap();
    let float4 = builder.numeric_type("float4", NumericType::vector(ScalarKind::Float, 4), 0).unwrap();
    let string = builder.object_type("string", ObjectKind::String, 0).unwrap();
    let titles = builder.object_type("string", ObjectKind::String, 2).unwrap();
    let vs = builder.object_type("VertexShader", ObjectKind::VertexShader, 0).unwrap();
    builder.constant_buffer(
        BufferSpec::new("material", 32)
            .tbuffer()
            .bind_point(3)
            .annotation(AnnotationSpec::strings("usage", string.clone(), &["per-draw"]))
            .variable(
                VariableSpec::new("tint", float4, 0)
                    .semantic("COLOR")
                    .default_value(&bytes_of([0.25, 0.5, 0.75, 1.0]))
                    .annotation(AnnotationSpec::numeric("weight", float.clone(), &0.5f32.to_le_bytes())),
            )
            .variable(VariableSpec::new("gloss", float, 16)),
    );
    builder.object_variable(
        ObjectSpec::new("titles", titles)
            .element(ObjectInit::String("first".to_owned()))
            .element(ObjectInit::String("second".to_owned())),
    );
    builder.object_variable(ObjectSpec::new("vs", vs).element(ObjectInit::Shader(Some(b"vs".to_vec()))));
    builder.group(
        GroupSpec::new(Some("main")).technique(
            TechniqueSpec::new("lit")
                .annotation(AnnotationSpec::strings("tags", string, &["opaque"]))
                .pass(PassSpec::new("forward").assign(AssignmentSpec::variable(4, "vs"))),
        ),
    );
    Effect::load(&builder.finish().unwrap(), &LoadOptions::default()).unwrap()
}

fn bytes_of(values: [f32; 4]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[test]
fn reflection_answers_names_and_annotations() {
    let effect = annotated();
    let reflection = effect.reflection().unwrap();
    let tint = effect.variable_by_name("tint").unwrap();
    assert_eq!(reflection.variable_name(tint).unwrap(), "tint");
    assert_eq!(reflection.variable_semantic(tint).unwrap(), Some("COLOR"));
    let ty = reflection.variable_type(tint).unwrap();
    assert_eq!(reflection.resolve(ty.name), Some("float4"));

    let weight = reflection.annotation(AnnotationOwner::Variable(tint), "weight").unwrap().unwrap();
    assert_eq!(weight.name(), "weight");
    assert_eq!(weight.scalars(), Some(vec![ScalarValue::Float(0.5)]));

    let buffer = effect.buffers().get(0).unwrap();
    assert_eq!(reflection.buffer_name(buffer).unwrap(), "material");
    assert!(reflection.is_tbuffer(buffer).unwrap());
    assert_eq!(effect.buffer_bind_point(buffer).unwrap(), Some(3));
    let usage = reflection.annotation(AnnotationOwner::Buffer(buffer), "usage").unwrap().unwrap();
    assert_eq!(usage.strings(), Some(vec!["per-draw"]));

    let group = effect.group_by_name("main").unwrap();
    assert_eq!(reflection.group_name(group).unwrap(), Some("main"));
    let lit = effect.technique_by_name("lit").unwrap();
    assert_eq!(effect.group_techniques(group).unwrap().get(0), Some(lit));
    let tags: Vec<_> = reflection.annotations(AnnotationOwner::Technique(lit)).unwrap().collect();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].strings(), Some(vec!["opaque"]));
    let pass = effect.technique_passes(lit).unwrap().get(0).unwrap();
    assert_eq!(reflection.pass_name(pass).unwrap(), Some("forward"));
}

#[test]
fn string_variables_live_in_reflection() {
    let mut effect = annotated();
    let titles = effect.variable_by_name("titles").unwrap();
    assert_eq!(effect.string_value(titles, 1).unwrap(), "second");
    assert!(effect.string_value(titles, 2).is_err());
    effect.drop_reflection();
    assert!(matches!(effect.string_value(titles, 0), Err(Error::ReflectionUnavailable)));
}

#[test]
fn defaults_are_visible_before_any_write() {
    let effect = annotated();
    let tint = effect.variable_by_name("tint").unwrap();
    assert_eq!(effect.get_raw(tint).unwrap(), bytes_of([0.25, 0.5, 0.75, 1.0]).as_slice());
    assert_eq!(effect.get_float(tint).unwrap(), 0.25);
}

#[test]
fn clones_are_independent() {
    let mut original = annotated();
    let mut backend = NopBackend::new();
    let lit = original.technique_by_name("lit").unwrap();
    assert!(original.prepare_technique(lit, &mut backend).unwrap());
    let gloss = original.variable_by_name("gloss").unwrap();
    original.set_float(gloss, 4.0).unwrap();

    let mut copy = original.try_clone().unwrap();
    assert_eq!(copy.memory_report(), original.memory_report());
    assert_eq!(copy.clock(), original.clock());
    assert_eq!(copy.get_float(gloss).unwrap(), 4.0);

    copy.set_float(gloss, 8.0).unwrap();
    assert_eq!(original.get_float(gloss).unwrap(), 4.0);

    let vs = copy.variable_by_name("vs").unwrap();
    let block = copy.object_block(vs, 0).unwrap();
    assert!(original.block_handle(block).unwrap().is_some());
    assert_eq!(copy.block_handle(block).unwrap(), None);

    let pass = copy.technique_passes(lit).unwrap().get(0).unwrap();
    let state = copy.apply_pass(pass, &mut backend).unwrap();
    assert_eq!(backend.shaders_created(), 2);
    assert_ne!(state.shader(ShaderStage::Vertex), original.block_handle(block).unwrap());
}

#[test]
fn clone_without_reflection_keeps_handles_usable() {
    let mut original = annotated();
    let tint = original.variable_by_name("tint").unwrap();
    original.drop_reflection();
    let mut copy = original.try_clone().unwrap();
    assert!(!copy.has_reflection());
    assert_eq!(copy.memory_report().reflection_bytes, 0);
    copy.set_floats(tint, &[1.0, 0.0, 0.0, 1.0]).unwrap();
    assert_eq!(copy.get_float(tint).unwrap(), 1.0);
    assert_eq!(original.get_float(tint).unwrap(), 0.25);
}

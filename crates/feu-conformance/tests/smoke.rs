//! End-to-end pass over the fixture library through the public facade.

use feu_conformance::fixtures::{FixtureWorld, GeomValue};
use feu_conformance::{
    any_method, write_failure_artifact, ApiConformanceTester, ConformanceError, FailureArtifact,
    FrameCopier, FramelessBuilder, HolderFactory,
};
use feu_model::{DynValue, FrameId, Value};
use feu_random::{DeterministicRng, RandomObjectService};
use std::rc::Rc;

#[test]
fn compliant_library_passes_every_checker() {
    let world = FixtureWorld::new().expect("fixture world");
    let tester = ApiConformanceTester::new(world.context()).with_iterations(2);
    let tokens = world.tokens;

    tester
        .assert_overloading_with_frame_objects(
            tokens.frame_geometry_tools,
            tokens.geometry_tools,
            true,
            1,
            &|signature| signature.name == "dist" || signature.name == "translate",
        )
        .expect("combinatorial overloads");
    tester
        .assert_api_declare_matching_frame_setters(
            tokens.frame_point3d,
            tokens.point3d,
            &any_method,
        )
        .expect("matching-frame setter declarations");
    tester
        .assert_static_methods_check_reference_frame(tokens.frame_geometry_tools, &|signature| {
            signature.name != "validate"
        })
        .expect("static frame invariants");
    tester
        .assert_static_methods_preserve_functionality(
            tokens.frame_geometry_tools,
            tokens.geometry_tools,
            &any_method,
        )
        .expect("static differential equivalence");

    let holder = |rng: &mut DeterministicRng, frame: FrameId| -> Value {
        world.random_holder(rng, frame, tokens.frame_point3d, tokens.point3d, 3)
    };
    let holder: HolderFactory<'_> = &holder;
    tester
        .assert_frame_holder_methods_check_reference_frame(holder, &any_method)
        .expect("holder frame invariants");
    tester
        .assert_set_matching_frame_preserve_functionality(holder, &any_method)
        .expect("setMatchingFrame recipes");
    tester
        .assert_set_including_frame_preserve_functionality(holder, &any_method)
        .expect("setIncludingFrame recipes");

    let copier = |frame: FrameId, frameless: &dyn DynValue| -> Value {
        let coords = frameless
            .as_any()
            .downcast_ref::<GeomValue>()
            .expect("frameless geometry value")
            .coords()
            .to_vec();
        Box::new(GeomValue::framed(
            tokens.frame_point3d,
            tokens.point3d,
            frame,
            coords,
            Rc::clone(&world.tree),
        ))
    };
    let copier: FrameCopier<'_> = &copier;
    let builder = |rng: &mut DeterministicRng| -> Value {
        world
            .random
            .next_instance(rng, FrameId(0), tokens.point3d)
            .expect("Point3D is a supported random type")
    };
    let builder: FramelessBuilder<'_> = &builder;
    tester
        .assert_frame_methods_of_frame_holder_preserve_functionality(copier, builder, &any_method)
        .expect("holder differential equivalence");
}

#[test]
fn broken_library_failures_serialize_to_artifacts() {
    let world = FixtureWorld::new().expect("fixture world");
    let tester = ApiConformanceTester::new(world.context()).with_iterations(2);

    let err = tester
        .assert_static_methods_check_reference_frame(
            world.tokens.broken_frame_geometry_tools,
            &|signature| signature.name == "dist",
        )
        .expect_err("broken dist never compares frames");
    assert!(matches!(err, ConformanceError::MissingFrameMismatch { .. }));

    let artifact = FailureArtifact::from(&err);
    let path = std::env::temp_dir().join("feu-conformance-smoke-artifact.json");
    write_failure_artifact(&path, &artifact).expect("artifact written");
    let raw = std::fs::read_to_string(&path).expect("artifact readable");
    assert!(raw.contains("conformance_missing_frame_mismatch"));
    let _ = std::fs::remove_file(&path);
}

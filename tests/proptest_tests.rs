//! Property-based tests for lib3mf-core
//!
//! These tests use proptest to generate random graphs, keystores and raw
//! input, and verify invariants hold across a wide range of inputs.

use lib3mf_core::parser::{read_keystore, read_model};
use lib3mf_core::writer::write_keystore;
use lib3mf_core::{
    BuildItem, Color, Component, Consumer, EncryptionAlgorithm, Error, KeyStore, Mesh, Model,
    ParserConfig, Transform, Vertex, Warnings,
};
use proptest::prelude::*;

// ============================================================================
// Generators
// ============================================================================

/// Finite coordinates; NaN and infinities are not representable in 3MF
fn coordinate_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        prop::num::f64::NORMAL,
        Just(0.0),
        -1000.0f64..1000.0,
    ]
}

/// Generate a valid Mesh with consistent vertex/triangle references
fn mesh_strategy() -> impl Strategy<Value = Mesh> {
    prop::collection::vec(
        (coordinate_strategy(), coordinate_strategy(), coordinate_strategy()),
        3..40,
    )
    .prop_flat_map(|coords| {
        let count = coords.len() as u32;
        let triangle = (0..count, 0..count, 0..count)
            .prop_filter("triangle must not repeat a vertex", |(a, b, c)| {
                a != b && b != c && a != c
            });
        prop::collection::vec(triangle, 1..30).prop_map(move |triangles| {
            let mut mesh = Mesh::new();
            mesh.vertices = coords.iter().map(|&(x, y, z)| Vertex::new(x, y, z)).collect();
            for (a, b, c) in triangles {
                mesh.add_triangle(a, b, c);
            }
            mesh
        })
    })
}

fn transform_strategy() -> impl Strategy<Value = Transform> {
    prop::array::uniform12(-100.0f64..100.0).prop_map(|v| {
        Transform::from_fields([
            [v[0], v[1], v[2]],
            [v[3], v[4], v[5]],
            [v[6], v[7], v[8]],
            [v[9], v[10], v[11]],
        ])
    })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_mesh_round_trip(meshes in prop::collection::vec(mesh_strategy(), 1..4)) {
        let mut model = Model::new();
        for mesh in meshes {
            let id = model.add_mesh_object(mesh).unwrap();
            model.add_build_item(BuildItem::new(id)).unwrap();
        }

        let xml = model.to_xml().unwrap();
        let (copy, warnings) = Model::from_xml(&xml).unwrap();
        prop_assert!(warnings.is_empty());
        for object in model.objects() {
            prop_assert_eq!(copy.object(object.id()).unwrap(), object);
        }
        prop_assert_eq!(copy.build_items(), model.build_items());
    }

    #[test]
    fn prop_transform_text_round_trip(transform in transform_strategy()) {
        let text = transform.to_string();
        let parsed: Transform = text.parse().unwrap();
        prop_assert_eq!(parsed, transform);
    }

    #[test]
    fn prop_color_hex_round_trip(r: u8, g: u8, b: u8, a: u8) {
        let color = Color::rgba(r, g, b, a);
        prop_assert_eq!(Color::from_hex(&color.to_string()), Some(color));
    }

    /// Random component edits never produce a cycle, and every accepted
    /// graph can be written and read back
    #[test]
    fn prop_component_graph_stays_acyclic(
        edges in prop::collection::vec((0usize..6, 0usize..6), 0..30)
    ) {
        let mut model = Model::new();
        let leaf = {
            let mut mesh = Mesh::new();
            mesh.add_vertex(0.0, 0.0, 0.0);
            mesh.add_vertex(1.0, 0.0, 0.0);
            mesh.add_vertex(0.0, 1.0, 0.0);
            mesh.add_triangle(0, 1, 2);
            model.add_mesh_object(mesh).unwrap()
        };
        let containers: Vec<_> = (0..6).map(|_| model.add_components_object().unwrap()).collect();
        for &container in &containers {
            model.add_component(container, Component::new(leaf)).unwrap();
        }

        for (from, to) in edges {
            let (container, target) = (containers[from], containers[to]);
            match model.add_component(container, Component::new(target)) {
                Ok(()) => {}
                Err(Error::CircularReference { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error {}", other),
            }
        }

        model.validate().unwrap();
        let xml = model.to_xml().unwrap();
        let (copy, _) = Model::from_xml(&xml).unwrap();
        prop_assert_eq!(copy.objects().count(), containers.len() + 1);
    }

    #[test]
    fn prop_keystore_round_trip(
        entries in prop::collection::btree_map(
            "/[A-Za-z0-9]{1,8}/[A-Za-z0-9._]{1,12}",
            (any::<bool>(), prop::collection::vec(any::<u8>(), 1..64)),
            0..6,
        )
    ) {
        let mut keystore = KeyStore::new();
        keystore.add_consumer(Consumer::new("c1").with_key_id("k&1")).unwrap();
        for (path, (compression, cipher)) in &entries {
            let handle = keystore
                .add_resource_data(path, EncryptionAlgorithm::Aes256Gcm, *compression)
                .unwrap();
            keystore
                .add_decrypt_right(&handle, "c1", EncryptionAlgorithm::RsaOaepMgf1p, cipher.clone())
                .unwrap();
        }

        let mut xml = Vec::new();
        write_keystore(&keystore, &mut xml).unwrap();
        let mut copy = KeyStore::new();
        let mut warnings = Warnings::new();
        read_keystore(&xml, &mut copy, &ParserConfig::default(), &mut warnings).unwrap();

        prop_assert!(warnings.is_empty());
        prop_assert_eq!(copy.consumers(), keystore.consumers());
        prop_assert_eq!(copy.resource_data_entries(), keystore.resource_data_entries());
    }

    /// Arbitrary input yields a model or an error, never a panic
    #[test]
    fn prop_reader_does_not_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut warnings = Warnings::new();
        let _ = read_model(&bytes, &ParserConfig::default(), &mut warnings);
        let _ = read_keystore(&bytes, &mut KeyStore::new(), &ParserConfig::default(), &mut warnings);
    }

    /// Mutated but well-formed documents are also handled without panicking
    #[test]
    fn prop_reader_tolerates_attribute_noise(
        id in "[0-9a-z-]{0,4}",
        x in "[0-9eE+.-]{0,6}",
        unit in "[a-z]{0,10}",
    ) {
        let xml = format!(
            r#"<model unit="{}" xmlns="http://schemas.microsoft.com/3dmanufacturing/core/2015/02">
                 <resources><object id="{}"><mesh><vertices>
                   <vertex x="{}" y="0" z="0"/><vertex x="1" y="0" z="0"/><vertex x="0" y="1" z="0"/>
                 </vertices><triangles><triangle v1="0" v2="1" v3="2"/></triangles></mesh></object></resources>
                 <build/></model>"#,
            unit, id, x
        );
        let mut warnings = Warnings::new();
        let _ = read_model(xml.as_bytes(), &ParserConfig::default(), &mut warnings);
    }
}

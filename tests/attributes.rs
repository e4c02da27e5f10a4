use hdf5::{Attribute, Datatype};
use std::sync::atomic::{AtomicU64, Ordering};

fn scratch_path(tag: &str) -> std::path::PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!("hdf5-core-attributes-{}-{}-{}", std::process::id(), tag, n));
    path
}

fn scalar_attribute(name: &str, datatype: Datatype, data: Vec<u8>) -> Attribute {
    Attribute { name: name.to_string(), datatype, dataspace: hdf5::Dataspace::scalar(), data }
}

/// Writes four numeric attributes (i32/i64/f32/f64), then reads them back
/// through the public API, with no external process involved.
#[test]
fn can_parse_attribute() {
    let path = scratch_path("basic");
    let mut file = hdf5::File::create(&path).unwrap();
    let root = file.root();

    root.set_attribute(&mut file, scalar_attribute("i32_attribute", Datatype::fixed(4, true), 12345i32.to_le_bytes().to_vec()))
        .unwrap();
    root.set_attribute(&mut file, scalar_attribute("i64_attribute", Datatype::fixed(8, true), 12345i64.to_le_bytes().to_vec()))
        .unwrap();
    root.set_attribute(
        &mut file,
        scalar_attribute("f32_attribute", Datatype::float(4), 1.2345f32.to_le_bytes().to_vec()),
    )
    .unwrap();
    root.set_attribute(
        &mut file,
        scalar_attribute("f64_attribute", Datatype::float(8), 1.2345f64.to_le_bytes().to_vec()),
    )
    .unwrap();
    file.flush().unwrap();

    let file = hdf5::File::open(&path).unwrap();
    let root = file.root();

    let i32_attr = root.attribute(&file, "i32_attribute").unwrap();
    assert_eq!(i32::from_le_bytes(i32_attr.data.try_into().unwrap()), 12345);

    let i64_attr = root.attribute(&file, "i64_attribute").unwrap();
    assert_eq!(i64::from_le_bytes(i64_attr.data.try_into().unwrap()), 12345);

    let f32_attr = root.attribute(&file, "f32_attribute").unwrap();
    assert_eq!(f32::from_le_bytes(f32_attr.data.try_into().unwrap()), 1.2345f32);

    let f64_attr = root.attribute(&file, "f64_attribute").unwrap();
    assert_eq!(f64::from_le_bytes(f64_attr.data.try_into().unwrap()), 1.2345f64);

    std::fs::remove_file(&path).ok();
}

/// Writing past the compact->dense threshold migrates existing attributes
/// into Fractal-Heap + v2-B-tree storage, transparently to readers.
#[test]
fn attributes_survive_compact_to_dense_transition() {
    let path = scratch_path("dense");
    let mut file = hdf5::File::create(&path).unwrap();
    let root = file.root();

    let threshold = 4u16;
    for i in 0..10i32 {
        root.set_attribute_with_threshold(
            &mut file,
            scalar_attribute(&format!("attr_{}", i), Datatype::fixed(4, true), i.to_le_bytes().to_vec()),
            threshold,
        )
        .unwrap();
    }
    file.flush().unwrap();

    let file = hdf5::File::open(&path).unwrap();
    let root = file.root();
    let attrs = root.attributes(&file).unwrap();
    assert_eq!(attrs.len(), 10);

    for i in 0..10i32 {
        let attr = root.attribute(&file, &format!("attr_{}", i)).unwrap();
        assert_eq!(i32::from_le_bytes(attr.data.clone().try_into().unwrap()), i);
    }

    std::fs::remove_file(&path).ok();
}

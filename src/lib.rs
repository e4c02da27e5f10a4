//! A pure-Rust HDF5 library, built for speed.
//!
//! This library does not intend to support all features of HDF5 either in
//! the library or the specification.

use std::path::Path;

pub mod attribute;
pub mod dataset;
pub mod error;
pub mod filter;
pub mod group;
pub mod index;
pub mod message;
pub mod objheader;
pub mod selection;
pub mod sizes;
pub mod store;
pub mod superblock;

pub use error::{Error, Result};
pub use message::{Attribute, DataLayout, Datatype, DatatypeClass, Dataspace, FillValue, FilterPipeline};
pub use selection::{decode_elements, FromBytes, Hyperslab};
pub use sizes::Sizes;

use store::ByteStore;

/// Convenience function for `File::open`.
pub fn open<P: AsRef<Path>>(path: P) -> Result<File> {
    File::open(path)
}

/// An open HDF5 file: a byte store plus the root group's header address and
/// the file-wide offset/length sizes read from its superblock.
pub struct File {
    store: ByteStore,
    sizes: Sizes,
    root_address: u64,
}

impl File {
    /// Open an existing HDF5 file read-write, parsing its superblock to find
    /// the root group and the file's offset/length sizes.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let store = ByteStore::open(path)?;
        let bytes = store.read(0, store.len() as usize)?.to_vec();
        let (_, superblock) = superblock::parse(&bytes)?;
        let sizes = Sizes { offset_size: superblock.offset_size, length_size: superblock.length_size };
        Ok(File { store, sizes, root_address: superblock.root_group_header_address })
    }

    /// Create a brand-new HDF5 file with an empty root group, always written
    /// in the modern (v2 superblock, 8/8 sizes) representation.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut store = ByteStore::create(path)?;
        let sizes = Sizes::WRITE;

        // The superblock always lives at offset 0; reserve its bytes before
        // anything else is allocated so later addresses never collide with
        // it, then come back and fill in the real addresses once known.
        let placeholder = superblock::encode(sizes.offset_size, sizes.length_size, 0, 0);
        store.allocate(placeholder.len() as u64)?;

        let root_address = group::create_group(&mut store, sizes)?;
        let sb_bytes = superblock::encode(sizes.offset_size, sizes.length_size, store.len(), root_address);
        store.write(0, &sb_bytes)?;

        Ok(File { store, sizes, root_address })
    }

    /// Flush pending writes to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    pub fn sizes(&self) -> Sizes {
        self.sizes
    }

    /// A handle to the root group.
    pub fn root(&self) -> Group {
        Group { address: self.root_address }
    }
}

/// A handle to a group's object header. Cheap to copy; all actual I/O goes
/// through the `File` passed to each method.
#[derive(Debug, Clone, Copy)]
pub struct Group {
    address: u64,
}

impl Group {
    /// Wrap an already-known object header address as a group handle,
    /// e.g. one returned by `list_links`/`resolve`. Does not check the
    /// header actually describes a group rather than a dataset.
    pub fn at(address: u64) -> Group {
        Group { address }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    /// List the links directly inside this group.
    pub fn list_links(&self, file: &File) -> Result<Vec<group::LinkEntry>> {
        let header = objheader::parse(&file.store, self.address, file.sizes)?;
        group::list_links(&file.store, &header, file.sizes)
    }

    /// Resolve an absolute path (from the file root) to an object header
    /// address. Only meaningful when called on `File::root()`, since soft
    /// links always re-resolve against the file's true root.
    pub fn resolve(&self, file: &File, path: &str) -> Result<u64> {
        group::resolve(&file.store, self.address, file.sizes, path)
    }

    /// Create a new empty child group, linked into this one under `name`.
    pub fn create_group(&self, file: &mut File, name: &str) -> Result<Group> {
        let child_address = group::create_group(&mut file.store, file.sizes)?;
        objheader::append_message(
            &mut file.store,
            self.address,
            &objheader::Message::Link(message::Link {
                name: name.to_string(),
                target: message::LinkTarget::Hard { object_address: child_address },
            }),
            objheader::MessageFlags::default_writable(),
            file.sizes,
        )?;
        Ok(Group { address: child_address })
    }

    /// Create a new dataset, linked into this group under `name`.
    pub fn create_dataset(&self, file: &mut File, name: &str, spec: dataset::DatasetSpec) -> Result<Dataset> {
        let address = dataset::create(&mut file.store, file.sizes, spec)?;
        objheader::append_message(
            &mut file.store,
            self.address,
            &objheader::Message::Link(message::Link {
                name: name.to_string(),
                target: message::LinkTarget::Hard { object_address: address },
            }),
            objheader::MessageFlags::default_writable(),
            file.sizes,
        )?;
        Ok(Dataset { address })
    }

    /// Create a hard link at `link_path` (resolved from this group) pointing
    /// at the object already resolvable at `target_path`.
    pub fn create_hard_link(&self, file: &mut File, target_path: &str, link_path: &str) -> Result<()> {
        group::create_hard_link(&mut file.store, self.address, file.sizes, target_path, link_path)
    }

    pub fn attributes(&self, file: &File) -> Result<Vec<Attribute>> {
        let header = objheader::parse(&file.store, self.address, file.sizes)?;
        attribute::list(&file.store, &header)
    }

    pub fn attribute(&self, file: &File, name: &str) -> Result<Attribute> {
        let header = objheader::parse(&file.store, self.address, file.sizes)?;
        attribute::get(&file.store, &header, name)
    }

    pub fn set_attribute(&self, file: &mut File, attr: Attribute) -> Result<()> {
        self.set_attribute_with_threshold(file, attr, attribute::DEFAULT_THRESHOLD)
    }

    /// Same as `set_attribute`, but with an explicit compact->dense
    /// threshold instead of `attribute::DEFAULT_THRESHOLD`.
    pub fn set_attribute_with_threshold(&self, file: &mut File, attr: Attribute, threshold: u16) -> Result<()> {
        attribute::write(&mut file.store, self.address, attr, threshold, file.sizes)
    }

    pub fn delete_attribute(&self, file: &mut File, name: &str) -> Result<()> {
        attribute::delete(&mut file.store, self.address, name, file.sizes)
    }
}

/// A handle to a dataset's object header. Cheap to copy; all actual I/O goes
/// through the `File` passed to each method.
#[derive(Debug, Clone, Copy)]
pub struct Dataset {
    address: u64,
}

impl Dataset {
    /// Wrap an already-known object header address as a dataset handle,
    /// e.g. one returned by `Group::resolve`.
    pub fn at(address: u64) -> Dataset {
        Dataset { address }
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn read_all(&self, file: &File) -> Result<Vec<u8>> {
        dataset::read_all(&file.store, self.address, file.sizes)
    }

    /// Read the whole dataset, decoded into typed elements.
    pub fn read_all_as<T: FromBytes>(&self, file: &File) -> Result<Vec<T>> {
        Ok(decode_elements(&self.read_all(file)?))
    }

    pub fn read_slice(&self, file: &File, start: Vec<u64>, count: Vec<u64>) -> Result<Vec<u8>> {
        dataset::read_slice(&file.store, self.address, file.sizes, start, count)
    }

    pub fn read_hyperslab(&self, file: &File, selection: &Hyperslab) -> Result<Vec<u8>> {
        dataset::read_hyperslab(&file.store, self.address, file.sizes, selection)
    }

    pub fn write_all(&self, file: &mut File, data: &[u8]) -> Result<()> {
        dataset::write_all(&mut file.store, self.address, file.sizes, data)
    }

    pub fn write_hyperslab(&self, file: &mut File, selection: &Hyperslab, data: &[u8]) -> Result<()> {
        dataset::write_hyperslab(&mut file.store, self.address, file.sizes, selection, data)
    }

    pub fn resize(&self, file: &mut File, new_dims: Vec<u64>) -> Result<()> {
        dataset::resize(&mut file.store, self.address, file.sizes, new_dims)
    }

    pub fn attributes(&self, file: &File) -> Result<Vec<Attribute>> {
        let header = objheader::parse(&file.store, self.address, file.sizes)?;
        attribute::list(&file.store, &header)
    }

    pub fn set_attribute(&self, file: &mut File, attr: Attribute) -> Result<()> {
        attribute::write(&mut file.store, self.address, attr, attribute::DEFAULT_THRESHOLD, file.sizes)
    }

    pub fn set_attribute_with_threshold(&self, file: &mut File, attr: Attribute, threshold: u16) -> Result<()> {
        attribute::write(&mut file.store, self.address, attr, threshold, file.sizes)
    }

    /// Iterate the dataset's chunks in row-major scaled-coordinate order,
    /// cancellable via the supplied token. Only valid for chunked datasets.
    pub fn iter_chunks<'a>(
        &self,
        file: &'a File,
        token: dataset::CancellationToken,
    ) -> Result<dataset::ChunkIter<'a>> {
        dataset::iter_chunks(&file.store, self.address, file.sizes, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("hdf5-core-lib-test-{}-{}", std::process::id(), n));
        path
    }

    #[test]
    fn create_then_reopen_preserves_root_and_child_group() {
        let path = scratch_path();
        {
            let mut file = File::create(&path).unwrap();
            let root = file.root();
            root.create_group(&mut file, "measurements").unwrap();
            file.flush().unwrap();
        }

        let file = File::open(&path).unwrap();
        let root = file.root();
        let links = root.list_links(&file).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].name(), "measurements");

        let resolved = root.resolve(&file, "/measurements").unwrap();
        let child = Group { address: resolved };
        assert!(child.list_links(&file).unwrap().is_empty());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn create_dataset_write_then_read_round_trips() {
        let path = scratch_path();
        let mut file = File::create(&path).unwrap();
        let root = file.root();
        let dataset = root
            .create_dataset(
                &mut file,
                "values",
                dataset::DatasetSpec {
                    dataspace: Dataspace { dims: vec![4], max_dims: None },
                    datatype: Datatype::fixed(4, true),
                    layout: dataset::LayoutKind::Contiguous,
                    filters: None,
                    fill_value: None,
                },
            )
            .unwrap();

        let data: Vec<u8> = (0i32..4).flat_map(|v| v.to_le_bytes()).collect();
        dataset.write_all(&mut file, &data).unwrap();
        let back: Vec<i32> = dataset.read_all_as(&file).unwrap();
        assert_eq!(back, vec![0, 1, 2, 3]);

        let resolved = root.resolve(&file, "/values").unwrap();
        assert_eq!(resolved, dataset.address());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn attribute_round_trips_through_group() {
        let path = scratch_path();
        let mut file = File::create(&path).unwrap();
        let root = file.root();
        root.set_attribute(
            &mut file,
            Attribute {
                name: "version".to_string(),
                datatype: Datatype::fixed(4, true),
                dataspace: Dataspace::scalar(),
                data: 3i32.to_le_bytes().to_vec(),
            },
        )
        .unwrap();

        let attr = root.attribute(&file, "version").unwrap();
        assert_eq!(attr.data, 3i32.to_le_bytes().to_vec());

        std::fs::remove_file(&path).ok();
    }
}

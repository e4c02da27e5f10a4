//! Walk a file's root group and print every link, attribute, and (for
//! datasets) the decoded element count it finds, depth-first.

use hdf5::{File, Group};

fn print_group(file: &File, group: Group, depth: usize) -> hdf5::Result<()> {
    let indent = "  ".repeat(depth);
    for attr in group.attributes(file)? {
        println!("{}@{} ({:?}, {} bytes)", indent, attr.name, attr.datatype.class, attr.data.len());
    }
    for link in group.list_links(file)? {
        match link {
            hdf5::group::LinkEntry::Hard { name, address } => {
                println!("{}{} -> 0x{:x}", indent, name, address);
                print_group(file, Group::at(address), depth + 1)?;
            }
            hdf5::group::LinkEntry::Soft { name, path } => {
                println!("{}{} -> (soft link) {}", indent, name, path);
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filename = std::env::args().nth(1).expect("Need a file path to open");
    let file = File::open(&filename)?;
    println!("{}:", filename);
    print_group(&file, file.root(), 0)?;
    Ok(())
}

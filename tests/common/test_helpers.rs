use std::io::Read;
use std::path::Path;

use xml_resolution::ResolverStore;
use xml_resolution::config::StoreConfig;

/// Instance document whose root element names `schemas` as (namespace, location) pairs.
pub fn instance_document(schemas: &[(&str, &str)]) -> String {
    let mut declarations = String::new();
    let mut locations = Vec::new();
    let mut body = String::new();

    for (i, (namespace, location)) in schemas.iter().enumerate() {
        declarations.push_str(&format!(" xmlns:n{}=\"{}\"", i, namespace));
        locations.push(format!("{} {}", namespace, location));
        body.push_str(&format!("  <n{}:item/>\n", i));
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <root xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\"{} xsi:schemaLocation=\"{}\">\n{}</root>\n",
        declarations,
        locations.join(" "),
        body
    )
}

/// Schema for `target_namespace` importing each (namespace, location) pair.
pub fn schema_document(target_namespace: &str, imports: &[(&str, &str)]) -> String {
    let mut text = format!(
        "<?xml version=\"1.0\"?>\n\
         <xs:schema xmlns:xs=\"http://www.w3.org/2001/XMLSchema\" targetNamespace=\"{}\">\n",
        target_namespace
    );
    for (namespace, location) in imports {
        text.push_str(&format!(
            "  <xs:import namespace=\"{}\" schemaLocation=\"{}\"/>\n",
            namespace, location
        ));
    }
    text.push_str("</xs:schema>\n");
    text
}

pub async fn open_store(root: &Path, auto_create: bool) -> ResolverStore {
    let config = StoreConfig {
        data_root: root.to_path_buf(),
        auto_create_collections: auto_create,
        ..Default::default()
    };
    ResolverStore::open(&config).await.unwrap()
}

pub fn cache_entries(store: &ResolverStore) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(store.schemas_dir())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[derive(Debug, Clone, PartialEq)]
pub struct TarEntry {
    pub name: String,
    pub mode: u32,
    pub owner: String,
    pub body: Vec<u8>,
}

/// Read back the entries of a tar stream with an independent tar reader.
pub fn read_tar(bytes: &[u8]) -> Vec<TarEntry> {
    assert_eq!(bytes.len() % 512, 0, "archive is not block aligned");

    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let header = entry.header();
            assert!(header.as_ustar().is_some());
            assert_eq!(header.entry_type(), tar::EntryType::Regular);
            let mode = header.mode().unwrap();
            let owner = header.username().unwrap().unwrap_or_default().to_string();
            let name = String::from_utf8(entry.path_bytes().into_owned()).unwrap();

            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            TarEntry {
                name,
                mode,
                owner,
                body,
            }
        })
        .collect()
}

mod common;

use tempfile::TempDir;
use xml_resolution::record::content_digest;
use xml_resolution::{
    CollectionStatus, FileOwnership, ResolutionError, ResolutionRecord, ResolverOptions,
    ResolverStore,
};

use common::mocks::MockFetcher;
use common::test_helpers::{instance_document, open_store, read_tar, schema_document};

const METS: &str = "http://www.loc.gov/METS/";
const XLINK: &str = "http://www.w3.org/1999/xlink";

fn mets_fetcher() -> MockFetcher {
    let fetcher = MockFetcher::new();
    fetcher.add_schema(
        "http://www.loc.gov/standards/mets/mets.xsd",
        &schema_document(METS, &[(XLINK, "http://www.loc.gov/standards/xlink/xlink.xsd")]),
    );
    fetcher.add_schema(
        "http://www.loc.gov/standards/xlink/xlink.xsd",
        &schema_document(XLINK, &[]),
    );
    fetcher.add_redirect(
        "http://example.org/old/dc.xsd",
        "http://example.org/dc.xsd",
    );
    fetcher.add_schema(
        "http://example.org/dc.xsd",
        &schema_document("http://purl.org/dc/elements/1.1/", &[]),
    );
    fetcher
}

async fn resolve_into(
    store: &ResolverStore,
    fetcher: &MockFetcher,
    collection: &str,
    document: &str,
    uri: &str,
) -> ResolutionRecord {
    let record = store
        .resolve(document.as_bytes(), uri, fetcher, ResolverOptions::default())
        .await
        .unwrap();
    store.save(&record, collection).await.unwrap();
    record
}

#[tokio::test]
async fn test_save_is_idempotent_and_round_trips() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false).await;
    let fetcher = mets_fetcher();
    assert_eq!(
        store.create_collection("E20100921").await.unwrap(),
        CollectionStatus::Created
    );

    let doc = instance_document(&[
        (METS, "http://www.loc.gov/standards/mets/mets.xsd"),
        ("http://ns/missing", "http://example.org/missing.xsd"),
    ]);
    let first = resolve_into(&store, &fetcher, "E20100921", &doc, "file://host/a.xml").await;
    let collection = store.collection("E20100921").await.unwrap();
    let path = collection.path().join(&first.document_digest);
    let saved = std::fs::read_to_string(&path).unwrap();

    store.save(&first, "E20100921").await.unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), saved);
    assert_eq!(collection.document_ids().await.unwrap(), vec![first.document_digest.clone()]);

    let reloaded = collection.resolution(&first.document_digest).await.unwrap();
    assert_eq!(reloaded.schemas, first.schemas);
    assert_eq!(reloaded.document_digest, content_digest(doc.as_bytes()));
    assert_eq!(reloaded.unresolved_namespaces, first.unresolved_namespaces);
    assert_eq!(reloaded.dump(), saved);
}

#[tokio::test]
async fn test_save_into_unknown_collection() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false).await;
    let fetcher = mets_fetcher();
    let doc = instance_document(&[(METS, "http://www.loc.gov/standards/mets/mets.xsd")]);
    let record = store
        .resolve(doc.as_bytes(), "file://host/a.xml", &fetcher, ResolverOptions::default())
        .await
        .unwrap();

    let error = store.save(&record, "nope").await.unwrap_err();
    assert!(matches!(error, ResolutionError::UnknownCollection(_)));
    assert_eq!(error.status_code(), 404);

    let error = store.save(&record, "bad id").await.unwrap_err();
    assert!(matches!(error, ResolutionError::BadCollectionId(_)));
}

#[tokio::test]
async fn test_auto_created_collection_is_listed() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), true).await;
    let fetcher = mets_fetcher();
    let doc = instance_document(&[(METS, "http://www.loc.gov/standards/mets/mets.xsd")]);

    resolve_into(&store, &fetcher, "B", &doc, "file://host/a.xml").await;
    store.create_collection("A").await.unwrap();

    assert_eq!(store.collections().await.unwrap(), vec!["A", "B"]);
    assert_eq!(
        store.create_collection("B").await.unwrap(),
        CollectionStatus::Existed
    );
}

#[tokio::test]
async fn test_manifest_covers_every_resolution() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), true).await;
    let fetcher = mets_fetcher();

    let mets = instance_document(&[(METS, "http://www.loc.gov/standards/mets/mets.xsd")]);
    let dc = instance_document(&[
        ("http://purl.org/dc/elements/1.1/", "http://example.org/old/dc.xsd"),
        ("http://ns/missing", "http://example.org/missing.xsd"),
    ]);
    let first = resolve_into(&store, &fetcher, "C", &mets, "file://host/mets.xml").await;
    let second = resolve_into(&store, &fetcher, "C", &dc, "file://host/dc.xml").await;

    let manifest = store.collection("C").await.unwrap().manifest().await.unwrap();

    assert!(manifest.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(manifest.contains("<resolutions collection=\"C\">"));
    assert_eq!(manifest.matches("<resolution ").count(), 2);
    assert!(manifest.contains(&format!("id=\"{}\"", first.document_digest)));
    assert!(manifest.contains(&format!("id=\"{}\"", second.document_digest)));
    assert!(manifest.contains(
        "status=\"success\" location=\"http://www.loc.gov/standards/xlink/xlink.xsd\""
    ));
    assert!(manifest.contains(
        "status=\"redirect\" location=\"http://example.org/old/dc.xsd\" namespace=\"http://purl.org/dc/elements/1.1/\" actual=\"http://example.org/dc.xsd\""
    ));
    assert!(manifest.contains("status=\"failure\" location=\"http://example.org/missing.xsd\""));
    assert!(manifest.contains("<schema status=\"unresolved\" namespace=\"http://ns/missing\"/>"));
}

#[tokio::test]
async fn test_tar_holds_manifest_and_distinct_schemas() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), true).await;
    let fetcher = mets_fetcher();

    let mets = instance_document(&[(METS, "http://www.loc.gov/standards/mets/mets.xsd")]);
    let both = instance_document(&[
        (METS, "http://www.loc.gov/standards/mets/mets.xsd"),
        ("http://purl.org/dc/elements/1.1/", "http://example.org/old/dc.xsd"),
    ]);
    resolve_into(&store, &fetcher, "T", &mets, "file://host/mets.xml").await;
    resolve_into(&store, &fetcher, "T", &both, "file://host/both.xml").await;

    let collection = store.collection("T").await.unwrap();
    let bytes = collection
        .tar(Vec::new(), &FileOwnership::default())
        .await
        .unwrap();
    let entries = read_tar(&bytes);

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "T/manifest.xml",
            "T/http://example.org/dc.xsd",
            "T/http://www.loc.gov/standards/mets/mets.xsd",
            "T/http://www.loc.gov/standards/xlink/xlink.xsd",
        ]
    );

    assert_eq!(
        String::from_utf8(entries[0].body.clone()).unwrap(),
        collection.manifest().await.unwrap()
    );
    assert_eq!(entries[0].mode, 0o644);
    assert!(entries.iter().all(|e| e.owner == "daitss"));

    let bodies = [
        schema_document("http://purl.org/dc/elements/1.1/", &[]),
        schema_document(METS, &[(XLINK, "http://www.loc.gov/standards/xlink/xlink.xsd")]),
        schema_document(XLINK, &[]),
    ];
    assert_eq!(entries.len(), bodies.len() + 1);
    for (entry, body) in entries[1..].iter().zip(&bodies) {
        assert_eq!(entry.body, body.as_bytes(), "{}", entry.name);
    }
}

#[tokio::test]
async fn test_tar_of_empty_collection_has_only_manifest() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false).await;
    store.create_collection("Empty").await.unwrap();

    let bytes = store
        .collection("Empty")
        .await
        .unwrap()
        .tar(Vec::new(), &FileOwnership::default())
        .await
        .unwrap();
    let entries = read_tar(&bytes);

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "Empty/manifest.xml");
    assert!(
        String::from_utf8_lossy(&entries[0].body).contains("<resolutions collection=\"Empty\">")
    );
}

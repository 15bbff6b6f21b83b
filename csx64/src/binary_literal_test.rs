use super::*;

#[test]
fn first_insert_appends_new_top_level() {
    let mut c = BinaryLiteralCollection::new();
    let (h, reused) = c.add(b"hello");
    assert!(!reused);
    assert_eq!(c.get(h), b"hello");
    assert_eq!(c.top_level().len(), 1);
}

#[test]
fn substring_reuses_existing_top_level() {
    let mut c = BinaryLiteralCollection::new();
    let (h1, _) = c.add(b"hello world");
    let (h2, reused) = c.add(b"world");
    assert!(reused);
    assert_eq!(c.top_level().len(), 1);
    assert_eq!(c.get(h1), b"hello world");
    assert_eq!(c.get(h2), b"world");
}

#[test]
fn superstring_replaces_and_repoints() {
    let mut c = BinaryLiteralCollection::new();
    let (h_small, _) = c.add(b"world");
    let (h_big, _) = c.add(b"hello world");
    assert_eq!(c.top_level().len(), 1);
    assert_eq!(c.get(h_small), b"world");
    assert_eq!(c.get(h_big), b"hello world");
}

#[test]
fn duplicate_refs_collapse() {
    let mut c = BinaryLiteralCollection::new();
    let (h1, _) = c.add(b"same");
    let (h2, _) = c.add(b"same");
    assert_eq!(h1, h2);
    assert_eq!(c.refs().len(), 1);
}

#[test]
fn two_sites_of_the_same_string_share_one_top_level() {
    let mut c = BinaryLiteralCollection::new();
    let (h1, _) = c.add(b"hello");
    let (h2, _) = c.add(b"hello");
    assert_eq!(c.top_level().len(), 1);
    assert_eq!(h1, h2);
}

#[test]
fn collapses_multiple_contained_entries_on_replace() {
    let mut c = BinaryLiteralCollection::new();
    let (ha, _) = c.add(b"ab");
    let (hb, _) = c.add(b"cd");
    let (hbig, _) = c.add(b"xxabxxcdxx");
    assert_eq!(c.top_level().len(), 1);
    assert_eq!(c.get(ha), b"ab");
    assert_eq!(c.get(hb), b"cd");
    assert_eq!(c.get(hbig), b"xxabxxcdxx");
}

#[test]
fn round_trips_through_serialization() {
    let mut c = BinaryLiteralCollection::new();
    c.add(b"hello world");
    c.add(b"world");
    c.add(b"separate");

    let mut buf = Vec::new();
    c.write_to(&mut buf).unwrap();
    let back = BinaryLiteralCollection::read_from(&mut &buf[..]).unwrap();
    assert_eq!(c, back);
}

#[test]
fn merge_preserves_byte_content_under_new_handles() {
    let mut a = BinaryLiteralCollection::new();
    let (ha, _) = a.add(b"foo");

    let mut b = BinaryLiteralCollection::new();
    let (hb, _) = b.add(b"foo");
    b.add(b"bar");

    let map = a.merge(&b);
    assert_eq!(a.get(map[hb]), b.get(hb));
    assert_eq!(a.get(ha), b"foo");
}

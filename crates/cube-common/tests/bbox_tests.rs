//! Tests for BoundingBox operations.

use cube_common::bbox::{BboxParseError, BoundingBox};

// ============================================================================
// Parsing
// ============================================================================

#[test]
fn test_parse_integer() {
    let bbox = BoundingBox::from_string("0,0,100,100").unwrap();
    assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 100.0, 100.0));
}

#[test]
fn test_parse_scientific_notation() {
    let bbox = BoundingBox::from_string("1e-6,2e-6,1e6,2e6").unwrap();
    assert!((bbox.min_x - 1e-6).abs() < 1e-10);
    assert!((bbox.max_y - 2e6).abs() < 0.001);
}

#[test]
fn test_parse_wrong_arity() {
    assert!(matches!(
        BoundingBox::from_string("0,0,1"),
        Err(BboxParseError::InvalidFormat(_))
    ));
}

#[test]
fn test_parse_bad_number() {
    match BoundingBox::from_string("0,0,x,1") {
        Err(BboxParseError::InvalidNumber(n)) => assert_eq!(n, "x"),
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn test_dimensions_and_center() {
    let bbox = BoundingBox::new(-10.0, 20.0, 30.0, 40.0);
    assert_eq!(bbox.width(), 40.0);
    assert_eq!(bbox.height(), 20.0);
    assert_eq!(bbox.center(), (10.0, 30.0));
    assert!(bbox.is_valid());
    assert!(!BoundingBox::new(1.0, 0.0, 0.0, 1.0).is_valid());
}

#[test]
fn test_touching_boxes_do_not_intersect() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
    assert!(!a.intersects(&b));
    assert!(a.intersection(&b).is_none());
}

#[test]
fn test_union_and_expand() {
    let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let b = BoundingBox::new(2.0, -1.0, 3.0, 0.5);
    assert_eq!(a.union(&b), BoundingBox::new(0.0, -1.0, 3.0, 1.0));
    assert_eq!(a.expand(0.5, 1.0), BoundingBox::new(-0.5, -1.0, 1.5, 2.0));
}

#[test]
fn test_contains_point_edges() {
    let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    assert!(bbox.contains_point(0.0, 10.0));
    assert!(!bbox.contains_point(10.1, 5.0));
}

#[test]
fn test_approx_eq() {
    let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let b = BoundingBox::new(1e-12, 0.0, 1.0, 1.0 - 1e-12);
    assert!(a.approx_eq(&b, 1e-9));
    assert!(!a.approx_eq(&BoundingBox::new(0.1, 0.0, 1.0, 1.0), 1e-9));
}

//! Conversion rules between host values and Python objects.

use num_bigint::BigInt;
use pretty_assertions::assert_eq;
use pybridge::{
    BridgeError, ForeignKind, ForeignType, Handle, HostValue, MAX_NESTING_DEPTH, MAX_SAFE_INTEGER, MIN_SAFE_INTEGER,
};

fn round_trip(value: HostValue) -> HostValue {
    Handle::from_host(&value).unwrap().to_host().unwrap()
}

fn py(code: &str) -> Handle {
    pybridge::eval(code, None, None).unwrap()
}

// === host -> python ===

#[test]
fn integral_numbers_become_int() {
    let handle = Handle::from_host(&HostValue::from(42)).unwrap();
    assert_eq!(handle.kind(), ForeignKind::Int);
    assert_eq!(handle.type_name(), "int");
}

#[test]
fn fractional_numbers_become_float() {
    let handle = Handle::from_host(&HostValue::from(2.5)).unwrap();
    assert_eq!(handle.kind(), ForeignKind::Float);
    assert_eq!(handle.repr().unwrap(), "2.5");
}

#[test]
fn non_finite_numbers_become_float() {
    let handle = Handle::from_host(&HostValue::Number(f64::INFINITY)).unwrap();
    assert_eq!(handle.repr().unwrap(), "inf");
    let handle = Handle::from_host(&HostValue::Number(f64::NAN)).unwrap();
    assert_eq!(handle.repr().unwrap(), "nan");
}

#[test]
fn arrays_become_lists_and_objects_dicts() {
    let value: HostValue = [
        ("items", HostValue::from(vec![1, 2, 3])),
        ("name", HostValue::from("x")),
    ]
    .into_iter()
    .collect();
    let handle = Handle::from_host(&value).unwrap();
    assert_eq!(handle.kind(), ForeignKind::Dict);
    assert_eq!(handle.item("items").unwrap().kind(), ForeignKind::List);
    assert_eq!(handle.repr().unwrap(), "{'items': [1, 2, 3], 'name': 'x'}");
}

#[test]
fn bytes_become_bytearray_copy() {
    let handle = Handle::from_host(&HostValue::Bytes(vec![1, 2, 3])).unwrap();
    assert_eq!(handle.type_name(), "bytearray");
    assert_eq!(handle.kind(), ForeignKind::Buffer);
}

// === python -> host ===

#[test]
fn primitives_round_trip() {
    for value in [
        HostValue::None,
        HostValue::Bool(true),
        HostValue::Bool(false),
        HostValue::from(0),
        HostValue::from(-7),
        HostValue::from(1.25),
        HostValue::from("héllo"),
        HostValue::from(""),
    ] {
        assert_eq!(round_trip(value.clone()), value);
    }
}

#[test]
fn nested_containers_round_trip() {
    let value: HostValue = [
        ("list", HostValue::from(vec![HostValue::from(1), HostValue::None, HostValue::from("a")])),
        ("nested", [("deep", HostValue::from(vec![true, false]))].into_iter().collect()),
    ]
    .into_iter()
    .collect();
    assert_eq!(round_trip(value.clone()), value);
}

#[test]
fn safe_integer_boundaries_stay_numbers() {
    assert_eq!(
        py("2**53 - 1").to_host().unwrap(),
        HostValue::Number(MAX_SAFE_INTEGER as f64)
    );
    assert_eq!(
        py("-(2**53 - 1)").to_host().unwrap(),
        HostValue::Number(MIN_SAFE_INTEGER as f64)
    );
}

#[test]
fn integers_beyond_safe_range_become_bigints() {
    assert_eq!(
        py("2**53").to_host().unwrap(),
        HostValue::BigInt(BigInt::from(9_007_199_254_740_992_i64))
    );
    assert_eq!(
        py("-(2**53)").to_host().unwrap(),
        HostValue::BigInt(BigInt::from(-9_007_199_254_740_992_i64))
    );
}

#[test]
fn bigints_round_trip_exactly() {
    let huge: BigInt = "123456789012345678901234567890".parse().unwrap();
    let handle = Handle::from_host(&HostValue::BigInt(huge.clone())).unwrap();
    assert_eq!(handle.str().unwrap(), "123456789012345678901234567890");
    assert_eq!(handle.to_host().unwrap(), HostValue::BigInt(huge));
}

#[test]
fn tuples_convert_to_arrays() {
    let handle = py("(1, 'two', 3.5)");
    assert_eq!(handle.kind(), ForeignKind::Tuple);
    assert_eq!(
        handle.to_host().unwrap(),
        HostValue::from(vec![HostValue::from(1), HostValue::from("two"), HostValue::from(3.5)])
    );
}

#[test]
fn dict_keys_are_stringified() {
    let value = py("{1: 'a', (2, 3): 'b'}").to_host().unwrap();
    assert_eq!(value.get("1"), Some(&HostValue::from("a")));
    assert_eq!(value.get("(2, 3)"), Some(&HostValue::from("b")));
}

#[test]
fn buffers_convert_to_byte_copies() {
    assert_eq!(py("b'abc'").to_host().unwrap(), HostValue::Bytes(b"abc".to_vec()));
    assert_eq!(
        py("bytearray([0, 255])").to_host().unwrap(),
        HostValue::Bytes(vec![0, 255])
    );
}

#[test]
fn unconvertible_objects_stay_handles() {
    let value = py("{1, 2, 3}").to_host().unwrap();
    let handle = value.as_handle().unwrap();
    assert_eq!(handle.type_name(), "set");
    assert_eq!(handle.kind(), ForeignKind::Opaque);
}

#[test]
fn callables_become_functions() {
    let value = py("len").to_host().unwrap();
    let function = value.as_function().unwrap();
    let result = function.invoke(&[HostValue::from(vec![1, 2, 3])]).unwrap();
    assert_eq!(result.to_host().unwrap(), HostValue::from(3));
}

#[test]
fn modules_expand_one_level() {
    let math = pybridge::import("math").unwrap().to_host().unwrap();
    assert_eq!(math.get("pi"), Some(&HostValue::Number(std::f64::consts::PI)));
    assert!(math.get("sqrt").unwrap().as_function().is_some());

    let os = pybridge::import("os").unwrap().to_host().unwrap();
    let path = os.get("path").unwrap();
    assert!(matches!(path, HostValue::Handle(_)));
    assert_eq!(path.as_handle().unwrap().kind(), ForeignKind::Module);
}

#[test]
fn self_referencing_list_converts() {
    let handle = py("(lambda l: (l.append(l), l)[1])([1])");
    let value = handle.to_host().unwrap();
    let items = value.as_array().unwrap();
    assert_eq!(items[0], HostValue::from(1));
    assert_eq!(items[1].as_handle(), Some(&handle));
}

#[test]
fn deeply_nested_lists_stop_at_the_depth_limit() {
    let handle = py("__import__('functools').reduce(lambda a, _: [a], range(10_000), [])");
    let value = handle.to_host().unwrap();

    let mut level = &value;
    for _ in 0..MAX_NESTING_DEPTH {
        level = &level.as_array().unwrap()[0];
    }
    let rest = level.as_handle().unwrap();
    assert_eq!(rest.kind(), ForeignKind::List);
    assert_eq!(rest.length().unwrap(), Some(1));

    // the unconverted remainder passes back through as the same object
    let rebuilt = Handle::from_host(&value).unwrap();
    assert_eq!(rebuilt.kind(), ForeignKind::List);
}

#[test]
fn deeply_nested_host_values_are_rejected() {
    let mut value = HostValue::None;
    for _ in 0..MAX_NESTING_DEPTH + 5 {
        value = HostValue::from(vec![value]);
    }
    let err = Handle::from_host(&value).unwrap_err();
    assert!(matches!(err, BridgeError::TypeConversion { .. }), "{err:?}");
}

// === explicit constructors ===

#[test]
fn int_truncates_toward_zero() {
    assert_eq!(Handle::int(3.9).unwrap().to_host().unwrap(), HostValue::from(3));
    assert_eq!(Handle::int(-3.9).unwrap().to_host().unwrap(), HostValue::from(-3));
    assert_eq!(Handle::int(2.0).unwrap().type_name(), "int");
}

#[test]
fn float_from_integral_number_is_float() {
    let handle = Handle::float(2).unwrap();
    assert_eq!(handle.kind(), ForeignKind::Float);
    assert_eq!(handle.repr().unwrap(), "2.0");
}

#[test]
fn tuple_and_list_constructors() {
    let tuple = Handle::tuple(vec![1, 2]).unwrap();
    assert_eq!(tuple.kind(), ForeignKind::Tuple);
    assert_eq!(tuple.repr().unwrap(), "(1, 2)");
    let list = Handle::list(vec![1, 2]).unwrap();
    assert_eq!(list.kind(), ForeignKind::List);
}

#[test]
fn typed_constructors_reject_mismatched_input() {
    for result in [
        Handle::int("12"),
        Handle::float("1.5"),
        Handle::string(12),
        Handle::dict(vec![1]),
        Handle::list("abc"),
        Handle::int(f64::INFINITY),
    ] {
        assert!(
            matches!(result, Err(BridgeError::TypeConversion { .. })),
            "expected conversion error, got {result:?}"
        );
    }
}

#[test]
fn slice_needs_three_bounds() {
    let bounds = HostValue::from(vec![1, 2]);
    let err = Handle::from_host_as(&bounds, ForeignType::Slice).unwrap_err();
    assert!(matches!(err, BridgeError::TypeConversion { .. }), "{err:?}");
}

#[test]
fn slice_indexes_lists() {
    let list = Handle::list(vec![0, 1, 2, 3, 4, 5]).unwrap();
    let slice = Handle::slice(1, HostValue::None, 2).unwrap();
    assert_eq!(slice.type_name(), "slice");
    assert_eq!(
        list.item(slice).unwrap().to_host().unwrap(),
        HostValue::from(vec![1, 3, 5])
    );
}

#[test]
fn handles_pass_through_typed_constructors() {
    let original = py("[1, 2]");
    let again = Handle::tuple(original.clone()).unwrap();
    assert_eq!(again, original);
}

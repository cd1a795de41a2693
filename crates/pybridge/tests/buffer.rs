//! Copy and pinned transfer of byte buffers.

use pretty_assertions::assert_eq;
use pybridge::{
    BridgeError, ForeignKind, Handle, HostValue, SharedBuffer, unwrap_to_buffer, wrap_as_bytearray, wrap_as_bytes,
    wrap_as_memoryview,
};

fn run(code: &str, name: &str, value: &Handle) -> Handle {
    let globals: HostValue = [(name, value.clone())].into_iter().collect();
    pybridge::eval(code, Some(&globals), None).unwrap()
}

#[test]
fn copies_do_not_share_memory() {
    let data = [1u8, 2, 3];
    let copy = wrap_as_bytearray(&data).unwrap();
    run("b.__setitem__(0, 99)", "b", &copy);
    assert_eq!(unwrap_to_buffer(&copy).unwrap(), vec![99, 2, 3]);
    assert_eq!(data, [1, 2, 3]);
}

#[test]
fn host_writes_after_copying_stay_on_the_host() {
    let buffer = SharedBuffer::from(vec![1u8, 2, 3]);
    let copy = wrap_as_bytearray(&buffer.read()).unwrap();
    buffer.write(0, &[9, 9, 9]);
    assert_eq!(unwrap_to_buffer(&copy).unwrap(), vec![1, 2, 3]);
    assert_eq!(buffer.read(), vec![9, 9, 9]);
}

#[test]
fn bytes_copy_is_immutable_bytes() {
    let bytes = wrap_as_bytes(b"xyz").unwrap();
    assert_eq!(bytes.type_name(), "bytes");
    assert_eq!(bytes.kind(), ForeignKind::Buffer);
    assert_eq!(bytes.to_host().unwrap(), HostValue::Bytes(b"xyz".to_vec()));
}

#[test]
fn pinned_view_shares_memory_both_ways() {
    let buffer = SharedBuffer::from(vec![0u8; 4]);
    let view = wrap_as_memoryview(&buffer).unwrap();
    assert_eq!(view.type_name(), "memoryview");
    assert_eq!(view.length().unwrap(), Some(4));

    run("v.__setitem__(1, 42)", "v", &view);
    assert_eq!(buffer.read(), vec![0, 42, 0, 0]);

    buffer.write(2, &[7, 8]);
    assert_eq!(unwrap_to_buffer(&view).unwrap(), vec![0, 42, 7, 8]);
}

#[test]
fn pinned_view_keeps_the_block_alive() {
    let buffer = SharedBuffer::new(8);
    assert_eq!(buffer.keep_alive_count(), 1);

    let view = Handle::memoryview(&buffer).unwrap();
    assert_eq!(buffer.keep_alive_count(), 2);

    let slice = run("v[2:6]", "v", &view);
    drop(view);
    // the slice still references the exporter
    assert_eq!(buffer.keep_alive_count(), 2);
    assert_eq!(slice.length().unwrap(), Some(4));

    drop(slice);
    assert_eq!(buffer.keep_alive_count(), 1);
}

#[test]
fn host_clones_count_as_keep_alives() {
    let buffer = SharedBuffer::new(2);
    let clone = buffer.clone();
    assert_eq!(buffer.keep_alive_count(), 2);
    drop(clone);
    assert_eq!(buffer.keep_alive_count(), 1);
    assert!(!buffer.is_empty());
    assert_eq!(buffer.len(), 2);
}

#[test]
fn unwrap_rejects_non_buffers() {
    let text = Handle::string("not bytes").unwrap();
    let err = unwrap_to_buffer(&text).unwrap_err();
    assert!(matches!(err, BridgeError::TypeConversion { .. }), "{err:?}");
}

#[test]
#[should_panic(expected = "range end index")]
fn write_past_the_end_panics() {
    SharedBuffer::new(2).write(1, &[1, 2]);
}

#[test]
fn checked_write_rejects_out_of_range() {
    let buffer = SharedBuffer::new(2);
    for (offset, data) in [(1, &[1u8, 2][..]), (3, &[][..]), (usize::MAX, &[1][..])] {
        let err = buffer.try_write(offset, data).unwrap_err();
        assert!(matches!(err, BridgeError::TypeConversion { .. }), "{err:?}");
    }
    assert_eq!(buffer.read(), vec![0, 0]);

    buffer.try_write(1, &[5]).unwrap();
    assert_eq!(buffer.read(), vec![0, 5]);
}

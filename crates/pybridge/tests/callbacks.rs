//! Host closures called from Python, including calls back into Python.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use pretty_assertions::assert_eq;
use pybridge::{BridgeError, ForeignErrorKind, Handle, HostCallback, HostValue};

fn call_with_callback(code: &str, callback: HostCallback) -> pybridge::Result<Handle> {
    let globals: HostValue = [("cb", callback)].into_iter().collect();
    pybridge::eval(code, Some(&globals), None)
}

#[test]
fn python_calls_host_closure() {
    let double = HostCallback::new("double", |args, _| {
        let n = args.first().and_then(HostValue::as_f64).unwrap_or_default();
        Ok(HostValue::from(n * 2.0))
    });
    let result = call_with_callback("list(map(cb, [1, 2, 3]))", double).unwrap();
    assert_eq!(result.to_host().unwrap(), HostValue::from(vec![2, 4, 6]));
}

#[test]
fn keyword_arguments_arrive_separately() {
    let echo = HostCallback::new("echo", |args, kwargs| {
        Ok([
            ("positional", HostValue::Array(args)),
            ("keywords", HostValue::Object(kwargs)),
        ]
        .into_iter()
        .collect())
    });
    let result = call_with_callback("cb(1, 'a', flag=True)", echo).unwrap();
    let value = result.to_host().unwrap();
    assert_eq!(
        value.get("positional"),
        Some(&HostValue::from(vec![HostValue::from(1), HostValue::from("a")]))
    );
    assert_eq!(value.get("keywords").unwrap().get("flag"), Some(&HostValue::Bool(true)));
}

#[test]
fn callbacks_can_reenter_python() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let dumps = HostCallback::new("dumps", move |args, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        let json = pybridge::import("json")?;
        json.get("dumps")?.call(&args)?.to_host()
    });
    let result = call_with_callback("cb([1, None]) + '!'", dumps).unwrap();
    assert_eq!(result.to_host().unwrap(), HostValue::from("[1, null]!"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn foreign_errors_from_callbacks_are_reraised_unchanged() {
    let parse = HostCallback::new("parse", |args, _| {
        let json = pybridge::import("json")?;
        json.get("loads")?.call(&args)?.to_host()
    });
    let err = call_with_callback("cb('{broken')", parse).unwrap_err();
    let foreign = err.as_foreign().unwrap();
    assert_eq!(foreign.exc_type, "json.decoder.JSONDecodeError");
    assert_eq!(foreign.kind, ForeignErrorKind::Value);
}

#[test]
fn conversion_errors_become_type_errors() {
    let failing = HostCallback::new("failing", |_, _| Err(Handle::int("nope").unwrap_err()));
    let err = call_with_callback("cb()", failing).unwrap_err();
    let foreign = err.as_foreign().unwrap();
    assert_eq!(foreign.exc_type, "TypeError");
    assert_eq!(foreign.kind, ForeignErrorKind::Type);
}

#[test]
fn python_can_catch_host_errors() {
    let failing = HostCallback::new("failing", |_, _| {
        Err(BridgeError::TypeConversion {
            message: "bad input".to_owned(),
        })
    });
    let namespace = Handle::dict(HostValue::Object(pybridge::HostMap::new())).unwrap();
    let globals: HostValue = [
        ("ns", HostValue::from(namespace)),
        ("cb", HostValue::from(failing)),
    ]
    .into_iter()
    .collect();
    let code = r#"exec("def guard(f):\n    try:\n        return f()\n    except TypeError as e:\n        return 'caught: ' + str(e)\n", ns) or ns['guard'](cb)"#;
    let result = pybridge::eval(code, Some(&globals), None).unwrap();
    assert_eq!(result.to_host().unwrap(), HostValue::from("caught: bad input"));
}

#[test]
fn callbacks_survive_in_python_after_the_host_drops_them() {
    let greet = HostCallback::new("greet", |args, _| {
        let name = args.first().and_then(HostValue::as_str).unwrap_or("world").to_owned();
        Ok(HostValue::from(format!("hello {name}")))
    });
    let function = Handle::from_host(&HostValue::from(greet)).unwrap();
    assert!(function.callable());
    assert_eq!(
        function.call(&[HostValue::from("bridge")]).unwrap().to_host().unwrap(),
        HostValue::from("hello bridge")
    );
}

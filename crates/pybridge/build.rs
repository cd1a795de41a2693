//! Records the Python library pybridge is built against so `version()` can report it at runtime.

fn main() {
    let config = pyo3_build_config::get();

    println!("cargo:rustc-env=PYBRIDGE_PY_MAJOR={}", config.version.major);
    println!("cargo:rustc-env=PYBRIDGE_PY_MINOR={}", config.version.minor);
    println!("cargo:rustc-env=PYBRIDGE_PY_IMPLEMENTATION={}", config.implementation);
    println!("cargo:rustc-env=PYBRIDGE_PY_SHARED={}", config.shared);
    println!("cargo:rustc-env=PYBRIDGE_PY_ABI3={}", config.abi3);
    println!("cargo:rerun-if-env-changed=PYO3_PYTHON");
}

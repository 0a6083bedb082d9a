use std::fs;
use std::path::PathBuf;

fn main() {
    let manifest_dir = PathBuf::from(
        std::env::var("CARGO_MANIFEST_DIR").expect("cargo sets CARGO_MANIFEST_DIR for inkly-app"),
    );
    let version_path = manifest_dir
        .ancestors()
        .nth(2)
        .expect("inkly-app lives at <workspace>/crates/inkly-app")
        .join("VERSION");

    println!("cargo:rerun-if-changed={}", version_path.display());

    let raw_version = fs::read_to_string(&version_path)
        .unwrap_or_else(|error| panic!("cannot read {}: {error}", version_path.display()));
    let version = raw_version.trim();
    assert!(
        !version.is_empty(),
        "{} is empty; the inkly CLI needs a version string",
        version_path.display()
    );

    println!("cargo:rustc-env=INKLY_VERSION={version}");
}

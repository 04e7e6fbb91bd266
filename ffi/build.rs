use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap_or_else(|_| ".".to_string()));

    println!("cargo:rerun-if-changed=src/lib.rs");

    let result = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("HTTPBRIDGE_H")
        .with_parse_deps(true)
        .with_parse_include(&["httpbridge-core"])
        .generate();

    match result {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("httpbridge.h"));
        }
        Err(e) => println!("cargo:warning=cbindgen failed: {e}"),
    }
}

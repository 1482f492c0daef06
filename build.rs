fn main() {
    // Set the path to libtorch
    let libtorch_path = std::env::var("LIBTORCH").unwrap_or_else(|_| {
        let path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("libtorch");
        path.to_string_lossy().into_owned()
    });

    println!("cargo:rerun-if-env-changed=LIBTORCH");
    println!("cargo:rustc-link-search=native={}/lib", libtorch_path);
    println!("cargo:rustc-link-lib=dylib=torch");
    println!("cargo:rustc-link-lib=dylib=c10");
}

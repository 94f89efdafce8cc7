/// Builds the gRPC client and server code for `labelstore.proto` using
/// `tonic-prost-build`.
///
/// # Byte Field Optimization
///
/// The `data` field of `WriteRequest` carries raw label bytes and is marked
/// with `.bytes(...)` so it decodes into `bytes::Bytes` instead of `Vec<u8>`.
/// Write buffers can be many megabytes, and the service hands them straight to
/// the session's write buffer without another copy.
///
/// # Files and Paths
///
/// - Proto file: `proto/labelstore.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/labelstore_descriptor.bin` (used by the
///   reflection service)
///
/// # Panics
///
/// Panics if code generation fails, which aborts the build.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("labelstore_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".labelstore.WriteRequest.data"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/labelstore.proto"], &["proto"])
        .unwrap();

    println!("cargo:rerun-if-changed=proto/labelstore.proto");
}

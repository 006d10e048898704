/// Builds the gRPC client and server code for the `order_management.proto`
/// definition using `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`. A serialized file descriptor set is written next to them
/// so the server can expose gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/order_management.proto`
/// - Includes: `proto/`
/// - Descriptor: `$OUT_DIR/order_management_descriptor.bin`
///
/// # Output
///
/// Generated code will be accessible in Rust via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("ecommerce");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("order_management_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/order_management.proto"],
        &["proto"],
    )?;

    println!("cargo:rerun-if-changed=proto/order_management.proto");
    Ok(())
}

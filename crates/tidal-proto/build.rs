// ABOUTME: Build script for generating Rust code from the streaming protos.
// ABOUTME: Both wires share a package name, so each compiles into its own out dir.

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the bundled protoc unless the host provides one
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    for (wire, proto, include) in [
        ("envelope", "proto/streaming.proto", "proto"),
        ("framed", "proto/framed/streaming.proto", "proto/framed"),
    ] {
        let dir = out_dir.join(wire);
        std::fs::create_dir_all(&dir)?;
        tonic_build::configure()
            .build_server(false)
            .build_client(true)
            .out_dir(&dir)
            .compile_protos(&[proto], &[include])?;

        // Rerun if the proto file changes
        println!("cargo:rerun-if-changed={proto}");
    }

    Ok(())
}

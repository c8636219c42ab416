fn main() {
    let protowire_files = &["./proto/messages.proto"];
    let dirs = &["./proto"];

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(protowire_files, dirs)
        .unwrap_or_else(|e| panic!("protobuf compile error: {e}"));

    // recompile protobufs only if any of the proto files changes.
    for file in protowire_files {
        println!("cargo:rerun-if-changed={file}");
    }
}

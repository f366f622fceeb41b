// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let proto_root = Path::new("proto");
    let protos = [
        proto_root.join("tracespan/tracespan.proto"),
        proto_root.join("policy/v1beta1/type.proto"),
        proto_root.join("mixer/adapter/model/v1beta1/report.proto"),
    ];
    for proto in &protos {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    // the well-known google types come from the vendored protoc distribution
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    let well_known_types = protoc_bin_vendored::include_path()?;

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&protos, &[proto_root.to_path_buf(), well_known_types])?;

    Ok(())
}

// Code generation for the collector gRPC service.
//
// Messages are hand-written prost structs in `src/proto.rs`, so the service
// is described manually and no protoc toolchain is required.

fn main() {
    let codec = "tonic::codec::ProstCodec";

    let storage = tonic_build::manual::Service::builder()
        .name("Storage")
        .package("collector")
        .method(
            tonic_build::manual::Method::builder()
                .name("update")
                .route_name("Update")
                .input_type("crate::proto::UpdateRequest")
                .output_type("crate::proto::Empty")
                .codec_path(codec)
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("update_many")
                .route_name("UpdateMany")
                .input_type("crate::proto::UpdateManyRequest")
                .output_type("crate::proto::Empty")
                .codec_path(codec)
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("metric")
                .route_name("Metric")
                .input_type("crate::proto::MetricRequest")
                .output_type("crate::proto::MetricResponse")
                .codec_path(codec)
                .build(),
        )
        .method(
            tonic_build::manual::Method::builder()
                .name("all_metrics")
                .route_name("AllMetrics")
                .input_type("crate::proto::Empty")
                .output_type("crate::proto::AllMetricsResponse")
                .codec_path(codec)
                .build(),
        )
        .build();

    tonic_build::manual::Builder::new().compile(&[storage]);

    println!("cargo:rerun-if-changed=build.rs");
}

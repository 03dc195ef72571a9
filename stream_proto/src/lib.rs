pub mod wire;

tonic::include_proto!("stream_classification");

pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("stream_classification_descriptor");

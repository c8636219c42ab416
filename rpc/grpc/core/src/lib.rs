pub mod convert;
pub mod error;
pub mod ext;

pub mod protowire {
    tonic::include_proto!("protowire");
}

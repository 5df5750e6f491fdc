pub mod proto_utils;

pub mod config;
pub mod controller;
pub mod error;
pub mod firewall;
pub mod model;
pub mod naming;
pub mod netns;
pub mod notify;
pub mod options;
pub mod ovs;
pub mod plugin;
pub mod runtime;
pub mod serializer;
pub mod status;
pub mod yaml;

pub mod proto {
    tonic::include_proto!("dovesnap.controller");
}

//! Wire messages of the replication driver protocol
//!
//! Mirrors the `replication.Controller` and `identity.Identity` services
//! spoken by CSI replication sidecars.

use std::collections::HashMap;

use crate::domain::ports::ReplicationSource as DomainSource;

pub const ENABLE_VOLUME_REPLICATION: &str = "/replication.Controller/EnableVolumeReplication";
pub const DISABLE_VOLUME_REPLICATION: &str = "/replication.Controller/DisableVolumeReplication";
pub const PROMOTE_VOLUME: &str = "/replication.Controller/PromoteVolume";
pub const DEMOTE_VOLUME: &str = "/replication.Controller/DemoteVolume";
pub const RESYNC_VOLUME: &str = "/replication.Controller/ResyncVolume";
pub const IDENTITY_PROBE: &str = "/identity.Identity/Probe";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReplicationSource {
    #[prost(oneof = "replication_source::Type", tags = "1, 2")]
    pub r#type: ::core::option::Option<replication_source::Type>,
}

pub mod replication_source {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VolumeSource {
        #[prost(string, tag = "1")]
        pub volume_id: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct VolumeGroupSource {
        #[prost(string, tag = "1")]
        pub volume_group_id: ::prost::alloc::string::String,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Type {
        #[prost(message, tag = "1")]
        Volume(VolumeSource),
        #[prost(message, tag = "2")]
        Volumegroup(VolumeGroupSource),
    }
}

impl From<&DomainSource> for ReplicationSource {
    fn from(source: &DomainSource) -> Self {
        let r#type = match source {
            DomainSource::Volume { volume_id } => {
                replication_source::Type::Volume(replication_source::VolumeSource {
                    volume_id: volume_id.clone(),
                })
            }
            DomainSource::VolumeGroup { volume_group_id } => {
                replication_source::Type::Volumegroup(replication_source::VolumeGroupSource {
                    volume_group_id: volume_group_id.clone(),
                })
            }
        };
        Self {
            r#type: Some(r#type),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnableVolumeReplicationRequest {
    #[prost(string, tag = "1")]
    pub volume_id: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "2")]
    pub parameters: HashMap<String, String>,
    #[prost(map = "string, string", tag = "3")]
    pub secrets: HashMap<String, String>,
    #[prost(string, tag = "4")]
    pub replication_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "5")]
    pub replication_source: ::core::option::Option<ReplicationSource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EnableVolumeReplicationResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisableVolumeReplicationRequest {
    #[prost(string, tag = "1")]
    pub volume_id: ::prost::alloc::string::String,
    #[prost(map = "string, string", tag = "2")]
    pub parameters: HashMap<String, String>,
    #[prost(map = "string, string", tag = "3")]
    pub secrets: HashMap<String, String>,
    #[prost(string, tag = "4")]
    pub replication_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "5")]
    pub replication_source: ::core::option::Option<ReplicationSource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DisableVolumeReplicationResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PromoteVolumeRequest {
    #[prost(string, tag = "1")]
    pub volume_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub force: bool,
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    #[prost(map = "string, string", tag = "4")]
    pub secrets: HashMap<String, String>,
    #[prost(string, tag = "5")]
    pub replication_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "6")]
    pub replication_source: ::core::option::Option<ReplicationSource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PromoteVolumeResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DemoteVolumeRequest {
    #[prost(string, tag = "1")]
    pub volume_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub force: bool,
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    #[prost(map = "string, string", tag = "4")]
    pub secrets: HashMap<String, String>,
    #[prost(string, tag = "5")]
    pub replication_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "6")]
    pub replication_source: ::core::option::Option<ReplicationSource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DemoteVolumeResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResyncVolumeRequest {
    #[prost(string, tag = "1")]
    pub volume_id: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub force: bool,
    #[prost(map = "string, string", tag = "3")]
    pub parameters: HashMap<String, String>,
    #[prost(map = "string, string", tag = "4")]
    pub secrets: HashMap<String, String>,
    #[prost(string, tag = "5")]
    pub replication_id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "6")]
    pub replication_source: ::core::option::Option<ReplicationSource>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResyncVolumeResponse {
    #[prost(bool, tag = "1")]
    pub ready: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProbeRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProbeResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_source_conversion() {
        let source = ReplicationSource::from(&DomainSource::VolumeGroup {
            volume_group_id: "grp-1".into(),
        });
        match source.r#type {
            Some(replication_source::Type::Volumegroup(g)) => {
                assert_eq!(g.volume_group_id, "grp-1")
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_resync_response_decodes_ready_flag() {
        let encoded = ResyncVolumeResponse { ready: true }.encode_to_vec();
        let decoded = ResyncVolumeResponse::decode(encoded.as_slice()).unwrap();
        assert!(decoded.ready);

        // An empty body is a valid response with ready = false
        let decoded = ResyncVolumeResponse::decode(&[][..]).unwrap();
        assert!(!decoded.ready);
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::error::ApiError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MountKind {
    ObjectStore,
    NetworkFilesystem,
    LocalDirectory,
    DistributedDisk,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MountStatus {
    Mounted,
    Unmounted,
    Error,
}

/// A storage mount definition. The shape of `source` depends on the kind:
/// a bucket name for object stores, `host:/export` for network filesystems,
/// an absolute path for local directories and `pool/volume` for distributed
/// disks. A `global` mount is replicated to every node in the owner's
/// cluster on sync.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StorageMount {
    pub id: String,
    pub name: String,
    pub kind: MountKind,
    pub source: String,
    pub mount_point: String,
    pub global: bool,
    pub auto_mount: bool,
    pub status: MountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateMountRequest {
    pub name: String,
    pub kind: MountKind,
    pub source: String,
    pub mount_point: String,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub auto_mount: bool,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
    /// Attempt the mount immediately after the definition is saved.
    #[serde(default)]
    pub do_mount: bool,
}

/// Partial edit. A present field replaces the stored value, an absent field
/// keeps it — in particular for secrets, which are redacted in responses and
/// must never have to be retyped on every edit.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UpdateMountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub mount_point: Option<String>,
    #[serde(default)]
    pub global: Option<bool>,
    #[serde(default)]
    pub auto_mount: Option<bool>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub options: Option<String>,
}

impl StorageMount {
    pub fn from_create(req: CreateMountRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            kind: req.kind,
            source: req.source,
            mount_point: req.mount_point,
            global: req.global,
            auto_mount: req.auto_mount,
            status: MountStatus::Unmounted,
            access_key: req.access_key,
            secret_key: req.secret_key,
            region: req.region,
            endpoint: req.endpoint,
            options: req.options,
        }
    }

    pub fn apply_update(&mut self, upd: UpdateMountRequest) {
        if let Some(name) = upd.name {
            self.name = name;
        }
        if let Some(source) = upd.source {
            self.source = source;
        }
        if let Some(mount_point) = upd.mount_point {
            self.mount_point = mount_point;
        }
        if let Some(global) = upd.global {
            self.global = global;
        }
        if let Some(auto_mount) = upd.auto_mount {
            self.auto_mount = auto_mount;
        }
        if let Some(access_key) = upd.access_key {
            self.access_key = Some(access_key);
        }
        if let Some(secret_key) = upd.secret_key {
            self.secret_key = Some(secret_key);
        }
        if let Some(region) = upd.region {
            self.region = Some(region);
        }
        if let Some(endpoint) = upd.endpoint {
            self.endpoint = Some(endpoint);
        }
        if let Some(options) = upd.options {
            self.options = Some(options);
        }
    }

    /// Copy with credentials stripped; every response body goes through this.
    pub fn redacted(&self) -> StorageMount {
        let mut m = self.clone();
        m.access_key = None;
        m.secret_key = None;
        m
    }

    /// Rejects a definition before any side effect. A definition that
    /// validates but points at an offline backend is still saved; only
    /// malformed definitions are refused.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("mount name is required".into()));
        }
        if !self.mount_point.starts_with('/') {
            return Err(ApiError::Validation(format!(
                "mount point must be an absolute path, got {:?}",
                self.mount_point
            )));
        }
        if self.source.trim().is_empty() {
            return Err(ApiError::Validation("mount source is required".into()));
        }

        match self.kind {
            MountKind::ObjectStore => {
                let has_creds = self
                    .access_key
                    .as_deref()
                    .is_some_and(|k| !k.trim().is_empty())
                    && self
                        .secret_key
                        .as_deref()
                        .is_some_and(|k| !k.trim().is_empty());
                if !has_creds {
                    return Err(ApiError::Validation(
                        "object-store mounts require access_key and secret_key".into(),
                    ));
                }
                if self.source.contains('/') {
                    return Err(ApiError::Validation(
                        "object-store source must be a bare bucket name".into(),
                    ));
                }
            }
            MountKind::NetworkFilesystem => {
                let export = self.source.split_once(':').map(|(host, path)| {
                    (!host.is_empty(), path.starts_with('/'))
                });
                if export != Some((true, true)) {
                    return Err(ApiError::Validation(
                        "network-filesystem source must look like host:/export".into(),
                    ));
                }
            }
            MountKind::LocalDirectory => {
                if !self.source.starts_with('/') {
                    return Err(ApiError::Validation(
                        "local-directory source must be an absolute path".into(),
                    ));
                }
            }
            MountKind::DistributedDisk => {
                if !self.source.contains('/') {
                    return Err(ApiError::Validation(
                        "distributed-disk source must look like pool/volume".into(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_store() -> StorageMount {
        StorageMount::from_create(CreateMountRequest {
            name: "backups".into(),
            kind: MountKind::ObjectStore,
            source: "backups".into(),
            mount_point: "/mnt/backups".into(),
            global: true,
            auto_mount: false,
            access_key: Some("AKIA".into()),
            secret_key: Some("s3cret".into()),
            region: Some("eu-west-1".into()),
            endpoint: None,
            options: None,
            do_mount: false,
        })
    }

    #[test]
    fn object_store_requires_credentials() {
        let mut m = object_store();
        assert!(m.validate().is_ok());
        m.secret_key = None;
        assert!(matches!(m.validate(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn network_fs_source_shape() {
        let mut m = object_store();
        m.kind = MountKind::NetworkFilesystem;
        m.source = "nas01:/exports/data".into();
        m.access_key = None;
        m.secret_key = None;
        assert!(m.validate().is_ok());

        m.source = "nas01".into();
        assert!(m.validate().is_err());
        m.source = ":/exports/data".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn mount_point_must_be_absolute() {
        let mut m = object_store();
        m.mount_point = "relative/path".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn redaction_strips_secrets_only() {
        let m = object_store();
        let r = m.redacted();
        assert!(r.access_key.is_none());
        assert!(r.secret_key.is_none());
        assert_eq!(r.region.as_deref(), Some("eu-west-1"));
        assert_eq!(r.name, m.name);
    }

    #[test]
    fn absent_secret_on_update_keeps_stored_value() {
        let mut m = object_store();
        m.apply_update(UpdateMountRequest {
            name: Some("backups-eu".into()),
            ..Default::default()
        });
        assert_eq!(m.name, "backups-eu");
        assert_eq!(m.secret_key.as_deref(), Some("s3cret"));

        m.apply_update(UpdateMountRequest {
            secret_key: Some("rotated".into()),
            ..Default::default()
        });
        assert_eq!(m.secret_key.as_deref(), Some("rotated"));
    }

    #[test]
    fn kind_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&MountKind::NetworkFilesystem).unwrap(),
            "\"network-filesystem\""
        );
        assert_eq!(
            serde_json::to_string(&MountStatus::Mounted).unwrap(),
            "\"mounted\""
        );
    }
}

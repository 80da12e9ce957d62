/// Cluster name applied to nodes added without an explicit grouping.
pub const DEFAULT_CLUSTER: &str = "default";

pub const NODE_KEY_PREFIX: &str = "node";
pub const MOUNT_KEY_PREFIX: &str = "mount";

/// Path prefix under which requests addressed to a specific peer arrive.
pub const PROXY_PREFIX: &str = "/proxy";
